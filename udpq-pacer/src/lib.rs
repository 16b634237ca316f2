//! Paced delivery of UDP datagrams over many independent queues.
//!
//! Every destination (a connected peer, a voice session, ...) gets its own bounded queue,
//! identified by a caller-chosen [`QueueKey`]. A single dispatch thread wakes up once per
//! interval and sends at most one packet from every queue, so each destination receives a
//! steady stream no matter how bursty the producers are.
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use udpq_pacer::Manager;
//!
//! let manager = Arc::new(Manager::new(20, Duration::from_millis(20), 4096).unwrap());
//!
//! let dispatcher = Arc::clone(&manager);
//! std::thread::spawn(move || dispatcher.process());
//!
//! let peer = "203.0.113.7:50000".parse().unwrap();
//! assert!(manager.enqueue(1, b"opus frame", peer));
//!
//! manager.release();
//! ```

use std::{io, time::Duration};

use thiserror::Error;
use udpq_common::constants::{KiB, MAX_UDP_PAYLOAD};

mod driver;
pub use driver::DispatchThread;

mod manager;
pub use manager::Manager;

mod queue;

mod stats;
pub use stats::PacerStats;

pub use udpq_transport::{ExplicitSocket, Transmit, UdpSockets};

/// Identifies one pacing queue. The pacer attaches no meaning to it.
pub type QueueKey = u64;

/// The default maximum number of packets buffered per queue.
const DEFAULT_QUEUE_CAPACITY: usize = 20;
/// The default tick interval.
const DEFAULT_INTERVAL: Duration = Duration::from_millis(20);
/// The default maximum packet size.
const DEFAULT_MAX_PACKET_SIZE: usize = 4 * KiB;
/// The default number of free packet buffers kept for reuse.
const DEFAULT_BUFFER_POOL_SIZE: usize = 1024;

/// Invalid construction parameters.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The per-queue capacity is zero.
    #[error("Queue capacity must be greater than zero")]
    ZeroCapacity,
    /// The tick interval is zero.
    #[error("Packet interval must be greater than zero")]
    ZeroInterval,
    /// The maximum packet size is zero.
    #[error("Maximum packet size must be greater than zero")]
    ZeroPacketSize,
    /// The maximum packet size does not fit in a single datagram.
    #[error("Maximum packet size {size} exceeds the UDP payload limit of {max} bytes")]
    PacketSizeTooLarge { size: usize, max: usize },
}

/// Errors from running the dispatch loop.
#[derive(Debug, Error)]
pub enum PacerError {
    /// Binding the default sockets or spawning the dispatch thread failed.
    #[error("IO error: {0:?}")]
    Io(#[from] io::Error),
    /// Invalid options.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// A dispatch loop is already running for this manager.
    #[error("Dispatch loop is already running")]
    AlreadyRunning,
    /// The manager was released before the loop could start.
    #[error("Manager released")]
    Released,
    /// The dispatch thread panicked outside of a transmission.
    #[error("Dispatch thread panicked")]
    DispatchPanicked,
}

/// The reason an enqueue was refused. Rejections are routine under load and leave every
/// queue untouched.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    #[error("Manager released")]
    Released,
    #[error("Payload of {len} bytes exceeds the maximum packet size of {max} bytes")]
    Oversized { len: usize, max: usize },
    #[error("Queue {key} is full")]
    QueueFull { key: QueueKey },
}

/// Pacer options. All of them are fixed once the [`Manager`] is built.
#[derive(Debug, Clone)]
pub struct PacerOptions {
    /// The maximum number of packets buffered per queue.
    capacity_per_queue: usize,
    /// The tick interval. Every queue sends at most one packet per interval.
    interval: Duration,
    /// The maximum size of a single payload, in bytes.
    max_packet_size: usize,
    /// The maximum number of free packet buffers kept around for reuse.
    buffer_pool_size: usize,
    /// Whether transmit failures are logged. They are always counted.
    log_errors: bool,
    /// The name of the thread spawned by [`Manager::spawn_dispatcher`].
    thread_name: String,
}

impl Default for PacerOptions {
    fn default() -> Self {
        Self {
            capacity_per_queue: DEFAULT_QUEUE_CAPACITY,
            interval: DEFAULT_INTERVAL,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            buffer_pool_size: DEFAULT_BUFFER_POOL_SIZE,
            log_errors: true,
            thread_name: String::from("udpq-dispatch"),
        }
    }
}

impl PacerOptions {
    /// Sets the maximum number of packets buffered per queue. Enqueues beyond this fail.
    pub fn capacity_per_queue(mut self, capacity_per_queue: usize) -> Self {
        self.capacity_per_queue = capacity_per_queue;
        self
    }

    /// Sets the tick interval.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the maximum payload size. Larger payloads are rejected at enqueue time.
    pub fn max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    /// Sets how many free packet buffers are kept for reuse. Buffers beyond this are freed
    /// once sent.
    pub fn buffer_pool_size(mut self, buffer_pool_size: usize) -> Self {
        self.buffer_pool_size = buffer_pool_size;
        self
    }

    /// Sets whether transmit failures are logged. Defaults to `true`.
    pub fn log_errors(mut self, log_errors: bool) -> Self {
        self.log_errors = log_errors;
        self
    }

    /// Sets the name of the dispatch thread spawned by [`Manager::spawn_dispatcher`].
    pub fn thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    /// Checks that capacity, interval and packet size are non-zero, and that the packet size
    /// fits in a single datagram.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity_per_queue == 0 {
            return Err(ConfigError::ZeroCapacity);
        }

        if self.interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }

        if self.max_packet_size == 0 {
            return Err(ConfigError::ZeroPacketSize);
        }

        if self.max_packet_size > MAX_UDP_PAYLOAD {
            return Err(ConfigError::PacketSizeTooLarge {
                size: self.max_packet_size,
                max: MAX_UDP_PAYLOAD,
            });
        }

        Ok(())
    }
}
