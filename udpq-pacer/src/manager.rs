use std::{
    fmt,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use tracing::{debug, info, warn};
use udpq_common::BufferPool;
use udpq_transport::{ExplicitSocket, Transmit, UdpSockets};

use crate::{
    driver::{DispatchThread, Dispatcher, Lifecycle},
    queue::{Admission, PendingPacket, QueueTable},
    ConfigError, PacerError, PacerOptions, PacerStats, QueueKey, Rejected,
};

/// Paces packets across many queues, one packet per queue per interval.
///
/// Producers call [`Manager::enqueue`] from any number of threads; it never blocks. One thread
/// runs the dispatch loop ([`Manager::run_dispatch_loop`], [`Manager::process`] or
/// [`Manager::spawn_dispatcher`]) for the lifetime of the manager.
///
/// ## Queues
/// A queue is created by the first packet enqueued for its key and removed by the dispatch
/// loop as soon as a tick leaves it empty. Querying the capacity of a key without a queue
/// reports the full capacity.
///
/// ## Release
/// [`Manager::release`] stops the dispatch loop and drops every queued packet. Afterwards all
/// enqueues fail and every capacity query returns zero. Dropping the manager releases it.
///
/// `H` is the explicit transport handle packets may carry, [`ExplicitSocket`] for the
/// default [`UdpSockets`] transport.
pub struct Manager<H = ExplicitSocket> {
    pub(crate) options: PacerOptions,
    pub(crate) table: QueueTable<H>,
    pool: BufferPool,
    pub(crate) stats: PacerStats,
    pub(crate) released: AtomicBool,
    pub(crate) lifecycle: Lifecycle,
}

impl Manager {
    /// Creates a manager for the default UDP transport with the given queue capacity, tick
    /// interval and maximum packet size.
    pub fn new(
        capacity_per_queue: usize,
        interval: Duration,
        max_packet_size: usize,
    ) -> Result<Self, ConfigError> {
        Self::with_options(
            PacerOptions::default()
                .capacity_per_queue(capacity_per_queue)
                .interval(interval)
                .max_packet_size(max_packet_size),
        )
    }

    /// Binds the default [`UdpSockets`] and runs the dispatch loop on the current thread until
    /// the manager is released.
    pub fn process(&self) -> Result<(), PacerError> {
        let sockets = UdpSockets::bind()?;

        if !sockets.has_v6() && self.options.log_errors {
            warn!("could not bind an IPv6 socket, packets to IPv6 destinations will fail");
        }

        self.run_dispatch_loop(&sockets)
    }
}

impl<H> Manager<H> {
    /// Creates a manager with the given options.
    pub fn with_options(options: PacerOptions) -> Result<Self, ConfigError> {
        options.validate()?;

        debug!(
            capacity = options.capacity_per_queue,
            interval = ?options.interval,
            max_packet_size = options.max_packet_size,
            "creating pacer"
        );

        Ok(Self {
            table: QueueTable::new(options.capacity_per_queue),
            pool: BufferPool::new(options.max_packet_size, options.buffer_pool_size),
            stats: PacerStats::default(),
            released: AtomicBool::new(false),
            lifecycle: Lifecycle::new(),
            options,
        })
    }

    /// Returns the maximum number of packets buffered per queue.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.options.capacity_per_queue
    }

    /// Returns the tick interval.
    #[inline]
    pub fn interval(&self) -> Duration {
        self.options.interval
    }

    /// Returns the largest payload accepted by an enqueue, in bytes.
    #[inline]
    pub fn max_packet_size(&self) -> usize {
        self.options.max_packet_size
    }

    /// Returns the options this manager was built with.
    #[inline]
    pub fn options(&self) -> &PacerOptions {
        &self.options
    }

    /// Returns the manager's counters.
    #[inline]
    pub fn stats(&self) -> &PacerStats {
        &self.stats
    }

    /// Returns the number of live queues.
    pub fn queue_count(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` while a dispatch loop is running.
    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    /// Returns `true` once [`Manager::release`] has been called or the manager was dropped.
    #[inline]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Returns the number of free slots in the queue for `key`. A key without a queue reports
    /// the full capacity, saturating at `u32::MAX`. Returns zero once released.
    pub fn remaining_capacity(&self, key: QueueKey) -> u32 {
        if self.is_released() {
            return 0;
        }

        u32::try_from(self.table.remaining_capacity(key)).unwrap_or(u32::MAX)
    }

    /// Queues a copy of `payload` for `destination` on the queue for `key`, creating the
    /// queue if needed. Returns `false` if the packet was rejected; see
    /// [`Manager::try_enqueue`] for the reason.
    pub fn enqueue(&self, key: QueueKey, payload: &[u8], destination: SocketAddr) -> bool {
        self.try_enqueue(key, payload, destination).is_ok()
    }

    /// Like [`Manager::enqueue`], with the packet sent over `transport` instead of the default
    /// transport.
    pub fn enqueue_with_explicit_transport(
        &self,
        key: QueueKey,
        payload: &[u8],
        destination: SocketAddr,
        transport: H,
    ) -> bool {
        self.try_enqueue_with_explicit_transport(key, payload, destination, transport).is_ok()
    }

    /// Queues a copy of `payload` for `destination` on the queue for `key`.
    ///
    /// Fails without touching any queue if the manager is released, the payload is larger
    /// than the maximum packet size, or the queue is full.
    pub fn try_enqueue(
        &self,
        key: QueueKey,
        payload: &[u8],
        destination: SocketAddr,
    ) -> Result<(), Rejected> {
        self.admit(key, payload, destination, None)
    }

    /// Like [`Manager::try_enqueue`], with the packet sent over `transport` instead of the
    /// default transport.
    pub fn try_enqueue_with_explicit_transport(
        &self,
        key: QueueKey,
        payload: &[u8],
        destination: SocketAddr,
        transport: H,
    ) -> Result<(), Rejected> {
        self.admit(key, payload, destination, Some(transport))
    }

    fn admit(
        &self,
        key: QueueKey,
        payload: &[u8],
        destination: SocketAddr,
        explicit: Option<H>,
    ) -> Result<(), Rejected> {
        if self.is_released() {
            self.stats.increment_rejected_released();
            return Err(Rejected::Released);
        }

        let Some(payload) = self.pool.acquire(payload) else {
            self.stats.increment_rejected_oversized();
            return Err(Rejected::Oversized {
                len: payload.len(),
                max: self.options.max_packet_size,
            });
        };

        match self.table.push(key, PendingPacket { payload, destination, explicit }) {
            Admission::Queued { created } => {
                self.stats.increment_enqueued();

                if created > 0 {
                    self.stats.increment_queues_created(created);
                    self.lifecycle.notify();
                }

                Ok(())
            }
            Admission::Full => {
                self.stats.increment_rejected_full();
                Err(Rejected::QueueFull { key })
            }
            Admission::Closed => {
                self.stats.increment_rejected_released();
                Err(Rejected::Released)
            }
        }
    }

    /// Runs the dispatch loop on the current thread, sending over `transport`, until the
    /// manager is released.
    ///
    /// Only one loop may run per manager: a second call while one is running fails with
    /// [`PacerError::AlreadyRunning`], and a call after release fails with
    /// [`PacerError::Released`].
    pub fn run_dispatch_loop<T>(&self, transport: &T) -> Result<(), PacerError>
    where
        T: Transmit<Handle = H>,
    {
        Dispatcher::new(self, transport).run()
    }

    /// Releases the manager: stops the dispatch loop and drops every queued packet.
    ///
    /// Idempotent and safe to call from any thread. When called from outside the dispatch
    /// thread, it returns only after the loop has exited, so no packet is sent afterwards.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("releasing pacer");

        self.lifecycle.notify();
        self.lifecycle.wait_stopped();
        self.discard();
    }

    /// Drops all queues and pooled buffers.
    pub(crate) fn discard(&self) {
        let dropped = self.table.clear();
        self.pool.close();

        debug!(dropped, "discarded queued packets");
    }
}

impl<H: Send + Sync + 'static> Manager<H> {
    /// Spawns a thread named after [`PacerOptions::thread_name`] that runs the dispatch loop
    /// over `transport`.
    pub fn spawn_dispatcher<T>(self: &Arc<Self>, transport: T) -> Result<DispatchThread, PacerError>
    where
        T: Transmit<Handle = H> + 'static,
    {
        if self.is_released() {
            return Err(PacerError::Released);
        }

        let manager = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(self.options.thread_name.clone())
            .spawn(move || manager.run_dispatch_loop(&transport))?;

        Ok(DispatchThread::new(handle))
    }
}

impl<H> Drop for Manager<H> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<H> fmt::Debug for Manager<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("options", &self.options)
            .field("queues", &self.table.len())
            .field("running", &self.is_running())
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}
