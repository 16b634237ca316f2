use std::{
    fmt, io,
    net::SocketAddr,
    time::{Duration, Instant},
};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use udpq_transport::{ExplicitSocket, Transmit};

/// One datagram captured by a [`Recorder`].
#[derive(Debug, Clone)]
pub struct Transmission<H = ExplicitSocket> {
    pub payload: Bytes,
    pub destination: SocketAddr,
    /// The explicit transport the packet carried, if any.
    pub explicit: Option<H>,
    /// When the recorder received the packet.
    pub at: Instant,
}

/// A transport that stores every datagram instead of sending it.
///
/// Share it with the dispatch thread through an `Arc`; `Arc<Recorder>` is itself a transport.
pub struct Recorder<H = ExplicitSocket> {
    sent: Mutex<Vec<Transmission<H>>>,
    cond: Condvar,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<H> Default for Recorder<H> {
    fn default() -> Self {
        Self { sent: Mutex::new(Vec::new()), cond: Condvar::new() }
    }
}

impl<H: Clone> Recorder<H> {
    /// Returns a copy of everything recorded so far, in transmission order.
    pub fn transmissions(&self) -> Vec<Transmission<H>> {
        self.sent.lock().clone()
    }

    /// Returns the transmissions to `destination`, in order.
    pub fn sent_to(&self, destination: SocketAddr) -> Vec<Transmission<H>> {
        self.sent.lock().iter().filter(|t| t.destination == destination).cloned().collect()
    }
}

impl<H> Recorder<H> {
    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocks until at least `n` transmissions were recorded or `timeout` elapses. Returns
    /// whether `n` was reached.
    pub fn wait_for(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut sent = self.sent.lock();

        while sent.len() < n {
            if self.cond.wait_until(&mut sent, deadline).timed_out() {
                return sent.len() >= n;
            }
        }

        true
    }
}

impl<H: Clone + Send + Sync> Transmit for Recorder<H> {
    type Handle = H;

    fn transmit(
        &self,
        payload: &[u8],
        destination: SocketAddr,
        explicit: Option<&H>,
    ) -> io::Result<usize> {
        let transmission = Transmission {
            payload: Bytes::copy_from_slice(payload),
            destination,
            explicit: explicit.cloned(),
            at: Instant::now(),
        };

        self.sent.lock().push(transmission);
        self.cond.notify_all();

        Ok(payload.len())
    }
}

impl<H> fmt::Debug for Recorder<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recorder").field("recorded", &self.len()).finish()
    }
}
