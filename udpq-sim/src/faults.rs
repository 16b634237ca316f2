use std::{
    io,
    net::SocketAddr,
    sync::atomic::{AtomicUsize, Ordering},
    thread,
    time::Duration,
};

use parking_lot::Mutex;
use rand::Rng;
use tracing::trace;
use udpq_transport::Transmit;

/// Blocks the next transmission, simulating a stalled send or a descheduled dispatch thread.
#[derive(Debug)]
pub struct Stall<T> {
    inner: T,
    pause: Mutex<Option<Duration>>,
}

impl<T> Stall<T> {
    pub fn new(inner: T) -> Self {
        Self { inner, pause: Mutex::new(None) }
    }

    /// Makes the next transmission sleep for `duration` before it is forwarded.
    pub fn pause_next(&self, duration: Duration) {
        *self.pause.lock() = Some(duration);
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: Transmit> Transmit for Stall<T> {
    type Handle = T::Handle;

    fn transmit(
        &self,
        payload: &[u8],
        destination: SocketAddr,
        explicit: Option<&Self::Handle>,
    ) -> io::Result<usize> {
        let pause = self.pause.lock().take();
        if let Some(pause) = pause {
            trace!(?pause, "stalling transmission");
            thread::sleep(pause);
        }

        self.inner.transmit(payload, destination, explicit)
    }
}

/// Delays every transmission by a uniformly random duration up to a maximum.
#[derive(Debug)]
pub struct Jitter<T> {
    inner: T,
    max_delay: Duration,
}

impl<T> Jitter<T> {
    pub fn new(inner: T, max_delay: Duration) -> Self {
        Self { inner, max_delay }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: Transmit> Transmit for Jitter<T> {
    type Handle = T::Handle;

    fn transmit(
        &self,
        payload: &[u8],
        destination: SocketAddr,
        explicit: Option<&Self::Handle>,
    ) -> io::Result<usize> {
        let max = self.max_delay.as_micros() as u64;
        if max > 0 {
            let delay = rand::thread_rng().gen_range(0..=max);
            thread::sleep(Duration::from_micros(delay));
        }

        self.inner.transmit(payload, destination, explicit)
    }
}

/// Fails every n-th transmission without forwarding it.
#[derive(Debug)]
pub struct Failing<T> {
    inner: T,
    every: usize,
    attempts: AtomicUsize,
}

impl<T> Failing<T> {
    /// Fails attempts `every`, `2 * every`, ... An `every` of zero never fails.
    pub fn new(inner: T, every: usize) -> Self {
        Self { inner, every, attempts: AtomicUsize::new(0) }
    }

    /// Returns the number of transmissions attempted, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: Transmit> Transmit for Failing<T> {
    type Handle = T::Handle;

    fn transmit(
        &self,
        payload: &[u8],
        destination: SocketAddr,
        explicit: Option<&Self::Handle>,
    ) -> io::Result<usize> {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;

        if self.every != 0 && attempt % self.every == 0 {
            return Err(io::Error::other(format!("injected failure on attempt {attempt}")));
        }

        self.inner.transmit(payload, destination, explicit)
    }
}
