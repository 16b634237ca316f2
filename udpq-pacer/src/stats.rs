use std::sync::atomic::{AtomicUsize, Ordering};

/// Statistics for a pacer. These are shared between the dispatch thread and the producers.
#[derive(Debug, Default)]
pub struct PacerStats {
    /// Total packets accepted into a queue
    enqueued: AtomicUsize,
    /// Total packets rejected because their queue was full
    rejected_full: AtomicUsize,
    /// Total packets rejected because they exceeded the maximum packet size
    rejected_oversized: AtomicUsize,
    /// Total packets rejected because the manager was released
    rejected_released: AtomicUsize,
    /// Total packets handed to the transport successfully
    packets_tx: AtomicUsize,
    /// Total bytes sent
    bytes_tx: AtomicUsize,
    /// Total packets dropped because the transport failed
    transmit_failures: AtomicUsize,
    /// Total dispatch ticks
    ticks: AtomicUsize,
    /// Total ticks that finished after the next tick was due
    overruns: AtomicUsize,
    /// Total queues created by enqueues
    queues_created: AtomicUsize,
    /// Total drained queues removed by the dispatch loop
    queues_removed: AtomicUsize,
}

impl PacerStats {
    #[inline]
    pub(crate) fn increment_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_rejected_full(&self) {
        self.rejected_full.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_rejected_oversized(&self) {
        self.rejected_oversized.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_rejected_released(&self) {
        self.rejected_released.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_tx(&self, bytes: usize) {
        self.packets_tx.fetch_add(1, Ordering::Relaxed);
        self.bytes_tx.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_transmit_failures(&self) {
        self.transmit_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_ticks(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_overruns(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_queues_created(&self, n: usize) {
        self.queues_created.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_queues_removed(&self) {
        self.queues_removed.fetch_add(1, Ordering::Relaxed);
    }

    /// Packets accepted into a queue.
    #[inline]
    pub fn enqueued(&self) -> usize {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Packets rejected because their queue was full.
    #[inline]
    pub fn rejected_full(&self) -> usize {
        self.rejected_full.load(Ordering::Relaxed)
    }

    /// Packets rejected for exceeding the maximum packet size.
    #[inline]
    pub fn rejected_oversized(&self) -> usize {
        self.rejected_oversized.load(Ordering::Relaxed)
    }

    /// Packets rejected because the manager was released.
    #[inline]
    pub fn rejected_released(&self) -> usize {
        self.rejected_released.load(Ordering::Relaxed)
    }

    /// Total rejected enqueues, for any reason.
    #[inline]
    pub fn rejected(&self) -> usize {
        self.rejected_full() + self.rejected_oversized() + self.rejected_released()
    }

    /// Packets the transport sent successfully.
    #[inline]
    pub fn packets_tx(&self) -> usize {
        self.packets_tx.load(Ordering::Relaxed)
    }

    /// Bytes the transport sent successfully.
    #[inline]
    pub fn bytes_tx(&self) -> usize {
        self.bytes_tx.load(Ordering::Relaxed)
    }

    /// Packets dropped because the transport failed or panicked.
    #[inline]
    pub fn transmit_failures(&self) -> usize {
        self.transmit_failures.load(Ordering::Relaxed)
    }

    /// Dispatch ticks run.
    #[inline]
    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Ticks that finished after the next tick was due.
    #[inline]
    pub fn overruns(&self) -> usize {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Queues created by enqueues.
    #[inline]
    pub fn queues_created(&self) -> usize {
        self.queues_created.load(Ordering::Relaxed)
    }

    /// Drained queues removed by the dispatch loop.
    #[inline]
    pub fn queues_removed(&self) -> usize {
        self.queues_removed.load(Ordering::Relaxed)
    }
}
