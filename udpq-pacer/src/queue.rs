use std::{collections::VecDeque, net::SocketAddr, sync::Arc};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use udpq_common::PacketBuffer;

use crate::QueueKey;

/// Upper bound on the slots preallocated for a fresh queue. Larger queues grow on demand.
const INITIAL_QUEUE_SLOTS: usize = 32;

/// A packet waiting for its tick.
#[derive(Debug)]
pub(crate) struct PendingPacket<H> {
    /// The payload, copied out of the caller's buffer at enqueue time.
    pub(crate) payload: PacketBuffer,
    pub(crate) destination: SocketAddr,
    /// Overrides the default transport for this packet.
    pub(crate) explicit: Option<H>,
}

/// A bounded FIFO of pending packets for one key.
#[derive(Debug)]
pub(crate) struct Queue<H> {
    packets: VecDeque<PendingPacket<H>>,
    capacity: usize,
    /// Set when the queue has been unlinked from its table. A retired queue accepts nothing.
    retired: bool,
}

impl<H> Queue<H> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            packets: VecDeque::with_capacity(capacity.min(INITIAL_QUEUE_SLOTS)),
            capacity,
            retired: false,
        }
    }

    /// Appends the packet if there is room left. On `false` the queue is left untouched.
    #[inline]
    pub(crate) fn try_push(&mut self, packet: PendingPacket<H>) -> bool {
        if self.retired || self.packets.len() >= self.capacity {
            return false;
        }

        self.packets.push_back(packet);
        true
    }

    #[inline]
    pub(crate) fn pop_front(&mut self) -> Option<PendingPacket<H>> {
        self.packets.pop_front()
    }

    #[inline]
    pub(crate) fn remaining_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.packets.len())
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    #[inline]
    pub(crate) const fn is_retired(&self) -> bool {
        self.retired
    }

    /// Retires the queue and drops its pending packets. Returns how many were dropped.
    fn retire(&mut self) -> usize {
        self.retired = true;
        let dropped = self.packets.len();
        self.packets.clear();
        dropped
    }
}

/// A shared handle to one queue. Content changes go through the per-queue lock.
pub(crate) type QueueRef<H> = Arc<Mutex<Queue<H>>>;

/// The outcome of handing a packet to the [`QueueTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// The packet was queued. `created` counts the queues made for it: more than one if a
    /// queue was unlinked under the producer and made again.
    Queued { created: usize },
    /// The queue for the key is at capacity.
    Full,
    /// The table has been cleared for good.
    Closed,
}

#[derive(Debug)]
struct TableInner<H> {
    queues: FxHashMap<QueueKey, QueueRef<H>>,
    closed: bool,
}

/// The set of live queues, keyed by [`QueueKey`].
///
/// The table lock only guards structural changes (insert and remove). Producers hold it in
/// read mode just long enough to clone a [`QueueRef`]; the dispatcher takes it in write mode
/// to unlink a drained queue.
///
/// A producer may look a queue up right before the dispatcher unlinks it. Removal therefore
/// retires the queue under its own lock, and a producer that finds its queue retired looks the
/// key up again, creating a fresh queue. Packets are never pushed into an unlinked queue.
#[derive(Debug)]
pub(crate) struct QueueTable<H> {
    capacity: usize,
    inner: RwLock<TableInner<H>>,
}

impl<H> QueueTable<H> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: RwLock::new(TableInner { queues: FxHashMap::default(), closed: false }),
        }
    }

    /// Returns the queue for `key`, creating an empty one if it doesn't exist, along with
    /// whether it was created by this call. Returns `None` once the table is closed.
    pub(crate) fn get_or_create(&self, key: QueueKey) -> Option<(QueueRef<H>, bool)> {
        {
            let inner = self.inner.read();
            if inner.closed {
                return None;
            }

            if let Some(queue) = inner.queues.get(&key) {
                return Some((Arc::clone(queue), false));
            }
        }

        let mut inner = self.inner.write();
        if inner.closed {
            return None;
        }

        let capacity = self.capacity;
        let mut created = false;
        let queue = inner.queues.entry(key).or_insert_with(|| {
            created = true;
            Arc::new(Mutex::new(Queue::new(capacity)))
        });

        Some((Arc::clone(queue), created))
    }

    /// Appends `packet` to the queue for `key`, creating the queue if needed.
    pub(crate) fn push(&self, key: QueueKey, packet: PendingPacket<H>) -> Admission {
        let mut created = 0;

        loop {
            let Some((queue_ref, fresh)) = self.get_or_create(key) else {
                return Admission::Closed;
            };
            created += usize::from(fresh);

            let mut queue = queue_ref.lock();
            if queue.is_retired() {
                // Unlinked by the dispatcher between lookup and lock.
                continue;
            }

            return if queue.try_push(packet) { Admission::Queued { created } } else { Admission::Full };
        }
    }

    /// Unlinks the queue for `key` if it holds no packets. Returns `true` if it was removed.
    pub(crate) fn remove_if_empty(&self, key: QueueKey) -> bool {
        let mut inner = self.inner.write();

        let Some(queue) = inner.queues.get(&key) else {
            return false;
        };

        {
            let mut queue = queue.lock();
            if !queue.is_empty() {
                return false;
            }
            queue.retire();
        }

        inner.queues.remove(&key);
        true
    }

    /// Copies the current queues into `out`. The table lock is released before returning, so
    /// a slow tick never blocks producers.
    pub(crate) fn snapshot_keys(&self, out: &mut Vec<(QueueKey, QueueRef<H>)>) {
        let inner = self.inner.read();
        out.reserve(inner.queues.len());
        out.extend(inner.queues.iter().map(|(key, queue)| (*key, Arc::clone(queue))));
    }

    /// Returns the free slots in the queue for `key`. An absent queue counts as empty.
    pub(crate) fn remaining_capacity(&self, key: QueueKey) -> usize {
        let inner = self.inner.read();
        if inner.closed {
            return 0;
        }

        inner.queues.get(&key).map_or(self.capacity, |queue| queue.lock().remaining_capacity())
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.read().queues.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.read().queues.is_empty()
    }

    /// Closes the table and drops every queue. Returns the number of packets discarded.
    pub(crate) fn clear(&self) -> usize {
        let mut inner = self.inner.write();
        inner.closed = true;

        inner
            .queues
            .drain()
            .map(|(_, queue)| {
                let dropped = queue.lock().retire();
                dropped
            })
            .sum()
    }
}
