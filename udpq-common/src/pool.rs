use std::{
    fmt,
    ops::Deref,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};

use bytes::BytesMut;
use parking_lot::Mutex;

/// A bounded pool of fixed-size packet buffers.
///
/// Every buffer handed out by the pool has a capacity of exactly `buffer_size` bytes. When a
/// [`PacketBuffer`] is dropped, its allocation goes back to the pool (up to `max_pooled` free
/// buffers), so steady-state enqueueing does not allocate.
#[derive(Debug)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    /// The capacity of every buffer in the pool.
    buffer_size: usize,
    /// The maximum number of free buffers kept around.
    max_pooled: usize,
    /// Free buffers, ready to be handed out.
    free: Mutex<Vec<BytesMut>>,
    /// Once closed, returned buffers are freed instead of recycled.
    closed: AtomicBool,
}

impl PoolInner {
    fn recycle(&self, mut buf: BytesMut) {
        if self.closed.load(Ordering::Acquire) || buf.capacity() < self.buffer_size {
            return;
        }

        buf.clear();

        let mut free = self.free.lock();
        if free.len() < self.max_pooled {
            free.push(buf);
        }
    }
}

impl BufferPool {
    /// Creates a new pool of buffers of `buffer_size` bytes, keeping at most `max_pooled` free
    /// buffers around. Buffers are allocated lazily.
    pub fn new(buffer_size: usize, max_pooled: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                buffer_size,
                max_pooled,
                free: Mutex::new(Vec::with_capacity(max_pooled.min(64))),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the capacity of the buffers in this pool.
    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Returns the number of free buffers currently held by the pool.
    #[inline]
    pub fn pooled(&self) -> usize {
        self.inner.free.lock().len()
    }

    /// Copies `payload` into a pooled buffer. Returns `None` if the payload does not fit.
    pub fn acquire(&self, payload: &[u8]) -> Option<PacketBuffer> {
        if payload.len() > self.inner.buffer_size {
            return None;
        }

        let mut buf = self
            .inner
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.inner.buffer_size));
        buf.extend_from_slice(payload);

        Some(PacketBuffer { buf, pool: Arc::downgrade(&self.inner) })
    }

    /// Frees all pooled buffers and stops recycling. Buffers still in flight are freed when
    /// they are dropped.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let free = std::mem::take(&mut *self.inner.free.lock());
        tracing::debug!(freed = free.len(), "buffer pool closed");
    }

    /// Returns `true` if [`BufferPool::close`] has been called.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

/// A packet payload stored in a buffer borrowed from a [`BufferPool`].
///
/// Derefs to the payload bytes. The buffer is handed back to its pool on drop.
pub struct PacketBuffer {
    buf: BytesMut,
    pool: Weak<PoolInner>,
}

impl PacketBuffer {
    /// Returns the payload length.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns the capacity of the underlying buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }
}

impl Deref for PacketBuffer {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl AsRef<[u8]> for PacketBuffer {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuffer")
            .field("len", &self.buf.len())
            .field("capacity", &self.buf.capacity())
            .finish()
    }
}

impl Drop for PacketBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.recycle(std::mem::take(&mut self.buf));
        }
    }
}
