use std::sync::{Arc, Mutex};

/// Default capacity of a pooled buffer: enough for `V1_MIN_FRAME` plus a
/// max-size payload, switch block, auth trailer and appendix.
pub const POOL_BUFFER_SIZE: usize = 9000;

/// Bytes reserved at the front of every pooled buffer so that transports
/// can prepend link-layer framing in place without reallocating.
pub const POOL_FRONT_MARGIN: usize = 128;

/// A pool of same-sized byte buffers. Borrowing hands out exclusive
/// ownership of one buffer; dropping the handle returns it to the pool.
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    buffer_size: usize,
}

impl BufferPool {
    pub fn new(buffer_size: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::new()),
            buffer_size,
        })
    }

    /// A pool sized for `POOL_BUFFER_SIZE`-byte frame buffers.
    pub fn with_default_size() -> Arc<Self> {
        Self::new(POOL_BUFFER_SIZE)
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Borrows a buffer, reusing a freed one if available.
    pub fn borrow(self: &Arc<Self>) -> PooledBuffer {
        let data = {
            let mut free = self.free.lock().expect("buffer pool mutex poisoned");
            free.pop()
        }
        .unwrap_or_else(|| vec![0u8; self.buffer_size]);

        PooledBuffer {
            pool: Arc::clone(self),
            data: Some(data),
        }
    }

    fn reclaim(&self, mut data: Vec<u8>) {
        data.clear();
        data.resize(self.buffer_size, 0);
        let mut free = self.free.lock().expect("buffer pool mutex poisoned");
        free.push(data);
    }

    /// Number of buffers currently sitting idle in the pool.
    pub fn free_count(&self) -> usize {
        self.free.lock().expect("buffer pool mutex poisoned").len()
    }
}

/// An exclusively-owned buffer borrowed from a `BufferPool`.
///
/// There is exactly one live reference at a time; the underlying storage
/// returns to the pool when this handle is dropped.
pub struct PooledBuffer {
    pool: Arc<BufferPool>,
    data: Option<Vec<u8>>,
}

impl PooledBuffer {
    pub fn as_slice(&self) -> &[u8] {
        self.data.as_deref().expect("buffer already released")
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().expect("buffer already released")
    }

    pub fn capacity(&self) -> usize {
        self.data.as_ref().map(|d| d.len()).unwrap_or(0)
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.pool.reclaim(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn borrowed_buffer_is_reused_after_drop() {
        let pool = BufferPool::new(64);
        assert_eq!(pool.free_count(), 0);
        {
            let mut buf = pool.borrow();
            buf.as_mut_slice()[0] = 0xaa;
        }
        assert_eq!(pool.free_count(), 1);
        let buf = pool.borrow();
        assert_eq!(pool.free_count(), 0);
        // reclaimed buffers are zeroed before reuse
        assert_eq!(buf.as_slice()[0], 0);
    }

    #[test]
    fn concurrent_borrows_are_independent() {
        let pool = BufferPool::new(16);
        let mut a = pool.borrow();
        let mut b = pool.borrow();
        a.as_mut_slice()[0] = 1;
        b.as_mut_slice()[0] = 2;
        assert_eq!(a.as_slice()[0], 1);
        assert_eq!(b.as_slice()[0], 2);
    }
}
