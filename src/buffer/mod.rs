//! Pooled byte buffers for frame storage.

mod pool;

pub use pool::{BufferPool, PooledBuffer, POOL_BUFFER_SIZE, POOL_FRONT_MARGIN};
