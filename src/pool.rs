//! Frame buffer pool
//!
//! Pre-allocated, reusable byte blocks for raw RGBA frame data. Acquiring a
//! buffer reuses any idle block whose capacity is at least the requested
//! size, so resolution-scale changes do not churn allocations. Buffers
//! return to the pool automatically when dropped; the pool tracks
//! outstanding acquisitions so leaks can be reported at shutdown.
//!
//! ## Usage
//!
//! ```rust
//! use frameboost::pool::FrameBufferPool;
//!
//! let pool = FrameBufferPool::new(8);
//! let buf = pool.acquire(1920 * 1080 * 4).unwrap();
//! // ... fill and use the buffer ...
//! drop(buf); // returns to the pool
//! assert_eq!(pool.check_leaks(), 0);
//! ```

use std::sync::{Arc, Mutex, Weak};

use tracing::warn;

use crate::error::{Error, Result};

/// Statistics for buffer pool usage
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of fresh allocations (not reuses)
    pub allocations: u64,
    /// Number of times an idle buffer was reused
    pub reuses: u64,
    /// Number of buffers returned to the pool
    pub returns: u64,
    /// Number of returned buffers dropped because the pool was full
    pub drops: u64,
    /// Current number of idle buffers
    pub current_idle: usize,
    /// Current number of buffers held by callers
    pub current_in_use: usize,
    /// Peak number of buffers held simultaneously
    pub peak_usage: usize,
    /// Total bytes allocated over the pool's lifetime
    pub total_bytes_allocated: usize,
}

impl PoolStats {
    /// Reuse ratio over all acquisitions
    pub fn reuse_ratio(&self) -> f64 {
        let total = self.allocations + self.reuses;
        if total == 0 {
            0.0
        } else {
            self.reuses as f64 / total as f64
        }
    }
}

struct PoolInner {
    idle: Mutex<Vec<Vec<u8>>>,
    stats: Mutex<PoolStats>,
    max_idle: usize,
}

impl PoolInner {
    fn return_block(&self, block: Vec<u8>) {
        let mut idle = self.idle.lock().unwrap();
        let mut stats = self.stats.lock().unwrap();
        stats.returns += 1;
        stats.current_in_use = stats.current_in_use.saturating_sub(1);
        if idle.len() < self.max_idle {
            idle.push(block);
            stats.current_idle = idle.len();
        } else {
            stats.drops += 1;
        }
    }
}

/// A pooled frame buffer
///
/// Owns a block of at least the requested size, zeroed on acquisition.
/// Dropping the buffer returns the block to the pool; a buffer therefore
/// cannot be released twice.
pub struct FrameBuffer {
    data: Option<Vec<u8>>,
    len: usize,
    pool: Weak<PoolInner>,
}

impl FrameBuffer {
    /// Requested length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the requested length is zero
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Capacity of the underlying block
    pub fn capacity(&self) -> usize {
        self.data.as_ref().map_or(0, |d| d.capacity())
    }

    /// Immutable access to the buffer contents
    pub fn data(&self) -> &[u8] {
        self.data.as_ref().map_or(&[], |d| &d[..self.len])
    }

    /// Mutable access to the buffer contents
    pub fn data_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        self.data.as_mut().map_or(&mut [], |d| &mut d[..len])
    }

    /// Copy `src` into the buffer; lengths must match
    pub fn copy_from_slice(&mut self, src: &[u8]) -> Result<()> {
        if src.len() != self.len {
            return Err(Error::invalid_input(format!(
                "buffer length mismatch: have {}, got {}",
                self.len,
                src.len()
            )));
        }
        self.data_mut().copy_from_slice(src);
        Ok(())
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        if let Some(block) = self.data.take() {
            if let Some(pool) = self.pool.upgrade() {
                pool.return_block(block);
            }
        }
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Frame buffer pool
///
/// Thread-safe; shared between the ingestion path and worker threads.
/// Allocation failure under memory pressure is surfaced as
/// [`Error::Allocation`] rather than aborting.
#[derive(Clone)]
pub struct FrameBufferPool {
    inner: Arc<PoolInner>,
}

impl FrameBufferPool {
    /// Create a pool that keeps at most `max_idle` idle blocks
    pub fn new(max_idle: usize) -> Self {
        FrameBufferPool {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::new()),
                stats: Mutex::new(PoolStats::default()),
                max_idle,
            }),
        }
    }

    /// Acquire a zeroed buffer of at least `size_bytes`
    ///
    /// Reuses any idle block whose capacity covers the request; otherwise
    /// allocates a fresh block.
    pub fn acquire(&self, size_bytes: usize) -> Result<FrameBuffer> {
        let mut idle = self.inner.idle.lock().unwrap();
        let mut stats = self.inner.stats.lock().unwrap();

        let pos = idle.iter().position(|b| b.capacity() >= size_bytes);
        let block = if let Some(idx) = pos {
            stats.reuses += 1;
            let mut block = idle.swap_remove(idx);
            stats.current_idle = idle.len();
            block.clear();
            block.resize(size_bytes, 0);
            block
        } else {
            let mut block = Vec::new();
            block
                .try_reserve_exact(size_bytes)
                .map_err(|_| Error::Allocation { size: size_bytes })?;
            block.resize(size_bytes, 0);
            stats.allocations += 1;
            stats.total_bytes_allocated += size_bytes;
            block
        };

        stats.current_in_use += 1;
        if stats.current_in_use > stats.peak_usage {
            stats.peak_usage = stats.current_in_use;
        }

        Ok(FrameBuffer {
            data: Some(block),
            len: size_bytes,
            pool: Arc::downgrade(&self.inner),
        })
    }

    /// Number of buffers still held by callers
    ///
    /// Diagnostic for shutdown: a non-zero count means some stage never
    /// dropped its buffer. Logs a warning when leaks are found.
    pub fn check_leaks(&self) -> usize {
        let outstanding = self.inner.stats.lock().unwrap().current_in_use;
        if outstanding > 0 {
            warn!(outstanding, "frame buffers still outstanding at leak check");
        }
        outstanding
    }

    /// Drop all idle blocks
    pub fn clear(&self) {
        let mut idle = self.inner.idle.lock().unwrap();
        let mut stats = self.inner.stats.lock().unwrap();
        idle.clear();
        stats.current_idle = 0;
    }

    /// Snapshot of pool statistics
    pub fn stats(&self) -> PoolStats {
        self.inner.stats.lock().unwrap().clone()
    }

    /// Number of idle blocks
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().unwrap().len()
    }
}

impl std::fmt::Debug for FrameBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBufferPool")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_reacquire() {
        let pool = FrameBufferPool::new(4);

        let buf = pool.acquire(256).unwrap();
        assert_eq!(buf.len(), 256);
        assert!(buf.data().iter().all(|&b| b == 0));
        drop(buf);

        let buf2 = pool.acquire(256).unwrap();
        assert!(buf2.capacity() >= 256);
        drop(buf2);

        let stats = pool.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.reuses, 1);
        assert_eq!(pool.check_leaks(), 0);
    }

    #[test]
    fn test_reuse_by_capacity_not_exact_size() {
        let pool = FrameBufferPool::new(4);

        // A larger buffer returned to the pool satisfies a smaller request.
        drop(pool.acquire(1024).unwrap());
        let small = pool.acquire(512).unwrap();
        assert_eq!(small.len(), 512);
        assert!(small.capacity() >= 1024);

        let stats = pool.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.reuses, 1);
    }

    #[test]
    fn test_reused_buffer_is_zeroed() {
        let pool = FrameBufferPool::new(4);

        let mut buf = pool.acquire(64).unwrap();
        buf.data_mut().fill(0xAB);
        drop(buf);

        let buf = pool.acquire(64).unwrap();
        assert!(buf.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_leak_detection() {
        let pool = FrameBufferPool::new(4);

        let _held = pool.acquire(64).unwrap();
        assert_eq!(pool.check_leaks(), 1);
        drop(_held);
        assert_eq!(pool.check_leaks(), 0);
    }

    #[test]
    fn test_max_idle_drops_excess() {
        let pool = FrameBufferPool::new(1);

        let a = pool.acquire(64).unwrap();
        let b = pool.acquire(64).unwrap();
        drop(a);
        drop(b);

        let stats = pool.stats();
        assert_eq!(stats.current_idle, 1);
        assert_eq!(stats.drops, 1);
    }

    #[test]
    fn test_copy_from_slice_length_check() {
        let pool = FrameBufferPool::new(2);
        let mut buf = pool.acquire(4).unwrap();

        assert!(buf.copy_from_slice(&[1, 2, 3, 4]).is_ok());
        assert_eq!(buf.data(), &[1, 2, 3, 4]);
        assert!(buf.copy_from_slice(&[1, 2]).is_err());
    }

    #[test]
    fn test_thread_safety() {
        use std::thread;

        let pool = FrameBufferPool::new(8);
        let mut handles = vec![];
        for _ in 0..4 {
            let pool = pool.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..10 {
                    let _buf = pool.acquire(4096).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.allocations + stats.reuses, 40);
        assert_eq!(stats.current_in_use, 0);
    }
}
