//! Bounded pool of reusable byte buffers (component A).
//!
//! Acquire blocks waiting on an available buffer. Release causes one blocked acquisition to
//! unblock. `shutdown_and_wait` must be called when finished with the pool; after that `acquire`
//! must never be called again.

use log::debug;
use parking_lot::{Condvar, Mutex};

/// A fixed-capacity byte buffer, allocated once and reused. Pool hand-off is exclusive: only one
/// holder has the buffer at a time, so no sharing wrapper is needed.
pub type Buffer = Vec<u8>;

struct Inner {
    buffers: Vec<Buffer>,
    shutdown: bool,
}

/// A bounded pool of reusable buffers with block/wait acquire and shutdown drain.
///
/// One mutex plus one condition variable gates the internal vector; no nested locks are held
/// across the wait.
pub struct BufferPool {
    inner: Mutex<Inner>,
    available: Condvar,
}

impl BufferPool {
    /// Construct an empty pool. Use [`BufferPool::put`] to seed it.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                buffers: Vec::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Construct a pool pre-seeded with `count` buffers of `capacity` bytes each.
    pub fn with_buffers(count: usize, capacity: usize) -> Self {
        let pool = Self::new();
        for _ in 0..count {
            pool.put(vec![0u8; capacity]);
        }
        pool
    }

    /// Insert a buffer; non-blocking, construction-only use. Does not touch the condvar.
    pub fn put(&self, buf: Buffer) {
        self.inner.lock().buffers.push(buf);
    }

    /// Return whether or not a buffer is currently available for acquisition.
    ///
    /// This is only a hint: it may be stale by the time the caller acts on it.
    pub fn available(&self) -> bool {
        let inner = self.inner.lock();
        !inner.buffers.is_empty() && !inner.shutdown
    }

    /// Block until a buffer is available or the pool is shut down.
    ///
    /// Fails only if the pool has been shut down.
    pub fn acquire(&self) -> Result<Buffer, crate::error::ObjectFsError> {
        let mut inner = self.inner.lock();
        loop {
            if inner.shutdown {
                return Err(crate::error::ObjectFsError::new(
                    crate::error::ErrorKind::PoolShutdown,
                    "buffer pool acquire after shutdown",
                ));
            }
            if let Some(buf) = inner.buffers.pop() {
                return Ok(buf);
            }
            self.available.wait(&mut inner);
        }
    }

    /// Return a buffer to the pool; wakes exactly one acquirer.
    pub fn release(&self, buf: Buffer) {
        self.inner.lock().buffers.push(buf);
        self.available.notify_one();
    }

    /// Set the shut-down flag and block until the pool holds at least `expected_count` buffers,
    /// then drain and return them. After this returns, `acquire` must never be called again.
    pub fn shutdown_and_wait(&self, expected_count: usize) -> Vec<Buffer> {
        let mut inner = self.inner.lock();
        inner.shutdown = true;
        self.available.notify_all();
        while inner.buffers.len() < expected_count {
            self.available.wait(&mut inner);
        }
        debug!("buffer pool drained {} buffers on shutdown", inner.buffers.len());
        std::mem::take(&mut inner.buffers)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn acquire_release_preserves_count() {
        let pool = BufferPool::with_buffers(5, 10);
        let mut held = Vec::new();
        for _ in 0..5 {
            held.push(pool.acquire().unwrap());
        }
        assert!(!pool.available());
        for buf in held {
            pool.release(buf);
        }
        assert!(pool.available());
    }

    #[test]
    fn acquire_blocks_until_release() {
        let pool = Arc::new(BufferPool::with_buffers(1, 4));
        let buf = pool.acquire().unwrap();

        let pool2 = pool.clone();
        let handle = thread::spawn(move || pool2.acquire().unwrap());

        thread::sleep(Duration::from_millis(50));
        pool.release(buf);

        let acquired = handle.join().unwrap();
        assert_eq!(acquired.len(), 4);
    }

    #[test]
    fn shutdown_and_wait_drains_all() {
        let pool = BufferPool::with_buffers(5, 10);
        let drained = pool.shutdown_and_wait(5);
        assert_eq!(drained.len(), 5);
        assert!(!pool.available());
    }

    #[test]
    fn acquire_after_shutdown_fails() {
        let pool = BufferPool::with_buffers(1, 4);
        let _ = pool.shutdown_and_wait(1);
        assert!(pool.acquire().is_err());
    }

    #[test]
    fn shutdown_and_wait_blocks_for_outstanding_buffers() {
        let pool = Arc::new(BufferPool::with_buffers(2, 4));
        let held = pool.acquire().unwrap();

        let pool2 = pool.clone();
        let handle = thread::spawn(move || pool2.shutdown_and_wait(2));

        thread::sleep(Duration::from_millis(50));
        pool.release(held);

        let drained = handle.join().unwrap();
        assert_eq!(drained.len(), 2);
    }
}
