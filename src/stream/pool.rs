//! Read buffers for the asynchronous token-stream strategy.
//!
//! A buffer is checked out for one read cycle and goes back to the pool when
//! its [`PooledBuffer`] guard drops, whether the read finished, failed, or
//! its future was dropped.

use std::{
    ops::{Deref, DerefMut},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use crossbeam_queue::ArrayQueue;
use tracing::debug;

/// Snapshot of a pool's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub checkouts: usize,
    pub returns: usize,
    /// Buffers currently idle in the pool
    pub available: usize,
}

impl PoolStats {
    /// Buffers checked out and not yet returned.
    pub fn outstanding(&self) -> usize {
        self.checkouts - self.returns
    }
}

pub struct BufferPool {
    queue: ArrayQueue<Vec<u8>>,
    buffer_size: usize,
    checkouts: AtomicUsize,
    returns: AtomicUsize,
}

impl BufferPool {
    pub fn new(capacity: usize, buffer_size: usize) -> Arc<Self> {
        let queue = ArrayQueue::new(capacity.max(1));
        for _ in 0..queue.capacity() {
            let _ = queue.push(vec![0; buffer_size]);
        }
        Arc::new(BufferPool {
            queue,
            buffer_size,
            checkouts: AtomicUsize::new(0),
            returns: AtomicUsize::new(0),
        })
    }

    /// Take a buffer, allocating a fresh one if the pool is empty.
    pub fn checkout(self: &Arc<Self>) -> PooledBuffer {
        let buffer = self.queue.pop().unwrap_or_else(|| {
            debug!(size = self.buffer_size, "buffer pool exhausted; allocating");
            vec![0; self.buffer_size]
        });
        self.checkouts.fetch_add(1, Ordering::Relaxed);
        PooledBuffer {
            buffer: Some(buffer),
            pool: Arc::clone(self),
        }
    }

    fn give_back(&self, buffer: Vec<u8>) {
        self.returns.fetch_add(1, Ordering::Relaxed);
        // A full pool drops the surplus buffer.
        let _ = self.queue.push(buffer);
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            checkouts: self.checkouts.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
            available: self.queue.len(),
        }
    }
}

/// A checked-out buffer; returned to its pool on drop.
pub struct PooledBuffer {
    buffer: Option<Vec<u8>>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buffer.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buffer.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.give_back(buffer);
        }
    }
}
