//! Reusable byte buffers shared across download workers.
//!
//! Workers stream response bodies through fixed-size buffers. Allocating one
//! per read would churn the allocator under concurrency, so buffers are
//! pooled: `acquire` hands out a lease, dropping the lease returns the
//! buffer. Release therefore happens on every exit path, including panics.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Size of each pooled buffer (128 KiB).
pub const BUFFER_SIZE: usize = 128 * 1024;

/// Bounded free-list of fixed-size byte buffers.
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    buffer_size: usize,
    outstanding: AtomicUsize,
}

impl BufferPool {
    /// Create a pool handing out buffers of `buffer_size` bytes.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            buffer_size,
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Take a buffer from the pool, allocating a fresh one if the free list
    /// is empty. The lease returns the buffer when dropped.
    pub fn acquire(&self) -> BufferLease<'_> {
        let buf = self
            .free
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| vec![0u8; self.buffer_size]);
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        BufferLease {
            pool: self,
            buf: Some(buf),
        }
    }

    /// Number of leases currently held.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    fn release(&self, buf: Vec<u8>) {
        self.free.lock().unwrap().push(buf);
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
    }
}

/// RAII lease on a pooled buffer. Dereferences to the byte slice.
pub struct BufferLease<'a> {
    pool: &'a BufferPool,
    buf: Option<Vec<u8>>,
}

impl Deref for BufferLease<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for BufferLease<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for BufferLease<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}
