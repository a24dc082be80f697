//! Scratch-buffer pool for frame encoding
//!
//! Buffers are handed out as [`PooledBuf`] guards. A guard gives its buffer
//! back when dropped, so every exit path of the borrowing operation (early
//! `?` return, panic unwinding, normal completion) returns it exactly once.

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use tracing::trace;

/// Buffer pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Initial capacity of freshly allocated buffers
    pub buffer_capacity: usize,
    /// Maximum number of idle buffers kept for reuse
    pub max_idle: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 4096,
            max_idle: 64,
        }
    }
}

/// Borrow/return counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers handed out so far
    pub borrowed: usize,
    /// Buffers given back so far
    pub returned: usize,
    /// Buffers currently idle in the pool
    pub idle: usize,
}

impl PoolStats {
    /// Buffers currently checked out
    pub fn outstanding(&self) -> usize {
        self.borrowed.saturating_sub(self.returned)
    }
}

/// Pool of reusable byte buffers
#[derive(Debug)]
pub struct BufferPool {
    config: PoolConfig,
    idle: Mutex<Vec<BytesMut>>,
    borrowed: AtomicUsize,
    returned: AtomicUsize,
}

static GLOBAL_POOL: OnceLock<BufferPool> = OnceLock::new();

impl BufferPool {
    /// Create a new pool
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            idle: Mutex::new(Vec::new()),
            borrowed: AtomicUsize::new(0),
            returned: AtomicUsize::new(0),
        }
    }

    /// Process-wide pool with default settings
    pub fn global() -> &'static BufferPool {
        GLOBAL_POOL.get_or_init(|| BufferPool::new(PoolConfig::default()))
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Borrow an empty buffer
    pub fn acquire(&self) -> PooledBuf<'_> {
        let reused = match self.idle.lock() {
            Ok(mut idle) => idle.pop(),
            Err(_) => None,
        };
        let buf = reused.unwrap_or_else(|| BytesMut::with_capacity(self.config.buffer_capacity));
        self.borrowed.fetch_add(1, Ordering::AcqRel);

        PooledBuf { pool: self, buf }
    }

    /// Current counters.
    ///
    /// `returned` is read before `borrowed`, so a snapshot taken while other
    /// threads borrow and return never shows more returns than borrows.
    pub fn stats(&self) -> PoolStats {
        let idle = self.idle.lock().map(|idle| idle.len()).unwrap_or(0);
        let returned = self.returned.load(Ordering::Acquire);
        let borrowed = self.borrowed.load(Ordering::Acquire);
        PoolStats {
            borrowed,
            returned,
            idle,
        }
    }

    fn release(&self, mut buf: BytesMut) {
        self.returned.fetch_add(1, Ordering::AcqRel);

        // Oversized buffers would pin memory for the life of the pool
        if buf.capacity() > self.config.buffer_capacity.saturating_mul(4) {
            trace!("Discarding oversized pool buffer: {} bytes", buf.capacity());
            return;
        }

        buf.clear();
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.config.max_idle {
                idle.push(buf);
            }
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

/// A buffer on loan from a [`BufferPool`]
#[derive(Debug)]
pub struct PooledBuf<'a> {
    pool: &'a BufferPool,
    buf: BytesMut,
}

impl Deref for PooledBuf<'_> {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for PooledBuf<'_> {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl Drop for PooledBuf<'_> {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.release(buf);
    }
}
