//! Pooled buffer allocation for large task payloads.
//!
//! Processing tasks that shuttle large buffers between nodes (frames,
//! tensors) can acquire them here instead of allocating per item:
//! returned blocks are kept on a free list and handed back out when a
//! later request is of similar size. The core runtime never depends on
//! this module; it only passes the handles through as payloads.

use crate::item::DataItem;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Block sizes are rounded up to this boundary so near-miss requests
/// land on the same bucket.
const SIZE_ROUND: usize = 128;

/// Tuning knobs for a [`BufferPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Fit ratio in 1/256 units: a free block of capacity `cap` is
    /// reused for a request of `len` bytes when `len <= cap` and
    /// `len * 256 >= cap * size_compare_ratio` — large blocks are not
    /// wasted on tiny requests.
    pub size_compare_ratio: u32,
    /// Maximum number of blocks kept on the free list; returning a
    /// block beyond this releases the oldest one to the OS.
    pub drop_threshold: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size_compare_ratio: 192,
            drop_threshold: 16,
        }
    }
}

/// Counters describing pool behavior since construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    /// Fresh allocations performed.
    pub allocations: u64,
    /// Requests served from the free list.
    pub reuses: u64,
    /// Blocks returned to the free list.
    pub returns: u64,
    /// Blocks released to the OS past the drop threshold.
    pub drops: u64,
    /// Blocks currently on the free list.
    pub free_blocks: usize,
    /// Bytes currently held by the free list.
    pub free_bytes: usize,
}

struct Counters {
    allocations: AtomicU64,
    reuses: AtomicU64,
    returns: AtomicU64,
    drops: AtomicU64,
}

struct PoolShared {
    config: PoolConfig,
    free: Mutex<VecDeque<Vec<u8>>>,
    counters: Counters,
}

impl PoolShared {
    fn release(&self, block: Vec<u8>) {
        let mut free = self.free.lock().unwrap();
        free.push_back(block);
        self.counters.returns.fetch_add(1, Ordering::Relaxed);
        while free.len() > self.config.drop_threshold {
            free.pop_front();
            self.counters.drops.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// A free-list buffer pool with size-similarity reuse.
///
/// [`acquire`] hands out an exclusive [`PoolBuffer`]; dropping the
/// buffer returns its block to the pool, [`PoolBuffer::freeze`] turns
/// it into a reference-counted read-only [`SharedBuffer`] whose block
/// returns to the pool when the last clone drops.
///
/// [`acquire`]: BufferPool::acquire
///
/// # Example
///
/// ```rust
/// use millrace::memory::BufferPool;
///
/// let pool = BufferPool::new();
///
/// let mut frame = pool.acquire(1024);
/// frame[..4].copy_from_slice(&[1, 2, 3, 4]);
/// drop(frame);
///
/// // A similar-sized request reuses the returned block.
/// let again = pool.acquire(1000);
/// assert_eq!(pool.stats().reuses, 1);
/// drop(again);
/// ```
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Create a pool with the default configuration.
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// Create a pool with explicit tuning knobs.
    pub fn with_config(config: PoolConfig) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                config,
                free: Mutex::new(VecDeque::new()),
                counters: Counters {
                    allocations: AtomicU64::new(0),
                    reuses: AtomicU64::new(0),
                    returns: AtomicU64::new(0),
                    drops: AtomicU64::new(0),
                },
            }),
        }
    }

    /// Acquire a zeroed buffer of `len` bytes, reusing a free block of
    /// similar size when one is available.
    pub fn acquire(&self, len: usize) -> PoolBuffer {
        let ratio = self.shared.config.size_compare_ratio as usize;
        {
            let mut free = self.shared.free.lock().unwrap();
            let fit = free.iter().position(|block| {
                let cap = block.capacity();
                len <= cap && len * 256 >= cap * ratio
            });
            if let Some(index) = fit {
                // remove() only returns None past the end; `index` came
                // from position() on the same deque.
                let mut block = free.remove(index).expect("fit index in bounds");
                drop(free);
                block.clear();
                block.resize(len, 0);
                self.shared.counters.reuses.fetch_add(1, Ordering::Relaxed);
                return PoolBuffer {
                    data: Some(block),
                    shared: Arc::clone(&self.shared),
                };
            }
        }

        self.shared
            .counters
            .allocations
            .fetch_add(1, Ordering::Relaxed);
        let mut block = Vec::with_capacity(round_up(len));
        block.resize(len, 0);
        PoolBuffer {
            data: Some(block),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Snapshot of the pool's counters.
    pub fn stats(&self) -> PoolStats {
        let free = self.shared.free.lock().unwrap();
        PoolStats {
            allocations: self.shared.counters.allocations.load(Ordering::Relaxed),
            reuses: self.shared.counters.reuses.load(Ordering::Relaxed),
            returns: self.shared.counters.returns.load(Ordering::Relaxed),
            drops: self.shared.counters.drops.load(Ordering::Relaxed),
            free_blocks: free.len(),
            free_bytes: free.iter().map(Vec::capacity).sum(),
        }
    }

    /// Release every free block to the OS.
    pub fn clear(&self) {
        self.shared.free.lock().unwrap().clear();
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("BufferPool")
            .field("free_blocks", &stats.free_blocks)
            .field("free_bytes", &stats.free_bytes)
            .finish()
    }
}

fn round_up(len: usize) -> usize {
    len.div_ceil(SIZE_ROUND).max(1) * SIZE_ROUND
}

/// An exclusive buffer borrowed from a [`BufferPool`].
///
/// Dereferences to `[u8]`. The backing block returns to the pool on
/// drop; [`freeze`] converts it into a shareable [`SharedBuffer`]
/// instead.
///
/// [`freeze`]: PoolBuffer::freeze
pub struct PoolBuffer {
    data: Option<Vec<u8>>,
    shared: Arc<PoolShared>,
}

impl PoolBuffer {
    /// Length of the buffer in bytes.
    pub fn len(&self) -> usize {
        self.data.as_ref().map(Vec::len).unwrap_or(0)
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Freeze into a reference-counted read-only buffer.
    ///
    /// The block still returns to the pool — when the last
    /// [`SharedBuffer`] clone drops.
    pub fn freeze(mut self) -> SharedBuffer {
        let data = self.data.take().expect("PoolBuffer already consumed");
        SharedBuffer {
            inner: Arc::new(SharedInner {
                data,
                pool: Arc::downgrade(&self.shared),
            }),
        }
    }
}

impl std::ops::Deref for PoolBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }
}

impl std::ops::DerefMut for PoolBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PoolBuffer {
    fn drop(&mut self) {
        if let Some(block) = self.data.take() {
            self.shared.release(block);
        }
    }
}

impl std::fmt::Debug for PoolBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolBuffer").field("len", &self.len()).finish()
    }
}

struct SharedInner {
    data: Vec<u8>,
    pool: Weak<PoolShared>,
}

impl Drop for SharedInner {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.release(std::mem::take(&mut self.data));
        }
    }
}

/// A reference-counted read-only buffer backed by a pool block.
///
/// Cloning shares the block; it returns to its pool (if the pool is
/// still alive) when the last clone drops.
#[derive(Clone)]
pub struct SharedBuffer {
    inner: Arc<SharedInner>,
}

impl SharedBuffer {
    /// Length of the buffer in bytes.
    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }

    /// Wrap this buffer into a [`DataItem`] payload.
    pub fn into_item(self) -> DataItem {
        DataItem::new(self)
    }
}

impl std::ops::Deref for SharedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.inner.data
    }
}

impl std::fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("len", &self.len())
            .finish()
    }
}
