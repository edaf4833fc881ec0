//! # Buffer Pool Module
//!
//! Reusable fixed-size byte buffers for the receive and decode paths. Both the
//! transport (reassembled messages) and the decode pipeline (backend pushes)
//! own a pool, so steady-state streaming runs without per-frame allocation.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐  acquire   ┌─────────────────┐  release   ┌─────────────────┐
//! │   Transport /   │◀───────────│   BufferPool    │◀───────────│   Router /      │
//! │   Pipeline      │            │                 │            │   Backend       │
//! └─────────────────┘            │  ┌───────────┐  │            └─────────────────┘
//!                                │  │ lock-free │  │
//!                                │  │ MPMC queue│  │   wrong-sized buffers
//!                                │  └───────────┘  │   are never re-queued
//!                                └─────────────────┘
//! ```
//!
//! ## Performance Characteristics
//!
//! - **Acquire/release**: O(1), no locks, never blocks
//! - **Size bound**: advisory; a few extra buffers under a release race are benign
//! - **Counters**: relaxed atomics, read as a [`PoolStats`] snapshot
//!
//! ## Example
//!
//! ```rust
//! use frame_ingest::core::buffer_pool::BufferPool;
//!
//! let pool = BufferPool::new(4, 1024, false);
//!
//! let mut buffer = pool.acquire();
//! buffer.put(b"frame bytes").unwrap();
//! assert_eq!(buffer.as_slice(), b"frame bytes");
//!
//! pool.release(buffer);
//!
//! let stats = pool.stats();
//! assert_eq!(stats.hits + stats.misses, stats.acquires);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};
use memmap2::MmapMut;

/// Backing memory of a [`PooledBuffer`].
enum Storage {
    /// Ordinary heap allocation.
    Heap(Box<[u8]>),
    /// Anonymous memory mapping, kept outside the allocator.
    Mapped(MmapMut),
}

impl Storage {
    fn allocate(capacity: usize, direct: bool) -> Self {
        if direct && capacity > 0 {
            match MmapMut::map_anon(capacity) {
                Ok(map) => return Storage::Mapped(map),
                Err(err) => {
                    tracing::warn!(capacity, error = %err, "anonymous mapping failed, using heap buffer");
                }
            }
        }
        Storage::Heap(vec![0u8; capacity].into_boxed_slice())
    }

    fn bytes(&self) -> &[u8] {
        match self {
            Storage::Heap(bytes) => bytes,
            Storage::Mapped(map) => map,
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            Storage::Heap(bytes) => bytes,
            Storage::Mapped(map) => map,
        }
    }
}

/// Error returned when a write does not fit in a buffer's remaining capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityExceeded {
    /// Bytes the caller tried to write
    pub requested: usize,
    /// Bytes still free in the buffer
    pub remaining: usize,
}

impl fmt::Display for CapacityExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "buffer overflow: {} bytes requested, {} remaining",
            self.requested, self.remaining
        )
    }
}

impl std::error::Error for CapacityExceeded {}

/// A fixed-capacity byte buffer handed out by a [`BufferPool`].
///
/// The capacity never changes after allocation. `len` tracks how many bytes
/// have been written; [`PooledBuffer::clear`] resets it without touching the
/// memory.
///
/// Ownership is the pool contract: whoever holds the value is responsible for
/// it. Handing the buffer to a backend moves it there; dropping it simply frees
/// the memory.
pub struct PooledBuffer {
    storage: Storage,
    len: usize,
    pooled: bool,
}

impl PooledBuffer {
    fn new(capacity: usize, direct: bool, pooled: bool) -> Self {
        Self {
            storage: Storage::allocate(capacity, direct),
            len: 0,
            pooled,
        }
    }

    /// Allocate a buffer that does not belong to any pool.
    pub fn unpooled(capacity: usize, direct: bool) -> Self {
        Self::new(capacity, direct, false)
    }

    /// Fixed capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.storage.bytes().len()
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Free space left before the buffer is full.
    pub fn remaining(&self) -> usize {
        self.capacity() - self.len
    }

    /// Whether the memory lives in an anonymous mapping rather than on the heap.
    pub fn is_direct(&self) -> bool {
        matches!(self.storage, Storage::Mapped(_))
    }

    /// Whether the buffer was sized for a pool (as opposed to a one-off oversized allocation).
    pub fn is_pooled(&self) -> bool {
        self.pooled
    }

    /// Append `data`, failing without a partial write if it does not fit.
    pub fn put(&mut self, data: &[u8]) -> Result<(), CapacityExceeded> {
        let remaining = self.remaining();
        if data.len() > remaining {
            return Err(CapacityExceeded {
                requested: data.len(),
                remaining,
            });
        }
        let end = self.len + data.len();
        self.storage.bytes_mut()[self.len..end].copy_from_slice(data);
        self.len = end;
        Ok(())
    }

    /// The written bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.storage.bytes()[..self.len]
    }

    /// The written bytes, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut self.storage.bytes_mut()[..len]
    }

    /// Reset the written length to zero.
    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsMut<[u8]> for PooledBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("direct", &self.is_direct())
            .field("pooled", &self.pooled)
            .finish()
    }
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Total acquire calls (including oversized one-offs)
    pub acquires: u64,
    /// Acquires served from the queue
    pub hits: u64,
    /// Acquires that needed a fresh allocation
    pub misses: u64,
    /// Buffers put back into the queue
    pub returns: u64,
    /// Correctly sized buffers dropped because the pool was full
    pub drops: u64,
    /// Buffers currently queued
    pub current_size: usize,
    /// Configured pool bound
    pub max_size: usize,
    /// Configured buffer capacity
    pub buffer_size: usize,
}

impl PoolStats {
    /// `hits / acquires`, or 0.0 before the first acquire.
    pub fn hit_rate(&self) -> f64 {
        if self.acquires == 0 {
            0.0
        } else {
            self.hits as f64 / self.acquires as f64
        }
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pool {}/{} x {}B, hit rate {:.1}% ({} hits, {} misses, {} returns, {} drops)",
            self.current_size,
            self.max_size,
            self.buffer_size,
            self.hit_rate() * 100.0,
            self.hits,
            self.misses,
            self.returns,
            self.drops
        )
    }
}

/// Thread-safe pool of fixed-size reusable buffers.
///
/// # Design Principles
///
/// - **Pre-allocation**: half of `max_size` is allocated up front
/// - **Lock-free**: the queue is a bounded MPMC channel, counters are atomics
/// - **Exact sizing**: only buffers whose capacity equals `buffer_size` are re-queued
/// - **Never blocks**: a miss allocates, a full pool drops
///
/// # Examples
///
/// ```rust
/// use frame_ingest::core::buffer_pool::BufferPool;
///
/// let pool = BufferPool::new(10, 4096, false);
/// assert_eq!(pool.current_size(), 5); // pre-allocated half
///
/// // Oversized requests bypass the pool
/// let big = pool.acquire_with_capacity(8192);
/// assert!(!big.is_pooled());
/// pool.release(big); // ignored: wrong capacity
/// assert_eq!(pool.current_size(), 5);
/// ```
pub struct BufferPool {
    tx: Sender<PooledBuffer>,
    rx: Receiver<PooledBuffer>,
    current_size: AtomicUsize,
    max_size: usize,
    buffer_size: usize,
    direct: bool,
    acquires: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    returns: AtomicU64,
    drops: AtomicU64,
}

impl BufferPool {
    /// Creates a pool holding at most `max_size` buffers of `buffer_size` bytes.
    ///
    /// `direct` selects anonymous memory mappings instead of heap allocations.
    pub fn new(max_size: usize, buffer_size: usize, direct: bool) -> Self {
        // A zero-capacity channel would be a rendezvous channel; keep at least one slot.
        let (tx, rx) = bounded(max_size.max(1));
        let pool = Self {
            tx,
            rx,
            current_size: AtomicUsize::new(0),
            max_size,
            buffer_size,
            direct,
            acquires: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            returns: AtomicU64::new(0),
            drops: AtomicU64::new(0),
        };

        let pre_allocate = max_size / 2;
        for _ in 0..pre_allocate {
            if pool.tx.try_send(pool.allocate()).is_ok() {
                pool.current_size.fetch_add(1, Ordering::Relaxed);
            }
        }
        pool
    }

    fn allocate(&self) -> PooledBuffer {
        PooledBuffer::new(self.buffer_size, self.direct, true)
    }

    /// Take a cleared buffer from the pool, allocating one on a miss.
    pub fn acquire(&self) -> PooledBuffer {
        self.acquires.fetch_add(1, Ordering::Relaxed);
        match self.rx.try_recv() {
            Ok(mut buffer) => {
                self.current_size.fetch_sub(1, Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                buffer.clear();
                buffer
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.allocate()
            }
        }
    }

    /// Acquire a buffer holding at least `min_capacity` bytes.
    ///
    /// Requests larger than the pool's buffer size get a one-off buffer that is
    /// never accepted back by [`BufferPool::release`].
    pub fn acquire_with_capacity(&self, min_capacity: usize) -> PooledBuffer {
        if min_capacity <= self.buffer_size {
            return self.acquire();
        }
        self.acquires.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
        PooledBuffer::unpooled(min_capacity, self.direct)
    }

    /// Return a buffer for reuse.
    ///
    /// Wrong-sized buffers are ignored. When the pool is full the buffer is dropped.
    pub fn release(&self, mut buffer: PooledBuffer) {
        if buffer.capacity() != self.buffer_size {
            return;
        }

        if self.current_size.load(Ordering::Relaxed) < self.max_size {
            buffer.clear();
            match self.tx.try_send(buffer) {
                Ok(()) => {
                    self.current_size.fetch_add(1, Ordering::Relaxed);
                    self.returns.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    self.drops.fetch_add(1, Ordering::Relaxed);
                }
            }
        } else {
            self.drops.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drain every queued buffer.
    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {
            self.current_size.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Current pool statistics.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            acquires: self.acquires.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
            drops: self.drops.load(Ordering::Relaxed),
            current_size: self.current_size(),
            max_size: self.max_size,
            buffer_size: self.buffer_size,
        }
    }

    pub fn current_size(&self) -> usize {
        self.current_size.load(Ordering::Relaxed)
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn is_direct(&self) -> bool {
        self.direct
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("stats", &self.stats())
            .field("direct", &self.direct)
            .finish()
    }
}
