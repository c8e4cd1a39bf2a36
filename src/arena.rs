//! Chunk Arena - O(1) pool of fixed-capacity order ring buffers.
//!
//! The pool pre-allocates every chunk and every order slot at startup,
//! eliminating heap allocation in the hot path. Chunks are handed out and
//! taken back through an explicit free list; a chunk is owned by exactly
//! one price level while checked out.

use std::fmt;

/// Sentinel value representing a null/invalid chunk handle
pub const NULL_CHUNK: ChunkId = u32::MAX;

/// Default number of order slots per chunk
pub const DEFAULT_CHUNK_CAPACITY: usize = 256;

/// Index of a chunk inside its `SlotPool`
pub type ChunkId = u32;

/// A pool ran dry. Pools are sized statically, so this is a
/// configuration error and is never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolExhausted {
    #[error("Chunk pool exhausted: all {capacity} chunks checked out")]
    Chunks { capacity: usize },
    #[error("Level pool exhausted: all {capacity} levels checked out")]
    Levels { capacity: usize },
}

/// A resting order slot. Recycled in place, never freed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Order {
    /// Client order id
    pub id: i32,
    /// Remaining size
    pub size: i32,
    /// Whether the slot currently holds a live order
    pub initialized: bool,
}

/// Fixed-capacity FIFO ring buffer of order slots.
pub struct Chunk {
    slots: Box<[Order]>,
    head: u32,
    tail: u32,
    count: u32,
    volume: i64,
    /// Next chunk in the owning level's chain
    pub(crate) next: ChunkId,
    /// Set while checked out of the pool
    checked_out: bool,
}

impl Chunk {
    fn new(capacity: usize) -> Self {
        Self {
            slots: vec![Order::default(); capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
            count: 0,
            volume: 0,
            next: NULL_CHUNK,
            checked_out: false,
        }
    }

    #[inline]
    fn advance(&self, index: u32) -> u32 {
        let next = index + 1;
        if next as usize == self.slots.len() {
            0
        } else {
            next
        }
    }

    /// Write an order at the tail. Returns `false` when the chunk is full.
    ///
    /// # Complexity
    /// O(1)
    #[inline]
    pub fn add_order(&mut self, id: i32, size: i32) -> bool {
        if self.is_full() {
            return false;
        }

        let tail = self.tail;
        self.slots[tail as usize] = Order {
            id,
            size,
            initialized: true,
        };
        self.tail = self.advance(tail);
        self.count += 1;
        self.volume += size as i64;
        true
    }

    /// Pop the oldest order, or `None` if empty.
    ///
    /// # Complexity
    /// O(1)
    #[inline]
    pub fn remove_order(&mut self) -> Option<Order> {
        if self.count == 0 {
            return None;
        }

        let head = self.head;
        let slot = &mut self.slots[head as usize];
        let order = *slot;
        slot.initialized = false;

        self.head = self.advance(head);
        self.count -= 1;
        self.volume -= order.size as i64;
        Some(order)
    }

    /// Oldest order without removing it.
    #[inline]
    pub fn peek(&self) -> Option<&Order> {
        if self.count == 0 {
            None
        } else {
            Some(&self.slots[self.head as usize])
        }
    }

    /// Amend the size of the head order in place.
    #[inline]
    pub fn partial_fill(&mut self, new_size: i32) {
        if self.count == 0 {
            return;
        }
        let slot = &mut self.slots[self.head as usize];
        self.volume -= (slot.size - new_size) as i64;
        slot.size = new_size;
    }

    /// Clear resident slots and zero the cursors.
    pub fn reset(&mut self) {
        let mut index = self.head;
        for _ in 0..self.count {
            self.slots[index as usize] = Order::default();
            index = self.advance(index);
        }
        self.head = 0;
        self.tail = 0;
        self.count = 0;
        self.volume = 0;
        self.next = NULL_CHUNK;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.count as usize == self.slots.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Aggregate size of resident orders
    #[inline]
    pub fn volume(&self) -> i64 {
        self.volume
    }

    #[inline]
    pub fn next(&self) -> ChunkId {
        self.next
    }

    /// Resident orders, oldest first.
    pub fn orders(&self) -> impl Iterator<Item = &Order> + '_ {
        let capacity = self.slots.len();
        (0..self.count as usize).map(move |i| &self.slots[(self.head as usize + i) % capacity])
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("count", &self.count)
            .field("volume", &self.volume)
            .field("next", &self.next)
            .finish()
    }
}

/// Pre-allocated pool of chunks with O(1) checkout and return.
///
/// Uses a LIFO free list of indices, so a recently returned (cache-warm)
/// chunk is the next one handed out. No system calls or locks.
pub struct SlotPool {
    chunks: Vec<Chunk>,
    free: Vec<ChunkId>,
    chunk_capacity: usize,
}

impl SlotPool {
    /// Create a pool of `pool_size` chunks with `chunk_capacity` slots each.
    ///
    /// # Panics
    /// Panics if `chunk_capacity` is zero or `pool_size` reaches `NULL_CHUNK`.
    pub fn new(pool_size: usize, chunk_capacity: usize) -> Self {
        assert!(chunk_capacity > 0, "Chunk capacity must be non-zero");
        assert!(pool_size < NULL_CHUNK as usize, "Pool size must be less than NULL_CHUNK");

        let chunks = (0..pool_size).map(|_| Chunk::new(chunk_capacity)).collect();
        // Reverse so that chunk 0 is handed out first
        let free = (0..pool_size as ChunkId).rev().collect();

        Self {
            chunks,
            free,
            chunk_capacity,
        }
    }

    /// Check out a free chunk.
    ///
    /// # Complexity
    /// O(1) - pops from the free list
    #[inline]
    pub fn get_chunk(&mut self) -> Result<ChunkId, PoolExhausted> {
        let id = self.free.pop().ok_or(PoolExhausted::Chunks {
            capacity: self.chunks.len(),
        })?;
        self.chunks[id as usize].checked_out = true;
        Ok(id)
    }

    /// Reset a chunk and return it to the free list.
    ///
    /// Releasing a chunk that is not checked out is logged and ignored.
    #[inline]
    pub fn release_chunk(&mut self, id: ChunkId) {
        let Some(chunk) = self.chunks.get_mut(id as usize) else {
            tracing::warn!(chunk = id, "release of unknown chunk ignored");
            return;
        };
        if !chunk.checked_out {
            tracing::warn!(chunk = id, "release of chunk that is not checked out ignored");
            return;
        }
        chunk.reset();
        chunk.checked_out = false;
        self.free.push(id);
    }

    #[inline]
    pub fn chunk(&self, id: ChunkId) -> &Chunk {
        debug_assert!((id as usize) < self.chunks.len(), "Index out of bounds");
        &self.chunks[id as usize]
    }

    #[inline]
    pub fn chunk_mut(&mut self, id: ChunkId) -> &mut Chunk {
        debug_assert!((id as usize) < self.chunks.len(), "Index out of bounds");
        &mut self.chunks[id as usize]
    }

    /// Number of chunks currently checked out.
    #[inline]
    pub fn in_use(&self) -> usize {
        self.chunks.len() - self.free.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    pub fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }

    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.free.is_empty()
    }

    /// Pre-fault all slot pages (warm-up routine).
    ///
    /// Touches every slot so the OS maps the pages before the hot loop.
    pub fn warm_up(&mut self) {
        for chunk in &mut self.chunks {
            for slot in chunk.slots.iter_mut() {
                // Volatile write to prevent optimization
                unsafe {
                    std::ptr::write_volatile(&mut slot.size, 0);
                }
            }
        }
    }
}

impl fmt::Debug for SlotPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotPool")
            .field("capacity", &self.chunks.len())
            .field("in_use", &self.in_use())
            .field("chunk_capacity", &self.chunk_capacity)
            .finish()
    }
}
