//! Price Level - A FIFO queue of orders at a single price point.
//!
//! Implements the queue as a singly-linked chain of pooled chunks. New
//! orders go to the tail chunk; matching pops from the head chunk. A head
//! chunk that empties while another is chained behind it goes straight back
//! to the pool, which is the only place memory returns mid-level.

use crate::arena::{ChunkId, Order, PoolExhausted, SlotPool, NULL_CHUNK};

/// Default cap on chunks chained under one price
pub const DEFAULT_MAX_CHUNKS_PER_LEVEL: u32 = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LevelState {
    #[default]
    Normal,
    /// The last add was refused at the chain cap; cleared once an add succeeds
    /// or a chunk returns to the pool
    Full,
}

/// A queue of orders at a specific price level.
///
/// Orders are delivered strictly oldest-first, regardless of chunk
/// boundaries.
#[derive(Clone, Copy, Debug)]
pub struct PriceLevel {
    /// Oldest chunk (highest priority, first to match)
    head: ChunkId,
    /// Newest chunk (receives new orders)
    tail: ChunkId,
    /// Total size across all resident orders
    total_volume: i64,
    order_count: u32,
    chunks_in_chain: u32,
    max_chunks: u32,
    state: LevelState,
}

impl PriceLevel {
    /// Create a new empty price level
    #[inline]
    pub const fn new(max_chunks: u32) -> Self {
        Self {
            head: NULL_CHUNK,
            tail: NULL_CHUNK,
            total_volume: 0,
            order_count: 0,
            chunks_in_chain: 0,
            max_chunks,
            state: LevelState::Normal,
        }
    }

    /// Returns true if there is no volume at this level
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.total_volume == 0
    }

    /// Append an order to the tail of the queue (newest order).
    ///
    /// # Returns
    /// `Ok(false)` when the chain is at its cap (state becomes `Full`); the
    /// caller must reject the order. `Err` only when the chunk pool is dry.
    ///
    /// # Complexity
    /// O(1)
    pub fn add_order(&mut self, pool: &mut SlotPool, id: i32, size: i32) -> Result<bool, PoolExhausted> {
        debug_assert!(size > 0, "Resting size must be positive");

        if self.head == NULL_CHUNK {
            let chunk = pool.get_chunk()?;
            self.head = chunk;
            self.tail = chunk;
            self.chunks_in_chain = 1;
        }

        if !pool.chunk_mut(self.tail).add_order(id, size) {
            if self.chunks_in_chain >= self.max_chunks {
                self.state = LevelState::Full;
                return Ok(false);
            }

            // Tail chunk is full, chain a new one
            let chunk = pool.get_chunk()?;
            pool.chunk_mut(self.tail).next = chunk;
            self.tail = chunk;
            self.chunks_in_chain += 1;

            let added = pool.chunk_mut(chunk).add_order(id, size);
            debug_assert!(added, "Fresh chunk must accept an order");
        }

        self.order_count += 1;
        self.total_volume += size as i64;
        self.state = LevelState::Normal;
        Ok(true)
    }

    /// Remove and return the oldest order.
    ///
    /// # Returns
    /// A copy of the removed order, or `None` if empty.
    ///
    /// # Complexity
    /// O(1)
    pub fn remove_order(&mut self, pool: &mut SlotPool) -> Option<Order> {
        while self.head != NULL_CHUNK {
            let removed = pool.chunk_mut(self.head).remove_order();

            if let Some(order) = removed {
                self.order_count -= 1;
                self.total_volume -= order.size as i64;
                self.release_head_if_drained(pool);
                return Some(order);
            }

            // Empty head with nothing behind it: the level is empty
            if !self.release_head_if_drained(pool) {
                break;
            }
        }
        None
    }

    /// Hand an emptied head chunk back to the pool when another chunk is
    /// chained behind it.
    #[inline]
    fn release_head_if_drained(&mut self, pool: &mut SlotPool) -> bool {
        let head = pool.chunk(self.head);
        if !head.is_empty() || head.next() == NULL_CHUNK {
            return false;
        }

        let old_head = self.head;
        self.head = head.next();
        pool.release_chunk(old_head);
        self.chunks_in_chain -= 1;
        self.state = LevelState::Normal;
        true
    }

    /// Peek at the oldest live order without removing it.
    pub fn peek(&self, pool: &SlotPool) -> Option<Order> {
        let mut current = self.head;
        while current != NULL_CHUNK {
            let chunk = pool.chunk(current);
            if let Some(order) = chunk.peek().filter(|o| o.initialized) {
                return Some(*order);
            }
            current = chunk.next();
        }
        None
    }

    /// Reduce the head order to `new_size`.
    ///
    /// Caller guarantees `0 < new_size < current size`.
    #[inline]
    pub fn partial_fill(&mut self, pool: &mut SlotPool, new_size: i32) {
        if self.head == NULL_CHUNK {
            return;
        }
        let chunk = pool.chunk_mut(self.head);
        let Some(old_size) = chunk.peek().filter(|o| o.initialized).map(|o| o.size) else {
            return;
        };
        debug_assert!(new_size > 0 && new_size < old_size);

        chunk.partial_fill(new_size);
        self.total_volume -= (old_size - new_size) as i64;
    }

    /// Release every chunk in the chain and zero all counters.
    ///
    /// Idempotent: resetting an empty level is a no-op.
    pub fn reset(&mut self, pool: &mut SlotPool) {
        let mut current = self.head;
        while current != NULL_CHUNK {
            let next = pool.chunk(current).next();
            pool.release_chunk(current);
            current = next;
        }

        self.head = NULL_CHUNK;
        self.tail = NULL_CHUNK;
        self.total_volume = 0;
        self.order_count = 0;
        self.chunks_in_chain = 0;
        self.state = LevelState::Normal;
    }

    /// Resident orders, oldest first.
    pub fn orders<'a>(&self, pool: &'a SlotPool) -> impl Iterator<Item = Order> + 'a {
        let mut current = self.head;
        std::iter::from_fn(move || {
            if current == NULL_CHUNK {
                return None;
            }
            let chunk = pool.chunk(current);
            current = chunk.next();
            Some(chunk.orders().copied())
        })
        .flatten()
    }

    #[inline]
    pub const fn total_volume(&self) -> i64 {
        self.total_volume
    }

    #[inline]
    pub const fn order_count(&self) -> u32 {
        self.order_count
    }

    #[inline]
    pub const fn chunks_in_chain(&self) -> u32 {
        self.chunks_in_chain
    }

    #[inline]
    pub const fn max_chunks(&self) -> u32 {
        self.max_chunks
    }

    #[inline]
    pub const fn state(&self) -> LevelState {
        self.state
    }

    #[inline]
    pub const fn head_chunk(&self) -> ChunkId {
        self.head
    }
}

impl Default for PriceLevel {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHUNKS_PER_LEVEL)
    }
}
