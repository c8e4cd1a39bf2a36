//! Order Book - The per-instrument limit order book data structure.
//!
//! Each side keeps two structures: a price → level map for O(1) lookup and
//! a binary heap of prices for O(log L) best-price access. Closing a level
//! pops the heap top eagerly (it is always the best level that empties
//! during matching); pruning and discards unlist from the map and then
//! compact the heap.

use std::collections::BinaryHeap;
use std::fmt;

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::arena::{Order, PoolExhausted, SlotPool};
use crate::clock::SharedClock;
use crate::command::Side;
use crate::config::{ConfigError, InstrumentConfig};
use crate::level_pool::{LevelId, LevelPool};
use crate::price_level::{LevelState, PriceLevel};

/// One side of the book.
///
/// The heap stores a rank rather than the raw price so a single max-heap
/// serves both sides: bids rank by price, asks by negated price. Ranks are
/// widened to `i64` so every `i32` price negates exactly.
pub struct BookSide {
    side: Side,
    levels: FxHashMap<i32, LevelId>,
    prices: BinaryHeap<i64>,
}

impl BookSide {
    pub fn with_capacity(side: Side, levels: usize) -> Self {
        Self {
            side,
            levels: FxHashMap::with_capacity_and_hasher(levels, Default::default()),
            prices: BinaryHeap::with_capacity(levels),
        }
    }

    #[inline]
    pub(crate) fn rank(&self, price: i32) -> i64 {
        match self.side {
            Side::Bid => price as i64,
            Side::Ask => -(price as i64),
        }
    }

    /// Inverse of `rank`.
    #[inline]
    fn price_of(side: Side, rank: i64) -> i32 {
        match side {
            Side::Bid => rank as i32,
            Side::Ask => (-rank) as i32,
        }
    }

    #[inline]
    pub fn side(&self) -> Side {
        self.side
    }

    #[inline]
    pub fn get(&self, price: i32) -> Option<LevelId> {
        self.levels.get(&price).copied()
    }

    /// Register a newly checked-out level at `price`.
    #[inline]
    pub fn insert(&mut self, price: i32, level: LevelId) {
        debug_assert!(!self.levels.contains_key(&price));
        self.levels.insert(price, level);
        self.prices.push(self.rank(price));
    }

    /// Best price from the heap top. No operation leaves a stale entry behind.
    #[inline]
    pub fn best(&self) -> Option<i32> {
        self.prices.peek().map(|&rank| Self::price_of(self.side, rank))
    }

    /// Best price and its level, dropping stale heap tops on the way.
    #[inline]
    pub fn best_entry(&mut self) -> Option<(i32, LevelId)> {
        while let Some(&rank) = self.prices.peek() {
            let price = Self::price_of(self.side, rank);
            match self.levels.get(&price) {
                Some(&level) => return Some((price, level)),
                None => {
                    self.prices.pop();
                }
            }
        }
        None
    }

    /// Remove the best price from both heap and map.
    #[inline]
    pub fn pop_best(&mut self) -> Option<(i32, LevelId)> {
        let entry = self.best_entry()?;
        self.prices.pop();
        self.levels.remove(&entry.0);
        Some(entry)
    }

    /// Remove a price from the map only; its heap entry goes stale.
    #[inline]
    pub fn remove(&mut self, price: i32) -> Option<LevelId> {
        self.levels.remove(&price)
    }

    /// Drop every stale heap entry, not just the top.
    pub fn compact(&mut self) {
        let side = self.side;
        let levels = &self.levels;
        self.prices.retain(|&rank| levels.contains_key(&Self::price_of(side, rank)));
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Number of heap entries, stale ones included.
    #[inline]
    pub fn heap_len(&self) -> usize {
        self.prices.len()
    }

    /// (price, level) pairs in map order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, LevelId)> + '_ {
        self.levels.iter().map(|(&price, &level)| (price, level))
    }

    /// Heap prices in arbitrary order, stale ones included.
    pub fn heap_prices(&self) -> impl Iterator<Item = i32> + '_ {
        self.prices.iter().map(|&rank| Self::price_of(self.side, rank))
    }

    /// Whether `price` is at least as good as `other` for this side.
    #[inline]
    pub fn at_least_as_good(&self, price: i32, other: i32) -> bool {
        self.rank(price) >= self.rank(other)
    }
}

/// Read-only view of one resting level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LevelSnapshot {
    pub price: i32,
    pub volume: i64,
    pub order_count: u32,
    pub chunks: u32,
    pub full: bool,
}

/// Pool utilization for capacity monitoring.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub levels_in_use: usize,
    pub level_capacity: usize,
    pub chunks_in_use: usize,
    pub chunk_capacity: usize,
    pub orders_per_chunk: usize,
}

/// A broken book invariant, as found by `OrderBook::verify_integrity`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    #[error("{side:?} price {price} is in the map but not the heap")]
    MissingFromHeap { side: Side, price: i32 },
    #[error("{side:?} heap holds {heap} entries for {map} levels")]
    StaleHeap { side: Side, heap: usize, map: usize },
    #[error("{side:?} heap top {top} is not the best price {best}")]
    HeapTop { side: Side, top: i32, best: i32 },
    #[error("{side:?} level {price} reports volume {reported}, orders sum to {actual}")]
    Volume { side: Side, price: i32, reported: i64, actual: i64 },
    #[error("{side:?} level {price} reports {reported} orders, holds {actual}")]
    OrderCount { side: Side, price: i32, reported: u32, actual: u32 },
    #[error("{side:?} level {price} holds a non-positive order size {size}")]
    NonPositiveSize { side: Side, price: i32, size: i32 },
    #[error("{side:?} level {price} is empty but still listed")]
    EmptyLevel { side: Side, price: i32 },
    #[error("{in_use} levels checked out, {listed} listed on the book")]
    LevelLeak { in_use: usize, listed: usize },
    #[error("{in_use} chunks checked out, {chained} chained under levels")]
    ChunkLeak { in_use: usize, chained: usize },
}

/// Per-instrument order book.
///
/// Holds no locks; one thread owns it exclusively.
pub struct OrderBook {
    pub(crate) name: String,
    instrument_index: u16,
    /// Collar span in price ticks
    max_levels: u32,
    /// Half the collar span
    half_span: i32,
    pub(crate) bids: BookSide,
    pub(crate) asks: BookSide,
    pub(crate) levels: LevelPool,
    pub(crate) chunks: SlotPool,
    pub(crate) clock: SharedClock,
    /// Reused by pruning to avoid allocating on each pass
    pub(crate) scratch: Vec<(i32, LevelId)>,
}

impl OrderBook {
    /// Build a book sized from `config`.
    pub fn new(config: &InstrumentConfig, clock: SharedClock) -> Result<Self, ConfigError> {
        Self::with_pool_sizes(config, clock, config.level_pool_size(), config.chunk_pool_size())
    }

    /// Build a book with explicit pool sizes instead of the derived ones.
    ///
    /// Undersized pools make `process` fail with `PoolExhausted`; this is
    /// how capacity limits are exercised.
    pub fn with_pool_sizes(
        config: &InstrumentConfig,
        clock: SharedClock,
        level_pool_size: usize,
        chunk_pool_size: usize,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            name: config.name.clone(),
            instrument_index: config.index,
            max_levels: config.limits_per_book,
            half_span: config.half_span(),
            bids: BookSide::with_capacity(Side::Bid, level_pool_size / 2),
            asks: BookSide::with_capacity(Side::Ask, level_pool_size / 2),
            levels: LevelPool::new(level_pool_size, config.max_chunks_per_level()),
            chunks: SlotPool::new(chunk_pool_size, config.chunk_capacity),
            clock,
            scratch: Vec::with_capacity(level_pool_size),
        })
    }

    // ========================================================================
    // Best Price Access
    // ========================================================================

    /// Best (highest) bid, 0 when there is none.
    #[inline]
    pub fn best_bid(&self) -> i32 {
        self.bids.best().unwrap_or(0)
    }

    /// Best (lowest) ask, 0 when there is none.
    #[inline]
    pub fn best_ask(&self) -> i32 {
        self.asks.best().unwrap_or(0)
    }

    /// Collar center: mid of best bid/ask, else whichever side exists.
    #[inline]
    pub fn center(&self) -> Option<i32> {
        match (self.bids.best(), self.asks.best()) {
            (Some(bid), Some(ask)) => Some(((bid as i64 + ask as i64) / 2) as i32),
            (Some(bid), None) => Some(bid),
            (None, Some(ask)) => Some(ask),
            (None, None) => None,
        }
    }

    /// Inclusive admissible price band around `center`.
    #[inline]
    pub fn collar(&self, center: i32) -> (i32, i32) {
        (
            center.saturating_sub(self.half_span).max(1),
            center.saturating_add(self.half_span),
        )
    }

    /// Mid price for rejection snapshots, 0 unless both sides exist.
    #[inline]
    pub fn avg_price(&self) -> i32 {
        match (self.bids.best(), self.asks.best()) {
            (Some(bid), Some(ask)) => ((bid as i64 + ask as i64) / 2) as i32,
            _ => 0,
        }
    }

    // ========================================================================
    // Level Access
    // ========================================================================

    #[inline]
    pub(crate) fn side(&self, side: Side) -> &BookSide {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    #[inline]
    pub(crate) fn side_mut(&mut self, side: Side) -> &mut BookSide {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    /// The level resting at `price`, if any.
    #[inline]
    pub fn get_level(&self, side: Side, price: i32) -> Option<&PriceLevel> {
        self.side(side).get(price).map(|id| self.levels.level(id))
    }

    /// Oldest order resting at `price`.
    pub fn peek(&self, side: Side, price: i32) -> Option<Order> {
        self.get_level(side, price).and_then(|level| level.peek(&self.chunks))
    }

    /// Resting order ids and sizes at `price`, oldest first.
    pub fn orders_at(&self, side: Side, price: i32) -> Vec<(i32, i32)> {
        self.get_level(side, price)
            .map(|level| level.orders(&self.chunks).map(|o| (o.id, o.size)).collect())
            .unwrap_or_default()
    }

    /// (volume, order count) at a price; zeros when nothing rests there.
    pub fn depth_at(&self, side: Side, price: i32) -> (i64, u32) {
        self.get_level(side, price)
            .map(|l| (l.total_volume(), l.order_count()))
            .unwrap_or((0, 0))
    }

    /// Snapshot of one side, best price first.
    pub fn levels(&self, side: Side) -> Vec<LevelSnapshot> {
        let book = self.side(side);
        let mut out: Vec<LevelSnapshot> = book
            .iter()
            .map(|(price, id)| {
                let level = self.levels.level(id);
                LevelSnapshot {
                    price,
                    volume: level.total_volume(),
                    order_count: level.order_count(),
                    chunks: level.chunks_in_chain(),
                    full: level.state() == LevelState::Full,
                }
            })
            .collect();
        out.sort_unstable_by_key(|l| std::cmp::Reverse(book.rank(l.price)));
        out
    }

    #[inline]
    pub fn bid_levels(&self) -> Vec<LevelSnapshot> {
        self.levels(Side::Bid)
    }

    #[inline]
    pub fn ask_levels(&self) -> Vec<LevelSnapshot> {
        self.levels(Side::Ask)
    }

    // ========================================================================
    // Level Lifecycle
    // ========================================================================

    /// Level for `price`, checking one out if the price is new.
    ///
    /// `Ok(None)` when the price is new and the level pool has no free level.
    pub(crate) fn level_for(&mut self, side: Side, price: i32) -> Result<Option<LevelId>, PoolExhausted> {
        if let Some(id) = self.side(side).get(price) {
            return Ok(Some(id));
        }
        if self.levels.is_exhausted() {
            return Ok(None);
        }
        let id = self.levels.get_level()?;
        self.side_mut(side).insert(price, id);
        Ok(Some(id))
    }

    /// Unlist an empty level that never received an order and return it.
    pub(crate) fn discard_if_empty(&mut self, side: Side, price: i32, id: LevelId) {
        if !self.levels.level(id).is_empty() {
            return;
        }
        let book = self.side_mut(side);
        book.remove(price);
        book.compact();
        self.levels.release_level(id, &mut self.chunks);
    }

    // ========================================================================
    // Utility Methods
    // ========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instrument_index(&self) -> u16 {
        self.instrument_index
    }

    pub fn max_levels(&self) -> u32 {
        self.max_levels
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn bid_level_count(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_level_count(&self) -> usize {
        self.asks.len()
    }

    /// Total resting orders on both sides.
    pub fn order_count(&self) -> usize {
        self.bids
            .iter()
            .chain(self.asks.iter())
            .map(|(_, id)| self.levels.level(id).order_count() as usize)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn pool_stats(&self) -> PoolStats {
        PoolStats {
            levels_in_use: self.levels.in_use(),
            level_capacity: self.levels.capacity(),
            chunks_in_use: self.chunks.in_use(),
            chunk_capacity: self.chunks.capacity(),
            orders_per_chunk: self.chunks.chunk_capacity(),
        }
    }

    /// Warm up the book (pre-fault slot pages)
    pub fn warm_up(&mut self) {
        self.chunks.warm_up();
    }

    /// Check every structural invariant; reports the first violation.
    ///
    /// O(orders). Meant for tests and diagnostics, not the hot path.
    pub fn verify_integrity(&self) -> Result<(), IntegrityError> {
        let mut listed = 0;
        let mut chained = 0;

        for book in [&self.bids, &self.asks] {
            let side = book.side();
            let heap: rustc_hash::FxHashSet<i32> = book.heap_prices().collect();

            if book.heap_len() != book.len() {
                return Err(IntegrityError::StaleHeap {
                    side,
                    heap: book.heap_len(),
                    map: book.len(),
                });
            }

            let mut best: Option<i32> = None;
            for (price, id) in book.iter() {
                if !heap.contains(&price) {
                    return Err(IntegrityError::MissingFromHeap { side, price });
                }
                if best.map_or(true, |b| book.at_least_as_good(price, b)) {
                    best = Some(price);
                }

                let level = self.levels.level(id);
                if level.is_empty() {
                    return Err(IntegrityError::EmptyLevel { side, price });
                }

                let mut volume = 0i64;
                let mut count = 0u32;
                for order in level.orders(&self.chunks) {
                    if order.size <= 0 {
                        return Err(IntegrityError::NonPositiveSize { side, price, size: order.size });
                    }
                    volume += order.size as i64;
                    count += 1;
                }
                if volume != level.total_volume() {
                    return Err(IntegrityError::Volume {
                        side,
                        price,
                        reported: level.total_volume(),
                        actual: volume,
                    });
                }
                if count != level.order_count() {
                    return Err(IntegrityError::OrderCount {
                        side,
                        price,
                        reported: level.order_count(),
                        actual: count,
                    });
                }

                listed += 1;
                chained += level.chunks_in_chain() as usize;
            }

            if let (Some(top), Some(best)) = (book.best(), best) {
                if top != best {
                    return Err(IntegrityError::HeapTop { side, top, best });
                }
            }
        }

        if self.levels.in_use() != listed {
            return Err(IntegrityError::LevelLeak {
                in_use: self.levels.in_use(),
                listed,
            });
        }
        if self.chunks.in_use() != chained {
            return Err(IntegrityError::ChunkLeak {
                in_use: self.chunks.in_use(),
                chained,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for OrderBook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderBook")
            .field("name", &self.name)
            .field("best_bid", &self.best_bid())
            .field("best_ask", &self.best_ask())
            .field("bid_levels", &self.bids.len())
            .field("ask_levels", &self.asks.len())
            .field("levels", &self.levels)
            .field("chunks", &self.chunks)
            .finish()
    }
}
