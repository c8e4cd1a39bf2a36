//! Level Pool - pre-allocated price levels handed out by index.
//!
//! Same discipline as the chunk arena: a level is checked out on the first
//! order at a new price and reset (returning all its chunks) when its queue
//! empties.

use std::fmt;

use crate::arena::{PoolExhausted, SlotPool};
use crate::price_level::PriceLevel;

/// Index of a level inside its `LevelPool`
pub type LevelId = u32;

pub struct LevelPool {
    levels: Vec<PriceLevel>,
    free: Vec<LevelId>,
    checked_out: Vec<bool>,
}

impl LevelPool {
    /// Create `pool_size` levels, each capped at `max_chunks_per_level`.
    pub fn new(pool_size: usize, max_chunks_per_level: u32) -> Self {
        assert!(pool_size < LevelId::MAX as usize, "Pool size must fit a LevelId");

        Self {
            levels: vec![PriceLevel::new(max_chunks_per_level); pool_size],
            free: (0..pool_size as LevelId).rev().collect(),
            checked_out: vec![false; pool_size],
        }
    }

    /// Check out an empty level.
    #[inline]
    pub fn get_level(&mut self) -> Result<LevelId, PoolExhausted> {
        let id = self.free.pop().ok_or(PoolExhausted::Levels {
            capacity: self.levels.len(),
        })?;
        self.checked_out[id as usize] = true;
        Ok(id)
    }

    /// Reset a level, returning its chunks to `chunks`, and put it back on
    /// the free list.
    pub fn release_level(&mut self, id: LevelId, chunks: &mut SlotPool) {
        match self.checked_out.get_mut(id as usize) {
            Some(flag) if *flag => *flag = false,
            _ => {
                tracing::warn!(level = id, "release of level that is not checked out ignored");
                return;
            }
        }
        self.levels[id as usize].reset(chunks);
        self.free.push(id);
    }

    #[inline]
    pub fn level(&self, id: LevelId) -> &PriceLevel {
        &self.levels[id as usize]
    }

    #[inline]
    pub fn level_mut(&mut self, id: LevelId) -> &mut PriceLevel {
        &mut self.levels[id as usize]
    }

    #[inline]
    pub fn in_use(&self) -> usize {
        self.levels.len() - self.free.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.levels.len()
    }

    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.free.is_empty()
    }
}

impl fmt::Debug for LevelPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LevelPool")
            .field("capacity", &self.levels.len())
            .field("in_use", &self.in_use())
            .finish()
    }
}
