//! Per-instrument construction config and derived pool sizing.

use serde::{Deserialize, Serialize};

use crate::arena::{DEFAULT_CHUNK_CAPACITY, NULL_CHUNK};
use crate::codec::{MAX_INSTRUMENT_INDEX, MAX_WIRE_PRICE};
use crate::price_level::DEFAULT_MAX_CHUNKS_PER_LEVEL;

pub const DEFAULT_PRUNE_INTERVAL: u64 = 100;
pub const DEFAULT_INBOUND_CAPACITY: usize = 32_768;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Instrument index {0} does not fit in 15 bits")]
    IndexOutOfRange(u16),
    #[error("{field} must be non-zero for instrument {name}")]
    Zero { name: String, field: &'static str },
    #[error("Collar span {span} for instrument {name} exceeds the 24-bit price range")]
    SpanTooWide { name: String, span: u32 },
    #[error("Instrument {name} needs {chunks} chunks, more than a chunk handle can address")]
    ChunkPoolTooLarge { name: String, chunks: u64 },
}

/// Static sizing for one instrument's book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub name: String,
    pub index: u16,
    /// Collar span in price ticks; also sizes the level pool
    pub limits_per_book: u32,
    /// Orders one price level must be able to hold; sizes each level's chain cap
    pub orders_per_limit: u32,
    #[serde(default = "default_chunk_capacity")]
    pub chunk_capacity: usize,
    /// Prune stale levels every N processed requests
    #[serde(default = "default_prune_interval")]
    pub prune_interval: u64,
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,
}

fn default_chunk_capacity() -> usize {
    DEFAULT_CHUNK_CAPACITY
}

fn default_prune_interval() -> u64 {
    DEFAULT_PRUNE_INTERVAL
}

fn default_inbound_capacity() -> usize {
    DEFAULT_INBOUND_CAPACITY
}

impl InstrumentConfig {
    pub fn new(name: impl Into<String>, index: u16, limits_per_book: u32, orders_per_limit: u32) -> Self {
        Self {
            name: name.into(),
            index,
            limits_per_book,
            orders_per_limit,
            chunk_capacity: DEFAULT_CHUNK_CAPACITY,
            prune_interval: DEFAULT_PRUNE_INTERVAL,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
        }
    }

    pub fn with_chunk_capacity(mut self, chunk_capacity: usize) -> Self {
        self.chunk_capacity = chunk_capacity;
        self
    }

    pub fn with_prune_interval(mut self, prune_interval: u64) -> Self {
        self.prune_interval = prune_interval;
        self
    }

    pub fn with_inbound_capacity(mut self, inbound_capacity: usize) -> Self {
        self.inbound_capacity = inbound_capacity;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.index > MAX_INSTRUMENT_INDEX {
            return Err(ConfigError::IndexOutOfRange(self.index));
        }
        let zero = |field| ConfigError::Zero {
            name: self.name.clone(),
            field,
        };
        if self.limits_per_book == 0 {
            return Err(zero("limits_per_book"));
        }
        if self.orders_per_limit == 0 {
            return Err(zero("orders_per_limit"));
        }
        if self.chunk_capacity == 0 {
            return Err(zero("chunk_capacity"));
        }
        if self.inbound_capacity == 0 {
            return Err(zero("inbound_capacity"));
        }
        if self.limits_per_book > MAX_WIRE_PRICE as u32 {
            return Err(ConfigError::SpanTooWide {
                name: self.name.clone(),
                span: self.limits_per_book,
            });
        }
        let chunks = self.level_pool_size() as u64 * self.max_chunks_per_level() as u64;
        if chunks >= NULL_CHUNK as u64 {
            return Err(ConfigError::ChunkPoolTooLarge {
                name: self.name.clone(),
                chunks,
            });
        }
        Ok(())
    }

    /// Chain cap per level: enough chunks to hold `orders_per_limit`.
    pub fn max_chunks_per_level(&self) -> u32 {
        (self.orders_per_limit as usize).div_ceil(self.chunk_capacity.max(1)) as u32
    }

    /// One level per price in the inclusive collar.
    pub fn level_pool_size(&self) -> usize {
        self.limits_per_book as usize + 1
    }

    /// Every level can grow to its cap, so the chunk pool never runs dry
    /// before the level pool does.
    pub fn chunk_pool_size(&self) -> usize {
        self.level_pool_size() * self.max_chunks_per_level() as usize
    }

    /// Half the collar span.
    pub fn half_span(&self) -> i32 {
        (self.limits_per_book / 2) as i32
    }
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self::new(
            "DEFAULT",
            0,
            1_000,
            DEFAULT_MAX_CHUNKS_PER_LEVEL * DEFAULT_CHUNK_CAPACITY as u32,
        )
    }
}
