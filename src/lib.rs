//! # Collar-LOB
//!
//! A per-instrument limit order book with pooled memory and a price collar.
//!
//! ## Design Principles
//!
//! - **Single-Writer**: One thread owns each book exclusively (no locks)
//! - **Pooled Memory**: Price levels and order chunks come from fixed arenas
//!   sized at startup; nothing is allocated in the hot path
//! - **Price-Time Priority**: Best price first, oldest order first within a price
//! - **Price Collar**: Limit prices far from the book center are rejected,
//!   and levels the center has moved away from are pruned
//!
//! ## Architecture
//!
//! ```text
//! [Transport] --> [Ingress] --> [Bounded MPSC Channel] --> [MatchingLoop (Pinned)]
//!                                                                |
//!                                                          [OrderBook]
//!                                                                |
//!                                                   [EventSink / Egress Ring]
//! ```

pub mod arena;
pub mod clock;
pub mod codec;
pub mod command;
pub mod config;
pub mod egress;
pub mod engine;
pub mod ingress;
pub mod level_pool;
pub mod matching;
pub mod order_book;
pub mod price_level;

// Re-exports for convenience
pub use arena::{ChunkId, Order, PoolExhausted, SlotPool, NULL_CHUNK};
pub use clock::SharedClock;
pub use codec::{DecodeError, MatchFrame, OrderFrame, MATCH_EVENT_SIZE, ORDER_REQUEST_SIZE};
pub use command::{BookEvent, MatchEvent, OrderKind, OrderRequest, Outcome, RejectReason, Rejection, Side};
pub use config::{ConfigError, InstrumentConfig};
pub use egress::{CountingSink, EventSink};
pub use engine::{inbound_channel, inbound_channel_for, EngineError, LoopHandle, LoopStats, MatchingLoop, Pinning};
pub use ingress::{Ingress, IngressError, IngressStats, Overflow};
pub use level_pool::{LevelId, LevelPool};
pub use order_book::{IntegrityError, LevelSnapshot, OrderBook, PoolStats};
pub use price_level::{LevelState, PriceLevel};

#[cfg(feature = "runtime")]
pub use egress::{egress_channel, RingEgress};
