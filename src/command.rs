//! Request and Event types for the matching engine.
//!
//! Requests are decoded from the wire by the ingress and consumed by the
//! book. Events are what the book hands to its egress sink.

use serde::Serialize;

/// Order side (bid = buy, ask = sell)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum Side {
    /// Buy side (bids)
    Bid = 0,
    /// Sell side (asks)
    Ask = 1,
}

impl Side {
    /// Returns the opposite side
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }

    #[inline]
    pub const fn is_bid(self) -> bool {
        matches!(self, Side::Bid)
    }

    #[inline]
    pub const fn from_bid_flag(is_bid: bool) -> Self {
        if is_bid {
            Side::Bid
        } else {
            Side::Ask
        }
    }
}

// ============================================================================
// Input Requests
// ============================================================================

/// A decoded order request (11 bytes on the wire).
///
/// Price 0 is the market-order sentinel; price 0 with quantity 0 is the
/// reserved cancel sentinel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrderRequest {
    /// Instrument index, 15 bits on the wire
    pub instrument_index: u16,
    pub side: Side,
    /// Integer price, 24 bits on the wire
    pub price: i32,
    pub quantity: u16,
    /// Client-assigned order id
    pub order_id: i32,
}

/// How the book treats a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderKind {
    Cancel,
    Market,
    Limit,
}

impl OrderRequest {
    pub const fn limit(side: Side, price: i32, quantity: u16, order_id: i32) -> Self {
        Self {
            instrument_index: 0,
            side,
            price,
            quantity,
            order_id,
        }
    }

    pub const fn market(side: Side, quantity: u16, order_id: i32) -> Self {
        Self::limit(side, 0, quantity, order_id)
    }

    pub const fn with_instrument(mut self, instrument_index: u16) -> Self {
        self.instrument_index = instrument_index;
        self
    }

    #[inline]
    pub const fn kind(&self) -> OrderKind {
        match (self.price, self.quantity) {
            (0, 0) => OrderKind::Cancel,
            (0, _) => OrderKind::Market,
            _ => OrderKind::Limit,
        }
    }
}

// ============================================================================
// Output Events
// ============================================================================

/// A fill between an incoming taker and a resting maker (24 bytes on the wire).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MatchEvent {
    pub taker_order_id: i32,
    pub maker_order_id: i32,
    /// Always the maker's resting price
    pub price: i32,
    pub quantity: i32,
    pub timestamp_ms: i64,
}

/// Reasons an order is not admitted to (or is evicted from) the book.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum RejectReason {
    /// No free price level left in the level pool
    OrderbookFull = 0,
    /// The level's chunk chain is at its cap
    PriceLimitFull = 1,
    /// Bid below the collar
    BidPriceTooLow = 2,
    /// Ask above the collar
    AskPriceTooHigh = 3,
    /// Resting order left outside the collar after the center moved
    AvgPriceMovedTooFar = 4,
}

/// Structured rejection notice with a snapshot of the top of book.
///
/// Prices in the snapshot use 0 for "none".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub order_id: i32,
    pub side: Side,
    pub price: i32,
    pub quantity: i32,
    pub reason: RejectReason,
    pub best_bid: i32,
    pub best_ask: i32,
    pub avg_price: i32,
}

/// Output events from the book, as collected by `Vec<BookEvent>` sinks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BookEvent {
    Match(MatchEvent),
    Reject(Rejection),
}

/// What `OrderBook::process` did with a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Cancel sentinel; cancel-by-id is not supported, nothing changed
    CancelIgnored,
    /// Market order; `unfilled` was discarded
    Market { filled: i32, unfilled: i32 },
    /// Limit order; `rested` is what now rests on the book
    Limit { filled: i32, rested: i32 },
    /// Not admitted (or remainder not admitted) for `reason`
    Rejected { filled: i32, reason: RejectReason },
}
