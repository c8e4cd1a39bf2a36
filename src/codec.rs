//! Wire codecs - fixed-size, big-endian, allocation-free.
//!
//! # Order request (11 bytes)
//!
//! | Bytes | Field                                   |
//! |-------|-----------------------------------------|
//! | 0-1   | `is_bid << 15 \| instrument_index`      |
//! | 2-4   | price, 24-bit (0 = market order)        |
//! | 5-6   | quantity, 16-bit                        |
//! | 7-10  | order id, 32-bit                        |
//!
//! # Match event (24 bytes)
//!
//! | Bytes | Field          |
//! |-------|----------------|
//! | 0-3   | taker order id |
//! | 4-7   | maker order id |
//! | 8-11  | price          |
//! | 12-15 | quantity       |
//! | 16-23 | timestamp (ms) |
//!
//! No semantic validation happens here.

use crate::command::{MatchEvent, OrderRequest, Side};

pub const ORDER_REQUEST_SIZE: usize = 11;
pub const MATCH_EVENT_SIZE: usize = 24;

/// Largest instrument index representable in the 15-bit header field
pub const MAX_INSTRUMENT_INDEX: u16 = 0x7FFF;
/// Largest price representable in the 24-bit price field
pub const MAX_WIRE_PRICE: i32 = 0x00FF_FFFF;

const BID_BIT: u16 = 0x8000;

pub type OrderFrame = [u8; ORDER_REQUEST_SIZE];
pub type MatchFrame = [u8; MATCH_EVENT_SIZE];

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// Encode an order request into its 11-byte frame.
///
/// Out-of-range fields are truncated to their wire width.
#[inline]
pub fn encode_order(
    instrument_index: u16,
    price: i32,
    quantity: u16,
    is_bid: bool,
    order_id: i32,
) -> OrderFrame {
    let header = (instrument_index & MAX_INSTRUMENT_INDEX) | if is_bid { BID_BIT } else { 0 };
    let price = (price & MAX_WIRE_PRICE).to_be_bytes();

    let mut frame = [0u8; ORDER_REQUEST_SIZE];
    frame[0..2].copy_from_slice(&header.to_be_bytes());
    frame[2..5].copy_from_slice(&price[1..4]);
    frame[5..7].copy_from_slice(&quantity.to_be_bytes());
    frame[7..11].copy_from_slice(&order_id.to_be_bytes());
    frame
}

#[inline]
fn header(frame: &OrderFrame) -> u16 {
    u16::from_be_bytes([frame[0], frame[1]])
}

#[inline]
pub fn instrument_index(frame: &OrderFrame) -> u16 {
    header(frame) & MAX_INSTRUMENT_INDEX
}

#[inline]
pub fn is_bid(frame: &OrderFrame) -> bool {
    header(frame) & BID_BIT != 0
}

#[inline]
pub fn price(frame: &OrderFrame) -> i32 {
    i32::from_be_bytes([0, frame[2], frame[3], frame[4]])
}

#[inline]
pub fn quantity(frame: &OrderFrame) -> u16 {
    u16::from_be_bytes([frame[5], frame[6]])
}

#[inline]
pub fn order_id(frame: &OrderFrame) -> i32 {
    i32::from_be_bytes([frame[7], frame[8], frame[9], frame[10]])
}

impl OrderRequest {
    #[inline]
    pub fn encode(&self) -> OrderFrame {
        encode_order(
            self.instrument_index,
            self.price,
            self.quantity,
            self.side.is_bid(),
            self.order_id,
        )
    }

    #[inline]
    pub fn decode(frame: &OrderFrame) -> Self {
        Self {
            instrument_index: instrument_index(frame),
            side: Side::from_bid_flag(is_bid(frame)),
            price: price(frame),
            quantity: quantity(frame),
            order_id: order_id(frame),
        }
    }

    /// Decode the first frame of `bytes`, failing on short input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let frame: &OrderFrame = bytes
            .get(..ORDER_REQUEST_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or(DecodeError::Truncated {
                expected: ORDER_REQUEST_SIZE,
                actual: bytes.len(),
            })?;
        Ok(Self::decode(frame))
    }
}

impl MatchEvent {
    #[inline]
    pub fn encode(&self) -> MatchFrame {
        let mut frame = [0u8; MATCH_EVENT_SIZE];
        self.encode_into(&mut frame);
        frame
    }

    /// Encode into a caller-owned frame (no allocation).
    #[inline]
    pub fn encode_into(&self, frame: &mut MatchFrame) {
        frame[0..4].copy_from_slice(&self.taker_order_id.to_be_bytes());
        frame[4..8].copy_from_slice(&self.maker_order_id.to_be_bytes());
        frame[8..12].copy_from_slice(&self.price.to_be_bytes());
        frame[12..16].copy_from_slice(&self.quantity.to_be_bytes());
        frame[16..24].copy_from_slice(&self.timestamp_ms.to_be_bytes());
    }

    #[inline]
    pub fn decode(frame: &MatchFrame) -> Self {
        let i32_at = |at: usize| i32::from_be_bytes([frame[at], frame[at + 1], frame[at + 2], frame[at + 3]]);
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&frame[16..24]);

        Self {
            taker_order_id: i32_at(0),
            maker_order_id: i32_at(4),
            price: i32_at(8),
            quantity: i32_at(12),
            timestamp_ms: i64::from_be_bytes(ts),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let frame: &MatchFrame = bytes
            .get(..MATCH_EVENT_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or(DecodeError::Truncated {
                expected: MATCH_EVENT_SIZE,
                actual: bytes.len(),
            })?;
        Ok(Self::decode(frame))
    }
}
