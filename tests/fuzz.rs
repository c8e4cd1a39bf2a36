//! Fuzz Test - Compares the pooled book against a reference implementation.
//!
//! Uses a naive but obviously correct `BTreeMap` book with the same collar,
//! matching and pruning rules, and checks that both produce identical
//! outcomes, events and book shapes for long random request streams.

use collar_lob::{
    BookEvent, InstrumentConfig, MatchEvent, OrderBook, OrderRequest, Outcome, RejectReason, Rejection,
    SharedClock, Side,
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, VecDeque};

const NOW: i64 = 42;
const SPAN: u32 = 40;

/// Simple reference implementation for verification
struct ReferenceBook {
    half: i32,
    max_levels: usize,
    bids: BTreeMap<i32, VecDeque<(i32, i32)>>, // price -> [(order_id, size)]
    asks: BTreeMap<i32, VecDeque<(i32, i32)>>,
}

impl ReferenceBook {
    fn new(span: u32) -> Self {
        Self {
            half: (span / 2) as i32,
            max_levels: span as usize + 1,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
        }
    }

    fn best_bid(&self) -> Option<i32> {
        self.bids.keys().next_back().copied()
    }

    fn best_ask(&self) -> Option<i32> {
        self.asks.keys().next().copied()
    }

    fn center(&self) -> Option<i32> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some((b + a) / 2),
            (Some(b), None) => Some(b),
            (None, Some(a)) => Some(a),
            (None, None) => None,
        }
    }

    fn collar(&self, center: i32) -> (i32, i32) {
        ((center - self.half).max(1), center + self.half)
    }

    fn snapshot(&self) -> (i32, i32, i32) {
        let bid = self.best_bid().unwrap_or(0);
        let ask = self.best_ask().unwrap_or(0);
        let avg = if bid != 0 && ask != 0 { (bid + ask) / 2 } else { 0 };
        (bid, ask, avg)
    }

    fn reject(&self, req: &OrderRequest, quantity: i32, reason: RejectReason, events: &mut Vec<BookEvent>) {
        let (best_bid, best_ask, avg_price) = self.snapshot();
        events.push(BookEvent::Reject(Rejection {
            order_id: req.order_id,
            side: req.side,
            price: req.price,
            quantity,
            reason,
            best_bid,
            best_ask,
            avg_price,
        }));
    }

    fn sweep(&mut self, side: Side, taker: i32, mut remaining: i32, limit: Option<i32>, events: &mut Vec<BookEvent>) -> i32 {
        while remaining > 0 {
            let best = match side {
                Side::Bid => self.best_ask(),
                Side::Ask => self.best_bid(),
            };
            let Some(price) = best else { break };
            if let Some(limit) = limit {
                if (side == Side::Bid && price > limit) || (side == Side::Ask && price < limit) {
                    break;
                }
            }

            let book = match side {
                Side::Bid => &mut self.asks,
                Side::Ask => &mut self.bids,
            };
            let queue = book.get_mut(&price).unwrap();
            while remaining > 0 {
                let Some(front) = queue.front_mut() else { break };
                let quantity = front.1.min(remaining);
                front.1 -= quantity;
                remaining -= quantity;
                events.push(BookEvent::Match(MatchEvent {
                    taker_order_id: taker,
                    maker_order_id: front.0,
                    price,
                    quantity,
                    timestamp_ms: NOW,
                }));
                if front.1 == 0 {
                    queue.pop_front();
                }
            }
            if queue.is_empty() {
                book.remove(&price);
            }
        }
        remaining
    }

    fn process(&mut self, req: &OrderRequest, events: &mut Vec<BookEvent>) -> Outcome {
        let quantity = req.quantity as i32;
        if req.price == 0 && quantity == 0 {
            return Outcome::CancelIgnored;
        }
        if req.price == 0 {
            let unfilled = self.sweep(req.side, req.order_id, quantity, None, events);
            return Outcome::Market {
                filled: quantity - unfilled,
                unfilled,
            };
        }
        if quantity == 0 {
            return Outcome::Limit { filled: 0, rested: 0 };
        }

        let (low, high) = self.collar(self.center().unwrap_or(req.price));
        let reason = match req.side {
            Side::Bid if req.price < low => Some(RejectReason::BidPriceTooLow),
            Side::Ask if req.price > high => Some(RejectReason::AskPriceTooHigh),
            _ => None,
        };
        if let Some(reason) = reason {
            self.reject(req, quantity, reason, events);
            return Outcome::Rejected { filled: 0, reason };
        }

        let remaining = self.sweep(req.side, req.order_id, quantity, Some(req.price), events);
        let filled = quantity - remaining;
        if remaining == 0 {
            return Outcome::Limit { filled, rested: 0 };
        }

        let levels = self.bids.len() + self.asks.len();
        let book = match req.side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };
        if !book.contains_key(&req.price) && levels == self.max_levels {
            self.reject(req, remaining, RejectReason::OrderbookFull, events);
            return Outcome::Rejected {
                filled,
                reason: RejectReason::OrderbookFull,
            };
        }
        book.entry(req.price).or_default().push_back((req.order_id, remaining));
        Outcome::Limit {
            filled,
            rested: remaining,
        }
    }

    fn prune(&mut self, events: &mut Vec<BookEvent>) -> usize {
        let Some(center) = self.center() else { return 0 };
        let (low, high) = self.collar(center);
        let (best_bid, best_ask, avg_price) = self.snapshot();
        let mut pruned = 0;

        for (side, book) in [(Side::Bid, &mut self.bids), (Side::Ask, &mut self.asks)] {
            let mut stale: Vec<i32> = book.keys().copied().filter(|&p| p < low || p > high).collect();
            if side == Side::Bid {
                stale.reverse();
            }
            for price in stale {
                for (order_id, size) in book.remove(&price).unwrap() {
                    events.push(BookEvent::Reject(Rejection {
                        order_id,
                        side,
                        price,
                        quantity: size,
                        reason: RejectReason::AvgPriceMovedTooFar,
                        best_bid,
                        best_ask,
                        avg_price,
                    }));
                }
                pruned += 1;
            }
        }
        pruned
    }

    fn levels(&self, side: Side) -> Vec<(i32, i64, u32)> {
        let summarize = |(&price, queue): (&i32, &VecDeque<(i32, i32)>)| {
            let volume = queue.iter().map(|&(_, s)| s as i64).sum();
            (price, volume, queue.len() as u32)
        };
        match side {
            Side::Bid => self.bids.iter().rev().map(summarize).collect(),
            Side::Ask => self.asks.iter().map(summarize).collect(),
        }
    }
}

fn engine_levels(book: &OrderBook, side: Side) -> Vec<(i32, i64, u32)> {
    book.levels(side)
        .into_iter()
        .map(|l| (l.price, l.volume, l.order_count))
        .collect()
}

/// Random request around a drifting mid, with some outside the collar
fn random_request(rng: &mut ChaCha8Rng, mid: &mut i32, order_id: i32) -> OrderRequest {
    *mid = (*mid + rng.gen_range(-2..=2)).clamp(60, 10_000);
    let side = if rng.gen_bool(0.5) { Side::Bid } else { Side::Ask };
    let roll = rng.gen_range(0..100);

    if roll < 2 {
        OrderRequest::limit(side, 0, 0, order_id)
    } else if roll < 12 {
        OrderRequest::market(side, rng.gen_range(1..120), order_id)
    } else {
        let quantity = if roll < 14 { 0 } else { rng.gen_range(1..60) };
        let price = (*mid + rng.gen_range(-30..=30)).max(1);
        OrderRequest::limit(side, price, quantity, order_id)
    }
}

fn run_comparison(seed: u64, steps: i32, prune_every: i32) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    // 16-slot chunks, chain cap far above anything a single level sees here
    let config = InstrumentConfig::new("FUZZ", 0, SPAN, 8_192).with_chunk_capacity(16);
    let mut book = OrderBook::new(&config, SharedClock::at(NOW)).unwrap();
    let mut reference = ReferenceBook::new(SPAN);
    let mut mid = 1_000;

    for order_id in 1..=steps {
        let req = random_request(&mut rng, &mut mid, order_id);

        let mut actual = Vec::new();
        let mut expected = Vec::new();
        let outcome = book.process(&req, &mut actual).unwrap();
        let expected_outcome = reference.process(&req, &mut expected);

        assert_eq!(outcome, expected_outcome, "seed {} step {}: {:?}", seed, order_id, req);
        assert_eq!(actual, expected, "seed {} step {}: {:?}", seed, order_id, req);

        if order_id % prune_every == 0 {
            let mut actual = Vec::new();
            let mut expected = Vec::new();
            assert_eq!(book.prune_stale_levels(&mut actual), reference.prune(&mut expected));
            assert_eq!(actual, expected, "seed {} prune at {}", seed, order_id);
        }

        assert_eq!(book.best_bid(), reference.best_bid().unwrap_or(0));
        assert_eq!(book.best_ask(), reference.best_ask().unwrap_or(0));
        if let Err(err) = book.verify_integrity() {
            panic!("seed {} step {}: {}", seed, order_id, err);
        }
    }

    assert_eq!(engine_levels(&book, Side::Bid), reference.levels(Side::Bid));
    assert_eq!(engine_levels(&book, Side::Ask), reference.levels(Side::Ask));
}

#[test]
fn test_fuzz_against_reference() {
    for seed in 0..8 {
        run_comparison(seed, 3_000, 25);
    }
}

#[test]
fn test_fuzz_without_pruning() {
    // Levels accumulate, so the level pool fills and OrderbookFull kicks in
    run_comparison(0xF00D, 4_000, i32::MAX);
}

#[test]
fn test_fuzz_frequent_pruning() {
    run_comparison(0xBEEF, 4_000, 1);
}
