//! Matching - request dispatch, price-time matching and collar pruning.
//!
//! Implements the cross/rest algorithm on top of `OrderBook`:
//! 1. COLLAR: Reject limit prices outside the band around the book center
//! 2. CROSSING: Match against the opposite side, best price first
//! 3. RESTING: Place any remaining quantity at its limit price
//!
//! Every fill prints at the maker's price. Nothing here allocates; pool
//! exhaustion is the only error and it is fatal for the book.

use std::cmp::Reverse;

use crate::arena::PoolExhausted;
use crate::command::{
    MatchEvent, OrderKind, OrderRequest, Outcome, RejectReason, Rejection, Side,
};
use crate::egress::EventSink;
use crate::order_book::OrderBook;

impl OrderBook {
    /// Apply one request to the book.
    ///
    /// Fills and rejections go to `sink` in the order they happen. Business
    /// rejections are reported through the sink and the returned `Outcome`,
    /// never as errors.
    ///
    /// # Errors
    /// `PoolExhausted` if a pool ran dry; the book must not be used again.
    pub fn process<S: EventSink>(&mut self, request: &OrderRequest, sink: &mut S) -> Result<Outcome, PoolExhausted> {
        match request.kind() {
            OrderKind::Cancel => {
                tracing::debug!(order_id = request.order_id, "cancel request ignored");
                Ok(Outcome::CancelIgnored)
            }
            OrderKind::Market => Ok(self.place_market(request, sink)),
            OrderKind::Limit => self.place_limit(request, sink),
        }
    }

    /// Match against the full opposite depth; the remainder never rests.
    pub fn place_market<S: EventSink>(&mut self, request: &OrderRequest, sink: &mut S) -> Outcome {
        let quantity = request.quantity as i32;
        let unfilled = self.match_order(request.side, request.order_id, quantity, None, sink);

        if unfilled > 0 {
            tracing::debug!(
                order_id = request.order_id,
                side = ?request.side,
                unfilled,
                "market order remainder discarded"
            );
        }

        Outcome::Market {
            filled: quantity - unfilled,
            unfilled,
        }
    }

    /// Collar check, match up to the limit price, then rest the remainder.
    pub fn place_limit<S: EventSink>(&mut self, request: &OrderRequest, sink: &mut S) -> Result<Outcome, PoolExhausted> {
        let side = request.side;
        let price = request.price;
        let quantity = request.quantity as i32;

        if quantity == 0 {
            return Ok(Outcome::Limit { filled: 0, rested: 0 });
        }

        let (low, high) = self.collar(self.center().unwrap_or(price));
        let out_of_collar = match side {
            Side::Bid if price < low => Some(RejectReason::BidPriceTooLow),
            Side::Ask if price > high => Some(RejectReason::AskPriceTooHigh),
            _ => None,
        };
        if let Some(reason) = out_of_collar {
            self.reject(request, quantity, reason, sink);
            return Ok(Outcome::Rejected { filled: 0, reason });
        }

        // Phase 1: CROSSING
        let remaining = self.match_order(side, request.order_id, quantity, Some(price), sink);
        let filled = quantity - remaining;
        if remaining == 0 {
            return Ok(Outcome::Limit { filled, rested: 0 });
        }

        // Phase 2: RESTING
        let Some(level) = self.level_for(side, price)? else {
            tracing::warn!(instrument = %self.name(), ?side, price, "no free price level");
            self.reject(request, remaining, RejectReason::OrderbookFull, sink);
            return Ok(Outcome::Rejected {
                filled,
                reason: RejectReason::OrderbookFull,
            });
        };

        let added = match self.levels.level_mut(level).add_order(&mut self.chunks, request.order_id, remaining) {
            Ok(added) => added,
            Err(exhausted) => {
                self.discard_if_empty(side, price, level);
                return Err(exhausted);
            }
        };
        if !added {
            tracing::warn!(instrument = %self.name(), ?side, price, "price level is full");
            self.reject(request, remaining, RejectReason::PriceLimitFull, sink);
            return Ok(Outcome::Rejected {
                filled,
                reason: RejectReason::PriceLimitFull,
            });
        }

        Ok(Outcome::Limit {
            filled,
            rested: remaining,
        })
    }

    /// Match `remaining` against the opposite side, best price outward.
    ///
    /// `limit` of `None` sweeps the whole side. Levels that empty are
    /// unlisted and returned to the level pool.
    ///
    /// # Returns
    /// The quantity left unmatched.
    ///
    /// # Complexity
    /// O(fills + emptied levels × log L)
    pub(crate) fn match_order<S: EventSink>(
        &mut self,
        side: Side,
        taker_order_id: i32,
        mut remaining: i32,
        limit: Option<i32>,
        sink: &mut S,
    ) -> i32 {
        let timestamp_ms = self.clock.now_ms();
        let book = match side {
            Side::Bid => &mut self.asks,
            Side::Ask => &mut self.bids,
        };

        while remaining > 0 {
            let Some((price, id)) = book.best_entry() else {
                break;
            };

            if let Some(limit) = limit {
                let crosses = match side {
                    Side::Bid => price <= limit,
                    Side::Ask => price >= limit,
                };
                if !crosses {
                    break;
                }
            }

            let level = self.levels.level_mut(id);
            while remaining > 0 {
                let Some(head) = level.peek(&self.chunks) else {
                    break;
                };

                let quantity = if head.size <= remaining {
                    level.remove_order(&mut self.chunks);
                    head.size
                } else {
                    level.partial_fill(&mut self.chunks, head.size - remaining);
                    remaining
                };
                remaining -= quantity;

                sink.on_match(MatchEvent {
                    taker_order_id,
                    maker_order_id: head.id,
                    price,
                    quantity,
                    timestamp_ms,
                });
            }

            if level.is_empty() {
                book.pop_best();
                self.levels.release_level(id, &mut self.chunks);
            }
        }

        remaining
    }

    /// Evict every level outside the collar around the current center.
    ///
    /// Each evicted order is reported with `AvgPriceMovedTooFar`, best price
    /// first within a side, bids before asks.
    ///
    /// # Returns
    /// Number of levels removed.
    pub fn prune_stale_levels<S: EventSink>(&mut self, sink: &mut S) -> usize {
        let Some(center) = self.center() else {
            return 0;
        };
        let (low, high) = self.collar(center);
        let best_bid = self.best_bid();
        let best_ask = self.best_ask();
        let avg_price = self.avg_price();

        let Self {
            name,
            bids,
            asks,
            levels,
            chunks,
            scratch,
            ..
        } = self;

        let mut pruned = 0;
        for book in [bids, asks] {
            scratch.clear();
            scratch.extend(book.iter().filter(|&(price, _)| price < low || price > high));
            if scratch.is_empty() {
                continue;
            }
            scratch.sort_unstable_by_key(|&(price, _)| Reverse(book.rank(price)));

            let side = book.side();
            for &(price, id) in scratch.iter() {
                let level = levels.level_mut(id);
                let orders = level.order_count();
                while let Some(order) = level.remove_order(chunks) {
                    sink.on_reject(Rejection {
                        order_id: order.id,
                        side,
                        price,
                        quantity: order.size,
                        reason: RejectReason::AvgPriceMovedTooFar,
                        best_bid,
                        best_ask,
                        avg_price,
                    });
                }
                book.remove(price);
                levels.release_level(id, chunks);
                pruned += 1;

                tracing::debug!(instrument = %name, ?side, price, orders, center, "pruned stale level");
            }
            book.compact();
        }

        pruned
    }

    /// Report a rejection with the current top-of-book snapshot.
    fn reject<S: EventSink>(&self, request: &OrderRequest, quantity: i32, reason: RejectReason, sink: &mut S) {
        sink.on_reject(Rejection {
            order_id: request.order_id,
            side: request.side,
            price: request.price,
            quantity,
            reason,
            best_bid: self.best_bid(),
            best_ask: self.best_ask(),
            avg_price: self.avg_price(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SharedClock;
    use crate::command::BookEvent;
    use crate::config::InstrumentConfig;

    fn book() -> OrderBook {
        OrderBook::new(&InstrumentConfig::new("TEST", 0, 1000, 64).with_chunk_capacity(4), SharedClock::at(7)).unwrap()
    }

    fn fills(events: &[BookEvent]) -> Vec<(i32, i32, i32, i32)> {
        events
            .iter()
            .filter_map(|e| match e {
                BookEvent::Match(m) => Some((m.taker_order_id, m.maker_order_id, m.price, m.quantity)),
                BookEvent::Reject(_) => None,
            })
            .collect()
    }

    fn submit(book: &mut OrderBook, request: OrderRequest) -> (Outcome, Vec<BookEvent>) {
        let mut events = Vec::new();
        let outcome = book.process(&request, &mut events).unwrap();
        (outcome, events)
    }

    #[test]
    fn test_equal_size_fill_closes_level() {
        let mut book = book();
        submit(&mut book, OrderRequest::limit(Side::Ask, 100, 10, 1));
        let (outcome, events) = submit(&mut book, OrderRequest::limit(Side::Bid, 100, 10, 2));

        assert_eq!(outcome, Outcome::Limit { filled: 10, rested: 0 });
        assert_eq!(fills(&events), vec![(2, 1, 100, 10)]);
        assert!(book.is_empty());
        assert_eq!(book.pool_stats().levels_in_use, 0);
        assert_eq!(book.pool_stats().chunks_in_use, 0);
    }

    #[test]
    fn test_partial_fill_of_maker() {
        let mut book = book();
        submit(&mut book, OrderRequest::limit(Side::Ask, 100, 10, 1));
        let (outcome, events) = submit(&mut book, OrderRequest::limit(Side::Bid, 100, 4, 2));

        assert_eq!(outcome, Outcome::Limit { filled: 4, rested: 0 });
        assert_eq!(fills(&events), vec![(2, 1, 100, 4)]);
        assert_eq!(book.orders_at(Side::Ask, 100), vec![(1, 6)]);
        assert!(book.verify_integrity().is_ok());
    }

    #[test]
    fn test_sweep_walks_levels_at_maker_price() {
        let mut book = book();
        submit(&mut book, OrderRequest::limit(Side::Ask, 101, 3, 1));
        submit(&mut book, OrderRequest::limit(Side::Ask, 101, 2, 2));
        submit(&mut book, OrderRequest::limit(Side::Ask, 102, 5, 3));
        submit(&mut book, OrderRequest::limit(Side::Ask, 104, 5, 4));

        let (outcome, events) = submit(&mut book, OrderRequest::limit(Side::Bid, 103, 12, 9));

        assert_eq!(outcome, Outcome::Limit { filled: 10, rested: 2 });
        assert_eq!(fills(&events), vec![(9, 1, 101, 3), (9, 2, 101, 2), (9, 3, 102, 5)]);
        assert_eq!(book.best_bid(), 103);
        assert_eq!(book.best_ask(), 104);
        assert!(book.verify_integrity().is_ok());
    }

    #[test]
    fn test_ask_limit_stops_below_price() {
        let mut book = book();
        submit(&mut book, OrderRequest::limit(Side::Bid, 100, 5, 1));
        submit(&mut book, OrderRequest::limit(Side::Bid, 98, 5, 2));

        let (outcome, events) = submit(&mut book, OrderRequest::limit(Side::Ask, 99, 8, 3));
        assert_eq!(outcome, Outcome::Limit { filled: 5, rested: 3 });
        assert_eq!(fills(&events), vec![(3, 1, 100, 5)]);
        assert_eq!(book.best_bid(), 98);
        assert_eq!(book.best_ask(), 99);
    }

    #[test]
    fn test_events_carry_clock_time() {
        let mut book = book();
        submit(&mut book, OrderRequest::limit(Side::Bid, 100, 1, 1));
        book.clock().set_ms(1_234);
        let (_, events) = submit(&mut book, OrderRequest::market(Side::Ask, 1, 2));
        assert!(matches!(events[0], BookEvent::Match(m) if m.timestamp_ms == 1_234));
    }

    #[test]
    fn test_market_remainder_is_discarded() {
        let mut book = book();
        submit(&mut book, OrderRequest::limit(Side::Ask, 100, 3, 1));
        let (outcome, events) = submit(&mut book, OrderRequest::market(Side::Bid, 10, 2));

        assert_eq!(outcome, Outcome::Market { filled: 3, unfilled: 7 });
        assert_eq!(events.len(), 1);
        assert!(book.is_empty());
    }

    #[test]
    fn test_cancel_sentinel_is_noop() {
        let mut book = book();
        submit(&mut book, OrderRequest::limit(Side::Bid, 100, 3, 1));
        let (outcome, events) = submit(&mut book, OrderRequest::limit(Side::Bid, 0, 0, 1));

        assert_eq!(outcome, Outcome::CancelIgnored);
        assert!(events.is_empty());
        assert_eq!(book.depth_at(Side::Bid, 100), (3, 1));
    }

    #[test]
    fn test_zero_quantity_limit_is_noop() {
        let mut book = book();
        let (outcome, events) = submit(&mut book, OrderRequest::limit(Side::Bid, 100, 0, 1));
        assert_eq!(outcome, Outcome::Limit { filled: 0, rested: 0 });
        assert!(events.is_empty());
        assert!(book.is_empty());
    }

    #[test]
    fn test_collar_rejects_only_outward_prices() {
        let mut book =
            OrderBook::new(&InstrumentConfig::new("TEST", 0, 10, 64), SharedClock::at(0)).unwrap();
        submit(&mut book, OrderRequest::limit(Side::Bid, 100, 1, 1));
        submit(&mut book, OrderRequest::limit(Side::Bid, 105, 1, 2));
        submit(&mut book, OrderRequest::limit(Side::Ask, 110, 1, 3));
        submit(&mut book, OrderRequest::market(Side::Ask, 1, 4));
        assert_eq!((book.best_bid(), book.best_ask()), (100, 110));

        // Collar [100, 110] around center 105
        let (outcome, events) = submit(&mut book, OrderRequest::limit(Side::Bid, 99, 1, 5));
        assert_eq!(outcome, Outcome::Rejected { filled: 0, reason: RejectReason::BidPriceTooLow });
        assert!(matches!(
            events[0],
            BookEvent::Reject(r) if r.best_bid == 100 && r.best_ask == 110 && r.avg_price == 105
        ));

        // A bid above the collar is admitted and crosses
        let (outcome, _) = submit(&mut book, OrderRequest::limit(Side::Bid, 111, 1, 6));
        assert_eq!(outcome, Outcome::Limit { filled: 1, rested: 0 });
    }

    #[test]
    fn test_full_level_rejects_remainder() {
        // One chunk of 4 per level
        let mut book =
            OrderBook::new(&InstrumentConfig::new("TEST", 0, 100, 4).with_chunk_capacity(4), SharedClock::at(0))
                .unwrap();
        for id in 0..4 {
            submit(&mut book, OrderRequest::limit(Side::Bid, 100, 1, id));
        }
        let (outcome, events) = submit(&mut book, OrderRequest::limit(Side::Bid, 100, 1, 4));

        assert_eq!(outcome, Outcome::Rejected { filled: 0, reason: RejectReason::PriceLimitFull });
        assert!(matches!(events[0], BookEvent::Reject(r) if r.reason == RejectReason::PriceLimitFull));
        assert_eq!(book.depth_at(Side::Bid, 100), (4, 4));
        assert!(book.verify_integrity().is_ok());
    }

    #[test]
    fn test_prune_evicts_outside_collar() {
        let mut book =
            OrderBook::new(&InstrumentConfig::new("TEST", 0, 10, 64), SharedClock::at(0)).unwrap();
        submit(&mut book, OrderRequest::limit(Side::Bid, 100, 2, 1));
        submit(&mut book, OrderRequest::limit(Side::Bid, 100, 3, 2));
        submit(&mut book, OrderRequest::limit(Side::Ask, 105, 1, 3));
        submit(&mut book, OrderRequest::limit(Side::Bid, 104, 1, 4));
        submit(&mut book, OrderRequest::limit(Side::Ask, 108, 1, 5));
        // Lifting the 105 ask moves the center to (104 + 108) / 2 = 106
        submit(&mut book, OrderRequest::limit(Side::Bid, 105, 1, 6));
        assert_eq!((book.best_bid(), book.best_ask()), (104, 108));

        let mut events = Vec::new();
        assert_eq!(book.prune_stale_levels(&mut events), 1);

        let evicted: Vec<(i32, Side, i32, i32)> = events
            .iter()
            .map(|e| match e {
                BookEvent::Reject(r) => {
                    assert_eq!(r.reason, RejectReason::AvgPriceMovedTooFar);
                    assert_eq!((r.best_bid, r.best_ask, r.avg_price), (104, 108, 106));
                    (r.order_id, r.side, r.price, r.quantity)
                }
                BookEvent::Match(_) => panic!("prune must not fill"),
            })
            .collect();
        assert_eq!(evicted, vec![(1, Side::Bid, 100, 2), (2, Side::Bid, 100, 3)]);
        assert_eq!(book.best_bid(), 104);
        assert!(book.get_level(Side::Bid, 100).is_none());
        assert!(book.verify_integrity().is_ok());
    }

    #[test]
    fn test_prune_empty_book() {
        let mut book = book();
        let mut events = Vec::new();
        assert_eq!(book.prune_stale_levels(&mut events), 0);
        assert!(events.is_empty());
    }
}
