//! Egress - where the book sends fills and rejections.
//!
//! The hot path calls the sink synchronously, so implementations must not
//! block. The ring-buffer egress makes exactly one push attempt per event
//! and counts the ones it has to drop.

use crate::command::{BookEvent, MatchEvent, Rejection};

/// Receiver of book output.
pub trait EventSink {
    fn on_match(&mut self, event: MatchEvent);
    fn on_reject(&mut self, rejection: Rejection);
}

/// Collects everything, in order. Used by tests and diagnostics.
impl EventSink for Vec<BookEvent> {
    #[inline]
    fn on_match(&mut self, event: MatchEvent) {
        self.push(BookEvent::Match(event));
    }

    #[inline]
    fn on_reject(&mut self, rejection: Rejection) {
        self.push(BookEvent::Reject(rejection));
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    #[inline]
    fn on_match(&mut self, event: MatchEvent) {
        (**self).on_match(event);
    }

    #[inline]
    fn on_reject(&mut self, rejection: Rejection) {
        (**self).on_reject(rejection);
    }
}

/// Counts events and discards them.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CountingSink {
    pub matches: u64,
    pub rejections: u64,
}

impl EventSink for CountingSink {
    #[inline]
    fn on_match(&mut self, _event: MatchEvent) {
        self.matches += 1;
    }

    #[inline]
    fn on_reject(&mut self, _rejection: Rejection) {
        self.rejections += 1;
    }
}

#[cfg(feature = "runtime")]
pub use ring::{egress_channel, RingEgress};

#[cfg(feature = "runtime")]
mod ring {
    use super::EventSink;
    use crate::codec::MatchFrame;
    use crate::command::{MatchEvent, Rejection};

    /// Create a bounded egress ring and its producer-side sink.
    pub fn egress_channel(capacity: usize) -> (RingEgress, rtrb::Consumer<MatchFrame>) {
        let (producer, consumer) = rtrb::RingBuffer::new(capacity);
        (RingEgress::new(producer), consumer)
    }

    /// Fire-and-forget egress of encoded match events.
    ///
    /// Rejections are not published on the wire; they are logged with their
    /// top-of-book snapshot and counted.
    pub struct RingEgress {
        producer: rtrb::Producer<MatchFrame>,
        published: u64,
        dropped: u64,
        rejections: u64,
    }

    impl RingEgress {
        pub fn new(producer: rtrb::Producer<MatchFrame>) -> Self {
            Self {
                producer,
                published: 0,
                dropped: 0,
                rejections: 0,
            }
        }

        pub fn published(&self) -> u64 {
            self.published
        }

        /// Events lost to back-pressure
        pub fn dropped(&self) -> u64 {
            self.dropped
        }

        pub fn rejections(&self) -> u64 {
            self.rejections
        }
    }

    impl EventSink for RingEgress {
        #[inline]
        fn on_match(&mut self, event: MatchEvent) {
            // Single attempt; drop if full
            match self.producer.push(event.encode()) {
                Ok(()) => self.published += 1,
                Err(_) => self.dropped += 1,
            }
        }

        fn on_reject(&mut self, r: Rejection) {
            self.rejections += 1;
            tracing::debug!(
                order_id = r.order_id,
                side = ?r.side,
                price = r.price,
                quantity = r.quantity,
                reason = ?r.reason,
                best_bid = r.best_bid,
                best_ask = r.best_ask,
                avg_price = r.avg_price,
                "order rejected"
            );
        }
    }
}
