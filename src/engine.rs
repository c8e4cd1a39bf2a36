//! Engine - The per-instrument matching loop with CPU pinning and warm-up.
//!
//! One `MatchingLoop` owns one `OrderBook` and is its only writer. Requests
//! arrive over a bounded crossbeam channel that any number of producers may
//! feed; the loop applies them strictly in arrival order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use crossbeam::utils::Backoff;
use serde::Serialize;

use crate::arena::PoolExhausted;
use crate::clock::SharedClock;
use crate::command::{MatchEvent, OrderRequest, Outcome, Rejection};
use crate::config::{ConfigError, InstrumentConfig};
use crate::egress::EventSink;
use crate::order_book::OrderBook;

/// How long an idle loop blocks on the channel before re-checking shutdown
const IDLE_WAIT: Duration = Duration::from_millis(1);

/// Create a bounded multi-producer inbound channel for one instrument.
pub fn inbound_channel(capacity: usize) -> (Sender<OrderRequest>, Receiver<OrderRequest>) {
    channel::bounded(capacity)
}

/// Inbound channel sized by `config.inbound_capacity`.
pub fn inbound_channel_for(config: &InstrumentConfig) -> (Sender<OrderRequest>, Receiver<OrderRequest>) {
    inbound_channel(config.inbound_capacity)
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Instrument {instrument} stopped: {source}")]
    PoolExhausted {
        instrument: String,
        #[source]
        source: PoolExhausted,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to spawn matching thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Matching thread for {0} panicked")]
    Panicked(String),
}

/// Counters kept by the loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub processed: u64,
    pub fills: u64,
    pub rejections: u64,
    pub prunes: u64,
    pub pruned_levels: u64,
}

/// Which core, if any, the matching thread pins itself to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Pinning {
    #[default]
    None,
    /// The last core, typically the one isolated from OS interrupts
    LastCore,
    Core(usize),
}

/// Counts what the book emits on its way to the real sink.
struct Tally<'a, S> {
    inner: &'a mut S,
    stats: &'a mut LoopStats,
}

impl<S: EventSink> EventSink for Tally<'_, S> {
    #[inline]
    fn on_match(&mut self, event: MatchEvent) {
        self.stats.fills += 1;
        self.inner.on_match(event);
    }

    #[inline]
    fn on_reject(&mut self, rejection: Rejection) {
        self.stats.rejections += 1;
        self.inner.on_reject(rejection);
    }
}

/// Sequential consumer feeding one book.
pub struct MatchingLoop {
    book: OrderBook,
    /// Prune after every N processed requests; 0 disables pruning
    prune_interval: u64,
    stats: LoopStats,
}

impl MatchingLoop {
    pub fn new(config: &InstrumentConfig, clock: SharedClock) -> Result<Self, EngineError> {
        let book = OrderBook::new(config, clock)?;
        Ok(Self::from_book(book, config.prune_interval))
    }

    pub fn from_book(book: OrderBook, prune_interval: u64) -> Self {
        Self {
            book,
            prune_interval,
            stats: LoopStats::default(),
        }
    }

    /// Apply one request, pruning on the configured cadence.
    ///
    /// This is the main entry point for synchronous usage (testing, benchmarks).
    pub fn step<S: EventSink>(&mut self, request: &OrderRequest, sink: &mut S) -> Result<Outcome, EngineError> {
        let mut tally = Tally {
            inner: sink,
            stats: &mut self.stats,
        };

        let outcome = match self.book.process(request, &mut tally) {
            Ok(outcome) => outcome,
            Err(source) => {
                tracing::error!(
                    instrument = %self.book.name(),
                    order_id = request.order_id,
                    error = %source,
                    "pool exhausted, stopping instrument"
                );
                return Err(EngineError::PoolExhausted {
                    instrument: self.book.name().to_owned(),
                    source,
                });
            }
        };

        tally.stats.processed += 1;
        if self.prune_interval != 0 && tally.stats.processed % self.prune_interval == 0 {
            let pruned = self.book.prune_stale_levels(&mut tally);
            tally.stats.prunes += 1;
            tally.stats.pruned_levels += pruned as u64;
        }

        Ok(outcome)
    }

    /// Drain `inbound` until `shutdown` is set or every producer is gone.
    ///
    /// Idle waiting spins, then yields, then blocks on the channel in short
    /// slices so the shutdown flag is still observed once per iteration.
    pub fn run<S: EventSink>(
        &mut self,
        inbound: &Receiver<OrderRequest>,
        sink: &mut S,
        shutdown: &AtomicBool,
    ) -> Result<LoopStats, EngineError> {
        tracing::info!(
            instrument = %self.book.name(),
            index = self.book.instrument_index(),
            "matching loop started"
        );

        let backoff = Backoff::new();
        while !shutdown.load(Ordering::Acquire) {
            let request = match inbound.try_recv() {
                Ok(request) => request,
                Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) if !backoff.is_completed() => {
                    backoff.snooze();
                    continue;
                }
                Err(TryRecvError::Empty) => match inbound.recv_timeout(IDLE_WAIT) {
                    Ok(request) => request,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
            };

            backoff.reset();
            self.step(&request, sink)?;
        }

        tracing::info!(
            instrument = %self.book.name(),
            processed = self.stats.processed,
            fills = self.stats.fills,
            rejections = self.stats.rejections,
            "matching loop stopped"
        );
        Ok(self.stats)
    }

    /// Run the loop on its own named thread.
    ///
    /// The thread pins itself per `pinning` and warms the pools before the
    /// first request. Joining hands back the loop and the sink.
    pub fn spawn<S>(
        mut self,
        inbound: Receiver<OrderRequest>,
        mut sink: S,
        shutdown: Arc<AtomicBool>,
        pinning: Pinning,
    ) -> Result<LoopHandle<S>, EngineError>
    where
        S: EventSink + Send + 'static,
    {
        let name = self.book.name().to_owned();
        let handle = thread::Builder::new()
            .name(format!("match-{}", name))
            .spawn(move || {
                pin_current_thread(pinning);
                self.warm_up();
                let result = self.run(&inbound, &mut sink, &shutdown);
                (self, sink, result)
            })?;

        Ok(LoopHandle { name, handle })
    }

    /// Warm up the book (pre-fault pool pages)
    pub fn warm_up(&mut self) {
        self.book.warm_up();
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    pub fn book_mut(&mut self) -> &mut OrderBook {
        &mut self.book
    }

    pub fn into_book(self) -> OrderBook {
        self.book
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn prune_interval(&self) -> u64 {
        self.prune_interval
    }
}

/// Join handle for a spawned `MatchingLoop`.
pub struct LoopHandle<S> {
    name: String,
    handle: JoinHandle<(MatchingLoop, S, Result<LoopStats, EngineError>)>,
}

impl<S> LoopHandle<S> {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the loop to stop; returns the loop and the sink it wrote to.
    pub fn join(self) -> Result<(MatchingLoop, S), EngineError> {
        let (matching_loop, sink, result) = self
            .handle
            .join()
            .map_err(|_| EngineError::Panicked(self.name))?;
        result?;
        Ok((matching_loop, sink))
    }
}

/// Pin the current thread to a CPU core.
fn pin_current_thread(pinning: Pinning) {
    let core = match pinning {
        Pinning::None => return,
        Pinning::LastCore => core_affinity::get_core_ids().and_then(|ids| ids.last().copied()),
        Pinning::Core(id) => core_affinity::get_core_ids().and_then(|ids| ids.into_iter().find(|c| c.id == id)),
    };

    match core {
        Some(core) if core_affinity::set_for_current(core) => {
            tracing::debug!(core = core.id, "matching thread pinned");
        }
        _ => tracing::warn!(?pinning, "could not pin matching thread"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{BookEvent, RejectReason, Side};
    use crate::egress::CountingSink;

    fn config() -> InstrumentConfig {
        InstrumentConfig::new("TEST", 3, 10, 64).with_prune_interval(4)
    }

    #[test]
    fn test_step_counts_and_prunes_on_cadence() {
        let mut engine = MatchingLoop::new(&config(), SharedClock::at(0)).unwrap();
        let mut events: Vec<BookEvent> = Vec::new();

        // Same construction as the stale-bid case: 100 ends up outside [101, 111]
        let requests = [
            OrderRequest::limit(Side::Bid, 100, 5, 1),
            OrderRequest::limit(Side::Ask, 105, 1, 2),
            OrderRequest::limit(Side::Bid, 104, 1, 3),
            OrderRequest::limit(Side::Ask, 108, 1, 4),
            OrderRequest::limit(Side::Bid, 105, 1, 5),
        ];
        for request in &requests[..4] {
            engine.step(request, &mut events).unwrap();
        }
        // Fourth request triggered a prune with nothing outside the collar
        assert_eq!(engine.stats().prunes, 1);
        assert_eq!(engine.stats().pruned_levels, 0);

        engine.step(&requests[4], &mut events).unwrap();
        for _ in 0..3 {
            engine.step(&OrderRequest::limit(Side::Bid, 0, 0, 0), &mut events).unwrap();
        }

        let stats = engine.stats();
        assert_eq!(stats.processed, 8);
        assert_eq!(stats.prunes, 2);
        assert_eq!(stats.pruned_levels, 1);
        assert_eq!(stats.fills, 1);
        assert_eq!(stats.rejections, 1);
        assert!(matches!(
            events.last(),
            Some(BookEvent::Reject(r)) if r.reason == RejectReason::AvgPriceMovedTooFar && r.order_id == 1
        ));
        assert!(engine.book().get_level(Side::Bid, 100).is_none());
    }

    #[test]
    fn test_zero_interval_never_prunes() {
        let mut engine = MatchingLoop::new(&config().with_prune_interval(0), SharedClock::at(0)).unwrap();
        let mut sink = CountingSink::default();
        for id in 0..10 {
            engine.step(&OrderRequest::limit(Side::Bid, 100, 1, id), &mut sink).unwrap();
        }
        assert_eq!(engine.stats().prunes, 0);
    }

    #[test]
    fn test_pool_exhaustion_stops_step() {
        let config = InstrumentConfig::new("TINY", 0, 10, 8).with_chunk_capacity(2);
        let book = OrderBook::with_pool_sizes(&config, SharedClock::at(0), 4, 1).unwrap();
        let mut engine = MatchingLoop::from_book(book, 0);
        let mut sink = CountingSink::default();

        engine.step(&OrderRequest::limit(Side::Bid, 100, 1, 1), &mut sink).unwrap();
        engine.step(&OrderRequest::limit(Side::Bid, 100, 1, 2), &mut sink).unwrap();
        let err = engine.step(&OrderRequest::limit(Side::Bid, 100, 1, 3), &mut sink).unwrap_err();

        assert!(matches!(
            err,
            EngineError::PoolExhausted { ref instrument, source: PoolExhausted::Chunks { capacity: 1 } }
                if instrument == "TINY"
        ));
    }

    #[test]
    fn test_run_exits_when_producers_disconnect() {
        let mut engine = MatchingLoop::new(&config(), SharedClock::at(0)).unwrap();
        let (tx, rx) = inbound_channel(16);
        tx.send(OrderRequest::limit(Side::Ask, 101, 5, 1)).unwrap();
        tx.send(OrderRequest::limit(Side::Bid, 101, 5, 2)).unwrap();
        drop(tx);

        let mut sink = CountingSink::default();
        let stats = engine.run(&rx, &mut sink, &AtomicBool::new(false)).unwrap();
        assert_eq!(stats.processed, 2);
        assert_eq!(sink.matches, 1);
        assert!(engine.book().is_empty());
    }

    #[test]
    fn test_inbound_channel_sized_from_config() {
        let (tx, rx) = inbound_channel_for(&config().with_inbound_capacity(12));
        assert_eq!(tx.capacity(), Some(12));
        assert_eq!(rx.capacity(), Some(12));

        for id in 0..12 {
            tx.try_send(OrderRequest::limit(Side::Bid, 100, 1, id)).unwrap();
        }
        assert!(tx.try_send(OrderRequest::limit(Side::Bid, 100, 1, 12)).is_err());
    }

    #[test]
    fn test_run_observes_shutdown() {
        let mut engine = MatchingLoop::new(&config(), SharedClock::at(0)).unwrap();
        let (_tx, rx) = inbound_channel(16);
        let stats = engine
            .run(&rx, &mut CountingSink::default(), &AtomicBool::new(true))
            .unwrap();
        assert_eq!(stats, LoopStats::default());
    }
}
