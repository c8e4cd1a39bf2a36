//! Shared millisecond clock.
//!
//! One writer ticks the clock; any number of books read it with relaxed
//! loads. Millisecond granularity is all match events carry, so readers
//! never pay for a system call on the hot path.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Clone, Debug, Default)]
pub struct SharedClock {
    now_ms: Arc<AtomicI64>,
}

impl SharedClock {
    /// A clock frozen at `ms` until someone ticks it.
    pub fn at(ms: i64) -> Self {
        Self {
            now_ms: Arc::new(AtomicI64::new(ms)),
        }
    }

    /// A clock initialised from the system wall clock.
    pub fn system() -> Self {
        let clock = Self::default();
        clock.tick();
        clock
    }

    #[inline]
    pub fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_ms(&self, ms: i64) {
        self.now_ms.store(ms, Ordering::Relaxed);
    }

    /// Set the clock from the system wall clock and return the new value.
    pub fn tick(&self) -> i64 {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        self.set_ms(ms);
        ms
    }

    /// Spawn the single writer: ticks every `interval` until `shutdown`.
    pub fn spawn_ticker(&self, interval: Duration, shutdown: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>> {
        let clock = self.clone();
        thread::Builder::new()
            .name("clock-ticker".into())
            .spawn(move || {
                while !shutdown.load(Ordering::Relaxed) {
                    clock.tick();
                    thread::sleep(interval);
                }
            })
    }
}
