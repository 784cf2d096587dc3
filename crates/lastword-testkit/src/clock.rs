//! A clock tests move by hand.

use std::sync::atomic::{AtomicI64, Ordering};

use lastword_core::{Clock, Timestamp, DAY_MS};

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    /// Jump to `at`. May move backwards.
    pub fn set(&self, at: Timestamp) {
        self.now.store(at, Ordering::SeqCst);
    }

    /// Move forward by `ms`.
    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    /// Jump to the start of day `day` (day 0 is the epoch).
    pub fn set_day(&self, day: i64) {
        self.set(day * DAY_MS);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}
