//! Time source abstraction.
//!
//! Every component that needs "now" takes a [`Clock`] so tests can move time
//! forward by days without sleeping.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::Timestamp;

/// A source of the current instant.
pub trait Clock: Send + Sync {
    /// Current time in Unix milliseconds.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}
