//! Retry backoff for recipient delivery attempts.

use serde::{Deserialize, Serialize};

use lastword_core::{HOUR_MS, MINUTE_MS};

/// Exponential backoff: `base * factor^(attempt - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base_ms: i64,
    pub factor: u32,
    pub max_ms: i64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: MINUTE_MS,
            factor: 2,
            max_ms: HOUR_MS,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next attempt, after `attempts` failed attempts.
    pub fn delay_after(&self, attempts: u32) -> i64 {
        let exponent = attempts.max(1) - 1;
        let multiplier = i64::from(self.factor.max(1))
            .checked_pow(exponent)
            .unwrap_or(i64::MAX);
        self.base_ms.saturating_mul(multiplier).min(self.max_ms)
    }
}
