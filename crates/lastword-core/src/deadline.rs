//! Deadline calculation.
//!
//! `deadline = last_check_in + interval_days + grace_days`. Pure, no I/O.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::{Timestamp, DAY_MS};

/// Minimum check-in interval in days.
pub const MIN_INTERVAL_DAYS: u32 = 1;

/// Maximum check-in interval in days.
pub const MAX_INTERVAL_DAYS: u32 = 365;

/// Maximum grace period in days.
pub const MAX_GRACE_DAYS: u32 = 30;

/// Bounds for a dissolution-plan extension in days.
pub const MIN_EXTENDED_GRACE_DAYS: u32 = 1;
pub const MAX_EXTENDED_GRACE_DAYS: u32 = 365;

/// A validated check-in cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckInPolicy {
    interval_days: u32,
    grace_days: u32,
}

impl CheckInPolicy {
    /// Validate raw day counts. Out-of-range values are rejected, never clamped.
    pub fn new(interval_days: i64, grace_days: i64) -> Result<Self, ValidationError> {
        Ok(Self {
            interval_days: validate_interval(interval_days)?,
            grace_days: validate_grace(grace_days)?,
        })
    }

    /// Days between required check-ins.
    pub fn interval_days(&self) -> u32 {
        self.interval_days
    }

    /// Extra days past the interval before release.
    pub fn grace_days(&self) -> u32 {
        self.grace_days
    }

    /// Apply already-validated per-message overrides.
    pub fn with_overrides(self, interval_days: Option<u32>, grace_days: Option<u32>) -> Self {
        Self {
            interval_days: interval_days.unwrap_or(self.interval_days),
            grace_days: grace_days.unwrap_or(self.grace_days),
        }
    }

    /// Deadline for a check-in at `last_check_in`.
    pub fn deadline_from(&self, last_check_in: Timestamp) -> Timestamp {
        compute_deadline(last_check_in, self.interval_days, self.grace_days)
    }
}

/// Compute the release deadline.
pub fn compute_deadline(last_check_in: Timestamp, interval_days: u32, grace_days: u32) -> Timestamp {
    let window = (i64::from(interval_days) + i64::from(grace_days)) * DAY_MS;
    last_check_in.saturating_add(window)
}

/// Validate a check-in interval.
pub fn validate_interval(days: i64) -> Result<u32, ValidationError> {
    if days < i64::from(MIN_INTERVAL_DAYS) || days > i64::from(MAX_INTERVAL_DAYS) {
        return Err(ValidationError::IntervalOutOfRange {
            got: days,
            min: MIN_INTERVAL_DAYS,
            max: MAX_INTERVAL_DAYS,
        });
    }
    Ok(days as u32)
}

/// Validate a grace period.
pub fn validate_grace(days: i64) -> Result<u32, ValidationError> {
    if days < 0 || days > i64::from(MAX_GRACE_DAYS) {
        return Err(ValidationError::GraceOutOfRange {
            got: days,
            min: 0,
            max: MAX_GRACE_DAYS,
        });
    }
    Ok(days as u32)
}

/// Validate a dissolution-plan extension.
pub fn validate_extended_grace(days: i64) -> Result<u32, ValidationError> {
    if days < i64::from(MIN_EXTENDED_GRACE_DAYS) || days > i64::from(MAX_EXTENDED_GRACE_DAYS) {
        return Err(ValidationError::ExtendedGraceOutOfRange {
            got: days,
            min: MIN_EXTENDED_GRACE_DAYS,
            max: MAX_EXTENDED_GRACE_DAYS,
        });
    }
    Ok(days as u32)
}
