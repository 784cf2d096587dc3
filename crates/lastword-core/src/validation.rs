//! Intake validation: everything is checked before a record enters the
//! state machine.

use serde::{Deserialize, Serialize};

use crate::deadline::{validate_extended_grace, validate_grace, validate_interval};
use crate::error::ValidationError;
use crate::message::{Channel, DissolutionPlan};
use crate::request::{CheckInSignal, DissolutionPlanRequest, MessageCreateRequest};
use crate::types::{Timestamp, MINUTE_MS};

/// Default cap on recipients per message.
pub const DEFAULT_MAX_RECIPIENTS: usize = 32;

/// Default cap on sealed payload size (1 MiB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Default tolerance for check-ins stamped ahead of the engine clock.
pub const DEFAULT_MAX_CHECK_IN_SKEW_MS: i64 = 5 * MINUTE_MS;

/// Size limits applied on intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyLimits {
    pub max_recipients: usize,
    pub max_payload_bytes: usize,
    /// How far past the engine clock a check-in's `at` may lie.
    pub max_check_in_skew_ms: i64,
}

impl Default for PolicyLimits {
    fn default() -> Self {
        Self {
            max_recipients: DEFAULT_MAX_RECIPIENTS,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            max_check_in_skew_ms: DEFAULT_MAX_CHECK_IN_SKEW_MS,
        }
    }
}

/// Overrides that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedOverrides {
    pub check_in_interval_days: Option<u32>,
    pub grace_period_days: Option<u32>,
}

/// Validate a create request.
///
/// This checks:
/// - interval and grace overrides are in range
/// - at least one and at most `max_recipients` recipients
/// - every destination is plausible for its channel
/// - the sealed payload is non-empty and within `max_payload_bytes`
pub fn validate_create_request(
    request: &MessageCreateRequest,
    limits: &PolicyLimits,
) -> Result<ValidatedOverrides, ValidationError> {
    let check_in_interval_days = request
        .check_in_interval_days
        .map(validate_interval)
        .transpose()?;
    let grace_period_days = request.grace_period_days.map(validate_grace).transpose()?;

    if request.recipients.is_empty() {
        return Err(ValidationError::NoRecipients);
    }
    if request.recipients.len() > limits.max_recipients {
        return Err(ValidationError::TooManyRecipients {
            got: request.recipients.len(),
            max: limits.max_recipients,
        });
    }
    for recipient in &request.recipients {
        recipient.channel.validate_destination(&recipient.destination)?;
    }

    if request.sealed_payload.is_empty() {
        return Err(ValidationError::EmptyPayload);
    }
    if request.sealed_payload.bytes.len() > limits.max_payload_bytes {
        return Err(ValidationError::PayloadTooLarge {
            got: request.sealed_payload.bytes.len(),
            max: limits.max_payload_bytes,
        });
    }

    Ok(ValidatedOverrides {
        check_in_interval_days,
        grace_period_days,
    })
}

/// Validate a dissolution plan and build the record.
pub fn validate_dissolution_plan(
    request: &DissolutionPlanRequest,
) -> Result<DissolutionPlan, ValidationError> {
    let extended_grace_days = validate_extended_grace(request.extended_grace_days)?;
    Channel::Email.validate_destination(&request.backup_contact_address)?;
    Ok(DissolutionPlan {
        backup_contact_address: request.backup_contact_address.clone(),
        extended_grace_days,
        executed_at: None,
    })
}

/// Reject check-ins stamped further in the future than the skew limit.
///
/// A future `at` would push every deadline out by the same amount.
pub fn validate_check_in(
    signal: &CheckInSignal,
    now: Timestamp,
    limits: &PolicyLimits,
) -> Result<(), ValidationError> {
    if signal.at > now.saturating_add(limits.max_check_in_skew_ms) {
        return Err(ValidationError::CheckInInFuture {
            at: signal.at,
            now,
            max_skew_ms: limits.max_check_in_skew_ms,
        });
    }
    Ok(())
}
