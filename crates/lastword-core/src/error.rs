//! Error types for the LastWord core.

use thiserror::Error;

use crate::lifecycle::MessageStatus;

/// Core errors from encoding and signature checks.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Validation errors, raised synchronously before anything enters the
/// state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("check-in interval must be between {min} and {max} days, got {got}")]
    IntervalOutOfRange { got: i64, min: u32, max: u32 },

    #[error("grace period must be between {min} and {max} days, got {got}")]
    GraceOutOfRange { got: i64, min: u32, max: u32 },

    #[error("extended grace must be between {min} and {max} days, got {got}")]
    ExtendedGraceOutOfRange { got: i64, min: u32, max: u32 },

    #[error("message has no recipients")]
    NoRecipients,

    #[error("too many recipients: {got} (max {max})")]
    TooManyRecipients { got: usize, max: usize },

    #[error("sealed payload is empty")]
    EmptyPayload,

    #[error("sealed payload too large: {got} bytes (max {max})")]
    PayloadTooLarge { got: usize, max: usize },

    #[error("invalid destination for {channel}: {destination:?}")]
    InvalidDestination {
        channel: &'static str,
        destination: String,
    },

    #[error("unknown user: {0}")]
    UnknownUser(String),

    #[error("check-in at {at} is more than {max_skew_ms} ms ahead of now ({now})")]
    CheckInInFuture {
        at: i64,
        now: i64,
        max_skew_ms: i64,
    },
}

/// A transition the lifecycle does not allow.
///
/// This is a policy outcome, returned as a value to callers rather than
/// raised as an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal transition {action} from {from:?}")]
pub struct IllegalTransition {
    /// Status the message was in.
    pub from: MessageStatus,
    /// The attempted action.
    pub action: &'static str,
}
