//! Error types for the engine.

use lastword_core::ValidationError;
use lastword_delivery::DeliveryError;
use lastword_store::StoreError;
use thiserror::Error;

/// Errors that can occur during engine operations.
///
/// Lifecycle policy violations are not errors; they come back as
/// [`ActionOutcome::Rejected`](crate::ActionOutcome::Rejected).
#[derive(Debug, Error)]
pub enum EngineError {
    /// Request rejected on intake.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Delivery error.
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Message not found.
    #[error("message not found: {0}")]
    UnknownMessage(String),

    /// Recipient not found on the message.
    #[error("recipient not found: {0}")]
    UnknownRecipient(String),
}

impl EngineError {
    /// Map a store error, turning `NotFound` into [`EngineError::UnknownMessage`].
    pub(crate) fn from_message_lookup(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => EngineError::UnknownMessage(id),
            e => EngineError::Store(e),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
