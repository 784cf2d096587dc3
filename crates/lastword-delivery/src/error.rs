//! Error types for the delivery module.

use thiserror::Error;

/// Errors that can occur during a delivery pass.
///
/// Transient channel failures are not errors; they are recorded on the
/// recipient and retried.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Store operation failed.
    #[error("store error: {0}")]
    StoreError(#[from] lastword_store::StoreError),

    /// A `Delivering` message has no release capability.
    #[error("message {0} has no release capability")]
    MissingCapability(String),
}

/// Result type for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;
