//! Error types for the content vault.

use thiserror::Error;

/// Errors that can occur while sealing or revealing content.
#[derive(Debug, Error)]
pub enum VaultError {
    /// The capability was not signed by the release authority.
    #[error("release capability rejected: {0}")]
    CapabilityRejected(String),

    /// The capability was minted for a different message.
    #[error("capability is for message {capability}, not {requested}")]
    CapabilityMismatch { capability: String, requested: String },

    /// The stored digest, the capability digest or the decrypted content
    /// disagree.
    #[error("integrity mismatch: {0}")]
    IntegrityMismatch(String),

    /// Encryption error.
    #[error("encryption error: {0}")]
    EncryptionError(String),

    /// Decryption error (wrong key or tampered ciphertext).
    #[error("decryption error: {0}")]
    DecryptionError(String),

    /// The sealed bytes are not a vault envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Core error.
    #[error("core error: {0}")]
    CoreError(#[from] lastword_core::CoreError),
}

impl VaultError {
    /// The sealed content itself cannot be trusted.
    ///
    /// Capability problems are not integrity failures; everything else is.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            VaultError::IntegrityMismatch(_)
                | VaultError::DecryptionError(_)
                | VaultError::MalformedEnvelope(_)
        )
    }
}

/// Result type for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;
