//! Collaborators outside the delivery path: durable backup storage and the
//! operator alert sink.

use async_trait::async_trait;

use lastword_core::{MessageId, SealedPayload, Timestamp, UserId};

/// Durable off-site storage for sealed payloads (DecentralizedBackup tier).
///
/// Only ever sees ciphertext.
#[async_trait]
pub trait DurableBackup: Send + Sync {
    /// Store `sealed` and return a locator for it.
    async fn register(&self, message_id: &MessageId, sealed: &SealedPayload) -> anyhow::Result<String>;
}

/// An integrity failure an operator must look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityAlert {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub at: Timestamp,
    pub detail: String,
}

/// Operator-facing alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// A message failed its integrity check and was finalized without release.
    async fn integrity_failure(&self, alert: &IntegrityAlert);
}

/// Alert sink that logs at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn integrity_failure(&self, alert: &IntegrityAlert) {
        tracing::error!(
            message_id = %alert.message_id,
            user_id = %alert.user_id,
            at = alert.at,
            detail = %alert.detail,
            "integrity failure: message finalized without release"
        );
    }
}
