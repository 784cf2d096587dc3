//! Engine records: users, messages, recipients and dissolution plans.
//!
//! Records are plain data. Every mutation that changes the lifecycle returns
//! the [`AuditEntry`] that must be committed together with the new record.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::audit::{AuditEntry, AuditEvent};
use crate::capability::ReleaseCapability;
use crate::crypto::Blake3Hash;
use crate::deadline::CheckInPolicy;
use crate::error::{IllegalTransition, ValidationError};
use crate::lifecycle::{next_status, MessageStatus, Transition};
use crate::tier::DeliveryTier;
use crate::types::{MessageId, RecipientId, Timestamp, UserId, WorkerId};

/// A user as far as the engine is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Default cadence for the user's messages.
    pub policy: CheckInPolicy,
    /// Only ever moves forward.
    pub last_check_in_at: Option<Timestamp>,
}

impl User {
    /// Create a user record, validating the cadence.
    pub fn new(
        id: UserId,
        check_in_interval_days: i64,
        grace_period_days: i64,
        last_check_in_at: Option<Timestamp>,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            id,
            policy: CheckInPolicy::new(check_in_interval_days, grace_period_days)?,
            last_check_in_at,
        })
    }
}

/// A delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Channel {
    Email = 0,
    Sms = 1,
    Webhook = 2,
}

impl Channel {
    /// Convert to u8 for storage.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Try to parse from u8.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Email),
            1 => Some(Self::Sms),
            2 => Some(Self::Webhook),
            _ => None,
        }
    }

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Webhook => "webhook",
        }
    }

    /// Check that `destination` is plausible for this channel.
    pub fn validate_destination(self, destination: &str) -> Result<(), ValidationError> {
        let ok = match self {
            Channel::Email => {
                let mut parts = destination.splitn(2, '@');
                let local = parts.next().unwrap_or_default();
                let domain = parts.next().unwrap_or_default();
                !local.is_empty()
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !destination.contains(char::is_whitespace)
            }
            Channel::Sms => {
                let digits = destination.strip_prefix('+').unwrap_or(destination);
                (7..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
            }
            Channel::Webhook => {
                destination.starts_with("https://") || destination.starts_with("http://")
            }
        };

        if ok {
            Ok(())
        } else {
            Err(ValidationError::InvalidDestination {
                channel: self.as_str(),
                destination: destination.to_string(),
            })
        }
    }
}

/// Per-recipient delivery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeliveryStatus {
    Pending = 0,
    /// Accepted by the channel; awaiting confirmation.
    Sent = 1,
    Confirmed = 2,
    Failed = 3,
}

impl DeliveryStatus {
    /// Convert to u8 for storage.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Try to parse from u8.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Pending),
            1 => Some(Self::Sent),
            2 => Some(Self::Confirmed),
            3 => Some(Self::Failed),
            _ => None,
        }
    }

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }

    /// Confirmed or failed.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }
}

/// A recipient of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    pub message_id: MessageId,
    pub channel: Channel,
    pub destination: String,
    /// `Sent` stays `Sent` until confirmed externally.
    pub requires_confirmation: bool,
    pub delivery_status: DeliveryStatus,
    pub attempt_count: u32,
    pub last_attempt_at: Option<Timestamp>,
    pub next_retry_at: Option<Timestamp>,
    pub last_error: Option<String>,
}

impl Recipient {
    /// A fresh pending recipient.
    pub fn new(
        message_id: MessageId,
        channel: Channel,
        destination: impl Into<String>,
        requires_confirmation: bool,
    ) -> Self {
        Self {
            id: RecipientId::generate(),
            message_id,
            channel,
            destination: destination.into(),
            requires_confirmation,
            delivery_status: DeliveryStatus::Pending,
            attempt_count: 0,
            last_attempt_at: None,
            next_retry_at: None,
            last_error: None,
        }
    }

    /// Pending and due for an attempt at `now`.
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.delivery_status == DeliveryStatus::Pending
            && self.next_retry_at.map_or(true, |at| at <= now)
    }
}

/// Sealed message content: opaque bytes owned by the content vault plus the
/// integrity digest of the plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    pub bytes: Bytes,
    pub digest: Blake3Hash,
}

impl SealedPayload {
    /// No ciphertext at all.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A one-time deadline extension with a backup contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DissolutionPlan {
    pub backup_contact_address: String,
    pub extended_grace_days: u32,
    /// Set when the extension is consumed.
    pub executed_at: Option<Timestamp>,
}

impl DissolutionPlan {
    /// The extension has not been used yet.
    pub fn is_available(&self) -> bool {
        self.executed_at.is_none() && self.extended_grace_days > 0
    }
}

/// A worker's exclusive claim on running delivery passes for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryLease {
    pub holder: WorkerId,
    pub expires_at: Timestamp,
}

/// A message under the engine's watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub user_id: UserId,
    pub status: MessageStatus,
    pub sealed_payload: SealedPayload,
    /// Override of the user's interval; `None` inherits.
    pub check_in_interval_days: Option<u32>,
    /// Override of the user's grace; `None` inherits.
    pub grace_period_days: Option<u32>,
    pub delivery_tier: DeliveryTier,
    /// In creation order.
    pub recipients: Vec<Recipient>,
    /// The last relevant check-in the deadline derives from.
    pub deadline_anchor: Option<Timestamp>,
    pub next_deadline: Option<Timestamp>,
    pub dissolution_plan: Option<DissolutionPlan>,
    pub release_capability: Option<ReleaseCapability>,
    pub delivery_started_at: Option<Timestamp>,
    pub backup_registered_at: Option<Timestamp>,
    pub backup_locator: Option<String>,
    /// Registration attempts made, failed ones included.
    #[serde(default)]
    pub backup_attempts: u32,
    /// When a failed registration may be tried again.
    #[serde(default)]
    pub backup_retry_at: Option<Timestamp>,
    pub lease: Option<DeliveryLease>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Optimistic concurrency version; bumped by every committed write.
    pub version: u64,
}

impl Message {
    /// Hex id used as the audit entity id.
    pub fn entity_id(&self) -> String {
        self.id.to_hex()
    }

    /// The cadence this message actually uses.
    pub fn effective_policy(&self, user: &User) -> CheckInPolicy {
        user.policy
            .with_overrides(self.check_in_interval_days, self.grace_period_days)
    }

    /// Apply a lifecycle transition, returning the audit entry to commit with it.
    pub fn apply(
        &mut self,
        transition: Transition,
        now: Timestamp,
        detail: impl Into<String>,
    ) -> Result<AuditEntry, IllegalTransition> {
        let from = self.status;
        let to = next_status(from, transition)?;
        self.status = to;
        self.updated_at = now;
        Ok(AuditEntry::status_change(self.entity_id(), from, to, now, detail))
    }

    /// Move the deadline anchor and recompute the deadline.
    pub fn reanchor(&mut self, anchor: Timestamp, policy: &CheckInPolicy, now: Timestamp) -> AuditEntry {
        let previous = self.next_deadline;
        let deadline = policy.deadline_from(anchor);
        self.deadline_anchor = Some(anchor);
        self.next_deadline = Some(deadline);
        self.updated_at = now;
        AuditEntry::value_change(
            self.entity_id(),
            AuditEvent::DeadlineRecomputed,
            previous.map(|d| d.to_string()).unwrap_or_default(),
            deadline.to_string(),
            now,
            format!(
                "anchor={} interval={}d grace={}d",
                anchor,
                policy.interval_days(),
                policy.grace_days()
            ),
        )
    }

    /// Whether the scheduler should act on this message at `now`.
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.status == MessageStatus::Active && self.next_deadline.map_or(false, |d| d <= now)
    }

    /// A delivery pass holds a lease that has not expired.
    pub fn has_live_lease(&self, now: Timestamp) -> bool {
        self.lease.map_or(false, |l| l.expires_at > now)
    }

    /// Look up a recipient.
    pub fn recipient_mut(&mut self, id: &RecipientId) -> Option<&mut Recipient> {
        self.recipients.iter_mut().find(|r| r.id == *id)
    }

    /// Recipients that reached `Confirmed`.
    pub fn confirmed_count(&self) -> usize {
        self.recipients
            .iter()
            .filter(|r| r.delivery_status == DeliveryStatus::Confirmed)
            .count()
    }

    /// Every recipient is confirmed or failed.
    pub fn all_recipients_terminal(&self) -> bool {
        self.recipients.iter().all(|r| r.delivery_status.is_terminal())
    }

    /// Dashboard projection.
    pub fn status_view(&self) -> MessageStatusView {
        let total = self.recipients.len();
        MessageStatusView {
            id: self.id,
            status: self.status,
            next_deadline: self.next_deadline,
            delivery_tier: self.delivery_tier,
            recipients: self
                .recipients
                .iter()
                .map(|r| RecipientStatusView {
                    id: r.id,
                    channel: r.channel,
                    delivery_status: r.delivery_status,
                    attempt_count: r.attempt_count,
                    next_retry_at: r.next_retry_at,
                })
                .collect(),
            delivery_success_rate: if total == 0 {
                0.0
            } else {
                self.confirmed_count() as f64 / total as f64
            },
            version: self.version,
        }
    }
}

/// Read-only projection of a message for dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageStatusView {
    pub id: MessageId,
    pub status: MessageStatus,
    pub next_deadline: Option<Timestamp>,
    pub delivery_tier: DeliveryTier,
    pub recipients: Vec<RecipientStatusView>,
    /// Confirmed recipients over all recipients, 0.0..=1.0.
    pub delivery_success_rate: f64,
    pub version: u64,
}

/// Per-recipient part of [`MessageStatusView`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientStatusView {
    pub id: RecipientId,
    pub channel: Channel,
    pub delivery_status: DeliveryStatus,
    pub attempt_count: u32,
    pub next_retry_at: Option<Timestamp>,
}
