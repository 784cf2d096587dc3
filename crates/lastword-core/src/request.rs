//! Inputs consumed from collaborators: composition, owner actions, check-ins.

use serde::{Deserialize, Serialize};

use crate::message::{Channel, SealedPayload};
use crate::tier::DeliveryTier;
use crate::types::{MessageId, Timestamp, UserId};

/// A recipient as submitted by the composer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientRequest {
    pub channel: Channel,
    pub destination: String,
    #[serde(default)]
    pub requires_confirmation: bool,
}

impl RecipientRequest {
    /// Recipient that is confirmed as soon as the channel accepts the send.
    pub fn new(channel: Channel, destination: impl Into<String>) -> Self {
        Self {
            channel,
            destination: destination.into(),
            requires_confirmation: false,
        }
    }

    /// Recipient that stays `Sent` until confirmed externally.
    pub fn confirmed_externally(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }
}

/// A new message from the composition surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCreateRequest {
    pub user_id: UserId,
    pub sealed_payload: SealedPayload,
    pub recipients: Vec<RecipientRequest>,
    /// Raw values; validated on intake.
    pub check_in_interval_days: Option<i64>,
    pub grace_period_days: Option<i64>,
    pub delivery_tier: DeliveryTier,
}

/// What the owner wants done to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwnerActionKind {
    Pause,
    Resume,
    Cancel,
}

/// An owner action on a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerAction {
    pub message_id: MessageId,
    pub action: OwnerActionKind,
}

/// How the liveness signal was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CheckInKind {
    #[default]
    Manual,
    /// Recorded by a session surface on login.
    Automatic,
    /// Pre-announced absence; treated as a regular check-in.
    Vacation,
}

impl CheckInKind {
    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Automatic => "automatic",
            Self::Vacation => "vacation",
        }
    }
}

/// A user confirmed liveness at `at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInSignal {
    pub user_id: UserId,
    pub at: Timestamp,
    #[serde(default)]
    pub kind: CheckInKind,
}

impl CheckInSignal {
    /// A manual check-in.
    pub fn manual(user_id: UserId, at: Timestamp) -> Self {
        Self {
            user_id,
            at,
            kind: CheckInKind::Manual,
        }
    }
}

/// Attach a one-time extension with a backup contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DissolutionPlanRequest {
    pub backup_contact_address: String,
    pub extended_grace_days: i64,
}
