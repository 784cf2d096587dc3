//! Audit entries: the append-only record of transitions and delivery attempts.

use serde::{Deserialize, Serialize};

use crate::lifecycle::MessageStatus;
use crate::types::Timestamp;

/// What an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditEvent {
    MessageCreated,
    StatusChanged,
    DeadlineRecomputed,
    DeadlineExtended,
    DissolutionPlanAttached,
    CheckInAccepted,
    CheckInTooLate,
    CapabilityMinted,
    DeliveryAttempt,
    RecipientConfirmed,
    RecipientFailed,
    BackupRegistration,
    BackupContactNotified,
    IntegrityFailure,
}

impl AuditEvent {
    /// Stable snake_case name, used for storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MessageCreated => "message_created",
            Self::StatusChanged => "status_changed",
            Self::DeadlineRecomputed => "deadline_recomputed",
            Self::DeadlineExtended => "deadline_extended",
            Self::DissolutionPlanAttached => "dissolution_plan_attached",
            Self::CheckInAccepted => "check_in_accepted",
            Self::CheckInTooLate => "check_in_too_late",
            Self::CapabilityMinted => "capability_minted",
            Self::DeliveryAttempt => "delivery_attempt",
            Self::RecipientConfirmed => "recipient_confirmed",
            Self::RecipientFailed => "recipient_failed",
            Self::BackupRegistration => "backup_registration",
            Self::BackupContactNotified => "backup_contact_notified",
            Self::IntegrityFailure => "integrity_failure",
        }
    }

    /// Parse from the stored name.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "message_created" => Self::MessageCreated,
            "status_changed" => Self::StatusChanged,
            "deadline_recomputed" => Self::DeadlineRecomputed,
            "deadline_extended" => Self::DeadlineExtended,
            "dissolution_plan_attached" => Self::DissolutionPlanAttached,
            "check_in_accepted" => Self::CheckInAccepted,
            "check_in_too_late" => Self::CheckInTooLate,
            "capability_minted" => Self::CapabilityMinted,
            "delivery_attempt" => Self::DeliveryAttempt,
            "recipient_confirmed" => Self::RecipientConfirmed,
            "recipient_failed" => Self::RecipientFailed,
            "backup_registration" => Self::BackupRegistration,
            "backup_contact_notified" => Self::BackupContactNotified,
            "integrity_failure" => Self::IntegrityFailure,
            _ => return None,
        })
    }
}

/// An immutable audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Hex id of the message or user the entry is about.
    pub entity_id: String,
    pub event: AuditEvent,
    pub previous_state: Option<String>,
    pub new_state: Option<String>,
    pub timestamp: Timestamp,
    pub detail: String,
}

impl AuditEntry {
    /// A plain event with no state change.
    pub fn event(
        entity_id: impl Into<String>,
        event: AuditEvent,
        timestamp: Timestamp,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            event,
            previous_state: None,
            new_state: None,
            timestamp,
            detail: detail.into(),
        }
    }

    /// A lifecycle status change.
    pub fn status_change(
        entity_id: impl Into<String>,
        from: MessageStatus,
        to: MessageStatus,
        timestamp: Timestamp,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            event: AuditEvent::StatusChanged,
            previous_state: Some(from.as_str().to_string()),
            new_state: Some(to.as_str().to_string()),
            timestamp,
            detail: detail.into(),
        }
    }

    /// An event that moves a scalar value (deadline, delivery status).
    pub fn value_change(
        entity_id: impl Into<String>,
        event: AuditEvent,
        previous: impl Into<String>,
        new: impl Into<String>,
        timestamp: Timestamp,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            event,
            previous_state: Some(previous.into()),
            new_state: Some(new.into()),
            timestamp,
            detail: detail.into(),
        }
    }
}

/// An audit entry with its position in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencedAuditEntry {
    /// Monotonically increasing, starting at 1.
    pub seq: u64,
    pub entry: AuditEntry,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_name_roundtrip() {
        for event in [
            AuditEvent::MessageCreated,
            AuditEvent::StatusChanged,
            AuditEvent::CapabilityMinted,
            AuditEvent::BackupRegistration,
            AuditEvent::IntegrityFailure,
        ] {
            assert_eq!(AuditEvent::parse(event.as_str()), Some(event));
        }
        assert_eq!(AuditEvent::parse("nope"), None);
    }

    #[test]
    fn test_status_change_records_both_states() {
        let entry = AuditEntry::status_change(
            "m1",
            MessageStatus::Active,
            MessageStatus::Delivering,
            10,
            "deadline passed",
        );
        assert_eq!(entry.previous_state.as_deref(), Some("active"));
        assert_eq!(entry.new_state.as_deref(), Some("delivering"));
    }
}
