//! Message lifecycle: the authoritative status and its legal transitions.
//!
//! ```text
//! Draft ──activate──▶ Active ◀──resume── Paused
//!   │                  │ │ └──pause──────▶ │
//!   │                  │ └─begin_delivery─▶ Delivering ──complete──▶ Delivered
//!   └──cancel──┬───────┘                         └──────expire────▶ Expired
//!              ▼              (Paused ──cancel──▶ Cancelled)
//!          Cancelled
//! ```
//!
//! Once a message reaches `Delivering` it only moves forward.

use serde::{Deserialize, Serialize};

use crate::error::IllegalTransition;

/// Lifecycle status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageStatus {
    /// Being composed; not watched by the scheduler.
    Draft = 0,
    /// Watched; released once the deadline passes.
    Active = 1,
    /// Owner-suspended; not released while paused.
    Paused = 2,
    /// Release has begun. Irrevocable.
    Delivering = 3,
    /// Release finished and the quorum confirmed.
    Delivered = 4,
    /// Owner cancelled before release.
    Cancelled = 5,
    /// Release finished without quorum (degraded success).
    Expired = 6,
}

impl MessageStatus {
    /// Convert to u8 for storage.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Try to parse from u8.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Draft),
            1 => Some(Self::Active),
            2 => Some(Self::Paused),
            3 => Some(Self::Delivering),
            4 => Some(Self::Delivered),
            5 => Some(Self::Cancelled),
            6 => Some(Self::Expired),
            _ => None,
        }
    }

    /// Stable lowercase name, used in audit entries.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Delivering => "delivering",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// No further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled | Self::Expired)
    }

    /// Release has begun (or finished).
    pub fn is_released(self) -> bool {
        matches!(self, Self::Delivering | Self::Delivered | Self::Expired)
    }

    /// Check-ins move the deadline of messages in this status.
    pub fn tracks_check_ins(self) -> bool {
        matches!(self, Self::Active | Self::Paused)
    }
}

/// A requested lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transition {
    /// Owner finalizes a draft.
    Activate,
    /// Owner suspends release.
    Pause,
    /// Owner lifts a pause.
    Resume,
    /// Owner withdraws the message.
    Cancel,
    /// Scheduler starts the release.
    BeginDelivery,
    /// Orchestrator reports quorum reached.
    Complete,
    /// Orchestrator reports release finished without quorum.
    Expire,
}

impl Transition {
    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Activate => "activate",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
            Self::BeginDelivery => "begin_delivery",
            Self::Complete => "complete",
            Self::Expire => "expire",
        }
    }

    /// The status this transition leads to.
    pub fn target(self) -> MessageStatus {
        match self {
            Self::Activate | Self::Resume => MessageStatus::Active,
            Self::Pause => MessageStatus::Paused,
            Self::Cancel => MessageStatus::Cancelled,
            Self::BeginDelivery => MessageStatus::Delivering,
            Self::Complete => MessageStatus::Delivered,
            Self::Expire => MessageStatus::Expired,
        }
    }
}

/// Compute the status reached by applying `transition` to `from`.
pub fn next_status(
    from: MessageStatus,
    transition: Transition,
) -> Result<MessageStatus, IllegalTransition> {
    use MessageStatus::*;

    let allowed = match transition {
        Transition::Activate => from == Draft,
        Transition::Pause => from == Active,
        Transition::Resume => from == Paused,
        Transition::Cancel => matches!(from, Draft | Active | Paused),
        Transition::BeginDelivery => from == Active,
        Transition::Complete | Transition::Expire => from == Delivering,
    };

    if allowed {
        Ok(transition.target())
    } else {
        Err(IllegalTransition {
            from,
            action: transition.as_str(),
        })
    }
}
