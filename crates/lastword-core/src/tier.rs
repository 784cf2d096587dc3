//! Delivery tiers: policy bundles of retry budget, quorum and backup.

use serde::{Deserialize, Serialize};

/// The delivery tier of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeliveryTier {
    Standard = 0,
    PriorityRetry = 1,
    DecentralizedBackup = 2,
}

impl DeliveryTier {
    /// Convert to u8 for storage.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Try to parse from u8.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Standard),
            1 => Some(Self::PriorityRetry),
            2 => Some(Self::DecentralizedBackup),
            _ => None,
        }
    }
}

/// How many recipient confirmations make a release `Delivered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuorumPolicy {
    /// Strictly more than half of the recipients.
    Majority,
    /// Every recipient.
    Unanimous,
    /// At least `n` recipients (capped at the recipient count).
    AtLeast(u32),
}

impl QuorumPolicy {
    /// Confirmations required out of `total` recipients.
    pub fn required(&self, total: usize) -> usize {
        match self {
            QuorumPolicy::Majority => total / 2 + 1,
            QuorumPolicy::Unanimous => total,
            QuorumPolicy::AtLeast(n) => (*n as usize).min(total).max(1),
        }
    }

    /// Whether `confirmed` of `total` meets the quorum.
    pub fn is_met(&self, confirmed: usize, total: usize) -> bool {
        total > 0 && confirmed >= self.required(total)
    }
}

/// Policy attached to a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicy {
    /// Attempts per recipient before it is marked failed.
    pub max_attempts: u32,
    /// Confirmations needed for `Delivered`.
    pub quorum: QuorumPolicy,
    /// Register the sealed payload with durable storage once per release.
    pub backup_registration: bool,
}

/// Policies for every tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierTable {
    pub standard: TierPolicy,
    pub priority_retry: TierPolicy,
    pub decentralized_backup: TierPolicy,
}

impl TierTable {
    /// Look up the policy for a tier.
    pub fn policy(&self, tier: DeliveryTier) -> &TierPolicy {
        match tier {
            DeliveryTier::Standard => &self.standard,
            DeliveryTier::PriorityRetry => &self.priority_retry,
            DeliveryTier::DecentralizedBackup => &self.decentralized_backup,
        }
    }

    /// Replace the policy for a tier.
    pub fn with_policy(mut self, tier: DeliveryTier, policy: TierPolicy) -> Self {
        match tier {
            DeliveryTier::Standard => self.standard = policy,
            DeliveryTier::PriorityRetry => self.priority_retry = policy,
            DeliveryTier::DecentralizedBackup => self.decentralized_backup = policy,
        }
        self
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            standard: TierPolicy {
                max_attempts: 5,
                quorum: QuorumPolicy::Majority,
                backup_registration: false,
            },
            priority_retry: TierPolicy {
                max_attempts: 15,
                quorum: QuorumPolicy::Unanimous,
                backup_registration: false,
            },
            decentralized_backup: TierPolicy {
                max_attempts: 5,
                quorum: QuorumPolicy::Majority,
                backup_registration: true,
            },
        }
    }
}
