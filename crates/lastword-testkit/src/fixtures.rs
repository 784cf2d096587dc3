//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: one authority and vault that
//! trust each other, a manual clock, scriptable channels and recording
//! collaborators.

use std::sync::Arc;

use lastword_core::{
    Channel, DeliveryTier, MessageCreateRequest, RecipientRequest, ReleaseAuthority,
    SealedPayload, Timestamp, User, UserId,
};
use lastword_delivery::channel::memory::MemoryChannel;
use lastword_delivery::ChannelRegistry;
use lastword_vault::{Sealer, Vault, VaultSecret};

use crate::clock::ManualClock;
use crate::doubles::{RecordingAlertSink, RecordingBackup};

/// Content every fixture message seals.
pub const PLAINTEXT: &[u8] = b"If you are reading this, I did not check in.";

/// Everything an engine needs, wired for tests.
pub struct TestFixture {
    pub clock: Arc<ManualClock>,
    pub authority: ReleaseAuthority,
    pub vault: Arc<Vault>,
    pub email: Arc<MemoryChannel>,
    pub sms: Arc<MemoryChannel>,
    pub webhook: Arc<MemoryChannel>,
    pub backup: Arc<RecordingBackup>,
    pub alerts: Arc<RecordingAlertSink>,
}

impl TestFixture {
    /// Clock at day 0, every channel accepting.
    pub fn new() -> Self {
        Self::with_channels(
            MemoryChannel::accepting(Channel::Email),
            MemoryChannel::accepting(Channel::Sms),
            MemoryChannel::accepting(Channel::Webhook),
        )
    }

    /// Clock at day 0 with the given channel behavior.
    pub fn with_channels(email: MemoryChannel, sms: MemoryChannel, webhook: MemoryChannel) -> Self {
        let authority = ReleaseAuthority::generate();
        let vault = Arc::new(Vault::new(VaultSecret::generate(), authority.public_key()));
        Self {
            clock: Arc::new(ManualClock::new(0)),
            authority,
            vault,
            email: Arc::new(email),
            sms: Arc::new(sms),
            webhook: Arc::new(webhook),
            backup: Arc::new(RecordingBackup::new()),
            alerts: Arc::new(RecordingAlertSink::new()),
        }
    }

    /// Registry with the three fixture channels.
    pub fn channels(&self) -> ChannelRegistry {
        ChannelRegistry::new()
            .with(self.email.clone())
            .with(self.sms.clone())
            .with(self.webhook.clone())
    }

    /// Seal `plaintext` to the fixture vault, bound to `user_id`.
    pub fn seal(&self, plaintext: &[u8], user_id: &UserId) -> SealedPayload {
        Sealer::new(self.vault.public_key())
            .seal(plaintext, user_id.as_bytes())
            .expect("sealing with a fresh key cannot fail")
    }

    /// A user with the given cadence.
    pub fn user(&self, interval_days: i64, grace_days: i64, last_check_in_at: Option<Timestamp>) -> User {
        User::new(UserId::generate(), interval_days, grace_days, last_check_in_at)
            .expect("fixture cadence is valid")
    }

    /// A create request sealing [`PLAINTEXT`] for `user_id`.
    pub fn request(
        &self,
        user_id: UserId,
        tier: DeliveryTier,
        recipients: Vec<RecipientRequest>,
    ) -> MessageCreateRequest {
        MessageCreateRequest {
            user_id,
            sealed_payload: self.seal(PLAINTEXT, &user_id),
            recipients,
            check_in_interval_days: None,
            grace_period_days: None,
            delivery_tier: tier,
        }
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Two email recipients, `a@example.com` and `b@example.com`.
pub fn two_email_recipients() -> Vec<RecipientRequest> {
    vec![
        RecipientRequest::new(Channel::Email, "a@example.com"),
        RecipientRequest::new(Channel::Email, "b@example.com"),
    ]
}
