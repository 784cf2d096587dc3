//! Fixtures shared by the backend tests.

use bytes::Bytes;
use lastword_core::{
    Blake3Hash, Channel, DeliveryTier, Message, MessageId, MessageStatus, Recipient,
    SealedPayload, User, UserId,
};

pub(crate) fn test_user() -> User {
    User::new(UserId::generate(), 7, 3, Some(0)).unwrap()
}

pub(crate) fn draft_message(user: &User) -> Message {
    let id = MessageId::generate();
    Message {
        id,
        user_id: user.id,
        status: MessageStatus::Draft,
        sealed_payload: SealedPayload {
            bytes: Bytes::from_static(b"sealed"),
            digest: Blake3Hash::hash(b"plaintext"),
        },
        check_in_interval_days: None,
        grace_period_days: None,
        delivery_tier: DeliveryTier::Standard,
        recipients: vec![
            Recipient::new(id, Channel::Email, "a@example.com", false),
            Recipient::new(id, Channel::Sms, "+15551234567", true),
        ],
        deadline_anchor: None,
        next_deadline: None,
        dissolution_plan: None,
        release_capability: None,
        delivery_started_at: None,
        backup_registered_at: None,
        backup_locator: None,
        backup_attempts: 0,
        backup_retry_at: None,
        lease: None,
        created_at: 0,
        updated_at: 0,
        version: 0,
    }
}
