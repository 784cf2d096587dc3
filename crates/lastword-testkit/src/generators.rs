//! Proptest generators for property-based testing.

use proptest::prelude::*;

use lastword_core::{
    CheckInKind, CheckInPolicy, Channel, DeliveryTier, QuorumPolicy, RecipientRequest,
    Timestamp, DAY_MS,
};

/// A valid check-in policy.
pub fn check_in_policy() -> impl Strategy<Value = CheckInPolicy> {
    (1i64..=365, 0i64..=30).prop_map(|(interval, grace)| {
        CheckInPolicy::new(interval, grace).expect("generated within bounds")
    })
}

/// A timestamp within roughly the next century, day resolution or finer.
pub fn timestamp() -> impl Strategy<Value = Timestamp> {
    0i64..=36_500 * DAY_MS
}

/// Any check-in kind.
pub fn check_in_kind() -> impl Strategy<Value = CheckInKind> {
    prop_oneof![
        Just(CheckInKind::Manual),
        Just(CheckInKind::Automatic),
        Just(CheckInKind::Vacation),
    ]
}

/// Any delivery tier.
pub fn delivery_tier() -> impl Strategy<Value = DeliveryTier> {
    prop_oneof![
        Just(DeliveryTier::Standard),
        Just(DeliveryTier::PriorityRetry),
        Just(DeliveryTier::DecentralizedBackup),
    ]
}

/// Any quorum policy.
pub fn quorum_policy() -> impl Strategy<Value = QuorumPolicy> {
    prop_oneof![
        Just(QuorumPolicy::Majority),
        Just(QuorumPolicy::Unanimous),
        (1u32..=8).prop_map(QuorumPolicy::AtLeast),
    ]
}

/// A recipient with a destination valid for its channel.
pub fn recipient_request() -> impl Strategy<Value = RecipientRequest> {
    let email = "[a-z]{1,12}@[a-z]{1,12}\\.(com|org|net)"
        .prop_map(|d| RecipientRequest::new(Channel::Email, d));
    let sms = "\\+1[0-9]{10}".prop_map(|d| RecipientRequest::new(Channel::Sms, d));
    let webhook = "[a-z]{1,12}"
        .prop_map(|host| RecipientRequest::new(Channel::Webhook, format!("https://{}.example.com/hook", host)));
    (prop_oneof![email, sms, webhook], any::<bool>()).prop_map(|(mut r, confirm)| {
        r.requires_confirmation = confirm;
        r
    })
}

/// Between 1 and `max` valid recipients.
pub fn recipients(max: usize) -> impl Strategy<Value = Vec<RecipientRequest>> {
    prop::collection::vec(recipient_request(), 1..=max.max(1))
}

/// Hex-encoded random seed, handy for naming generated entities in failures.
pub fn seed_hex() -> impl Strategy<Value = String> {
    any::<[u8; 16]>().prop_map(hex::encode)
}
