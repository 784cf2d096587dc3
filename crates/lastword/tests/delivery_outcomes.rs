//! Delivery: quorum, retries, confirmation, backup and integrity failures.

mod common;

use lastword::core::{
    AuditEvent, Channel, DeliveryStatus, DeliveryTier, DissolutionPlanRequest, MessageStatus,
    QuorumPolicy, RecipientRequest, DAY_MS, MINUTE_MS,
};
use lastword::delivery::channel::memory::MemoryChannel;
use lastword::delivery::{ContentKind, SendOutcome};
use lastword::store::MemoryStore;
use lastword::ActionOutcome;
use lastword_testkit::{two_email_recipients, TestFixture, PLAINTEXT};

/// Email channel where `a@example.com` always bounces.
fn bouncing_a() -> TestFixture {
    TestFixture::with_channels(
        MemoryChannel::accepting(Channel::Email).script(
            "a@example.com",
            std::iter::repeat(SendOutcome::Failed("mailbox full".into())).take(50),
        ),
        MemoryChannel::accepting(Channel::Sms),
        MemoryChannel::accepting(Channel::Webhook),
    )
}

fn all_failing() -> TestFixture {
    TestFixture::with_channels(
        MemoryChannel::failing(Channel::Email, "smtp 451"),
        MemoryChannel::failing(Channel::Sms, "carrier down"),
        MemoryChannel::failing(Channel::Webhook, "503"),
    )
}

#[tokio::test]
async fn test_failing_recipient_does_not_block_the_other() {
    let fixture = bouncing_a();
    let engine = common::engine_with(
        &fixture,
        MemoryStore::new(),
        common::config_with_standard_quorum(QuorumPolicy::AtLeast(1)),
    );
    let user = fixture.user(7, 3, Some(0));
    let id = common::active_message(
        &engine,
        &user,
        fixture.request(user.id, DeliveryTier::Standard, two_email_recipients()),
    )
    .await;

    fixture.clock.set_day(11);
    let status = common::drive_to_final(&engine, &fixture, &id, 20).await;
    assert_eq!(status, MessageStatus::Delivered);

    let message = engine.message(&id).await.unwrap().unwrap();
    let a = &message.recipients[0];
    let b = &message.recipients[1];
    assert_eq!(a.delivery_status, DeliveryStatus::Failed);
    assert_eq!(a.attempt_count, 5);
    assert_eq!(a.last_error.as_deref(), Some("mailbox full"));
    assert_eq!(b.delivery_status, DeliveryStatus::Confirmed);
    assert_eq!(b.attempt_count, 1);
    assert_eq!(fixture.email.calls_to("b@example.com"), 1);
}

#[tokio::test]
async fn test_majority_of_two_needs_both() {
    let fixture = bouncing_a();
    let engine = common::engine(&fixture);
    let user = fixture.user(7, 3, Some(0));
    let id = common::active_message(
        &engine,
        &user,
        fixture.request(user.id, DeliveryTier::Standard, two_email_recipients()),
    )
    .await;

    fixture.clock.set_day(11);
    let status = common::drive_to_final(&engine, &fixture, &id, 20).await;
    assert_eq!(status, MessageStatus::Expired);

    let view = engine.status(&id).await.unwrap().unwrap();
    assert_eq!(view.recipients[0].delivery_status, DeliveryStatus::Failed);
    assert_eq!(view.recipients[1].delivery_status, DeliveryStatus::Confirmed);
    assert_eq!(view.delivery_success_rate, 0.5);

    let log = engine.audit_for(&id.to_hex()).await.unwrap();
    let last = log
        .iter()
        .rev()
        .find(|e| e.entry.event == AuditEvent::StatusChanged)
        .unwrap();
    assert_eq!(last.entry.new_state.as_deref(), Some("expired"));
    assert!(last.entry.detail.contains("1 of 2"));
}

#[tokio::test]
async fn test_priority_retry_is_unanimous() {
    let fixture = TestFixture::new();
    let engine = common::engine(&fixture);
    let user = fixture.user(7, 3, Some(0));
    let id = common::active_message(
        &engine,
        &user,
        fixture.request(
            user.id,
            DeliveryTier::PriorityRetry,
            vec![
                RecipientRequest::new(Channel::Email, "a@example.com"),
                RecipientRequest::new(Channel::Sms, "+15551234567"),
            ],
        ),
    )
    .await;
    fixture.clock.set_day(11);
    assert_eq!(
        common::drive_to_final(&engine, &fixture, &id, 5).await,
        MessageStatus::Delivered
    );

    let fixture = bouncing_a();
    let engine = common::engine(&fixture);
    let user = fixture.user(7, 3, Some(0));
    let id = common::active_message(
        &engine,
        &user,
        fixture.request(user.id, DeliveryTier::PriorityRetry, two_email_recipients()),
    )
    .await;
    fixture.clock.set_day(11);
    assert_eq!(
        common::drive_to_final(&engine, &fixture, &id, 40).await,
        MessageStatus::Expired
    );
    let message = engine.message(&id).await.unwrap().unwrap();
    assert_eq!(message.recipients[0].attempt_count, 15);
}

#[tokio::test]
async fn test_backup_tier_exhausted_is_expired_with_backup_sent() {
    let fixture = all_failing();
    let engine = common::engine(&fixture);
    let user = fixture.user(7, 3, Some(0));
    let id = common::active_message(
        &engine,
        &user,
        fixture.request(user.id, DeliveryTier::DecentralizedBackup, two_email_recipients()),
    )
    .await;

    fixture.clock.set_day(11);
    assert_eq!(
        common::drive_to_final(&engine, &fixture, &id, 20).await,
        MessageStatus::Expired
    );

    let registered = fixture.backup.registered();
    assert_eq!(registered.len(), 1);
    assert_eq!(registered[0].0, id);

    let log = engine.audit_for(&id.to_hex()).await.unwrap();
    let backups: Vec<_> = log
        .iter()
        .filter(|e| e.entry.event == AuditEvent::BackupRegistration)
        .collect();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].entry.new_state.as_deref(), Some("sent"));

    let message = engine.message(&id).await.unwrap().unwrap();
    assert!(message.backup_registered_at.is_some());
    assert!(message
        .recipients
        .iter()
        .all(|r| r.delivery_status == DeliveryStatus::Failed));
}

#[tokio::test]
async fn test_backup_tier_waits_for_backup_retry_before_finalizing() {
    let fixture = TestFixture::new();
    let engine = common::engine(&fixture);
    let user = fixture.user(7, 3, Some(0));
    let id = common::active_message(
        &engine,
        &user,
        fixture.request(user.id, DeliveryTier::DecentralizedBackup, two_email_recipients()),
    )
    .await;
    fixture.backup.fail_next(1);

    fixture.clock.set_day(11);
    let scheduler = engine.scheduler();
    let first = scheduler.sweep_once().await.unwrap();
    assert_eq!(first.released, vec![id]);
    assert!(first.delivered.is_empty());
    let message = engine.message(&id).await.unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Delivering);
    assert!(message
        .recipients
        .iter()
        .all(|r| r.delivery_status == DeliveryStatus::Confirmed));
    assert!(message.backup_registered_at.is_none());

    // Retry not due yet.
    assert_eq!(scheduler.sweep_once().await.unwrap().passes, 0);

    fixture.clock.advance(MINUTE_MS);
    let second = scheduler.sweep_once().await.unwrap();
    assert_eq!(second.delivered, vec![id]);

    let message = engine.message(&id).await.unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Delivered);
    assert!(message.backup_registered_at.is_some());
    assert_eq!(message.backup_attempts, 2);
    assert_eq!(fixture.backup.calls(), 2);
    assert_eq!(fixture.backup.registered().len(), 1);
    assert_eq!(fixture.email.calls().len(), 2);

    let log = engine.audit_for(&id.to_hex()).await.unwrap();
    let states: Vec<_> = log
        .iter()
        .filter(|e| e.entry.event == AuditEvent::BackupRegistration)
        .map(|e| e.entry.new_state.clone().unwrap_or_default())
        .collect();
    assert_eq!(states, vec!["failed", "sent"]);
}

#[tokio::test]
async fn test_confirmation_required_recipient() {
    let fixture = TestFixture::new();
    let engine = common::engine(&fixture);
    let user = fixture.user(7, 3, Some(0));
    let id = common::active_message(
        &engine,
        &user,
        fixture.request(
            user.id,
            DeliveryTier::Standard,
            vec![RecipientRequest::new(Channel::Email, "a@example.com").confirmed_externally()],
        ),
    )
    .await;

    fixture.clock.set_day(11);
    let scheduler = engine.scheduler();
    scheduler.sweep_once().await.unwrap();
    let message = engine.message(&id).await.unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Delivering);
    assert_eq!(message.recipients[0].delivery_status, DeliveryStatus::Sent);

    // Nothing due: the next sweep leaves it alone.
    fixture.clock.advance(DAY_MS / 2);
    assert_eq!(scheduler.sweep_once().await.unwrap().passes, 0);

    let recipient = message.recipients[0].id;
    assert_eq!(
        engine.confirm_recipient(&id, &recipient).await.unwrap(),
        ActionOutcome::Applied
    );
    let report = scheduler.sweep_once().await.unwrap();
    assert_eq!(report.delivered, vec![id]);
    assert!(!engine.confirm_recipient(&id, &recipient).await.unwrap().is_applied());
}

#[tokio::test]
async fn test_unconfirmed_recipient_fails_at_ceiling() {
    let fixture = TestFixture::new();
    let engine = common::engine(&fixture);
    let user = fixture.user(7, 3, Some(0));
    let id = common::active_message(
        &engine,
        &user,
        fixture.request(
            user.id,
            DeliveryTier::Standard,
            vec![RecipientRequest::new(Channel::Email, "a@example.com").confirmed_externally()],
        ),
    )
    .await;

    fixture.clock.set_day(11);
    assert_eq!(
        common::drive_to_final(&engine, &fixture, &id, 30).await,
        MessageStatus::Expired
    );
    let message = engine.message(&id).await.unwrap().unwrap();
    assert_eq!(message.recipients[0].delivery_status, DeliveryStatus::Failed);
    assert_eq!(fixture.email.calls().len(), 1);
}

#[tokio::test]
async fn test_integrity_failure_releases_nothing() {
    let fixture = TestFixture::new();
    let engine = common::engine(&fixture);
    let user = fixture.user(7, 3, Some(0));

    // Sealed to a vault this engine does not hold.
    let stranger = TestFixture::new();
    let mut request = fixture.request(user.id, DeliveryTier::Standard, two_email_recipients());
    request.sealed_payload = stranger.seal(PLAINTEXT, &user.id);
    let id = common::active_message(&engine, &user, request).await;

    fixture.clock.set_day(11);
    let report = engine.scheduler().sweep_once().await.unwrap();
    assert_eq!(report.released, vec![id]);
    assert_eq!(report.expired, vec![id]);

    assert!(fixture.email.calls().is_empty());
    let alerts = fixture.alerts.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].message_id, id);
    assert_eq!(alerts[0].user_id, user.id);

    let message = engine.message(&id).await.unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Expired);
    assert!(message
        .recipients
        .iter()
        .all(|r| r.delivery_status == DeliveryStatus::Failed));
    let log = engine.audit_for(&id.to_hex()).await.unwrap();
    assert!(log.iter().any(|e| e.entry.event == AuditEvent::IntegrityFailure));
}

#[tokio::test]
async fn test_dissolution_plan_extends_once_and_notifies() {
    let fixture = TestFixture::new();
    let engine = common::engine(&fixture);
    let user = fixture.user(7, 3, Some(0));
    let id = common::active_message(
        &engine,
        &user,
        fixture.request(user.id, DeliveryTier::Standard, two_email_recipients()),
    )
    .await;
    let plan = DissolutionPlanRequest {
        backup_contact_address: "friend@example.com".into(),
        extended_grace_days: 5,
    };
    assert!(engine.attach_dissolution_plan(&id, &plan).await.unwrap().is_applied());

    let scheduler = engine.scheduler();
    fixture.clock.set_day(11);
    let report = scheduler.sweep_once().await.unwrap();
    assert_eq!(report.extended, vec![id]);
    assert!(report.released.is_empty());
    let view = engine.status(&id).await.unwrap().unwrap();
    assert_eq!(view.status, MessageStatus::Active);
    assert_eq!(view.next_deadline, Some(15 * DAY_MS));

    let notices = fixture.email.calls();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].destination, "friend@example.com");
    assert_eq!(notices[0].content.kind, ContentKind::BackupContactNotice);
    assert!(!notices[0]
        .content
        .body
        .windows(PLAINTEXT.len())
        .any(|w| w == PLAINTEXT));

    // The plan is spent: it cannot be replaced.
    assert!(!engine.attach_dissolution_plan(&id, &plan).await.unwrap().is_applied());

    fixture.clock.set_day(14);
    assert!(scheduler.sweep_once().await.unwrap().released.is_empty());
    fixture.clock.set_day(15);
    let report = scheduler.sweep_once().await.unwrap();
    assert_eq!(report.released, vec![id]);
    assert!(report.extended.is_empty());

    let log = engine.audit_for(&id.to_hex()).await.unwrap();
    let notified = log
        .iter()
        .find(|e| e.entry.event == AuditEvent::BackupContactNotified)
        .unwrap();
    assert_eq!(notified.entry.new_state.as_deref(), Some("sent"));
    assert!(log.iter().any(|e| e.entry.event == AuditEvent::DeadlineExtended));
}
