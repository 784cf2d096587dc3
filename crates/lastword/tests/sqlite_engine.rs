//! The full release path over the SQLite store, surviving a reopen.

mod common;

use lastword::core::{AuditEvent, DeliveryStatus, DeliveryTier, MessageStatus, DAY_MS};
use lastword::store::SqliteStore;
use lastword::EngineConfig;
use lastword_testkit::{two_email_recipients, TestFixture};
use tempfile::tempdir;

#[tokio::test]
async fn test_release_persists_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("lastword.db");
    let fixture = TestFixture::new();
    let user = fixture.user(7, 3, Some(0));

    let id = {
        let store = SqliteStore::open(&path).unwrap();
        let engine = common::engine_with(&fixture, store, EngineConfig::default());
        let id = common::active_message(
            &engine,
            &user,
            fixture.request(user.id, DeliveryTier::DecentralizedBackup, two_email_recipients()),
        )
        .await;

        fixture.clock.set_day(11);
        let report = engine.scheduler().sweep_once().await.unwrap();
        assert_eq!(report.released, vec![id]);
        assert_eq!(report.delivered, vec![id]);
        id
    };

    let store = SqliteStore::open(&path).unwrap();
    let engine = common::engine_with(&fixture, store, EngineConfig::default());

    let message = engine.message(&id).await.unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Delivered);
    assert!(message.release_capability.is_some());
    assert!(message.backup_locator.is_some());
    assert!(message.lease.is_none());
    assert!(message
        .recipients
        .iter()
        .all(|r| r.delivery_status == DeliveryStatus::Confirmed));
    assert_eq!(message.recipients[0].destination, "a@example.com");

    let log = engine.audit_for(&id.to_hex()).await.unwrap();
    let events: Vec<AuditEvent> = log.iter().map(|e| e.entry.event).collect();
    assert_eq!(events.first(), Some(&AuditEvent::MessageCreated));
    assert!(events.contains(&AuditEvent::CapabilityMinted));
    assert!(events.contains(&AuditEvent::BackupRegistration));
    assert!(log.windows(2).all(|w| w[0].seq < w[1].seq));

    let user = engine.user(&user.id).await.unwrap().unwrap();
    assert_eq!(user.last_check_in_at, Some(0));
    assert_eq!(message.next_deadline, Some(10 * DAY_MS));
}

#[tokio::test]
async fn test_sqlite_check_in_reanchors() {
    let fixture = TestFixture::new();
    let engine = common::engine_with(
        &fixture,
        SqliteStore::open_memory().unwrap(),
        EngineConfig::default(),
    );
    let user = fixture.user(7, 3, Some(0));
    let id = common::active_message(
        &engine,
        &user,
        fixture.request(user.id, DeliveryTier::Standard, two_email_recipients()),
    )
    .await;

    fixture.clock.set_day(9);
    let outcome = engine
        .record_check_in(&lastword::CheckInSignal::manual(user.id, 9 * DAY_MS))
        .await
        .unwrap();
    assert_eq!(outcome.rescheduled, vec![id]);
    assert_eq!(
        engine.status(&id).await.unwrap().unwrap().next_deadline,
        Some(19 * DAY_MS)
    );
}
