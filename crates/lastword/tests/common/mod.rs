//! Shared setup for engine integration tests.

#![allow(dead_code)]

use lastword::core::{
    DeliveryTier, MessageId, MessageStatus, QuorumPolicy, TierPolicy, User, HOUR_MS,
};
use lastword::store::{MemoryStore, Store};
use lastword::{Engine, EngineConfig};
use lastword_testkit::TestFixture;

/// Engine over `store`, wired to every fixture collaborator.
pub fn engine_with<S: Store + 'static>(
    fixture: &TestFixture,
    store: S,
    config: EngineConfig,
) -> Engine<S> {
    Engine::builder(store, fixture.authority.clone(), fixture.vault.clone())
        .channels(fixture.channels())
        .clock(fixture.clock.clone())
        .backup(fixture.backup.clone())
        .alert_sink(fixture.alerts.clone())
        .config(config)
        .build()
}

/// In-memory engine with default config.
pub fn engine(fixture: &TestFixture) -> Engine<MemoryStore> {
    lastword_testkit::init_tracing();
    engine_with(fixture, MemoryStore::new(), EngineConfig::default())
}

/// Config where the Standard tier needs `quorum` confirmations.
pub fn config_with_standard_quorum(quorum: QuorumPolicy) -> EngineConfig {
    let mut config = EngineConfig::default();
    let tiers = config.delivery.tiers.clone();
    let standard = *tiers.policy(DeliveryTier::Standard);
    config.delivery.tiers = tiers.with_policy(
        DeliveryTier::Standard,
        TierPolicy { quorum, ..standard },
    );
    config
}

/// Register `user` and create and activate a message for it.
pub async fn active_message<S: Store + 'static>(
    engine: &Engine<S>,
    user: &User,
    request: lastword::MessageCreateRequest,
) -> MessageId {
    engine.upsert_user(user).await.unwrap();
    let id = engine.create_message(request).await.unwrap();
    assert!(engine.activate(&id).await.unwrap().is_applied());
    id
}

/// Sweep, then advance the clock an hour, until the message is final.
pub async fn drive_to_final<S: Store + 'static>(
    engine: &Engine<S>,
    fixture: &TestFixture,
    id: &MessageId,
    max_sweeps: usize,
) -> MessageStatus {
    let scheduler = engine.scheduler();
    for _ in 0..max_sweeps {
        scheduler.sweep_once().await.unwrap();
        let status = engine.status(id).await.unwrap().unwrap().status;
        if status.is_terminal() {
            return status;
        }
        fixture.clock.advance(HOUR_MS);
    }
    engine.status(id).await.unwrap().unwrap().status
}
