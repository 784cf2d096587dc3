//! Recording and failing implementations of the delivery collaborators,
//! plus a store wrapper that fails writes on demand.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use lastword_core::{
    AuditEntry, Message, MessageId, SealedPayload, SequencedAuditEntry, Timestamp, User, UserId,
};
use lastword_delivery::{AlertSink, DurableBackup, IntegrityAlert};
use lastword_store::{CasResult, CheckInWrite, Store, StoreError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Take one unit from `budget` if any is left.
fn take(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Durable backup that keeps every registration in memory.
#[derive(Debug, Default)]
pub struct RecordingBackup {
    registered: Mutex<Vec<(MessageId, SealedPayload)>>,
    calls: AtomicUsize,
    failures: AtomicUsize,
}

impl RecordingBackup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` registrations fail.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Successful registrations so far, in order.
    pub fn registered(&self) -> Vec<(MessageId, SealedPayload)> {
        lock(&self.registered).clone()
    }

    /// Registration attempts, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DurableBackup for RecordingBackup {
    async fn register(&self, message_id: &MessageId, sealed: &SealedPayload) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if take(&self.failures) {
            anyhow::bail!("durable storage timed out");
        }
        lock(&self.registered).push((*message_id, sealed.clone()));
        Ok(format!("mem://{}/{}", message_id.to_hex(), sealed.digest.to_hex()))
    }
}

/// Durable backup that is always down.
#[derive(Debug, Clone, Default)]
pub struct FailingBackup;

#[async_trait]
impl DurableBackup for FailingBackup {
    async fn register(&self, _: &MessageId, _: &SealedPayload) -> anyhow::Result<String> {
        anyhow::bail!("durable storage unavailable")
    }
}

/// Alert sink that keeps every alert.
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<IntegrityAlert>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<IntegrityAlert> {
        lock(&self.alerts).clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn integrity_failure(&self, alert: &IntegrityAlert) {
        lock(&self.alerts).push(alert.clone());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// Store that delegates to `inner` but can be told to fail upcoming
/// compare-and-swap writes, as a dropped database connection would.
#[derive(Debug)]
pub struct FlakyStore<S> {
    inner: S,
    cas_failures: AtomicUsize,
}

impl<S: Store> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cas_failures: AtomicUsize::new(0),
        }
    }

    /// Make the next `n` compare-and-swap calls return `Unavailable`.
    pub fn fail_next_cas(&self, n: usize) {
        self.cas_failures.store(n, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: Store> Store for FlakyStore<S> {
    async fn upsert_user(&self, user: &User) -> lastword_store::Result<()> {
        self.inner.upsert_user(user).await
    }

    async fn get_user(&self, id: &UserId) -> lastword_store::Result<Option<User>> {
        self.inner.get_user(id).await
    }

    async fn record_user_check_in(
        &self,
        id: &UserId,
        at: Timestamp,
    ) -> lastword_store::Result<CheckInWrite> {
        self.inner.record_user_check_in(id, at).await
    }

    async fn insert_message(&self, message: &Message, audit: &[AuditEntry]) -> lastword_store::Result<()> {
        self.inner.insert_message(message, audit).await
    }

    async fn get_message(&self, id: &MessageId) -> lastword_store::Result<Option<Message>> {
        self.inner.get_message(id).await
    }

    async fn list_messages_for_user(&self, user_id: &UserId) -> lastword_store::Result<Vec<Message>> {
        self.inner.list_messages_for_user(user_id).await
    }

    async fn list_due_for_release(
        &self,
        now: Timestamp,
        limit: usize,
    ) -> lastword_store::Result<Vec<MessageId>> {
        self.inner.list_due_for_release(now, limit).await
    }

    async fn list_delivering(
        &self,
        after: Option<MessageId>,
        limit: usize,
    ) -> lastword_store::Result<Vec<MessageId>> {
        self.inner.list_delivering(after, limit).await
    }

    async fn compare_and_swap(
        &self,
        message: &Message,
        expected_version: u64,
        audit: &[AuditEntry],
    ) -> lastword_store::Result<CasResult> {
        if take(&self.cas_failures) {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inner.compare_and_swap(message, expected_version, audit).await
    }

    async fn append_audit(&self, entries: &[AuditEntry]) -> lastword_store::Result<()> {
        self.inner.append_audit(entries).await
    }

    async fn audit_for(&self, entity_id: &str) -> lastword_store::Result<Vec<SequencedAuditEntry>> {
        self.inner.audit_for(entity_id).await
    }

    async fn audit_since(
        &self,
        after_seq: u64,
        limit: usize,
    ) -> lastword_store::Result<Vec<SequencedAuditEntry>> {
        self.inner.audit_since(after_seq, limit).await
    }
}
