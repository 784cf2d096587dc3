//! Delivery orchestrator.
//!
//! One delivery pass for a `Delivering` message:
//!
//! 1. Claim the message's delivery lease (CAS).
//! 2. Reveal the content through the vault. A failed reveal finalizes the
//!    message as `Expired` and alerts an operator; nothing is sent.
//! 3. Attempt every due recipient, in channel-priority order.
//! 4. Register the sealed payload with durable backup for tiers that require
//!    it. A failed registration is retried with backoff on later passes.
//! 5. Record the outcomes (CAS, re-reading on contention), scheduling retries
//!    with backoff and failing recipients that ran out of attempts.
//! 6. When every recipient is confirmed or failed and no backup registration
//!    is owed, or the per-message ceiling has passed, evaluate the tier
//!    quorum and move the message to `Delivered` or `Expired`.
//!
//! Passes never sleep: retries are persisted as `next_retry_at` and picked up
//! by a later scheduler sweep.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use lastword_core::{
    AuditEntry, AuditEvent, Channel, Clock, DeliveryLease, DeliveryStatus, Message, MessageId,
    MessageStatus, Recipient, RecipientId, TierPolicy, TierTable, Timestamp, Transition, WorkerId,
    DAY_MS, MINUTE_MS,
};
use lastword_store::{Mutation, Store, StoreExt};
use lastword_vault::Vault;

use crate::backoff::BackoffPolicy;
use crate::backup::{AlertSink, DurableBackup, IntegrityAlert, TracingAlertSink};
use crate::channel::{ChannelRegistry, DeliveryContent, SendOutcome};
use crate::error::{DeliveryError, Result};

/// Configuration for delivery behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Retry schedule for failed attempts.
    pub backoff: BackoffPolicy,
    /// How long after entering `Delivering` a message may keep retrying.
    pub message_ceiling_ms: i64,
    /// Channel priority; channels not listed go last.
    pub channel_order: Vec<Channel>,
    /// Per-tier retry budget, quorum and backup.
    pub tiers: TierTable,
    /// How long a claimed delivery lease lasts.
    pub lease_ms: i64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            message_ceiling_ms: DAY_MS,
            channel_order: vec![Channel::Email, Channel::Sms, Channel::Webhook],
            tiers: TierTable::default(),
            lease_ms: 30 * MINUTE_MS,
        }
    }
}

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Some recipients are still pending or awaiting confirmation.
    InProgress { next_attempt_at: Option<Timestamp> },
    /// Finalized; quorum met.
    Delivered,
    /// Finalized; quorum not met.
    Expired,
    /// Reveal failed; finalized as `Expired` without sending anything.
    IntegrityFailure,
    /// Another pass holds the lease.
    LeaseHeld,
    /// The message was not in `Delivering`.
    NotDelivering(MessageStatus),
}

impl PassOutcome {
    /// The message reached a terminal state in this pass.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            PassOutcome::Delivered | PassOutcome::Expired | PassOutcome::IntegrityFailure
        )
    }
}

/// Result of a delivery pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub message_id: MessageId,
    /// Send attempts made.
    pub attempted: usize,
    /// Attempts the channel accepted.
    pub sent: usize,
    /// Recipients marked failed in this pass.
    pub failed: usize,
    /// The sealed payload was registered with durable backup in this pass.
    pub backup_registered: bool,
    pub outcome: PassOutcome,
}

impl PassReport {
    fn new(message_id: MessageId, outcome: PassOutcome) -> Self {
        Self {
            message_id,
            attempted: 0,
            sent: 0,
            failed: 0,
            backup_registered: false,
            outcome,
        }
    }
}

struct Attempt {
    recipient_id: RecipientId,
    outcome: SendOutcome,
    at: Timestamp,
}

enum BackupResult {
    Registered { locator: String, at: Timestamp },
    Failed { reason: String, at: Timestamp },
}

struct Settled {
    outcome: PassOutcome,
    failed: usize,
}

/// Runs delivery passes.
pub struct Orchestrator<S> {
    store: Arc<S>,
    vault: Arc<Vault>,
    channels: ChannelRegistry,
    backup: Option<Arc<dyn DurableBackup>>,
    alerts: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
    config: DeliveryConfig,
    worker: WorkerId,
}

impl<S> Clone for Orchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            vault: Arc::clone(&self.vault),
            channels: self.channels.clone(),
            backup: self.backup.clone(),
            alerts: Arc::clone(&self.alerts),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
            worker: self.worker,
        }
    }
}

impl<S: Store> Orchestrator<S> {
    /// Create an orchestrator with a fresh worker id and the tracing alert sink.
    pub fn new(
        store: Arc<S>,
        vault: Arc<Vault>,
        channels: ChannelRegistry,
        clock: Arc<dyn Clock>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            store,
            vault,
            channels,
            backup: None,
            alerts: Arc::new(TracingAlertSink),
            clock,
            config,
            worker: WorkerId::generate(),
        }
    }

    /// Use `backup` for tiers that register a durable backup.
    pub fn with_backup(mut self, backup: Arc<dyn DurableBackup>) -> Self {
        self.backup = Some(backup);
        self
    }

    /// Send integrity alerts to `alerts`.
    pub fn with_alert_sink(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    /// Use a specific worker id for leases.
    pub fn with_worker(mut self, worker: WorkerId) -> Self {
        self.worker = worker;
        self
    }

    /// This orchestrator's worker id.
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// The channel adapters.
    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    /// The delivery configuration.
    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Whether a pass would do anything for `message` at `now`.
    pub fn needs_pass(&self, message: &Message, now: Timestamp) -> bool {
        message.status == MessageStatus::Delivering
            && !message.has_live_lease(now)
            && (message.recipients.iter().any(|r| r.is_due(now))
                || self.backup_due(message, now)
                || (message.all_recipients_terminal() && !self.backup_outstanding(message))
                || now >= self.ceiling(message))
    }

    /// The tier owes a durable backup registration that a configured backup
    /// can still provide. Such messages are not finalized before the ceiling.
    fn backup_outstanding(&self, message: &Message) -> bool {
        self.backup.is_some() && owes_backup(message, self.config.tiers.policy(message.delivery_tier))
    }

    /// A registration should be attempted in a pass at `now`.
    fn backup_due(&self, message: &Message, now: Timestamp) -> bool {
        if !owes_backup(message, self.config.tiers.policy(message.delivery_tier)) {
            return false;
        }
        match self.backup {
            // Audit the missing backup once; there is nothing to retry.
            None => message.backup_attempts == 0,
            Some(_) => message.backup_retry_at.map_or(true, |at| at <= now),
        }
    }

    fn ceiling(&self, message: &Message) -> Timestamp {
        message
            .delivery_started_at
            .unwrap_or(message.updated_at)
            .saturating_add(self.config.message_ceiling_ms)
    }

    /// Run one delivery pass for `message_id`.
    pub async fn deliver(&self, message_id: &MessageId) -> Result<PassReport> {
        let now = self.clock.now();
        let worker = self.worker;
        let lease = DeliveryLease {
            holder: worker,
            expires_at: now.saturating_add(self.config.lease_ms),
        };

        let claimed = self
            .store
            .mutate_message(message_id, |mut m| {
                if m.status != MessageStatus::Delivering {
                    return Mutation::Abort(Some(PassOutcome::NotDelivering(m.status)));
                }
                if m.has_live_lease(now) {
                    return Mutation::Abort(Some(PassOutcome::LeaseHeld));
                }
                m.lease = Some(lease);
                Mutation::Commit {
                    message: m,
                    audit: Vec::new(),
                    output: None,
                }
            })
            .await?;
        if let Some(outcome) = claimed.output {
            tracing::debug!(message_id = %message_id, ?outcome, "skipping delivery pass");
            return Ok(PassReport::new(*message_id, outcome));
        }
        let message = claimed.message;
        let policy = *self.config.tiers.policy(message.delivery_tier);

        let due = self.due_in_priority_order(&message, now);
        let mut attempts = Vec::with_capacity(due.len());
        if !due.is_empty() {
            let capability = message
                .release_capability
                .as_ref()
                .ok_or_else(|| DeliveryError::MissingCapability(message.entity_id()))?;
            let revealed =
                match self
                    .vault
                    .reveal(&message.id, &message.sealed_payload, capability)
                {
                    Ok(revealed) => revealed,
                    Err(e) => return self.fail_integrity(&message, e.to_string()).await,
                };

            tracing::info!(
                message_id = %message.id,
                recipients = due.len(),
                "delivering released message"
            );
            for recipient in due {
                let content = DeliveryContent::release(
                    message.id,
                    recipient.id,
                    revealed.plaintext.clone(),
                    revealed.digest,
                );
                let outcome = self
                    .channels
                    .send(recipient.channel, &recipient.destination, &content)
                    .await;
                if let SendOutcome::Failed(reason) = &outcome {
                    tracing::warn!(
                        message_id = %message.id,
                        recipient_id = %recipient.id,
                        channel = recipient.channel.as_str(),
                        reason = %reason,
                        "delivery attempt failed"
                    );
                }
                attempts.push(Attempt {
                    recipient_id: recipient.id,
                    outcome,
                    at: self.clock.now(),
                });
            }
        }

        let backup = if self.backup_due(&message, now) {
            Some(self.register_backup(&message).await)
        } else {
            None
        };

        let finished_at = self.clock.now();
        let config = &self.config;
        let backup_configured = self.backup.is_some();
        let committed = self
            .store
            .mutate_message(message_id, |mut m| {
                if m.status != MessageStatus::Delivering
                    || m.lease.map_or(true, |l| l.holder != worker)
                {
                    return Mutation::Abort(None);
                }
                let mut audit = Vec::new();
                let mut failed = record_attempts(&mut m, &attempts, &policy, &config.backoff, &mut audit);
                if let Some(backup) = &backup {
                    record_backup(&mut m, backup, &config.backoff, &mut audit);
                }
                let started = m.delivery_started_at.unwrap_or(m.updated_at);
                let past_ceiling = finished_at >= started.saturating_add(config.message_ceiling_ms);
                let backup_pending = backup_configured && owes_backup(&m, &policy);
                let settled = settle(
                    &mut m,
                    &policy,
                    backup_pending,
                    past_ceiling,
                    finished_at,
                    &mut audit,
                );
                failed += settled.failed;
                m.lease = None;
                m.updated_at = finished_at;
                Mutation::Commit {
                    message: m,
                    audit,
                    output: Some(Settled {
                        outcome: settled.outcome,
                        failed,
                    }),
                }
            })
            .await?;

        let mut report = PassReport::new(*message_id, PassOutcome::LeaseHeld);
        report.attempted = attempts.len();
        report.sent = attempts.iter().filter(|a| a.outcome.is_sent()).count();
        report.backup_registered =
            committed.committed && matches!(backup, Some(BackupResult::Registered { .. }));
        match committed.output {
            Some(settled) => {
                report.failed = settled.failed;
                report.outcome = settled.outcome;
            }
            None => {
                tracing::warn!(message_id = %message_id, "lost delivery lease before recording results");
            }
        }

        tracing::info!(
            message_id = %message_id,
            attempted = report.attempted,
            sent = report.sent,
            failed = report.failed,
            outcome = ?report.outcome,
            "delivery pass finished"
        );
        Ok(report)
    }

    fn due_in_priority_order<'m>(&self, message: &'m Message, now: Timestamp) -> Vec<&'m Recipient> {
        let order = &self.config.channel_order;
        let rank = |c: Channel| order.iter().position(|x| *x == c).unwrap_or(order.len());
        let mut due: Vec<&Recipient> = message.recipients.iter().filter(|r| r.is_due(now)).collect();
        due.sort_by_key(|r| rank(r.channel));
        due
    }

    async fn register_backup(&self, message: &Message) -> BackupResult {
        let result = match &self.backup {
            None => Err("no durable backup configured".to_string()),
            Some(backup) => backup
                .register(&message.id, &message.sealed_payload)
                .await
                .map_err(|e| format!("{:#}", e)),
        };
        let at = self.clock.now();
        match result {
            Ok(locator) => {
                tracing::info!(message_id = %message.id, locator = %locator, "registered durable backup");
                BackupResult::Registered { locator, at }
            }
            Err(reason) => {
                tracing::warn!(message_id = %message.id, reason = %reason, "durable backup registration failed");
                BackupResult::Failed { reason, at }
            }
        }
    }

    async fn fail_integrity(&self, message: &Message, detail: String) -> Result<PassReport> {
        let now = self.clock.now();
        tracing::error!(message_id = %message.id, detail = %detail, "reveal failed, finalizing without release");
        self.alerts
            .integrity_failure(&IntegrityAlert {
                message_id: message.id,
                user_id: message.user_id,
                at: now,
                detail: detail.clone(),
            })
            .await;

        let worker = self.worker;
        let mutated = self
            .store
            .mutate_message(&message.id, |mut m| {
                if m.status != MessageStatus::Delivering
                    || m.lease.map_or(true, |l| l.holder != worker)
                {
                    return Mutation::Abort(0);
                }
                let entity = m.entity_id();
                let mut audit = vec![AuditEntry::event(
                    entity.clone(),
                    AuditEvent::IntegrityFailure,
                    now,
                    detail.clone(),
                )];
                let failed = fail_open_recipients(&mut m, "integrity failure", now, &mut audit);
                match m.apply(Transition::Expire, now, "integrity failure") {
                    Ok(entry) => audit.push(entry),
                    Err(e) => tracing::error!(message_id = %entity, error = %e, "cannot expire message"),
                }
                m.lease = None;
                Mutation::Commit {
                    message: m,
                    audit,
                    output: failed,
                }
            })
            .await?;

        let mut report = PassReport::new(message.id, PassOutcome::IntegrityFailure);
        report.failed = mutated.output;
        if !mutated.committed {
            report.outcome = PassOutcome::LeaseHeld;
        }
        Ok(report)
    }
}

fn recipient_detail(r: &Recipient) -> String {
    format!(
        "recipient={} channel={} attempt={}",
        r.id,
        r.channel.as_str(),
        r.attempt_count
    )
}

/// Apply send outcomes to the fresh record. Returns recipients newly failed.
fn record_attempts(
    m: &mut Message,
    attempts: &[Attempt],
    policy: &TierPolicy,
    backoff: &BackoffPolicy,
    audit: &mut Vec<AuditEntry>,
) -> usize {
    let entity = m.entity_id();
    let mut failed = 0;

    for attempt in attempts {
        let Some(r) = m.recipient_mut(&attempt.recipient_id) else {
            continue;
        };
        if r.delivery_status != DeliveryStatus::Pending {
            continue;
        }
        r.attempt_count += 1;
        r.last_attempt_at = Some(attempt.at);

        match &attempt.outcome {
            SendOutcome::Sent => {
                r.last_error = None;
                r.next_retry_at = None;
                r.delivery_status = DeliveryStatus::Sent;
                audit.push(AuditEntry::value_change(
                    entity.clone(),
                    AuditEvent::DeliveryAttempt,
                    DeliveryStatus::Pending.as_str(),
                    DeliveryStatus::Sent.as_str(),
                    attempt.at,
                    recipient_detail(r),
                ));
                if !r.requires_confirmation {
                    r.delivery_status = DeliveryStatus::Confirmed;
                    audit.push(AuditEntry::value_change(
                        entity.clone(),
                        AuditEvent::RecipientConfirmed,
                        DeliveryStatus::Sent.as_str(),
                        DeliveryStatus::Confirmed.as_str(),
                        attempt.at,
                        recipient_detail(r),
                    ));
                }
            }
            SendOutcome::Failed(reason) => {
                r.last_error = Some(reason.clone());
                if r.attempt_count >= policy.max_attempts {
                    r.delivery_status = DeliveryStatus::Failed;
                    r.next_retry_at = None;
                    failed += 1;
                    audit.push(AuditEntry::value_change(
                        entity.clone(),
                        AuditEvent::RecipientFailed,
                        DeliveryStatus::Pending.as_str(),
                        DeliveryStatus::Failed.as_str(),
                        attempt.at,
                        format!("{} retries exhausted: {}", recipient_detail(r), reason),
                    ));
                } else {
                    let retry_at = attempt.at.saturating_add(backoff.delay_after(r.attempt_count));
                    r.next_retry_at = Some(retry_at);
                    audit.push(AuditEntry::value_change(
                        entity.clone(),
                        AuditEvent::DeliveryAttempt,
                        DeliveryStatus::Pending.as_str(),
                        DeliveryStatus::Pending.as_str(),
                        attempt.at,
                        format!("{} failed: {}; retry at {}", recipient_detail(r), reason, retry_at),
                    ));
                }
            }
        }
    }

    failed
}

fn owes_backup(m: &Message, policy: &TierPolicy) -> bool {
    policy.backup_registration && m.backup_registered_at.is_none()
}

fn record_backup(
    m: &mut Message,
    backup: &BackupResult,
    backoff: &BackoffPolicy,
    audit: &mut Vec<AuditEntry>,
) {
    if m.backup_registered_at.is_some() {
        return;
    }
    m.backup_attempts += 1;
    match backup {
        BackupResult::Registered { locator, at } => {
            m.backup_registered_at = Some(*at);
            m.backup_locator = Some(locator.clone());
            m.backup_retry_at = None;
            audit.push(AuditEntry::value_change(
                m.entity_id(),
                AuditEvent::BackupRegistration,
                "pending",
                "sent",
                *at,
                format!("locator={}", locator),
            ));
        }
        BackupResult::Failed { reason, at } => {
            let retry_at = at.saturating_add(backoff.delay_after(m.backup_attempts));
            m.backup_retry_at = Some(retry_at);
            audit.push(AuditEntry::value_change(
                m.entity_id(),
                AuditEvent::BackupRegistration,
                "pending",
                "failed",
                *at,
                format!("attempt={} {}; retry at {}", m.backup_attempts, reason, retry_at),
            ));
        }
    }
}

/// Mark every non-terminal recipient failed. Returns how many.
fn fail_open_recipients(
    m: &mut Message,
    reason: &str,
    now: Timestamp,
    audit: &mut Vec<AuditEntry>,
) -> usize {
    let entity = m.entity_id();
    let mut failed = 0;
    for r in m
        .recipients
        .iter_mut()
        .filter(|r| !r.delivery_status.is_terminal())
    {
        let previous = r.delivery_status;
        r.delivery_status = DeliveryStatus::Failed;
        r.next_retry_at = None;
        r.last_error = Some(reason.to_string());
        failed += 1;
        audit.push(AuditEntry::value_change(
            entity.clone(),
            AuditEvent::RecipientFailed,
            previous.as_str(),
            DeliveryStatus::Failed.as_str(),
            now,
            format!("{}: {}", recipient_detail(r), reason),
        ));
    }
    failed
}

/// Finalize the message if every recipient is settled and no backup is
/// owed, or the ceiling passed.
fn settle(
    m: &mut Message,
    policy: &TierPolicy,
    backup_pending: bool,
    past_ceiling: bool,
    now: Timestamp,
    audit: &mut Vec<AuditEntry>,
) -> Settled {
    if (!m.all_recipients_terminal() || backup_pending) && !past_ceiling {
        let next_attempt_at = m
            .recipients
            .iter()
            .filter(|r| r.delivery_status == DeliveryStatus::Pending)
            .filter_map(|r| r.next_retry_at)
            .chain(m.backup_retry_at.filter(|_| backup_pending))
            .min();
        return Settled {
            outcome: PassOutcome::InProgress { next_attempt_at },
            failed: 0,
        };
    }
    if backup_pending {
        tracing::warn!(
            message_id = %m.id,
            attempts = m.backup_attempts,
            "finalizing without a durable backup"
        );
    }

    let failed = fail_open_recipients(m, "delivery ceiling reached", now, audit);
    let confirmed = m.confirmed_count();
    let total = m.recipients.len();
    let (transition, outcome) = if policy.quorum.is_met(confirmed, total) {
        (Transition::Complete, PassOutcome::Delivered)
    } else {
        (Transition::Expire, PassOutcome::Expired)
    };

    let detail = format!("{} of {} recipients confirmed", confirmed, total);
    match m.apply(transition, now, detail) {
        Ok(entry) => audit.push(entry),
        Err(e) => tracing::error!(message_id = %m.id, error = %e, "cannot finalize message"),
    }
    Settled { outcome, failed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::memory::MemoryChannel;
    use lastword_core::{
        Blake3Hash, DeliveryTier, QuorumPolicy, ReleaseAuthority, SealedPayload, User, UserId,
        HOUR_MS,
    };
    use lastword_store::MemoryStore;
    use lastword_vault::{Sealer, VaultSecret};
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct TestClock(AtomicI64);

    impl Clock for TestClock {
        fn now(&self) -> Timestamp {
            self.0.load(Ordering::SeqCst)
        }
    }

    impl TestClock {
        fn set(&self, at: Timestamp) {
            self.0.store(at, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingAlerts(Mutex<Vec<IntegrityAlert>>);

    #[async_trait::async_trait]
    impl AlertSink for RecordingAlerts {
        async fn integrity_failure(&self, alert: &IntegrityAlert) {
            self.0.lock().unwrap().push(alert.clone());
        }
    }

    struct FailingBackup;

    #[async_trait::async_trait]
    impl DurableBackup for FailingBackup {
        async fn register(&self, _: &MessageId, _: &SealedPayload) -> anyhow::Result<String> {
            anyhow::bail!("backup offline")
        }
    }

    /// Fails while its counter is above zero.
    struct FlakyBackup(AtomicUsize);

    #[async_trait::async_trait]
    impl DurableBackup for FlakyBackup {
        async fn register(&self, id: &MessageId, _: &SealedPayload) -> anyhow::Result<String> {
            if self
                .0
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                anyhow::bail!("backup timed out");
            }
            Ok(format!("mem://{}", id.to_hex()))
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        clock: Arc<TestClock>,
        authority: ReleaseAuthority,
        vault: Arc<Vault>,
    }

    impl Harness {
        fn new() -> Self {
            let authority = ReleaseAuthority::generate();
            let vault = Arc::new(Vault::new(VaultSecret::generate(), authority.public_key()));
            Self {
                store: Arc::new(MemoryStore::new()),
                clock: Arc::new(TestClock(AtomicI64::new(DAY_MS))),
                authority,
                vault,
            }
        }

        fn orchestrator(&self, channels: ChannelRegistry, config: DeliveryConfig) -> Orchestrator<MemoryStore> {
            Orchestrator::new(
                self.store.clone(),
                self.vault.clone(),
                channels,
                self.clock.clone(),
                config,
            )
        }

        /// Insert a message already in `Delivering` with a minted capability.
        async fn delivering(&self, tier: DeliveryTier, recipients: &[(Channel, &str)]) -> Message {
            let user = User::new(UserId::generate(), 7, 3, Some(0)).unwrap();
            let sealed = Sealer::new(self.vault.public_key())
                .seal(b"final words", user.id.as_bytes())
                .unwrap();
            let id = MessageId::generate();
            let now = self.clock.now();
            let message = Message {
                id,
                user_id: user.id,
                status: MessageStatus::Delivering,
                release_capability: Some(self.authority.mint(id, sealed.digest, now)),
                sealed_payload: sealed,
                check_in_interval_days: None,
                grace_period_days: None,
                delivery_tier: tier,
                recipients: recipients
                    .iter()
                    .map(|(c, d)| Recipient::new(id, *c, *d, false))
                    .collect(),
                deadline_anchor: Some(0),
                next_deadline: Some(10 * DAY_MS),
                dissolution_plan: None,
                delivery_started_at: Some(now),
                backup_registered_at: None,
                backup_locator: None,
                backup_attempts: 0,
                backup_retry_at: None,
                lease: None,
                created_at: 0,
                updated_at: now,
                version: 0,
            };
            self.store.insert_message(&message, &[]).await.unwrap();
            message
        }
    }

    #[tokio::test]
    async fn test_all_confirmed_is_delivered() {
        let h = Harness::new();
        let email = Arc::new(MemoryChannel::accepting(Channel::Email));
        let orch = h.orchestrator(ChannelRegistry::new().with(email.clone()), DeliveryConfig::default());
        let m = h.delivering(DeliveryTier::Standard, &[(Channel::Email, "a@example.com")]).await;

        let report = orch.deliver(&m.id).await.unwrap();
        assert_eq!(report.outcome, PassOutcome::Delivered);
        assert_eq!(report.sent, 1);

        let calls = email.calls();
        assert_eq!(&calls[0].content.body[..], b"final words");

        let stored = h.store.get_message(&m.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Delivered);
        assert!(stored.lease.is_none());
    }

    #[tokio::test]
    async fn test_failure_schedules_backoff_retry() {
        let h = Harness::new();
        let sms = Arc::new(MemoryChannel::failing(Channel::Sms, "carrier 503"));
        let orch = h.orchestrator(ChannelRegistry::new().with(sms), DeliveryConfig::default());
        let m = h.delivering(DeliveryTier::Standard, &[(Channel::Sms, "+15551234567")]).await;

        let report = orch.deliver(&m.id).await.unwrap();
        let start = h.clock.now();
        assert_eq!(
            report.outcome,
            PassOutcome::InProgress {
                next_attempt_at: Some(start + MINUTE_MS)
            }
        );

        // Not due yet: nothing to do.
        let stored = h.store.get_message(&m.id).await.unwrap().unwrap();
        assert!(!orch.needs_pass(&stored, start + MINUTE_MS - 1));
        assert!(orch.needs_pass(&stored, start + MINUTE_MS));
        assert_eq!(stored.recipients[0].attempt_count, 1);
        assert_eq!(stored.recipients[0].last_error.as_deref(), Some("carrier 503"));
    }

    #[tokio::test]
    async fn test_independent_recipients_with_at_least_one_quorum() {
        let h = Harness::new();
        let email = Arc::new(
            MemoryChannel::accepting(Channel::Email)
                .script("bad@example.com", std::iter::repeat(SendOutcome::Failed("bounce".into())).take(10)),
        );
        let config = DeliveryConfig {
            tiers: TierTable::default().with_policy(
                DeliveryTier::Standard,
                TierPolicy {
                    max_attempts: 3,
                    quorum: QuorumPolicy::AtLeast(1),
                    backup_registration: false,
                },
            ),
            ..DeliveryConfig::default()
        };
        let orch = h.orchestrator(ChannelRegistry::new().with(email.clone()), config);
        let m = h
            .delivering(
                DeliveryTier::Standard,
                &[(Channel::Email, "bad@example.com"), (Channel::Email, "good@example.com")],
            )
            .await;

        let mut report = orch.deliver(&m.id).await.unwrap();
        while let PassOutcome::InProgress { next_attempt_at: Some(at) } = report.outcome {
            h.clock.set(at);
            report = orch.deliver(&m.id).await.unwrap();
        }
        assert_eq!(report.outcome, PassOutcome::Delivered);

        let stored = h.store.get_message(&m.id).await.unwrap().unwrap();
        assert_eq!(stored.recipients[0].delivery_status, DeliveryStatus::Failed);
        assert_eq!(stored.recipients[0].attempt_count, 3);
        assert_eq!(stored.recipients[1].delivery_status, DeliveryStatus::Confirmed);
        assert_eq!(email.calls_to("good@example.com"), 1);
    }

    #[tokio::test]
    async fn test_priority_order_email_first() {
        let h = Harness::new();
        let email = Arc::new(MemoryChannel::accepting(Channel::Email));
        let hook = Arc::new(MemoryChannel::accepting(Channel::Webhook));
        let orch = h.orchestrator(
            ChannelRegistry::new().with(email).with(hook),
            DeliveryConfig::default(),
        );
        let m = h
            .delivering(
                DeliveryTier::Standard,
                &[(Channel::Webhook, "https://h.example.com"), (Channel::Email, "a@example.com")],
            )
            .await;

        let ordered = orch.due_in_priority_order(&m, h.clock.now());
        assert_eq!(ordered[0].channel, Channel::Email);
        assert_eq!(ordered[1].channel, Channel::Webhook);
    }

    #[tokio::test]
    async fn test_ceiling_forces_finalization() {
        let h = Harness::new();
        let sms = Arc::new(MemoryChannel::failing(Channel::Sms, "down"));
        let orch = h.orchestrator(ChannelRegistry::new().with(sms), DeliveryConfig::default());
        let m = h.delivering(DeliveryTier::PriorityRetry, &[(Channel::Sms, "+15551234567")]).await;

        orch.deliver(&m.id).await.unwrap();
        h.clock.set(h.clock.now() + DAY_MS + HOUR_MS);
        let report = orch.deliver(&m.id).await.unwrap();
        assert_eq!(report.outcome, PassOutcome::Expired);

        let stored = h.store.get_message(&m.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Expired);
        assert_eq!(stored.recipients[0].delivery_status, DeliveryStatus::Failed);
    }

    #[tokio::test]
    async fn test_integrity_failure_releases_nothing() {
        let h = Harness::new();
        let email = Arc::new(MemoryChannel::accepting(Channel::Email));
        let alerts = Arc::new(RecordingAlerts::default());
        let orch = h
            .orchestrator(ChannelRegistry::new().with(email.clone()), DeliveryConfig::default())
            .with_alert_sink(alerts.clone());
        let mut m = h.delivering(DeliveryTier::Standard, &[(Channel::Email, "a@example.com")]).await;

        // Corrupt the stored digest and re-mint so only the content check fails.
        m.sealed_payload.digest = Blake3Hash::hash(b"tampered");
        m.release_capability = Some(h.authority.mint(m.id, m.sealed_payload.digest, 0));
        h.store.compare_and_swap(&m, 1, &[]).await.unwrap();

        let report = orch.deliver(&m.id).await.unwrap();
        assert_eq!(report.outcome, PassOutcome::IntegrityFailure);
        assert!(email.calls().is_empty());
        assert_eq!(alerts.0.lock().unwrap().len(), 1);

        let stored = h.store.get_message(&m.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Expired);
        let log = h.store.audit_for(&m.entity_id()).await.unwrap();
        assert!(log.iter().any(|e| e.entry.event == AuditEvent::IntegrityFailure));
    }

    #[tokio::test]
    async fn test_lease_held_by_other_worker_skips() {
        let h = Harness::new();
        let email = Arc::new(MemoryChannel::accepting(Channel::Email));
        let registry = ChannelRegistry::new().with(email.clone());
        let a = h.orchestrator(registry.clone(), DeliveryConfig::default());
        let b = h.orchestrator(registry, DeliveryConfig::default());
        let mut m = h.delivering(DeliveryTier::Standard, &[(Channel::Email, "a@example.com")]).await;

        m.lease = Some(DeliveryLease {
            holder: a.worker(),
            expires_at: h.clock.now() + MINUTE_MS,
        });
        h.store.compare_and_swap(&m, 1, &[]).await.unwrap();

        let report = b.deliver(&m.id).await.unwrap();
        assert_eq!(report.outcome, PassOutcome::LeaseHeld);
        assert!(email.calls().is_empty());

        // Expired leases can be taken over.
        h.clock.set(h.clock.now() + MINUTE_MS);
        assert_eq!(b.deliver(&m.id).await.unwrap().outcome, PassOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_failed_backup_holds_message_until_retry_or_ceiling() {
        let h = Harness::new();
        let email = Arc::new(MemoryChannel::accepting(Channel::Email));
        let orch = h
            .orchestrator(ChannelRegistry::new().with(email.clone()), DeliveryConfig::default())
            .with_backup(Arc::new(FailingBackup));
        let m = h
            .delivering(DeliveryTier::DecentralizedBackup, &[(Channel::Email, "a@example.com")])
            .await;
        let start = h.clock.now();

        let report = orch.deliver(&m.id).await.unwrap();
        assert_eq!(
            report.outcome,
            PassOutcome::InProgress {
                next_attempt_at: Some(start + MINUTE_MS)
            }
        );
        assert!(!report.backup_registered);

        let stored = h.store.get_message(&m.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Delivering);
        assert_eq!(stored.recipients[0].delivery_status, DeliveryStatus::Confirmed);
        assert_eq!(stored.backup_attempts, 1);
        assert!(!orch.needs_pass(&stored, start + MINUTE_MS - 1));
        assert!(orch.needs_pass(&stored, start + MINUTE_MS));

        h.clock.set(start + MINUTE_MS);
        let retry = orch.deliver(&m.id).await.unwrap();
        assert_eq!(retry.attempted, 0);
        assert_eq!(
            retry.outcome,
            PassOutcome::InProgress {
                next_attempt_at: Some(start + 3 * MINUTE_MS)
            }
        );

        h.clock.set(start + DAY_MS);
        assert_eq!(orch.deliver(&m.id).await.unwrap().outcome, PassOutcome::Delivered);
        assert_eq!(email.calls().len(), 1);

        let log = h.store.audit_for(&m.entity_id()).await.unwrap();
        let failures: Vec<_> = log
            .iter()
            .filter(|e| e.entry.event == AuditEvent::BackupRegistration)
            .collect();
        assert_eq!(failures.len(), 3);
        assert!(failures.iter().all(|e| e.entry.new_state.as_deref() == Some("failed")));
        assert!(failures[0].entry.detail.contains("backup offline"));
    }

    #[tokio::test]
    async fn test_backup_registered_on_retry_then_delivered() {
        let h = Harness::new();
        let email = Arc::new(MemoryChannel::accepting(Channel::Email));
        let orch = h
            .orchestrator(ChannelRegistry::new().with(email), DeliveryConfig::default())
            .with_backup(Arc::new(FlakyBackup(AtomicUsize::new(1))));
        let m = h
            .delivering(DeliveryTier::DecentralizedBackup, &[(Channel::Email, "a@example.com")])
            .await;

        let first = orch.deliver(&m.id).await.unwrap();
        assert!(!first.outcome.is_final());

        h.clock.set(h.clock.now() + MINUTE_MS);
        let second = orch.deliver(&m.id).await.unwrap();
        assert!(second.backup_registered);
        assert_eq!(second.outcome, PassOutcome::Delivered);

        let stored = h.store.get_message(&m.id).await.unwrap().unwrap();
        assert_eq!(stored.backup_attempts, 2);
        assert_eq!(stored.backup_retry_at, None);
        assert!(stored.backup_locator.is_some());
    }

    #[tokio::test]
    async fn test_missing_backup_is_audited_once_and_does_not_hold() {
        let h = Harness::new();
        let email = Arc::new(MemoryChannel::accepting(Channel::Email));
        let orch = h.orchestrator(ChannelRegistry::new().with(email), DeliveryConfig::default());
        let m = h
            .delivering(DeliveryTier::DecentralizedBackup, &[(Channel::Email, "a@example.com")])
            .await;

        assert_eq!(orch.deliver(&m.id).await.unwrap().outcome, PassOutcome::Delivered);
        let log = h.store.audit_for(&m.entity_id()).await.unwrap();
        let backup = log
            .iter()
            .find(|e| e.entry.event == AuditEvent::BackupRegistration)
            .unwrap();
        assert_eq!(backup.entry.new_state.as_deref(), Some("failed"));
        assert!(backup.entry.detail.contains("no durable backup configured"));
    }

    #[tokio::test]
    async fn test_audit_never_contains_plaintext() {
        let h = Harness::new();
        let email = Arc::new(MemoryChannel::accepting(Channel::Email));
        let orch = h.orchestrator(ChannelRegistry::new().with(email), DeliveryConfig::default());
        let m = h.delivering(DeliveryTier::Standard, &[(Channel::Email, "a@example.com")]).await;
        orch.deliver(&m.id).await.unwrap();

        for e in h.store.audit_since(0, 100).await.unwrap() {
            assert!(!e.entry.detail.contains("final words"));
        }
    }
}
