//! The Engine: unified API for the LastWord release engine.
//!
//! The Engine brings together storage, the vault, check-in tracking,
//! scheduling and delivery behind one interface for hosts.

use std::sync::Arc;

use lastword_core::{
    validate_create_request, validate_dissolution_plan, AuditEntry, AuditEvent, CheckInSignal,
    Clock, DeliveryStatus, DissolutionPlanRequest, IllegalTransition, Message,
    MessageCreateRequest, MessageId, MessageStatus, MessageStatusView, OwnerAction,
    OwnerActionKind, Recipient, RecipientId, ReleaseAuthority, SequencedAuditEntry, SystemClock,
    Transition, User, UserId, ValidationError, WorkerId,
};
use lastword_delivery::{AlertSink, ChannelRegistry, DurableBackup, Orchestrator};
use lastword_store::{Mutation, Store, StoreExt};
use lastword_vault::Vault;

use crate::checkin::{CheckInOutcome, CheckInTracker};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::scheduler::Scheduler;

/// Result of an owner or recipient action on a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The change was committed.
    Applied,
    /// The lifecycle does not allow it in the message's current status.
    /// Nothing changed.
    Rejected(IllegalTransition),
}

impl ActionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ActionOutcome::Applied)
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder<S> {
    store: S,
    authority: ReleaseAuthority,
    vault: Arc<Vault>,
    channels: ChannelRegistry,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    backup: Option<Arc<dyn DurableBackup>>,
    alerts: Option<Arc<dyn AlertSink>>,
    worker: Option<WorkerId>,
}

impl<S: Store + 'static> EngineBuilder<S> {
    /// Channel adapters used for delivery and backup contact notices.
    pub fn channels(mut self, channels: ChannelRegistry) -> Self {
        self.channels = channels;
        self
    }

    /// Time source. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Durable storage for the `DecentralizedBackup` tier.
    pub fn backup(mut self, backup: Arc<dyn DurableBackup>) -> Self {
        self.backup = Some(backup);
        self
    }

    /// Operator alerts. Defaults to logging.
    pub fn alert_sink(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Worker id for delivery leases. Defaults to a random one.
    pub fn worker(mut self, worker: WorkerId) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn build(self) -> Engine<S> {
        let store = Arc::new(self.store);
        let mut orchestrator = Orchestrator::new(
            Arc::clone(&store),
            self.vault,
            self.channels,
            Arc::clone(&self.clock),
            self.config.delivery.clone(),
        );
        if let Some(backup) = self.backup {
            orchestrator = orchestrator.with_backup(backup);
        }
        if let Some(alerts) = self.alerts {
            orchestrator = orchestrator.with_alert_sink(alerts);
        }
        if let Some(worker) = self.worker {
            orchestrator = orchestrator.with_worker(worker);
        }

        Engine {
            tracker: CheckInTracker::new(
                Arc::clone(&store),
                Arc::clone(&self.clock),
                self.config.limits,
            ),
            store,
            clock: self.clock,
            authority: Arc::new(self.authority),
            orchestrator,
            config: self.config,
        }
    }
}

/// The main Engine struct.
///
/// Provides a unified API for:
/// - Registering users and their check-in cadence
/// - Creating, activating, pausing, resuming and cancelling messages
/// - Recording check-ins
/// - Confirming recipients
/// - Querying status and the audit log
/// - Running the scheduler
pub struct Engine<S: Store> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    authority: Arc<ReleaseAuthority>,
    orchestrator: Orchestrator<S>,
    tracker: CheckInTracker<S>,
    config: EngineConfig,
}

impl<S: Store> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            authority: Arc::clone(&self.authority),
            orchestrator: self.orchestrator.clone(),
            tracker: self.tracker.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: Store + 'static> Engine<S> {
    /// Start building an engine.
    ///
    /// `vault` must trust `authority`'s public key, or every release ends in
    /// an integrity failure.
    pub fn builder(store: S, authority: ReleaseAuthority, vault: Arc<Vault>) -> EngineBuilder<S> {
        EngineBuilder {
            store,
            authority,
            vault,
            channels: ChannelRegistry::new(),
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
            backup: None,
            alerts: None,
            worker: None,
        }
    }

    /// Get the store reference.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A scheduler sharing this engine's store, clock and orchestrator.
    pub fn scheduler(&self) -> Scheduler<S> {
        Scheduler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            Arc::clone(&self.authority),
            self.orchestrator.clone(),
            self.config.scheduler.clone(),
        )
    }

    /// The delivery orchestrator.
    pub fn orchestrator(&self) -> &Orchestrator<S> {
        &self.orchestrator
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Users
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a user or change their cadence.
    pub async fn upsert_user(&self, user: &User) -> Result<()> {
        self.store.upsert_user(user).await?;
        Ok(())
    }

    pub async fn user(&self, id: &UserId) -> Result<Option<User>> {
        Ok(self.store.get_user(id).await?)
    }

    async fn require_user(&self, id: &UserId) -> Result<User> {
        self.store
            .get_user(id)
            .await?
            .ok_or_else(|| ValidationError::UnknownUser(id.to_hex()).into())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Messages
    // ─────────────────────────────────────────────────────────────────────────

    /// Validate and store a new message in `Draft`.
    pub async fn create_message(&self, request: MessageCreateRequest) -> Result<MessageId> {
        let user = self.require_user(&request.user_id).await?;
        let overrides = validate_create_request(&request, &self.config.limits)?;

        let now = self.clock.now();
        let id = MessageId::generate();
        let message = Message {
            id,
            user_id: user.id,
            status: MessageStatus::Draft,
            check_in_interval_days: overrides.check_in_interval_days,
            grace_period_days: overrides.grace_period_days,
            delivery_tier: request.delivery_tier,
            recipients: request
                .recipients
                .iter()
                .map(|r| Recipient::new(id, r.channel, r.destination.clone(), r.requires_confirmation))
                .collect(),
            sealed_payload: request.sealed_payload,
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
            created_at: now,
            updated_at: now,
            version: 0,
        };

        let created = AuditEntry::event(
            message.entity_id(),
            AuditEvent::MessageCreated,
            now,
            format!(
                "user={} tier={:?} recipients={}",
                user.id,
                message.delivery_tier,
                message.recipients.len()
            ),
        );
        self.store.insert_message(&message, &[created]).await?;

        tracing::info!(message_id = %id, user_id = %user.id, "message created");
        Ok(id)
    }

    /// Get a message.
    pub async fn message(&self, id: &MessageId) -> Result<Option<Message>> {
        Ok(self.store.get_message(id).await?)
    }

    /// All messages owned by a user.
    pub async fn messages_for_user(&self, user_id: &UserId) -> Result<Vec<Message>> {
        Ok(self.store.list_messages_for_user(user_id).await?)
    }

    /// Dashboard view of a message.
    pub async fn status(&self, id: &MessageId) -> Result<Option<MessageStatusView>> {
        Ok(self.store.get_message(id).await?.map(|m| m.status_view()))
    }

    /// Finalize a draft. The deadline is anchored at the later of the user's
    /// last check-in and now.
    pub async fn activate(&self, id: &MessageId) -> Result<ActionOutcome> {
        self.transition_and_anchor(id, Transition::Activate).await
    }

    /// Pause, resume or cancel a message.
    ///
    /// Resuming re-anchors the deadline the same way activation does, so a
    /// long pause does not release immediately.
    pub async fn owner_action(&self, action: OwnerAction) -> Result<ActionOutcome> {
        let id = &action.message_id;
        match action.action {
            OwnerActionKind::Resume => self.transition_and_anchor(id, Transition::Resume).await,
            OwnerActionKind::Pause => self.transition(id, Transition::Pause).await,
            OwnerActionKind::Cancel => self.transition(id, Transition::Cancel).await,
        }
    }

    async fn transition(&self, id: &MessageId, transition: Transition) -> Result<ActionOutcome> {
        let now = self.clock.now();
        let mutated = self
            .store
            .mutate_message(id, |mut m| match m.apply(transition, now, "owner action") {
                Ok(entry) => Mutation::Commit {
                    message: m,
                    audit: vec![entry],
                    output: ActionOutcome::Applied,
                },
                Err(e) => Mutation::Abort(ActionOutcome::Rejected(e)),
            })
            .await
            .map_err(EngineError::from_message_lookup)?;

        log_action(id, transition, &mutated.output);
        Ok(mutated.output)
    }

    async fn transition_and_anchor(
        &self,
        id: &MessageId,
        transition: Transition,
    ) -> Result<ActionOutcome> {
        let message = self
            .store
            .get_message(id)
            .await?
            .ok_or_else(|| EngineError::UnknownMessage(id.to_hex()))?;
        let user = self.require_user(&message.user_id).await?;

        let now = self.clock.now();
        let mutated = self
            .store
            .mutate_message(id, |mut m| {
                let entry = match m.apply(transition, now, "owner action") {
                    Ok(entry) => entry,
                    Err(e) => return Mutation::Abort(ActionOutcome::Rejected(e)),
                };
                let anchor = user.last_check_in_at.map_or(now, |last| last.max(now));
                let policy = m.effective_policy(&user);
                let reanchored = m.reanchor(anchor, &policy, now);
                Mutation::Commit {
                    message: m,
                    audit: vec![entry, reanchored],
                    output: ActionOutcome::Applied,
                }
            })
            .await
            .map_err(EngineError::from_message_lookup)?;

        log_action(id, transition, &mutated.output);
        Ok(mutated.output)
    }

    /// Attach a one-time deadline extension with a backup contact.
    ///
    /// Allowed while the message is `Draft`, `Active` or `Paused`. Replaces
    /// any unused plan.
    pub async fn attach_dissolution_plan(
        &self,
        id: &MessageId,
        request: &DissolutionPlanRequest,
    ) -> Result<ActionOutcome> {
        let plan = validate_dissolution_plan(request)?;
        let now = self.clock.now();

        let mutated = self
            .store
            .mutate_message(id, |mut m| {
                let editable = matches!(
                    m.status,
                    MessageStatus::Draft | MessageStatus::Active | MessageStatus::Paused
                );
                if !editable || m.dissolution_plan.as_ref().map_or(false, |p| !p.is_available()) {
                    return Mutation::Abort(ActionOutcome::Rejected(IllegalTransition {
                        from: m.status,
                        action: "attach_dissolution_plan",
                    }));
                }
                let entry = AuditEntry::event(
                    m.entity_id(),
                    AuditEvent::DissolutionPlanAttached,
                    now,
                    format!("extended_grace={}d", plan.extended_grace_days),
                );
                m.dissolution_plan = Some(plan.clone());
                m.updated_at = now;
                Mutation::Commit {
                    message: m,
                    audit: vec![entry],
                    output: ActionOutcome::Applied,
                }
            })
            .await
            .map_err(EngineError::from_message_lookup)?;

        Ok(mutated.output)
    }

    /// Record a check-in. See [`CheckInTracker::record`].
    pub async fn record_check_in(&self, signal: &CheckInSignal) -> Result<CheckInOutcome> {
        self.tracker.record(signal).await
    }

    /// Mark a `Sent` recipient as confirmed.
    pub async fn confirm_recipient(
        &self,
        message_id: &MessageId,
        recipient_id: &RecipientId,
    ) -> Result<ActionOutcome> {
        let now = self.clock.now();
        let mutated = self
            .store
            .mutate_message(message_id, |mut m| {
                let status = m.status;
                let entity = m.entity_id();
                let Some(r) = m.recipient_mut(recipient_id) else {
                    return Mutation::Abort(None);
                };
                if status != MessageStatus::Delivering || r.delivery_status != DeliveryStatus::Sent {
                    return Mutation::Abort(Some(ActionOutcome::Rejected(IllegalTransition {
                        from: status,
                        action: "confirm_recipient",
                    })));
                }
                r.delivery_status = DeliveryStatus::Confirmed;
                let entry = AuditEntry::value_change(
                    entity,
                    AuditEvent::RecipientConfirmed,
                    DeliveryStatus::Sent.as_str(),
                    DeliveryStatus::Confirmed.as_str(),
                    now,
                    format!("recipient={} confirmed externally", recipient_id),
                );
                m.updated_at = now;
                Mutation::Commit {
                    message: m,
                    audit: vec![entry],
                    output: Some(ActionOutcome::Applied),
                }
            })
            .await
            .map_err(EngineError::from_message_lookup)?;

        mutated
            .output
            .ok_or_else(|| EngineError::UnknownRecipient(recipient_id.to_hex()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Audit
    // ─────────────────────────────────────────────────────────────────────────

    /// Audit entries after sequence number `cursor`, oldest first.
    pub async fn audit_since(&self, cursor: u64, limit: usize) -> Result<Vec<SequencedAuditEntry>> {
        Ok(self.store.audit_since(cursor, limit).await?)
    }

    /// Every audit entry for one message or user.
    pub async fn audit_for(&self, entity_id: &str) -> Result<Vec<SequencedAuditEntry>> {
        Ok(self.store.audit_for(entity_id).await?)
    }
}

fn log_action(id: &MessageId, transition: Transition, outcome: &ActionOutcome) {
    match outcome {
        ActionOutcome::Applied => {
            tracing::info!(message_id = %id, action = transition.as_str(), "owner action applied")
        }
        ActionOutcome::Rejected(e) => {
            tracing::info!(message_id = %id, error = %e, "owner action rejected")
        }
    }
}
