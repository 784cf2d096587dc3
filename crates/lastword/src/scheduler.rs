//! Scheduler: the recurring sweep that starts releases and drives delivery.
//!
//! Each sweep:
//!
//! 1. Takes Active messages whose deadline has passed and, through one
//!    compare-and-swap each, either applies their dissolution-plan extension
//!    (once) or moves them to `Delivering`, minting the release capability.
//! 2. Runs a delivery pass for every `Delivering` message that has work due,
//!    a few at a time.
//!
//! Sweeps are safe to run concurrently from several workers: the CAS admits
//! one `Active -> Delivering` write per message, and delivery leases keep two
//! workers from sending for the same message.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;

use lastword_core::{
    AuditEntry, AuditEvent, Channel, Clock, IllegalTransition, MessageId, ReleaseAuthority,
    Timestamp, Transition, DAY_MS,
};
use lastword_delivery::{DeliveryContent, Orchestrator, PassOutcome, PassReport, SendOutcome};
use lastword_store::{Mutation, Store, StoreExt};

use crate::config::SchedulerConfig;
use crate::error::Result;

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Due messages found.
    pub due: usize,
    /// Messages moved to `Delivering` by this sweep.
    pub released: Vec<MessageId>,
    /// Messages whose deadline was extended by a dissolution plan.
    pub extended: Vec<MessageId>,
    /// Delivery passes run.
    pub passes: usize,
    /// Messages finalized as `Delivered`.
    pub delivered: Vec<MessageId>,
    /// Messages finalized as `Expired`, including integrity failures.
    pub expired: Vec<MessageId>,
    /// Per-message errors; the sweep continues past them.
    pub errors: usize,
}

impl SweepReport {
    fn record_pass(&mut self, pass: &PassReport) {
        self.passes += 1;
        match pass.outcome {
            PassOutcome::Delivered => self.delivered.push(pass.message_id),
            PassOutcome::Expired | PassOutcome::IntegrityFailure => {
                self.expired.push(pass.message_id)
            }
            _ => {}
        }
    }
}

enum Release {
    Started,
    Extended { contact: String, until: Timestamp },
    NotDue,
    Rejected(IllegalTransition),
}

/// Runs sweeps.
pub struct Scheduler<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    authority: Arc<ReleaseAuthority>,
    orchestrator: Orchestrator<S>,
    config: SchedulerConfig,
}

impl<S> Clone for Scheduler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            authority: Arc::clone(&self.authority),
            orchestrator: self.orchestrator.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: Store + 'static> Scheduler<S> {
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        authority: Arc<ReleaseAuthority>,
        orchestrator: Orchestrator<S>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            clock,
            authority,
            orchestrator,
            config,
        }
    }

    /// Run sweeps every `config.interval` until `shutdown` turns `true` or
    /// its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("scheduler stopping");
                        return;
                    }
                    continue;
                }
            }

            match self.sweep_once().await {
                Ok(report) => {
                    if report.due > 0 || report.passes > 0 {
                        tracing::info!(
                            due = report.due,
                            released = report.released.len(),
                            extended = report.extended.len(),
                            passes = report.passes,
                            delivered = report.delivered.len(),
                            expired = report.expired.len(),
                            errors = report.errors,
                            "sweep finished"
                        );
                    }
                }
                Err(e) => tracing::warn!(error = %e, "sweep failed"),
            }
        }
    }

    /// Run one sweep.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        let due = self
            .store
            .list_due_for_release(now, self.config.batch_limit)
            .await?;
        report.due = due.len();

        for id in &due {
            match self.release(id, now).await {
                Ok(Release::Started) => report.released.push(*id),
                Ok(Release::Extended { contact, until }) => {
                    report.extended.push(*id);
                    self.notify_backup_contact(id, &contact, until).await;
                }
                Ok(Release::NotDue) => {}
                Ok(Release::Rejected(e)) => {
                    tracing::debug!(message_id = %id, error = %e, "release rejected");
                }
                Err(e) => {
                    tracing::warn!(message_id = %id, error = %e, "failed to start release");
                    report.errors += 1;
                }
            }
        }

        let work = self.collect_delivery_work().await?;

        for chunk in work.chunks(self.config.max_concurrent_deliveries.max(1)) {
            let mut passes = JoinSet::new();
            for id in chunk {
                let orchestrator = self.orchestrator.clone();
                let id = *id;
                passes.spawn(async move { (id, orchestrator.deliver(&id).await) });
            }
            while let Some(joined) = passes.join_next().await {
                match joined {
                    Ok((_, Ok(pass))) => report.record_pass(&pass),
                    Ok((id, Err(e))) => {
                        tracing::warn!(message_id = %id, error = %e, "delivery pass failed");
                        report.errors += 1;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "delivery task panicked");
                        report.errors += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Every `Delivering` message a pass would act on now.
    ///
    /// Walks the whole set a page at a time: messages waiting on
    /// confirmation can stay `Delivering` for hours and must not crowd out
    /// ones with work due.
    async fn collect_delivery_work(&self) -> Result<Vec<MessageId>> {
        let page_size = self.config.batch_limit.max(1);
        let now = self.clock.now();
        let mut work = Vec::new();
        let mut after = None;
        loop {
            let page = self.store.list_delivering(after, page_size).await?;
            for id in &page {
                let Some(message) = self.store.get_message(id).await? else {
                    continue;
                };
                if self.orchestrator.needs_pass(&message, now) {
                    work.push(*id);
                }
            }
            if page.len() < page_size {
                return Ok(work);
            }
            after = page.last().copied();
        }
    }

    /// Start the release of one due message, or apply its one-time extension.
    async fn release(&self, id: &MessageId, now: Timestamp) -> Result<Release> {
        let authority = &self.authority;
        let mutated = self
            .store
            .mutate_message(id, |mut m| {
                if !m.is_due(now) {
                    return Mutation::Abort(Release::NotDue);
                }
                let entity = m.entity_id();

                if let Some(plan) = m.dissolution_plan.as_mut().filter(|p| p.is_available()) {
                    let previous = m.next_deadline.unwrap_or(now);
                    let until = previous.saturating_add(i64::from(plan.extended_grace_days) * DAY_MS);
                    plan.executed_at = Some(now);
                    let contact = plan.backup_contact_address.clone();
                    let entry = AuditEntry::value_change(
                        entity,
                        AuditEvent::DeadlineExtended,
                        previous.to_string(),
                        until.to_string(),
                        now,
                        format!("dissolution plan: +{}d", plan.extended_grace_days),
                    );
                    m.next_deadline = Some(until);
                    m.updated_at = now;
                    return Mutation::Commit {
                        message: m,
                        audit: vec![entry],
                        output: Release::Extended { contact, until },
                    };
                }

                let transition = match m.apply(Transition::BeginDelivery, now, "deadline passed") {
                    Ok(entry) => entry,
                    Err(e) => return Mutation::Abort(Release::Rejected(e)),
                };
                let digest = m.sealed_payload.digest;
                m.release_capability = Some(authority.mint(m.id, digest, now));
                m.delivery_started_at = Some(now);
                let minted = AuditEntry::event(
                    entity,
                    AuditEvent::CapabilityMinted,
                    now,
                    format!("digest={}", digest.to_hex()),
                );
                Mutation::Commit {
                    message: m,
                    audit: vec![transition, minted],
                    output: Release::Started,
                }
            })
            .await?;

        match &mutated.output {
            Release::Started => {
                tracing::info!(message_id = %id, "deadline passed, release started")
            }
            Release::Extended { until, .. } => {
                tracing::info!(message_id = %id, until, "deadline extended by dissolution plan")
            }
            _ => {}
        }
        Ok(mutated.output)
    }

    /// Best effort: failures are audited, never retried.
    async fn notify_backup_contact(&self, id: &MessageId, contact: &str, until: Timestamp) {
        let notice = DeliveryContent::backup_contact_notice(*id, until);
        let outcome = self
            .orchestrator
            .channels()
            .send(Channel::Email, contact, &notice)
            .await;

        let (state, detail) = match &outcome {
            SendOutcome::Sent => ("sent", format!("extended until {}", until)),
            SendOutcome::Failed(reason) => {
                tracing::warn!(message_id = %id, reason = %reason, "backup contact notice failed");
                ("failed", reason.clone())
            }
        };
        let entry = AuditEntry::value_change(
            id.to_hex(),
            AuditEvent::BackupContactNotified,
            "pending",
            state,
            self.clock.now(),
            detail,
        );
        if let Err(e) = self.store.append_audit(&[entry]).await {
            tracing::warn!(message_id = %id, error = %e, "failed to audit backup contact notice");
        }
    }
}
