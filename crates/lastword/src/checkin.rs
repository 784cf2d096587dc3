//! Check-in tracker.
//!
//! A check-in moves the user's `last_check_in_at` forward and re-anchors the
//! deadline of every watched message. Each message is re-anchored through its
//! own compare-and-swap, so the scheduler's `Active -> Delivering` write is
//! the linearization point: a check-in that commits first cancels the pending
//! release, one that loses the race finds the message `Delivering` and is
//! reported too late.
//!
//! Re-anchoring is keyed on the message's own anchor, not on whether the
//! user record moved: if a check-in fails partway, retrying the same signal
//! finishes the messages it missed even though the user record is already
//! up to date.

use std::sync::Arc;

use lastword_core::{
    validate_check_in, AuditEntry, AuditEvent, CheckInSignal, Clock, Message, MessageId,
    MessageStatus, PolicyLimits, Timestamp, User, ValidationError,
};
use lastword_store::{CheckInWrite, Mutation, Store, StoreExt};

use crate::error::{EngineError, Result};

/// What a check-in did.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CheckInOutcome {
    /// `last_check_in_at` moved forward. `false` for stale signals.
    pub accepted: bool,
    /// Messages whose deadline was recomputed.
    pub rescheduled: Vec<MessageId>,
    /// Messages already being released whose deadline this check-in would
    /// have moved; it had no effect on them.
    pub too_late: Vec<MessageId>,
}

enum Effect {
    Rescheduled,
    TooLate,
    Untouched,
}

/// Records check-ins and re-anchors deadlines.
pub struct CheckInTracker<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    limits: PolicyLimits,
}

impl<S> Clone for CheckInTracker<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            limits: self.limits,
        }
    }
}

impl<S: Store> CheckInTracker<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, limits: PolicyLimits) -> Self {
        Self {
            store,
            clock,
            limits,
        }
    }

    /// Record a check-in.
    ///
    /// Signals stamped beyond the skew limit are rejected. A signal no later
    /// than the stored `last_check_in_at` is not accepted again, but still
    /// re-anchors any watched message whose anchor is behind it.
    pub async fn record(&self, signal: &CheckInSignal) -> Result<CheckInOutcome> {
        let now = self.clock.now();
        validate_check_in(signal, now, &self.limits)?;

        let user = self
            .store
            .get_user(&signal.user_id)
            .await?
            .ok_or_else(|| ValidationError::UnknownUser(signal.user_id.to_hex()))?;

        let mut outcome = CheckInOutcome::default();
        match self.store.record_user_check_in(&user.id, signal.at).await? {
            CheckInWrite::Stale { last } => {
                tracing::debug!(
                    user_id = %user.id,
                    at = signal.at,
                    last,
                    "check-in not newer than the last one"
                );
            }
            CheckInWrite::Advanced => {
                self.store
                    .append_audit(&[AuditEntry::event(
                        user.id.to_hex(),
                        AuditEvent::CheckInAccepted,
                        now,
                        format!("at={} kind={}", signal.at, signal.kind.as_str()),
                    )])
                    .await?;
                outcome.accepted = true;
            }
        }

        for message in self.store.list_messages_for_user(&user.id).await? {
            if !message.status.tracks_check_ins() && message.status != MessageStatus::Delivering {
                continue;
            }
            match self.reanchor(&message.id, &user, signal, now).await? {
                Effect::Rescheduled => outcome.rescheduled.push(message.id),
                Effect::TooLate => outcome.too_late.push(message.id),
                Effect::Untouched => {}
            }
        }

        if !outcome.accepted && outcome.rescheduled.is_empty() {
            return Ok(outcome);
        }
        tracing::info!(
            user_id = %user.id,
            at = signal.at,
            accepted = outcome.accepted,
            rescheduled = outcome.rescheduled.len(),
            too_late = outcome.too_late.len(),
            "check-in accepted"
        );
        Ok(outcome)
    }

    async fn reanchor(
        &self,
        id: &MessageId,
        user: &User,
        signal: &CheckInSignal,
        now: Timestamp,
    ) -> Result<Effect> {
        let at = signal.at;
        let mutated = self
            .store
            .mutate_message(id, |mut m: Message| {
                if m.deadline_anchor.map_or(false, |a| a >= at) {
                    return Mutation::Abort(Effect::Untouched);
                }
                if m.status == MessageStatus::Delivering {
                    return Mutation::Abort(Effect::TooLate);
                }
                if !m.status.tracks_check_ins() {
                    return Mutation::Abort(Effect::Untouched);
                }
                let policy = m.effective_policy(user);
                let entry = m.reanchor(at, &policy, now);
                Mutation::Commit {
                    message: m,
                    audit: vec![entry],
                    output: Effect::Rescheduled,
                }
            })
            .await
            .map_err(EngineError::from_message_lookup)?;

        if let Effect::TooLate = mutated.output {
            tracing::info!(message_id = %id, at, "check-in arrived after release began");
            self.store
                .append_audit(&[AuditEntry::event(
                    id.to_hex(),
                    AuditEvent::CheckInTooLate,
                    now,
                    format!("at={} kind={}", at, signal.kind.as_str()),
                )])
                .await?;
        }
        Ok(mutated.output)
    }
}
