//! Store trait: the abstract interface for engine persistence.
//!
//! Every write to a message goes through [`Store::compare_and_swap`], which
//! commits the new record and its audit entries together or not at all.

use async_trait::async_trait;
use lastword_core::{
    AuditEntry, Message, MessageId, SequencedAuditEntry, Timestamp, User, UserId,
};

use crate::error::{Result, StoreError};

/// Attempts [`StoreExt::mutate_message`] makes before giving up.
pub const DEFAULT_CAS_ATTEMPTS: u32 = 16;

/// Result of a compare-and-swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasResult {
    /// Written; the record now has `version`.
    Committed { version: u64 },
    /// Someone else wrote first. `current` is `None` if the record is gone.
    Stale { current: Option<u64> },
}

/// Result of recording a user check-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckInWrite {
    /// `last_check_in_at` moved forward.
    Advanced,
    /// A later check-in was already recorded; nothing changed.
    Stale { last: Timestamp },
}

/// The Store trait: async interface for engine persistence.
///
/// # Design Notes
///
/// - **Versioned messages**: a message's `version` starts at 1 on insert and
///   is bumped by every successful CAS. Writers never overwrite a version
///   they did not read.
/// - **Write-ahead audit**: audit entries passed to `insert_message` and
///   `compare_and_swap` are committed in the same unit as the record.
/// - **Append-only audit**: sequence numbers increase monotonically from 1.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Users
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or replace a user's cadence. Keeps the later of the stored and
    /// given `last_check_in_at`.
    async fn upsert_user(&self, user: &User) -> Result<()>;

    /// Get a user.
    async fn get_user(&self, id: &UserId) -> Result<Option<User>>;

    /// Move `last_check_in_at` forward to `at`. Never moves it back.
    ///
    /// Returns `NotFound` if the user does not exist.
    async fn record_user_check_in(&self, id: &UserId, at: Timestamp) -> Result<CheckInWrite>;

    // ─────────────────────────────────────────────────────────────────────────
    // Messages
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a new message with version 1.
    ///
    /// Returns `AlreadyExists` if the id is taken.
    async fn insert_message(&self, message: &Message, audit: &[AuditEntry]) -> Result<()>;

    /// Get a message with its recipients and dissolution plan.
    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>>;

    /// All messages owned by a user, oldest first.
    async fn list_messages_for_user(&self, user_id: &UserId) -> Result<Vec<Message>>;

    /// Active messages whose deadline is at or before `now`, earliest first.
    async fn list_due_for_release(&self, now: Timestamp, limit: usize) -> Result<Vec<MessageId>>;

    /// Up to `limit` messages in `Delivering` whose id sorts after `after`,
    /// in id order. Pass the last id of a page to get the next one.
    async fn list_delivering(
        &self,
        after: Option<MessageId>,
        limit: usize,
    ) -> Result<Vec<MessageId>>;

    /// Replace the stored message if its version is still `expected_version`.
    ///
    /// The stored version becomes `expected_version + 1` regardless of the
    /// `version` field of `message`.
    async fn compare_and_swap(
        &self,
        message: &Message,
        expected_version: u64,
        audit: &[AuditEntry],
    ) -> Result<CasResult>;

    // ─────────────────────────────────────────────────────────────────────────
    // Audit
    // ─────────────────────────────────────────────────────────────────────────

    /// Append entries that are not tied to a message write.
    async fn append_audit(&self, entries: &[AuditEntry]) -> Result<()>;

    /// All entries for one entity, in sequence order.
    async fn audit_for(&self, entity_id: &str) -> Result<Vec<SequencedAuditEntry>>;

    /// Up to `limit` entries with `seq > after_seq`, in sequence order.
    async fn audit_since(&self, after_seq: u64, limit: usize) -> Result<Vec<SequencedAuditEntry>>;
}

/// What a mutation closure decided to do with the message it was given.
#[derive(Debug)]
pub enum Mutation<T> {
    /// Write `message` with `audit`, then return `output`.
    Commit {
        message: Message,
        audit: Vec<AuditEntry>,
        output: T,
    },
    /// Leave the record alone.
    Abort(T),
}

/// Outcome of [`StoreExt::mutate_message`].
#[derive(Debug)]
pub struct Mutated<T> {
    /// The record as committed, or as read if aborted.
    pub message: Message,
    pub committed: bool,
    pub output: T,
}

/// Extension trait for common store patterns.
pub trait StoreExt: Store {
    /// Read-modify-CAS loop on one message.
    ///
    /// `f` is called with a fresh copy of the record on every attempt; on a
    /// stale version the record is re-read and `f` runs again.
    fn mutate_message<T, F>(
        &self,
        id: &MessageId,
        f: F,
    ) -> impl std::future::Future<Output = Result<Mutated<T>>> + Send
    where
        T: Send,
        F: FnMut(Message) -> Mutation<T> + Send;
}

impl<S: Store + ?Sized> StoreExt for S {
    async fn mutate_message<T, F>(&self, id: &MessageId, mut f: F) -> Result<Mutated<T>>
    where
        T: Send,
        F: FnMut(Message) -> Mutation<T> + Send,
    {
        for attempt in 1..=DEFAULT_CAS_ATTEMPTS {
            let current = self
                .get_message(id)
                .await?
                .ok_or_else(|| StoreError::NotFound(id.to_hex()))?;
            let expected = current.version;

            match f(current.clone()) {
                Mutation::Abort(output) => {
                    return Ok(Mutated {
                        message: current,
                        committed: false,
                        output,
                    });
                }
                Mutation::Commit {
                    mut message,
                    audit,
                    output,
                } => match self.compare_and_swap(&message, expected, &audit).await? {
                    CasResult::Committed { version } => {
                        message.version = version;
                        return Ok(Mutated {
                            message,
                            committed: true,
                            output,
                        });
                    }
                    CasResult::Stale { current: None } => {
                        return Err(StoreError::NotFound(id.to_hex()));
                    }
                    CasResult::Stale { current: Some(v) } => {
                        tracing::debug!(
                            message_id = %id,
                            expected,
                            current = v,
                            attempt,
                            "stale message version, retrying"
                        );
                    }
                },
            }
        }

        tracing::warn!(message_id = %id, "giving up on contended message");
        Err(StoreError::Contention {
            id: id.to_hex(),
            attempts: DEFAULT_CAS_ATTEMPTS,
        })
    }
}
