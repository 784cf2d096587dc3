//! SQLite implementation of the Store trait.
//!
//! The primary storage backend. Uses rusqlite with bundled SQLite, wrapped in
//! async via tokio::spawn_blocking. Every message write runs in one
//! transaction together with its audit entries.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use lastword_core::{
    AuditEntry, AuditEvent, Blake3Hash, Channel, CheckInPolicy, Clock, DeliveryLease,
    DeliveryStatus, DeliveryTier, DissolutionPlan, Message, MessageId, MessageStatus, Recipient,
    RecipientId, ReleaseCapability, SealedPayload, SequencedAuditEntry, SystemClock, Timestamp,
    User, UserId, WorkerId,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{CasResult, CheckInWrite, Store};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        migration::migrate(&mut conn, SystemClock.now())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("mutex poisoned: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("spawn_blocking failed: {}", e)))?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row conversion
// ─────────────────────────────────────────────────────────────────────────────

const MESSAGE_COLUMNS: &str = "message_id, user_id, status, sealed_payload, payload_digest,
    interval_override, grace_override, delivery_tier, deadline_anchor, next_deadline,
    release_capability, delivery_started_at, backup_registered_at, backup_locator,
    backup_attempts, backup_retry_at, lease_holder, lease_expires_at, created_at, updated_at,
    version";

const RECIPIENT_COLUMNS: &str = "recipient_id, message_id, channel, destination,
    requires_confirmation, delivery_status, attempt_count, last_attempt_at, next_retry_at,
    last_error";

struct MessageRow {
    message_id: Vec<u8>,
    user_id: Vec<u8>,
    status: u8,
    sealed_payload: Vec<u8>,
    payload_digest: Vec<u8>,
    interval_override: Option<u32>,
    grace_override: Option<u32>,
    delivery_tier: u8,
    deadline_anchor: Option<i64>,
    next_deadline: Option<i64>,
    release_capability: Option<Vec<u8>>,
    delivery_started_at: Option<i64>,
    backup_registered_at: Option<i64>,
    backup_locator: Option<String>,
    backup_attempts: u32,
    backup_retry_at: Option<i64>,
    lease_holder: Option<Vec<u8>>,
    lease_expires_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
    version: i64,
}

impl MessageRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            message_id: row.get("message_id")?,
            user_id: row.get("user_id")?,
            status: row.get("status")?,
            sealed_payload: row.get("sealed_payload")?,
            payload_digest: row.get("payload_digest")?,
            interval_override: row.get("interval_override")?,
            grace_override: row.get("grace_override")?,
            delivery_tier: row.get("delivery_tier")?,
            deadline_anchor: row.get("deadline_anchor")?,
            next_deadline: row.get("next_deadline")?,
            release_capability: row.get("release_capability")?,
            delivery_started_at: row.get("delivery_started_at")?,
            backup_registered_at: row.get("backup_registered_at")?,
            backup_locator: row.get("backup_locator")?,
            backup_attempts: row.get("backup_attempts")?,
            backup_retry_at: row.get("backup_retry_at")?,
            lease_holder: row.get("lease_holder")?,
            lease_expires_at: row.get("lease_expires_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            version: row.get("version")?,
        })
    }

    fn into_message(
        self,
        recipients: Vec<Recipient>,
        dissolution_plan: Option<DissolutionPlan>,
    ) -> Result<Message> {
        let lease = match (self.lease_holder, self.lease_expires_at) {
            (Some(holder), Some(expires_at)) => Some(DeliveryLease {
                holder: WorkerId::from_bytes(fixed(&holder, "lease_holder")?),
                expires_at,
            }),
            _ => None,
        };

        Ok(Message {
            id: MessageId::from_bytes(fixed(&self.message_id, "message_id")?),
            user_id: UserId::from_bytes(fixed(&self.user_id, "user_id")?),
            status: MessageStatus::from_u8(self.status)
                .ok_or_else(|| StoreError::InvalidData(format!("status {}", self.status)))?,
            sealed_payload: SealedPayload {
                bytes: Bytes::from(self.sealed_payload),
                digest: Blake3Hash::from_bytes(fixed(&self.payload_digest, "payload_digest")?),
            },
            check_in_interval_days: self.interval_override,
            grace_period_days: self.grace_override,
            delivery_tier: DeliveryTier::from_u8(self.delivery_tier).ok_or_else(|| {
                StoreError::InvalidData(format!("delivery tier {}", self.delivery_tier))
            })?,
            recipients,
            deadline_anchor: self.deadline_anchor,
            next_deadline: self.next_deadline,
            dissolution_plan,
            release_capability: self
                .release_capability
                .map(|b| ReleaseCapability::from_bytes(&b))
                .transpose()
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            delivery_started_at: self.delivery_started_at,
            backup_registered_at: self.backup_registered_at,
            backup_locator: self.backup_locator,
            backup_attempts: self.backup_attempts,
            backup_retry_at: self.backup_retry_at,
            lease,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version as u64,
        })
    }
}

struct RecipientRow {
    recipient_id: Vec<u8>,
    message_id: Vec<u8>,
    channel: u8,
    destination: String,
    requires_confirmation: bool,
    delivery_status: u8,
    attempt_count: u32,
    last_attempt_at: Option<i64>,
    next_retry_at: Option<i64>,
    last_error: Option<String>,
}

impl RecipientRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            recipient_id: row.get("recipient_id")?,
            message_id: row.get("message_id")?,
            channel: row.get("channel")?,
            destination: row.get("destination")?,
            requires_confirmation: row.get("requires_confirmation")?,
            delivery_status: row.get("delivery_status")?,
            attempt_count: row.get("attempt_count")?,
            last_attempt_at: row.get("last_attempt_at")?,
            next_retry_at: row.get("next_retry_at")?,
            last_error: row.get("last_error")?,
        })
    }

    fn into_recipient(self) -> Result<Recipient> {
        Ok(Recipient {
            id: RecipientId::from_bytes(fixed(&self.recipient_id, "recipient_id")?),
            message_id: MessageId::from_bytes(fixed(&self.message_id, "message_id")?),
            channel: Channel::from_u8(self.channel)
                .ok_or_else(|| StoreError::InvalidData(format!("channel {}", self.channel)))?,
            destination: self.destination,
            requires_confirmation: self.requires_confirmation,
            delivery_status: DeliveryStatus::from_u8(self.delivery_status).ok_or_else(|| {
                StoreError::InvalidData(format!("delivery status {}", self.delivery_status))
            })?,
            attempt_count: self.attempt_count,
            last_attempt_at: self.last_attempt_at,
            next_retry_at: self.next_retry_at,
            last_error: self.last_error,
        })
    }
}

fn fixed<const N: usize>(bytes: &[u8], column: &str) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| {
        StoreError::InvalidData(format!(
            "{}: expected {} bytes, got {}",
            column,
            N,
            bytes.len()
        ))
    })
}

type AuditRow = (i64, String, String, Option<String>, Option<String>, i64, String);

fn row_to_audit(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditRow> {
    Ok((
        row.get("seq")?,
        row.get("entity_id")?,
        row.get("event")?,
        row.get("previous_state")?,
        row.get("new_state")?,
        row.get("timestamp")?,
        row.get("detail")?,
    ))
}

fn collect_audit(rows: Vec<AuditRow>) -> Result<Vec<SequencedAuditEntry>> {
    rows.into_iter()
        .map(|(seq, entity_id, event, previous_state, new_state, timestamp, detail)| {
            let event = AuditEvent::parse(&event)
                .ok_or_else(|| StoreError::InvalidData(format!("audit event {}", event)))?;
            Ok(SequencedAuditEntry {
                seq: seq as u64,
                entry: AuditEntry {
                    entity_id,
                    event,
                    previous_state,
                    new_state,
                    timestamp,
                    detail,
                },
            })
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Blocking helpers
// ─────────────────────────────────────────────────────────────────────────────

fn load_message(conn: &Connection, id: &MessageId) -> Result<Option<Message>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM messages WHERE message_id = ?1", MESSAGE_COLUMNS),
            params![id.as_bytes().as_slice()],
            MessageRow::from_row,
        )
        .optional()?;
    let Some(row) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM recipients WHERE message_id = ?1 ORDER BY position",
        RECIPIENT_COLUMNS
    ))?;
    let recipients = stmt
        .query_map(params![id.as_bytes().as_slice()], RecipientRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .map(RecipientRow::into_recipient)
        .collect::<Result<Vec<_>>>()?;

    let plan = conn
        .query_row(
            "SELECT backup_contact_address, extended_grace_days, executed_at
             FROM dissolution_plans WHERE message_id = ?1",
            params![id.as_bytes().as_slice()],
            |row| {
                Ok(DissolutionPlan {
                    backup_contact_address: row.get(0)?,
                    extended_grace_days: row.get(1)?,
                    executed_at: row.get(2)?,
                })
            },
        )
        .optional()?;

    row.into_message(recipients, plan).map(Some)
}

fn load_messages(conn: &Connection, ids: Vec<Vec<u8>>) -> Result<Vec<Message>> {
    let mut messages = Vec::with_capacity(ids.len());
    for id in ids {
        let id = MessageId::from_bytes(fixed(&id, "message_id")?);
        if let Some(message) = load_message(conn, &id)? {
            messages.push(message);
        }
    }
    Ok(messages)
}

/// Write the message row and replace its children.
fn write_message(tx: &Transaction<'_>, message: &Message, version: u64) -> Result<()> {
    let id = message.id.as_bytes().as_slice();
    let capability = message
        .release_capability
        .as_ref()
        .map(|c| c.to_bytes())
        .transpose()
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    tx.execute("DELETE FROM recipients WHERE message_id = ?1", params![id])?;
    tx.execute("DELETE FROM dissolution_plans WHERE message_id = ?1", params![id])?;
    tx.execute(
        &format!(
            "INSERT OR REPLACE INTO messages ({}) VALUES
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19,
              ?20, ?21)",
            MESSAGE_COLUMNS
        ),
        params![
            id,
            message.user_id.as_bytes().as_slice(),
            message.status.to_u8(),
            message.sealed_payload.bytes.as_ref(),
            message.sealed_payload.digest.as_bytes().as_slice(),
            message.check_in_interval_days,
            message.grace_period_days,
            message.delivery_tier.to_u8(),
            message.deadline_anchor,
            message.next_deadline,
            capability,
            message.delivery_started_at,
            message.backup_registered_at,
            message.backup_locator,
            message.backup_attempts,
            message.backup_retry_at,
            message.lease.map(|l| l.holder.as_bytes().to_vec()),
            message.lease.map(|l| l.expires_at),
            message.created_at,
            message.updated_at,
            version as i64,
        ],
    )?;

    for (position, r) in message.recipients.iter().enumerate() {
        tx.execute(
            &format!(
                "INSERT INTO recipients ({}, position) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                RECIPIENT_COLUMNS
            ),
            params![
                r.id.as_bytes().as_slice(),
                id,
                r.channel.to_u8(),
                r.destination,
                r.requires_confirmation,
                r.delivery_status.to_u8(),
                r.attempt_count,
                r.last_attempt_at,
                r.next_retry_at,
                r.last_error,
                position as i64,
            ],
        )?;
    }

    if let Some(plan) = &message.dissolution_plan {
        tx.execute(
            "INSERT INTO dissolution_plans
                (message_id, backup_contact_address, extended_grace_days, executed_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                id,
                plan.backup_contact_address,
                plan.extended_grace_days,
                plan.executed_at
            ],
        )?;
    }

    Ok(())
}

fn insert_audit(conn: &Connection, entries: &[AuditEntry]) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO audit_log (entity_id, event, previous_state, new_state, timestamp, detail)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for e in entries {
        stmt.execute(params![
            e.entity_id,
            e.event.as_str(),
            e.previous_state,
            e.new_state,
            e.timestamp,
            e.detail
        ])?;
    }
    Ok(())
}

fn stored_version(conn: &Connection, id: &MessageId) -> Result<Option<u64>> {
    Ok(conn
        .query_row(
            "SELECT version FROM messages WHERE message_id = ?1",
            params![id.as_bytes().as_slice()],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .map(|v| v as u64))
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_user(&self, user: &User) -> Result<()> {
        let user = user.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO users (user_id, interval_days, grace_days, last_check_in_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id) DO UPDATE SET
                    interval_days = excluded.interval_days,
                    grace_days = excluded.grace_days,
                    last_check_in_at = CASE
                        WHEN users.last_check_in_at IS NULL THEN excluded.last_check_in_at
                        WHEN excluded.last_check_in_at IS NULL THEN users.last_check_in_at
                        ELSE MAX(users.last_check_in_at, excluded.last_check_in_at)
                    END",
                params![
                    user.id.as_bytes().as_slice(),
                    user.policy.interval_days(),
                    user.policy.grace_days(),
                    user.last_check_in_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>> {
        let id = *id;
        self.run(move |conn| {
            let row = conn
                .query_row(
                    "SELECT interval_days, grace_days, last_check_in_at FROM users WHERE user_id = ?1",
                    params![id.as_bytes().as_slice()],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, Option<i64>>(2)?,
                        ))
                    },
                )
                .optional()?;
            row.map(|(interval, grace, last)| {
                let policy = CheckInPolicy::new(interval, grace)
                    .map_err(|e| StoreError::InvalidData(e.to_string()))?;
                Ok(User {
                    id,
                    policy,
                    last_check_in_at: last,
                })
            })
            .transpose()
        })
        .await
    }

    async fn record_user_check_in(&self, id: &UserId, at: Timestamp) -> Result<CheckInWrite> {
        let id = *id;
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let last: Option<Option<i64>> = tx
                .query_row(
                    "SELECT last_check_in_at FROM users WHERE user_id = ?1",
                    params![id.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            let result = match last {
                None => return Err(StoreError::NotFound(id.to_hex())),
                Some(Some(last)) if last >= at => CheckInWrite::Stale { last },
                Some(_) => {
                    tx.execute(
                        "UPDATE users SET last_check_in_at = ?2 WHERE user_id = ?1",
                        params![id.as_bytes().as_slice(), at],
                    )?;
                    CheckInWrite::Advanced
                }
            };
            tx.commit()?;
            Ok(result)
        })
        .await
    }

    async fn insert_message(&self, message: &Message, audit: &[AuditEntry]) -> Result<()> {
        let message = message.clone();
        let audit = audit.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            if stored_version(&tx, &message.id)?.is_some() {
                return Err(StoreError::AlreadyExists(message.id.to_hex()));
            }
            write_message(&tx, &message, 1)?;
            insert_audit(&tx, &audit)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        let id = *id;
        self.run(move |conn| load_message(conn, &id)).await
    }

    async fn list_messages_for_user(&self, user_id: &UserId) -> Result<Vec<Message>> {
        let user_id = *user_id;
        self.run(move |conn| {
            let ids = conn
                .prepare(
                    "SELECT message_id FROM messages WHERE user_id = ?1
                     ORDER BY created_at, message_id",
                )?
                .query_map(params![user_id.as_bytes().as_slice()], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<Vec<u8>>>>()?;
            load_messages(conn, ids)
        })
        .await
    }

    async fn list_due_for_release(&self, now: Timestamp, limit: usize) -> Result<Vec<MessageId>> {
        self.run(move |conn| {
            let ids = conn
                .prepare(
                    "SELECT message_id FROM messages
                     WHERE status = ?1 AND next_deadline IS NOT NULL AND next_deadline <= ?2
                     ORDER BY next_deadline LIMIT ?3",
                )?
                .query_map(
                    params![MessageStatus::Active.to_u8(), now, limit as i64],
                    |row| row.get::<_, Vec<u8>>(0),
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            ids.iter()
                .map(|b| fixed(b, "message_id").map(MessageId::from_bytes))
                .collect()
        })
        .await
    }

    async fn list_delivering(
        &self,
        after: Option<MessageId>,
        limit: usize,
    ) -> Result<Vec<MessageId>> {
        self.run(move |conn| {
            let after = after.map(|a| a.as_bytes().to_vec());
            let ids = conn
                .prepare(
                    "SELECT message_id FROM messages
                     WHERE status = ?1 AND (?2 IS NULL OR message_id > ?2)
                     ORDER BY message_id LIMIT ?3",
                )?
                .query_map(
                    params![MessageStatus::Delivering.to_u8(), after, limit as i64],
                    |row| row.get::<_, Vec<u8>>(0),
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            ids.iter()
                .map(|b| fixed(b, "message_id").map(MessageId::from_bytes))
                .collect()
        })
        .await
    }

    async fn compare_and_swap(
        &self,
        message: &Message,
        expected_version: u64,
        audit: &[AuditEntry],
    ) -> Result<CasResult> {
        let message = message.clone();
        let audit = audit.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            match stored_version(&tx, &message.id)? {
                None => return Ok(CasResult::Stale { current: None }),
                Some(current) if current != expected_version => {
                    return Ok(CasResult::Stale {
                        current: Some(current),
                    })
                }
                Some(_) => {}
            }
            let version = expected_version + 1;
            write_message(&tx, &message, version)?;
            insert_audit(&tx, &audit)?;
            tx.commit()?;
            Ok(CasResult::Committed { version })
        })
        .await
    }

    async fn append_audit(&self, entries: &[AuditEntry]) -> Result<()> {
        let entries = entries.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            insert_audit(&tx, &entries)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn audit_for(&self, entity_id: &str) -> Result<Vec<SequencedAuditEntry>> {
        let entity_id = entity_id.to_string();
        self.run(move |conn| {
            let rows = conn
                .prepare(
                    "SELECT seq, entity_id, event, previous_state, new_state, timestamp, detail
                     FROM audit_log WHERE entity_id = ?1 ORDER BY seq",
                )?
                .query_map(params![entity_id], row_to_audit)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            collect_audit(rows)
        })
        .await
    }

    async fn audit_since(&self, after_seq: u64, limit: usize) -> Result<Vec<SequencedAuditEntry>> {
        self.run(move |conn| {
            let rows = conn
                .prepare(
                    "SELECT seq, entity_id, event, previous_state, new_state, timestamp, detail
                     FROM audit_log WHERE seq > ?1 ORDER BY seq LIMIT ?2",
                )?
                .query_map(params![after_seq as i64, limit as i64], row_to_audit)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            collect_audit(rows)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{draft_message, test_user};
    use crate::traits::{Mutation, StoreExt};
    use lastword_core::{ReleaseAuthority, Transition, DAY_MS};

    #[tokio::test]
    async fn test_message_roundtrip_with_children() {
        let store = SqliteStore::open_memory().unwrap();
        let user = test_user();
        store.upsert_user(&user).await.unwrap();

        let mut message = draft_message(&user);
        message.check_in_interval_days = Some(14);
        message.dissolution_plan = Some(DissolutionPlan {
            backup_contact_address: "backup@example.com".into(),
            extended_grace_days: 7,
            executed_at: None,
        });
        let authority = ReleaseAuthority::generate();
        message.release_capability =
            Some(authority.mint(message.id, message.sealed_payload.digest, 42));
        message.lease = Some(DeliveryLease {
            holder: WorkerId::generate(),
            expires_at: 99,
        });
        message.backup_attempts = 2;
        message.backup_retry_at = Some(DAY_MS);
        store.insert_message(&message, &[]).await.unwrap();

        let mut expected = message.clone();
        expected.version = 1;
        let stored = store.get_message(&message.id).await.unwrap().unwrap();
        assert_eq!(stored, expected);

        let listed = store.list_messages_for_user(&user.id).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_cas_is_atomic_with_audit() {
        let store = SqliteStore::open_memory().unwrap();
        let user = test_user();
        let message = draft_message(&user);
        store.insert_message(&message, &[]).await.unwrap();

        let mut update = message.clone();
        let entry = update.apply(Transition::Activate, 5, "owner").unwrap();
        assert_eq!(
            store.compare_and_swap(&update, 1, &[entry.clone()]).await.unwrap(),
            CasResult::Committed { version: 2 }
        );
        // Stale write must not leave its audit entry behind.
        assert_eq!(
            store.compare_and_swap(&update, 1, &[entry]).await.unwrap(),
            CasResult::Stale { current: Some(2) }
        );
        assert_eq!(store.audit_for(&message.entity_id()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_due_listing() {
        let store = SqliteStore::open_memory().unwrap();
        let user = test_user();
        let message = draft_message(&user);
        store.insert_message(&message, &[]).await.unwrap();

        store
            .mutate_message(&message.id, |mut m| {
                let policy = m.effective_policy(&user);
                let mut audit = vec![m.apply(Transition::Activate, 0, "").unwrap()];
                audit.push(m.reanchor(0, &policy, 0));
                Mutation::Commit {
                    message: m,
                    audit,
                    output: (),
                }
            })
            .await
            .unwrap();

        assert!(store.list_due_for_release(10 * DAY_MS - 1, 10).await.unwrap().is_empty());
        assert_eq!(
            store.list_due_for_release(10 * DAY_MS, 10).await.unwrap(),
            vec![message.id]
        );
        assert!(store.list_delivering(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delivering_pages_by_id() {
        let store = SqliteStore::open_memory().unwrap();
        let user = test_user();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let mut message = draft_message(&user);
            message.status = MessageStatus::Delivering;
            store.insert_message(&message, &[]).await.unwrap();
            ids.push(message.id);
        }
        store.insert_message(&draft_message(&user), &[]).await.unwrap();
        ids.sort();

        let first = store.list_delivering(None, 2).await.unwrap();
        assert_eq!(first, ids[..2].to_vec());
        let rest = store.list_delivering(first.last().copied(), 2).await.unwrap();
        assert_eq!(rest, ids[2..].to_vec());
        assert!(store.list_delivering(rest.last().copied(), 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_user_check_in_monotonic() {
        let store = SqliteStore::open_memory().unwrap();
        let user = test_user();
        store.upsert_user(&user).await.unwrap();

        assert_eq!(
            store.record_user_check_in(&user.id, 10).await.unwrap(),
            CheckInWrite::Advanced
        );
        assert_eq!(
            store.record_user_check_in(&user.id, 5).await.unwrap(),
            CheckInWrite::Stale { last: 10 }
        );
        // Upserting the cadence does not rewind the check-in.
        let mut older = user.clone();
        older.last_check_in_at = Some(1);
        store.upsert_user(&older).await.unwrap();
        let stored = store.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(stored.last_check_in_at, Some(10));

        assert!(matches!(
            store.record_user_check_in(&UserId::generate(), 1).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lastword.db");
        let user = test_user();
        let message = draft_message(&user);

        {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert_user(&user).await.unwrap();
            store
                .insert_message(
                    &message,
                    &[AuditEntry::event(message.entity_id(), AuditEvent::MessageCreated, 0, "")],
                )
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert!(store.get_message(&message.id).await.unwrap().is_some());
        let log = store.audit_since(0, 10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].seq, 1);
    }
}
