//! In-memory implementation of the Store trait.
//!
//! Same semantics as SQLite, no persistence. Used by tests and by hosts that
//! keep state elsewhere.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use lastword_core::{
    AuditEntry, Message, MessageId, MessageStatus, SequencedAuditEntry, Timestamp, User, UserId,
};

use crate::error::{Result, StoreError};
use crate::traits::{CasResult, CheckInWrite, Store};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock; every
/// method holds the lock for its whole body, which makes CAS atomic.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    users: HashMap<UserId, User>,
    messages: HashMap<MessageId, Message>,
    /// Append-only; `seq` is index + 1.
    audit: Vec<AuditEntry>,
}

impl MemoryStoreInner {
    fn push_audit(&mut self, entries: &[AuditEntry]) {
        self.audit.extend_from_slice(entries);
    }

    fn sequenced(&self, index: usize) -> SequencedAuditEntry {
        SequencedAuditEntry {
            seq: index as u64 + 1,
            entry: self.audit[index].clone(),
        }
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_user(&self, user: &User) -> Result<()> {
        let mut inner = self.write()?;
        let mut user = user.clone();
        if let Some(existing) = inner.users.get(&user.id) {
            user.last_check_in_at = existing.last_check_in_at.max(user.last_check_in_at);
        }
        inner.users.insert(user.id, user);
        Ok(())
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>> {
        Ok(self.read()?.users.get(id).cloned())
    }

    async fn record_user_check_in(&self, id: &UserId, at: Timestamp) -> Result<CheckInWrite> {
        let mut inner = self.write()?;
        let user = inner
            .users
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_hex()))?;

        match user.last_check_in_at {
            Some(last) if last >= at => Ok(CheckInWrite::Stale { last }),
            _ => {
                user.last_check_in_at = Some(at);
                Ok(CheckInWrite::Advanced)
            }
        }
    }

    async fn insert_message(&self, message: &Message, audit: &[AuditEntry]) -> Result<()> {
        let mut inner = self.write()?;
        if inner.messages.contains_key(&message.id) {
            return Err(StoreError::AlreadyExists(message.id.to_hex()));
        }
        let mut message = message.clone();
        message.version = 1;
        inner.messages.insert(message.id, message);
        inner.push_audit(audit);
        Ok(())
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        Ok(self.read()?.messages.get(id).cloned())
    }

    async fn list_messages_for_user(&self, user_id: &UserId) -> Result<Vec<Message>> {
        let inner = self.read()?;
        let mut messages: Vec<Message> = inner
            .messages
            .values()
            .filter(|m| m.user_id == *user_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| (m.created_at, m.id));
        Ok(messages)
    }

    async fn list_due_for_release(&self, now: Timestamp, limit: usize) -> Result<Vec<MessageId>> {
        let inner = self.read()?;
        let mut due: Vec<(Timestamp, MessageId)> = inner
            .messages
            .values()
            .filter(|m| m.is_due(now))
            .filter_map(|m| m.next_deadline.map(|d| (d, m.id)))
            .collect();
        due.sort();
        Ok(due.into_iter().take(limit).map(|(_, id)| id).collect())
    }

    async fn list_delivering(
        &self,
        after: Option<MessageId>,
        limit: usize,
    ) -> Result<Vec<MessageId>> {
        let inner = self.read()?;
        let mut delivering: Vec<MessageId> = inner
            .messages
            .values()
            .filter(|m| m.status == MessageStatus::Delivering)
            .filter(|m| after.map_or(true, |a| m.id > a))
            .map(|m| m.id)
            .collect();
        delivering.sort();
        delivering.truncate(limit);
        Ok(delivering)
    }

    async fn compare_and_swap(
        &self,
        message: &Message,
        expected_version: u64,
        audit: &[AuditEntry],
    ) -> Result<CasResult> {
        let mut inner = self.write()?;
        let current = match inner.messages.get(&message.id) {
            Some(m) => m.version,
            None => return Ok(CasResult::Stale { current: None }),
        };
        if current != expected_version {
            return Ok(CasResult::Stale {
                current: Some(current),
            });
        }

        let version = expected_version + 1;
        let mut message = message.clone();
        message.version = version;
        inner.messages.insert(message.id, message);
        inner.push_audit(audit);
        Ok(CasResult::Committed { version })
    }

    async fn append_audit(&self, entries: &[AuditEntry]) -> Result<()> {
        self.write()?.push_audit(entries);
        Ok(())
    }

    async fn audit_for(&self, entity_id: &str) -> Result<Vec<SequencedAuditEntry>> {
        let inner = self.read()?;
        Ok((0..inner.audit.len())
            .filter(|&i| inner.audit[i].entity_id == entity_id)
            .map(|i| inner.sequenced(i))
            .collect())
    }

    async fn audit_since(&self, after_seq: u64, limit: usize) -> Result<Vec<SequencedAuditEntry>> {
        let inner = self.read()?;
        let start = (after_seq as usize).min(inner.audit.len());
        let end = start.saturating_add(limit).min(inner.audit.len());
        Ok((start..end).map(|i| inner.sequenced(i)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{draft_message, test_user};
    use crate::traits::{Mutation, StoreExt};
    use lastword_core::{AuditEvent, Transition};

    #[tokio::test]
    async fn test_insert_sets_version_one() {
        let store = MemoryStore::new();
        let user = test_user();
        let message = draft_message(&user);
        store.insert_message(&message, &[]).await.unwrap();

        let stored = store.get_message(&message.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert!(matches!(
            store.insert_message(&message, &[]).await,
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_cas_rejects_stale_version() {
        let store = MemoryStore::new();
        let user = test_user();
        let message = draft_message(&user);
        store.insert_message(&message, &[]).await.unwrap();

        let mut update = message.clone();
        update.status = MessageStatus::Active;
        assert_eq!(
            store.compare_and_swap(&update, 1, &[]).await.unwrap(),
            CasResult::Committed { version: 2 }
        );
        assert_eq!(
            store.compare_and_swap(&update, 1, &[]).await.unwrap(),
            CasResult::Stale { current: Some(2) }
        );
    }

    #[tokio::test]
    async fn test_delivering_pages_by_id() {
        let store = MemoryStore::new();
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
    async fn test_check_in_never_moves_back() {
        let store = MemoryStore::new();
        let user = test_user();
        store.upsert_user(&user).await.unwrap();

        assert_eq!(
            store.record_user_check_in(&user.id, 500).await.unwrap(),
            CheckInWrite::Advanced
        );
        assert_eq!(
            store.record_user_check_in(&user.id, 100).await.unwrap(),
            CheckInWrite::Stale { last: 500 }
        );
        let stored = store.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(stored.last_check_in_at, Some(500));
    }

    #[tokio::test]
    async fn test_mutate_message_commits_audit_with_record() {
        let store = MemoryStore::new();
        let user = test_user();
        let message = draft_message(&user);
        store.insert_message(&message, &[]).await.unwrap();

        let mutated = store
            .mutate_message(&message.id, |mut m| {
                let entry = m.apply(Transition::Activate, 10, "test").unwrap();
                Mutation::Commit {
                    message: m,
                    audit: vec![entry],
                    output: (),
                }
            })
            .await
            .unwrap();
        assert!(mutated.committed);
        assert_eq!(mutated.message.version, 2);

        let log = store.audit_for(&message.entity_id()).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].entry.event, AuditEvent::StatusChanged);
    }

    #[tokio::test]
    async fn test_audit_since_pages() {
        let store = MemoryStore::new();
        let entries: Vec<AuditEntry> = (0..5)
            .map(|i| AuditEntry::event("e", AuditEvent::CheckInAccepted, i, ""))
            .collect();
        store.append_audit(&entries).await.unwrap();

        let page = store.audit_since(0, 2).await.unwrap();
        assert_eq!(page.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 2]);
        let page = store.audit_since(2, 10).await.unwrap();
        assert_eq!(page.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![3, 4, 5]);
        assert!(store.audit_since(5, 10).await.unwrap().is_empty());
    }
}
