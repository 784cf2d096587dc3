//! Database schema migrations for SQLite.
//!
//! A simple versioned migration system. Each migration transforms the schema
//! from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 2;

/// Initialize or migrate the database schema. Idempotent.
pub fn migrate(conn: &mut Connection, now: i64) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;
            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now],
            )?;
            tracing::info!(version, "applied schema migration");
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        2 => apply_v2(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE users (
            user_id BLOB PRIMARY KEY,             -- 16 bytes
            interval_days INTEGER NOT NULL,
            grace_days INTEGER NOT NULL,
            last_check_in_at INTEGER              -- Unix ms, only moves forward
        );

        CREATE TABLE messages (
            message_id BLOB PRIMARY KEY,          -- 16 bytes
            user_id BLOB NOT NULL,
            status INTEGER NOT NULL,              -- MessageStatus as u8
            sealed_payload BLOB NOT NULL,         -- vault envelope bytes
            payload_digest BLOB NOT NULL,         -- 32 bytes, blake3
            interval_override INTEGER,            -- NULL inherits the user's
            grace_override INTEGER,
            delivery_tier INTEGER NOT NULL,
            deadline_anchor INTEGER,
            next_deadline INTEGER,
            release_capability BLOB,              -- CBOR, set once at release
            delivery_started_at INTEGER,
            backup_registered_at INTEGER,
            backup_locator TEXT,
            lease_holder BLOB,
            lease_expires_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            version INTEGER NOT NULL
        );

        CREATE TABLE recipients (
            recipient_id BLOB PRIMARY KEY,
            message_id BLOB NOT NULL REFERENCES messages(message_id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            channel INTEGER NOT NULL,
            destination TEXT NOT NULL,
            requires_confirmation INTEGER NOT NULL DEFAULT 0,
            delivery_status INTEGER NOT NULL,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            last_attempt_at INTEGER,
            next_retry_at INTEGER,
            last_error TEXT
        );

        CREATE TABLE dissolution_plans (
            message_id BLOB PRIMARY KEY REFERENCES messages(message_id) ON DELETE CASCADE,
            backup_contact_address TEXT NOT NULL,
            extended_grace_days INTEGER NOT NULL,
            executed_at INTEGER
        );

        CREATE TABLE audit_log (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL,
            event TEXT NOT NULL,
            previous_state TEXT,
            new_state TEXT,
            timestamp INTEGER NOT NULL,
            detail TEXT NOT NULL
        );

        CREATE INDEX idx_messages_due ON messages(status, next_deadline);
        CREATE INDEX idx_messages_user ON messages(user_id);
        CREATE INDEX idx_recipients_message ON recipients(message_id, position);
        CREATE INDEX idx_audit_entity ON audit_log(entity_id, seq);
        "#,
    )?;

    Ok(())
}

/// Migration v2: durable backup retry state.
fn apply_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        ALTER TABLE messages ADD COLUMN backup_attempts INTEGER NOT NULL DEFAULT 0;
        ALTER TABLE messages ADD COLUMN backup_retry_at INTEGER;
        "#,
    )?;

    Ok(())
}
