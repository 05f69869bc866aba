//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL
//! string that transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
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
        -- Applied receipt headers, keyed by content identifier
        CREATE TABLE receipts (
            cid TEXT PRIMARY KEY,
            author_member_id TEXT NOT NULL,
            author_device_id TEXT NOT NULL,
            parent_cid TEXT,
            root_cid TEXT,
            receipt_type TEXT NOT NULL,
            payload_cbor BLOB NOT NULL,       -- canonical preimage bytes
            signature BLOB NOT NULL,          -- 64 bytes, Ed25519
            received_at_ms INTEGER NOT NULL
        );

        -- Jar projection
        CREATE TABLE jars (
            jar_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            owner_member_id TEXT NOT NULL,
            created_at_ms INTEGER NOT NULL,
            last_applied_sequence INTEGER NOT NULL DEFAULT 0,
            parent_cid TEXT
        );

        -- Membership projection
        CREATE TABLE jar_members (
            jar_id TEXT NOT NULL,
            member_id TEXT NOT NULL,
            role TEXT NOT NULL,               -- 'owner' | 'member'
            status TEXT NOT NULL,             -- 'pending' | 'active' | 'removed'
            display_name TEXT,
            joined_at INTEGER,
            invited_at INTEGER,
            removed_at INTEGER,
            PRIMARY KEY (jar_id, member_id)
        );

        -- Content item links (bud logical id -> jar)
        CREATE TABLE content_items (
            bud_uuid TEXT PRIMARY KEY,
            jar_id TEXT,                      -- NULL once unlinked
            author_member_id TEXT NOT NULL,
            caption TEXT,
            linked_at_ms INTEGER NOT NULL
        );

        -- Jar tombstones: absorbing deletion markers
        CREATE TABLE jar_tombstones (
            jar_id TEXT PRIMARY KEY,
            deleted_by TEXT NOT NULL,
            deleted_at_ms INTEGER NOT NULL
        );

        -- Processed-sequence index: replay protection and prefix bookkeeping
        CREATE TABLE processed_jar_receipts (
            cid TEXT PRIMARY KEY,
            jar_id TEXT NOT NULL,
            sequence_number INTEGER NOT NULL,
            processed_at_ms INTEGER NOT NULL,
            UNIQUE (jar_id, sequence_number)
        );

        -- Verified receipts waiting for their sequence predecessors
        CREATE TABLE jar_receipt_queue (
            queue_id INTEGER PRIMARY KEY AUTOINCREMENT,
            jar_id TEXT NOT NULL,
            sequence_number INTEGER NOT NULL,
            cid TEXT NOT NULL,
            parent_cid TEXT,
            payload_cbor BLOB NOT NULL,
            signature BLOB NOT NULL,
            sender_member_id TEXT NOT NULL,
            queued_at_ms INTEGER NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_retry_at_ms INTEGER,
            poison_reason TEXT,
            UNIQUE (jar_id, sequence_number)
        );

        -- Per-jar sync state machine row
        CREATE TABLE jar_sync_state (
            jar_id TEXT PRIMARY KEY,
            is_halted INTEGER NOT NULL DEFAULT 0,
            halt_reason TEXT,
            halted_at_ms INTEGER,
            backfill_attempt INTEGER NOT NULL DEFAULT 0,
            next_backfill_at_ms INTEGER,
            backfill_from INTEGER,
            backfill_to INTEGER
        );

        -- TOFU device registry: write-once key pins
        CREATE TABLE devices (
            member_id TEXT NOT NULL,
            device_id TEXT NOT NULL,
            pubkey_sign BLOB NOT NULL,        -- 32 bytes
            pubkey_agree BLOB NOT NULL,       -- 32 bytes
            status TEXT NOT NULL,             -- 'active' | 'revoked'
            registered_at_ms INTEGER NOT NULL,
            PRIMARY KEY (member_id, device_id)
        );

        -- Indexes for common queries
        CREATE INDEX idx_processed_jar_seq ON processed_jar_receipts(jar_id, sequence_number);
        CREATE INDEX idx_queue_jar_seq ON jar_receipt_queue(jar_id, sequence_number);
        CREATE INDEX idx_content_items_jar ON content_items(jar_id);
        CREATE INDEX idx_members_jar ON jar_members(jar_id);
        CREATE INDEX idx_receipts_type ON receipts(receipt_type);
        "#,
    )?;

    Ok(())
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
