//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend. It uses rusqlite with bundled
//! SQLite, wrapped in async via `tokio::task::spawn_blocking`. All writes
//! for one jar go through `apply_receipt`, which runs in a single
//! transaction so a crash leaves either "not applied" or "fully applied".

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use budsync_core::{
    AgreementPublicKey, Cid, DeviceId, Ed25519PublicKey, Ed25519Signature, JarId, MemberId,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{
    AppliedEnvelope, ContentItemRecord, DeviceRecord, DeviceStatus, JarMemberRecord,
    JarMemberRole, JarMemberStatus, JarRecord, JarSyncStateRecord, JarTombstoneRecord,
    PinOutcome, ProjectionMutation, QueuedReceiptRecord, ReceiptRecord, Store,
};

/// SQLite-based store implementation.
///
/// Thread-safe via an internal mutex; blocking work runs off the async
/// runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path, running migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database. Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking closure against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| StoreError::Task(format!("mutex poisoned: {}", e)))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(format!("spawn_blocking failed: {}", e)))?
    }
}

// ── Column conversion helpers ────────────────────────────────────────────────

fn conv_err(e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
}

fn col_jar_id(s: String) -> rusqlite::Result<JarId> {
    JarId::parse(&s).map_err(conv_err)
}

fn col_device_id(s: String) -> rusqlite::Result<DeviceId> {
    DeviceId::parse(&s).map_err(conv_err)
}

fn col_cid(s: String) -> rusqlite::Result<Cid> {
    Cid::parse(&s).map_err(conv_err)
}

fn col_opt_cid(s: Option<String>) -> rusqlite::Result<Option<Cid>> {
    s.map(|s| col_cid(s)).transpose()
}

fn col_signature(b: Vec<u8>) -> rusqlite::Result<Ed25519Signature> {
    let arr: [u8; 64] = b.try_into().map_err(|_| {
        rusqlite::Error::InvalidColumnType(0, "signature".into(), rusqlite::types::Type::Blob)
    })?;
    Ok(Ed25519Signature::from_bytes(arr))
}

fn col_key32(b: Vec<u8>, name: &str) -> rusqlite::Result<[u8; 32]> {
    b.try_into().map_err(|_| {
        rusqlite::Error::InvalidColumnType(0, name.into(), rusqlite::types::Type::Blob)
    })
}

fn col_role(s: String) -> rusqlite::Result<JarMemberRole> {
    JarMemberRole::parse(&s).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(0, "role".into(), rusqlite::types::Type::Text)
    })
}

fn col_member_status(s: String) -> rusqlite::Result<JarMemberStatus> {
    JarMemberStatus::parse(&s).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(0, "status".into(), rusqlite::types::Type::Text)
    })
}

fn col_device_status(s: String) -> rusqlite::Result<DeviceStatus> {
    DeviceStatus::parse(&s).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(0, "status".into(), rusqlite::types::Type::Text)
    })
}

fn row_to_jar(row: &rusqlite::Row<'_>) -> rusqlite::Result<JarRecord> {
    Ok(JarRecord {
        jar_id: col_jar_id(row.get("jar_id")?)?,
        name: row.get("name")?,
        description: row.get("description")?,
        owner_member_id: MemberId::new(row.get::<_, String>("owner_member_id")?),
        created_at_ms: row.get("created_at_ms")?,
        last_applied_sequence: row.get::<_, i64>("last_applied_sequence")? as u64,
        parent_cid: col_opt_cid(row.get("parent_cid")?)?,
    })
}

fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<JarMemberRecord> {
    Ok(JarMemberRecord {
        jar_id: col_jar_id(row.get("jar_id")?)?,
        member_id: MemberId::new(row.get::<_, String>("member_id")?),
        role: col_role(row.get("role")?)?,
        status: col_member_status(row.get("status")?)?,
        display_name: row.get("display_name")?,
        joined_at_ms: row.get("joined_at")?,
        invited_at_ms: row.get("invited_at")?,
        removed_at_ms: row.get("removed_at")?,
    })
}

fn row_to_content_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContentItemRecord> {
    let jar_id: Option<String> = row.get("jar_id")?;
    Ok(ContentItemRecord {
        bud_uuid: row.get("bud_uuid")?,
        jar_id: jar_id.map(|s| col_jar_id(s)).transpose()?,
        author_member_id: MemberId::new(row.get::<_, String>("author_member_id")?),
        caption: row.get("caption")?,
        linked_at_ms: row.get("linked_at_ms")?,
    })
}

fn row_to_device(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeviceRecord> {
    Ok(DeviceRecord {
        member_id: MemberId::new(row.get::<_, String>("member_id")?),
        device_id: col_device_id(row.get("device_id")?)?,
        pk_sign: Ed25519PublicKey::from_bytes(col_key32(row.get("pubkey_sign")?, "pubkey_sign")?),
        pk_agree: AgreementPublicKey::from_bytes(col_key32(
            row.get("pubkey_agree")?,
            "pubkey_agree",
        )?),
        status: col_device_status(row.get("status")?)?,
        registered_at_ms: row.get("registered_at_ms")?,
    })
}

fn row_to_receipt(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReceiptRecord> {
    Ok(ReceiptRecord {
        cid: col_cid(row.get("cid")?)?,
        author_member_id: MemberId::new(row.get::<_, String>("author_member_id")?),
        author_device_id: col_device_id(row.get("author_device_id")?)?,
        parent_cid: col_opt_cid(row.get("parent_cid")?)?,
        root_cid: col_opt_cid(row.get("root_cid")?)?,
        receipt_type: row.get("receipt_type")?,
        preimage_cbor: row.get("payload_cbor")?,
        signature: col_signature(row.get("signature")?)?,
        received_at_ms: row.get("received_at_ms")?,
    })
}

fn row_to_queued(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueuedReceiptRecord> {
    Ok(QueuedReceiptRecord {
        queue_id: row.get("queue_id")?,
        jar_id: col_jar_id(row.get("jar_id")?)?,
        sequence_number: row.get::<_, i64>("sequence_number")? as u64,
        cid: col_cid(row.get("cid")?)?,
        parent_cid: col_opt_cid(row.get("parent_cid")?)?,
        preimage_cbor: row.get("payload_cbor")?,
        signature: col_signature(row.get("signature")?)?,
        sender_member_id: MemberId::new(row.get::<_, String>("sender_member_id")?),
        queued_at_ms: row.get("queued_at_ms")?,
        retry_count: row.get::<_, i64>("retry_count")? as u32,
        last_retry_at_ms: row.get("last_retry_at_ms")?,
        poison_reason: row.get("poison_reason")?,
    })
}

fn row_to_sync_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<JarSyncStateRecord> {
    Ok(JarSyncStateRecord {
        jar_id: col_jar_id(row.get("jar_id")?)?,
        is_halted: row.get::<_, i64>("is_halted")? != 0,
        halt_reason: row.get("halt_reason")?,
        halted_at_ms: row.get("halted_at_ms")?,
        backfill_attempt: row.get::<_, i64>("backfill_attempt")? as u32,
        next_backfill_at_ms: row.get("next_backfill_at_ms")?,
        backfill_from: row.get::<_, Option<i64>>("backfill_from")?.map(|v| v as u64),
        backfill_to: row.get::<_, Option<i64>>("backfill_to")?.map(|v| v as u64),
    })
}

// ── Transactional apply ──────────────────────────────────────────────────────

fn is_tombstoned_tx(tx: &Transaction<'_>, jar_id: &JarId) -> Result<bool> {
    let exists: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM jar_tombstones WHERE jar_id = ?1)",
        params![jar_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn apply_mutation_tx(tx: &Transaction<'_>, mutation: &ProjectionMutation) -> Result<()> {
    match mutation {
        ProjectionMutation::InsertJar {
            jar_id,
            name,
            description,
            owner_member_id,
            created_at_ms,
        } => {
            tx.execute(
                "INSERT OR IGNORE INTO jars (
                    jar_id, name, description, owner_member_id, created_at_ms,
                    last_applied_sequence, parent_cid
                ) VALUES (?1, ?2, ?3, ?4, ?5, 0, NULL)",
                params![
                    jar_id.to_string(),
                    name,
                    description,
                    owner_member_id.to_string(),
                    created_at_ms,
                ],
            )?;
        }
        ProjectionMutation::RenameJar { jar_id, name } => {
            tx.execute(
                "UPDATE jars SET name = ?2 WHERE jar_id = ?1",
                params![jar_id.to_string(), name],
            )?;
        }
        ProjectionMutation::UpsertMember { member } => {
            tx.execute(
                "INSERT INTO jar_members (
                    jar_id, member_id, role, status, display_name,
                    joined_at, invited_at, removed_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(jar_id, member_id) DO UPDATE SET
                    role = excluded.role,
                    status = excluded.status,
                    display_name = COALESCE(excluded.display_name, jar_members.display_name),
                    joined_at = COALESCE(excluded.joined_at, jar_members.joined_at),
                    invited_at = COALESCE(excluded.invited_at, jar_members.invited_at),
                    removed_at = excluded.removed_at",
                params![
                    member.jar_id.to_string(),
                    member.member_id.to_string(),
                    member.role.as_str(),
                    member.status.as_str(),
                    member.display_name,
                    member.joined_at_ms,
                    member.invited_at_ms,
                    member.removed_at_ms,
                ],
            )?;
        }
        ProjectionMutation::SetMemberStatus {
            jar_id,
            member_id,
            status,
            joined_at_ms,
            removed_at_ms,
        } => {
            let changed = tx.execute(
                "UPDATE jar_members SET
                    status = ?3,
                    joined_at = COALESCE(?4, joined_at),
                    removed_at = COALESCE(?5, removed_at)
                 WHERE jar_id = ?1 AND member_id = ?2",
                params![
                    jar_id.to_string(),
                    member_id.to_string(),
                    status.as_str(),
                    joined_at_ms,
                    removed_at_ms,
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!(
                    "jar member ({}, {})",
                    jar_id, member_id
                )));
            }
        }
        ProjectionMutation::PinDevice {
            member_id,
            device_id,
            pk_sign,
            pk_agree,
            registered_at_ms,
        } => {
            let existing: Option<(Vec<u8>, Vec<u8>)> = tx
                .query_row(
                    "SELECT pubkey_sign, pubkey_agree FROM devices
                     WHERE member_id = ?1 AND device_id = ?2",
                    params![member_id.to_string(), device_id.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match existing {
                None => {
                    tx.execute(
                        "INSERT INTO devices (
                            member_id, device_id, pubkey_sign, pubkey_agree,
                            status, registered_at_ms
                        ) VALUES (?1, ?2, ?3, ?4, 'active', ?5)",
                        params![
                            member_id.to_string(),
                            device_id.to_string(),
                            pk_sign.as_bytes().as_slice(),
                            pk_agree.as_bytes().as_slice(),
                            registered_at_ms,
                        ],
                    )?;
                }
                Some((sign, agree))
                    if sign == pk_sign.as_bytes() && agree == pk_agree.as_bytes() => {}
                Some(_) => {
                    return Err(StoreError::TofuMismatch {
                        member_id: member_id.clone(),
                        device_id: *device_id,
                    });
                }
            }
        }
        ProjectionMutation::LinkBud {
            bud_uuid,
            jar_id,
            author_member_id,
            caption,
            linked_at_ms,
        } => {
            tx.execute(
                "INSERT INTO content_items (
                    bud_uuid, jar_id, author_member_id, caption, linked_at_ms
                ) VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(bud_uuid) DO UPDATE SET
                    jar_id = excluded.jar_id,
                    caption = COALESCE(excluded.caption, content_items.caption),
                    linked_at_ms = excluded.linked_at_ms",
                params![
                    bud_uuid,
                    jar_id.to_string(),
                    author_member_id.to_string(),
                    caption,
                    linked_at_ms,
                ],
            )?;
        }
        ProjectionMutation::UnlinkBud { bud_uuid } => {
            tx.execute(
                "UPDATE content_items SET jar_id = NULL WHERE bud_uuid = ?1",
                params![bud_uuid],
            )?;
        }
        ProjectionMutation::UnlinkAllBuds { jar_id } => {
            tx.execute(
                "UPDATE content_items SET jar_id = NULL WHERE jar_id = ?1",
                params![jar_id.to_string()],
            )?;
        }
        ProjectionMutation::TombstoneJar {
            jar_id,
            deleted_by,
            deleted_at_ms,
        } => {
            tx.execute(
                "INSERT OR IGNORE INTO jar_tombstones (jar_id, deleted_by, deleted_at_ms)
                 VALUES (?1, ?2, ?3)",
                params![jar_id.to_string(), deleted_by.to_string(), deleted_at_ms],
            )?;
        }
        ProjectionMutation::DeleteJarRows { jar_id } => {
            tx.execute(
                "DELETE FROM jars WHERE jar_id = ?1",
                params![jar_id.to_string()],
            )?;
            tx.execute(
                "DELETE FROM jar_members WHERE jar_id = ?1",
                params![jar_id.to_string()],
            )?;
        }
    }
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn apply_receipt(
        &self,
        envelope: &AppliedEnvelope,
        receipt: ReceiptRecord,
        mutations: Vec<ProjectionMutation>,
    ) -> Result<()> {
        let envelope = envelope.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;

            // Tombstoned jars only ever see tombstone-idempotent no-ops.
            if is_tombstoned_tx(&tx, &envelope.jar_id)? {
                return Err(StoreError::Tombstoned(envelope.jar_id));
            }

            // Conflict key (jar_id, sequence_number): same CID means this
            // apply already committed; a different CID is corruption.
            let existing: Option<String> = tx
                .query_row(
                    "SELECT cid FROM processed_jar_receipts
                     WHERE jar_id = ?1 AND sequence_number = ?2",
                    params![envelope.jar_id.to_string(), envelope.sequence_number as i64],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(existing) = existing {
                let existing = col_cid(existing)?;
                if existing != envelope.cid {
                    return Err(StoreError::ProcessedCidMismatch {
                        jar_id: envelope.jar_id,
                        sequence_number: envelope.sequence_number,
                        existing,
                        incoming: envelope.cid,
                    });
                }
                return Ok(());
            }

            tx.execute(
                "INSERT OR IGNORE INTO receipts (
                    cid, author_member_id, author_device_id, parent_cid, root_cid,
                    receipt_type, payload_cbor, signature, received_at_ms
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    receipt.cid.to_string(),
                    receipt.author_member_id.to_string(),
                    receipt.author_device_id.to_string(),
                    receipt.parent_cid.map(|c| c.to_string()),
                    receipt.root_cid.map(|c| c.to_string()),
                    receipt.receipt_type,
                    receipt.preimage_cbor,
                    receipt.signature.as_bytes().as_slice(),
                    receipt.received_at_ms,
                ],
            )?;

            for mutation in &mutations {
                apply_mutation_tx(&tx, mutation)?;
            }

            tx.execute(
                "INSERT INTO processed_jar_receipts (cid, jar_id, sequence_number, processed_at_ms)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    envelope.cid.to_string(),
                    envelope.jar_id.to_string(),
                    envelope.sequence_number as i64,
                    envelope.processed_at_ms,
                ],
            )?;

            // No-op when the jar row was just deleted (jar.deleted); the
            // tombstone takes over from here.
            tx.execute(
                "UPDATE jars SET last_applied_sequence = ?2, parent_cid = ?3
                 WHERE jar_id = ?1",
                params![
                    envelope.jar_id.to_string(),
                    envelope.sequence_number as i64,
                    envelope.cid.to_string(),
                ],
            )?;

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn is_processed_cid(&self, cid: &Cid) -> Result<bool> {
        let cid = cid.to_string();
        self.run(move |conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM processed_jar_receipts WHERE cid = ?1)",
                params![cid],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
        .await
    }

    async fn processed_cid_at(
        &self,
        jar_id: &JarId,
        sequence_number: u64,
    ) -> Result<Option<Cid>> {
        let jar_id = jar_id.to_string();
        self.run(move |conn| {
            let cid: Option<String> = conn
                .query_row(
                    "SELECT cid FROM processed_jar_receipts
                     WHERE jar_id = ?1 AND sequence_number = ?2",
                    params![jar_id, sequence_number as i64],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(cid.map(|s| col_cid(s)).transpose()?)
        })
        .await
    }

    async fn get_receipt(&self, cid: &Cid) -> Result<Option<ReceiptRecord>> {
        let cid = cid.to_string();
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT cid, author_member_id, author_device_id, parent_cid, root_cid,
                            receipt_type, payload_cbor, signature, received_at_ms
                     FROM receipts WHERE cid = ?1",
                    params![cid],
                    row_to_receipt,
                )
                .optional()?)
        })
        .await
    }

    async fn get_jar(&self, jar_id: &JarId) -> Result<Option<JarRecord>> {
        let jar_id = jar_id.to_string();
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT jar_id, name, description, owner_member_id, created_at_ms,
                            last_applied_sequence, parent_cid
                     FROM jars WHERE jar_id = ?1",
                    params![jar_id],
                    row_to_jar,
                )
                .optional()?)
        })
        .await
    }

    async fn list_jars(&self) -> Result<Vec<JarRecord>> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT jar_id, name, description, owner_member_id, created_at_ms,
                        last_applied_sequence, parent_cid
                 FROM jars ORDER BY created_at_ms",
            )?;
            let jars = stmt
                .query_map([], row_to_jar)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(jars)
        })
        .await
    }

    async fn get_member(
        &self,
        jar_id: &JarId,
        member_id: &MemberId,
    ) -> Result<Option<JarMemberRecord>> {
        let jar_id = jar_id.to_string();
        let member_id = member_id.to_string();
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT jar_id, member_id, role, status, display_name,
                            joined_at, invited_at, removed_at
                     FROM jar_members WHERE jar_id = ?1 AND member_id = ?2",
                    params![jar_id, member_id],
                    row_to_member,
                )
                .optional()?)
        })
        .await
    }

    async fn list_members(&self, jar_id: &JarId) -> Result<Vec<JarMemberRecord>> {
        let jar_id = jar_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT jar_id, member_id, role, status, display_name,
                        joined_at, invited_at, removed_at
                 FROM jar_members WHERE jar_id = ?1 ORDER BY member_id",
            )?;
            let members = stmt
                .query_map(params![jar_id], row_to_member)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(members)
        })
        .await
    }

    async fn get_content_item(&self, bud_uuid: &str) -> Result<Option<ContentItemRecord>> {
        let bud_uuid = bud_uuid.to_string();
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT bud_uuid, jar_id, author_member_id, caption, linked_at_ms
                     FROM content_items WHERE bud_uuid = ?1",
                    params![bud_uuid],
                    row_to_content_item,
                )
                .optional()?)
        })
        .await
    }

    async fn list_content_items(&self, jar_id: &JarId) -> Result<Vec<ContentItemRecord>> {
        let jar_id = jar_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT bud_uuid, jar_id, author_member_id, caption, linked_at_ms
                 FROM content_items WHERE jar_id = ?1 ORDER BY linked_at_ms",
            )?;
            let items = stmt
                .query_map(params![jar_id], row_to_content_item)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(items)
        })
        .await
    }

    async fn is_tombstoned(&self, jar_id: &JarId) -> Result<bool> {
        let jar_id = jar_id.to_string();
        self.run(move |conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM jar_tombstones WHERE jar_id = ?1)",
                params![jar_id],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
        .await
    }

    async fn get_tombstone(&self, jar_id: &JarId) -> Result<Option<JarTombstoneRecord>> {
        let jar_id_str = jar_id.to_string();
        let jar_id = *jar_id;
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT deleted_by, deleted_at_ms FROM jar_tombstones WHERE jar_id = ?1",
                    params![jar_id_str],
                    |row| {
                        Ok(JarTombstoneRecord {
                            jar_id,
                            deleted_by: MemberId::new(row.get::<_, String>(0)?),
                            deleted_at_ms: row.get(1)?,
                        })
                    },
                )
                .optional()?)
        })
        .await
    }

    async fn pin_device(&self, record: DeviceRecord) -> Result<PinOutcome> {
        self.run(move |conn| {
            let existing: Option<(Vec<u8>, Vec<u8>)> = conn
                .query_row(
                    "SELECT pubkey_sign, pubkey_agree FROM devices
                     WHERE member_id = ?1 AND device_id = ?2",
                    params![record.member_id.to_string(), record.device_id.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match existing {
                None => {
                    conn.execute(
                        "INSERT INTO devices (
                            member_id, device_id, pubkey_sign, pubkey_agree,
                            status, registered_at_ms
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            record.member_id.to_string(),
                            record.device_id.to_string(),
                            record.pk_sign.as_bytes().as_slice(),
                            record.pk_agree.as_bytes().as_slice(),
                            record.status.as_str(),
                            record.registered_at_ms,
                        ],
                    )?;
                    Ok(PinOutcome::Pinned)
                }
                Some((sign, agree))
                    if sign == record.pk_sign.as_bytes()
                        && agree == record.pk_agree.as_bytes() =>
                {
                    Ok(PinOutcome::AlreadyPinned)
                }
                Some(_) => Ok(PinOutcome::Mismatch),
            }
        })
        .await
    }

    async fn get_device(
        &self,
        member_id: &MemberId,
        device_id: &DeviceId,
    ) -> Result<Option<DeviceRecord>> {
        let member_id = member_id.to_string();
        let device_id = device_id.to_string();
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT member_id, device_id, pubkey_sign, pubkey_agree,
                            status, registered_at_ms
                     FROM devices WHERE member_id = ?1 AND device_id = ?2",
                    params![member_id, device_id],
                    row_to_device,
                )
                .optional()?)
        })
        .await
    }

    async fn revoke_device(&self, device_id: &DeviceId) -> Result<()> {
        let device_id = device_id.to_string();
        self.run(move |conn| {
            conn.execute(
                "UPDATE devices SET status = 'revoked' WHERE device_id = ?1",
                params![device_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn enqueue_receipt(&self, record: QueuedReceiptRecord) -> Result<()> {
        self.run(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO jar_receipt_queue (
                    jar_id, sequence_number, cid, parent_cid, payload_cbor,
                    signature, sender_member_id, queued_at_ms, retry_count,
                    last_retry_at_ms, poison_reason
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.jar_id.to_string(),
                    record.sequence_number as i64,
                    record.cid.to_string(),
                    record.parent_cid.map(|c| c.to_string()),
                    record.preimage_cbor,
                    record.signature.as_bytes().as_slice(),
                    record.sender_member_id.to_string(),
                    record.queued_at_ms,
                    record.retry_count as i64,
                    record.last_retry_at_ms,
                    record.poison_reason,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn queued_receipts(&self, jar_id: &JarId) -> Result<Vec<QueuedReceiptRecord>> {
        let jar_id = jar_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT queue_id, jar_id, sequence_number, cid, parent_cid, payload_cbor,
                        signature, sender_member_id, queued_at_ms, retry_count,
                        last_retry_at_ms, poison_reason
                 FROM jar_receipt_queue WHERE jar_id = ?1 ORDER BY sequence_number",
            )?;
            let queued = stmt
                .query_map(params![jar_id], row_to_queued)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(queued)
        })
        .await
    }

    async fn bump_queue_retry(&self, queue_id: i64, now_ms: i64) -> Result<u32> {
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE jar_receipt_queue
                 SET retry_count = retry_count + 1, last_retry_at_ms = ?2
                 WHERE queue_id = ?1",
                params![queue_id, now_ms],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("queue entry {}", queue_id)));
            }
            let count: i64 = conn.query_row(
                "SELECT retry_count FROM jar_receipt_queue WHERE queue_id = ?1",
                params![queue_id],
                |row| row.get(0),
            )?;
            Ok(count as u32)
        })
        .await
    }

    async fn poison_queued(&self, queue_id: i64, reason: &str) -> Result<()> {
        let reason = reason.to_string();
        self.run(move |conn| {
            conn.execute(
                "UPDATE jar_receipt_queue SET poison_reason = ?2 WHERE queue_id = ?1",
                params![queue_id, reason],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove_queued(&self, queue_id: i64) -> Result<()> {
        self.run(move |conn| {
            conn.execute(
                "DELETE FROM jar_receipt_queue WHERE queue_id = ?1",
                params![queue_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn drop_queued_older_than(&self, jar_id: &JarId, cutoff_ms: i64) -> Result<u64> {
        let jar_id = jar_id.to_string();
        self.run(move |conn| {
            let dropped = conn.execute(
                "DELETE FROM jar_receipt_queue WHERE jar_id = ?1 AND queued_at_ms < ?2",
                params![jar_id, cutoff_ms],
            )?;
            Ok(dropped as u64)
        })
        .await
    }

    async fn get_sync_state(&self, jar_id: &JarId) -> Result<JarSyncStateRecord> {
        let jar_id_str = jar_id.to_string();
        let jar_id = *jar_id;
        self.run(move |conn| {
            let state = conn
                .query_row(
                    "SELECT jar_id, is_halted, halt_reason, halted_at_ms, backfill_attempt,
                            next_backfill_at_ms, backfill_from, backfill_to
                     FROM jar_sync_state WHERE jar_id = ?1",
                    params![jar_id_str],
                    row_to_sync_state,
                )
                .optional()?;
            Ok(state.unwrap_or_else(|| JarSyncStateRecord::healthy(jar_id)))
        })
        .await
    }

    async fn put_sync_state(&self, state: &JarSyncStateRecord) -> Result<()> {
        let state = state.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO jar_sync_state (
                    jar_id, is_halted, halt_reason, halted_at_ms, backfill_attempt,
                    next_backfill_at_ms, backfill_from, backfill_to
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(jar_id) DO UPDATE SET
                    is_halted = excluded.is_halted,
                    halt_reason = excluded.halt_reason,
                    halted_at_ms = excluded.halted_at_ms,
                    backfill_attempt = excluded.backfill_attempt,
                    next_backfill_at_ms = excluded.next_backfill_at_ms,
                    backfill_from = excluded.backfill_from,
                    backfill_to = excluded.backfill_to",
                params![
                    state.jar_id.to_string(),
                    state.is_halted as i64,
                    state.halt_reason,
                    state.halted_at_ms,
                    state.backfill_attempt as i64,
                    state.next_backfill_at_ms,
                    state.backfill_from.map(|v| v as i64),
                    state.backfill_to.map(|v| v as i64),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn halt_jar(&self, jar_id: &JarId, reason: &str, now_ms: i64) -> Result<()> {
        let jar_id = jar_id.to_string();
        let reason = reason.to_string();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO jar_sync_state (jar_id, is_halted, halt_reason, halted_at_ms)
                 VALUES (?1, 1, ?2, ?3)
                ON CONFLICT(jar_id) DO UPDATE SET
                    is_halted = 1,
                    halt_reason = excluded.halt_reason,
                    halted_at_ms = excluded.halted_at_ms",
                params![jar_id, reason, now_ms],
            )?;
            Ok(())
        })
        .await
    }

    async fn unhalt_jar(&self, jar_id: &JarId) -> Result<()> {
        let jar_id = jar_id.to_string();
        self.run(move |conn| {
            conn.execute(
                "UPDATE jar_sync_state SET
                    is_halted = 0, halt_reason = NULL, halted_at_ms = NULL,
                    backfill_attempt = 0, next_backfill_at_ms = NULL,
                    backfill_from = NULL, backfill_to = NULL
                 WHERE jar_id = ?1",
                params![jar_id],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_receipt(cid: Cid) -> ReceiptRecord {
        ReceiptRecord {
            cid,
            author_member_id: MemberId::new("m1"),
            author_device_id: DeviceId::from_bytes([0x01; 16]),
            parent_cid: None,
            root_cid: None,
            receipt_type: "jar.created/v1".to_string(),
            preimage_cbor: vec![0xa0],
            signature: Ed25519Signature::from_bytes([0u8; 64]),
            received_at_ms: 1000,
        }
    }

    fn applied(jar_id: JarId, seq: u64, cid: Cid) -> AppliedEnvelope {
        AppliedEnvelope {
            jar_id,
            sequence_number: seq,
            cid,
            processed_at_ms: 1000,
        }
    }

    #[tokio::test]
    async fn test_apply_receipt_creates_jar() {
        let store = SqliteStore::open_memory().unwrap();
        let jar_id = JarId::from_bytes([0x11; 16]);
        let cid = Cid::from_preimage_bytes(b"r1");

        store
            .apply_receipt(
                &applied(jar_id, 1, cid),
                test_receipt(cid),
                vec![ProjectionMutation::InsertJar {
                    jar_id,
                    name: "Friends".to_string(),
                    description: None,
                    owner_member_id: MemberId::new("m1"),
                    created_at_ms: 1000,
                }],
            )
            .await
            .unwrap();

        let jar = store.get_jar(&jar_id).await.unwrap().unwrap();
        assert_eq!(jar.name, "Friends");
        assert_eq!(jar.last_applied_sequence, 1);
        assert_eq!(jar.parent_cid, Some(cid));
        assert!(store.is_processed_cid(&cid).await.unwrap());
    }

    #[tokio::test]
    async fn test_apply_receipt_idempotent_same_cid() {
        let store = SqliteStore::open_memory().unwrap();
        let jar_id = JarId::from_bytes([0x11; 16]);
        let cid = Cid::from_preimage_bytes(b"r1");

        let env = applied(jar_id, 1, cid);
        store
            .apply_receipt(&env, test_receipt(cid), vec![])
            .await
            .unwrap();
        // Second apply of the same (jar, seq, cid) is a no-op.
        store
            .apply_receipt(&env, test_receipt(cid), vec![])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_apply_receipt_cid_mismatch_is_corruption() {
        let store = SqliteStore::open_memory().unwrap();
        let jar_id = JarId::from_bytes([0x11; 16]);
        let cid_a = Cid::from_preimage_bytes(b"a");
        let cid_b = Cid::from_preimage_bytes(b"b");

        store
            .apply_receipt(&applied(jar_id, 1, cid_a), test_receipt(cid_a), vec![])
            .await
            .unwrap();

        let result = store
            .apply_receipt(&applied(jar_id, 1, cid_b), test_receipt(cid_b), vec![])
            .await;
        assert!(matches!(
            result,
            Err(StoreError::ProcessedCidMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_tombstoned_jar_rejects_mutations() {
        let store = SqliteStore::open_memory().unwrap();
        let jar_id = JarId::from_bytes([0x11; 16]);
        let cid = Cid::from_preimage_bytes(b"del");

        store
            .apply_receipt(
                &applied(jar_id, 1, cid),
                test_receipt(cid),
                vec![ProjectionMutation::TombstoneJar {
                    jar_id,
                    deleted_by: MemberId::new("m1"),
                    deleted_at_ms: 1000,
                }],
            )
            .await
            .unwrap();

        let cid2 = Cid::from_preimage_bytes(b"late");
        let result = store
            .apply_receipt(&applied(jar_id, 2, cid2), test_receipt(cid2), vec![])
            .await;
        assert!(matches!(result, Err(StoreError::Tombstoned(_))));
    }

    #[tokio::test]
    async fn test_pin_device_write_once() {
        let store = SqliteStore::open_memory().unwrap();
        let record = DeviceRecord {
            member_id: MemberId::new("m2"),
            device_id: DeviceId::from_bytes([0x2a; 16]),
            pk_sign: Ed25519PublicKey::from_bytes([0x01; 32]),
            pk_agree: AgreementPublicKey::from_bytes([0x02; 32]),
            status: DeviceStatus::Active,
            registered_at_ms: 1000,
        };

        assert_eq!(
            store.pin_device(record.clone()).await.unwrap(),
            PinOutcome::Pinned
        );
        assert_eq!(
            store.pin_device(record.clone()).await.unwrap(),
            PinOutcome::AlreadyPinned
        );

        let mut forged = record.clone();
        forged.pk_sign = Ed25519PublicKey::from_bytes([0xff; 32]);
        assert_eq!(store.pin_device(forged).await.unwrap(), PinOutcome::Mismatch);

        // Registry unchanged.
        let stored = store
            .get_device(&record.member_id, &record.device_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.pk_sign, record.pk_sign);
    }

    #[tokio::test]
    async fn test_pin_mutation_mismatch_rolls_back_apply() {
        let store = SqliteStore::open_memory().unwrap();
        let jar_id = JarId::from_bytes([0x11; 16]);
        let member_id = MemberId::new("m2");
        let device_id = DeviceId::from_bytes([0x2a; 16]);

        store
            .pin_device(DeviceRecord {
                member_id: member_id.clone(),
                device_id,
                pk_sign: Ed25519PublicKey::from_bytes([0x01; 32]),
                pk_agree: AgreementPublicKey::from_bytes([0x02; 32]),
                status: DeviceStatus::Active,
                registered_at_ms: 1000,
            })
            .await
            .unwrap();

        let cid = Cid::from_preimage_bytes(b"r1");
        let result = store
            .apply_receipt(
                &applied(jar_id, 1, cid),
                test_receipt(cid),
                vec![ProjectionMutation::PinDevice {
                    member_id: member_id.clone(),
                    device_id,
                    pk_sign: Ed25519PublicKey::from_bytes([0xff; 32]),
                    pk_agree: AgreementPublicKey::from_bytes([0x02; 32]),
                    registered_at_ms: 2000,
                }],
            )
            .await;

        assert!(matches!(result, Err(StoreError::TofuMismatch { .. })));
        // Nothing committed.
        assert!(!store.is_processed_cid(&cid).await.unwrap());
    }

    #[tokio::test]
    async fn test_queue_lifecycle() {
        let store = SqliteStore::open_memory().unwrap();
        let jar_id = JarId::from_bytes([0x11; 16]);

        let record = QueuedReceiptRecord {
            queue_id: 0,
            jar_id,
            sequence_number: 3,
            cid: Cid::from_preimage_bytes(b"q3"),
            parent_cid: None,
            preimage_cbor: vec![0xa0],
            signature: Ed25519Signature::from_bytes([0u8; 64]),
            sender_member_id: MemberId::new("m1"),
            queued_at_ms: 1000,
            retry_count: 0,
            last_retry_at_ms: None,
            poison_reason: None,
        };
        store.enqueue_receipt(record.clone()).await.unwrap();
        // Duplicate (jar, seq) is ignored.
        store.enqueue_receipt(record).await.unwrap();

        let queued = store.queued_receipts(&jar_id).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].sequence_number, 3);

        let count = store
            .bump_queue_retry(queued[0].queue_id, 2000)
            .await
            .unwrap();
        assert_eq!(count, 1);

        store
            .poison_queued(queued[0].queue_id, "handler failed")
            .await
            .unwrap();
        let queued = store.queued_receipts(&jar_id).await.unwrap();
        assert_eq!(queued[0].poison_reason.as_deref(), Some("handler failed"));

        store.remove_queued(queued[0].queue_id).await.unwrap();
        assert!(store.queued_receipts(&jar_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_state_halt_unhalt() {
        let store = SqliteStore::open_memory().unwrap();
        let jar_id = JarId::from_bytes([0x11; 16]);

        let state = store.get_sync_state(&jar_id).await.unwrap();
        assert!(!state.is_halted);

        store.halt_jar(&jar_id, "poisoned at seq 4", 1000).await.unwrap();
        let state = store.get_sync_state(&jar_id).await.unwrap();
        assert!(state.is_halted);
        assert_eq!(state.halt_reason.as_deref(), Some("poisoned at seq 4"));

        store.unhalt_jar(&jar_id).await.unwrap();
        let state = store.get_sync_state(&jar_id).await.unwrap();
        assert!(!state.is_halted);
        assert_eq!(state.halt_reason, None);
    }

    #[tokio::test]
    async fn test_reopen_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("budsync.db");
        let jar_id = JarId::from_bytes([0x11; 16]);
        let cid = Cid::from_preimage_bytes(b"r1");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .apply_receipt(
                    &applied(jar_id, 1, cid),
                    test_receipt(cid),
                    vec![ProjectionMutation::InsertJar {
                        jar_id,
                        name: "Friends".to_string(),
                        description: None,
                        owner_member_id: MemberId::new("m1"),
                        created_at_ms: 1000,
                    }],
                )
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let jar = store.get_jar(&jar_id).await.unwrap().unwrap();
        assert_eq!(jar.last_applied_sequence, 1);
        assert!(store.is_processed_cid(&cid).await.unwrap());
    }

    #[tokio::test]
    async fn test_drop_queued_older_than() {
        let store = SqliteStore::open_memory().unwrap();
        let jar_id = JarId::from_bytes([0x11; 16]);

        for (seq, at) in [(2u64, 100i64), (3, 5000)] {
            store
                .enqueue_receipt(QueuedReceiptRecord {
                    queue_id: 0,
                    jar_id,
                    sequence_number: seq,
                    cid: Cid::from_preimage_bytes(format!("q{}", seq).as_bytes()),
                    parent_cid: None,
                    preimage_cbor: vec![0xa0],
                    signature: Ed25519Signature::from_bytes([0u8; 64]),
                    sender_member_id: MemberId::new("m1"),
                    queued_at_ms: at,
                    retry_count: 0,
                    last_retry_at_ms: None,
                    poison_reason: None,
                })
                .await
                .unwrap();
        }

        let dropped = store.drop_queued_older_than(&jar_id, 1000).await.unwrap();
        assert_eq!(dropped, 1);
        let remaining = store.queued_receipts(&jar_id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].sequence_number, 3);
    }
}
