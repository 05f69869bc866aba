//! In-memory implementation of the Store trait.
//!
//! Primarily for testing. Same semantics as SQLite, no persistence.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use budsync_core::{Cid, DeviceId, JarId, MemberId};

use crate::error::{Result, StoreError};
use crate::traits::{
    AppliedEnvelope, ContentItemRecord, DeviceRecord, JarMemberRecord, JarRecord,
    JarSyncStateRecord, JarTombstoneRecord, PinOutcome, ProjectionMutation,
    QueuedReceiptRecord, ReceiptRecord, Store,
};

/// In-memory store. Thread-safe via RwLock; all data dies with the value.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    receipts: HashMap<Cid, ReceiptRecord>,
    jars: HashMap<JarId, JarRecord>,
    members: BTreeMap<(JarId, String), JarMemberRecord>,
    content_items: HashMap<String, ContentItemRecord>,
    tombstones: HashMap<JarId, JarTombstoneRecord>,
    processed_by_cid: HashSet<Cid>,
    processed_by_pos: HashMap<(JarId, u64), Cid>,
    queue: BTreeMap<i64, QueuedReceiptRecord>,
    queue_positions: HashSet<(JarId, u64)>,
    next_queue_id: i64,
    sync_states: HashMap<JarId, JarSyncStateRecord>,
    devices: HashMap<(String, DeviceId), DeviceRecord>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_queue_id: 1,
                ..Inner::default()
            }),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Task(format!("lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Task(format!("lock poisoned: {}", e)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn apply_mutation(&mut self, mutation: &ProjectionMutation) -> Result<()> {
        match mutation {
            ProjectionMutation::InsertJar {
                jar_id,
                name,
                description,
                owner_member_id,
                created_at_ms,
            } => {
                self.jars.entry(*jar_id).or_insert_with(|| JarRecord {
                    jar_id: *jar_id,
                    name: name.clone(),
                    description: description.clone(),
                    owner_member_id: owner_member_id.clone(),
                    created_at_ms: *created_at_ms,
                    last_applied_sequence: 0,
                    parent_cid: None,
                });
            }
            ProjectionMutation::RenameJar { jar_id, name } => {
                if let Some(jar) = self.jars.get_mut(jar_id) {
                    jar.name = name.clone();
                }
            }
            ProjectionMutation::UpsertMember { member } => {
                let key = (member.jar_id, member.member_id.to_string());
                match self.members.get_mut(&key) {
                    Some(existing) => {
                        existing.role = member.role;
                        existing.status = member.status;
                        if member.display_name.is_some() {
                            existing.display_name = member.display_name.clone();
                        }
                        if member.joined_at_ms.is_some() {
                            existing.joined_at_ms = member.joined_at_ms;
                        }
                        if member.invited_at_ms.is_some() {
                            existing.invited_at_ms = member.invited_at_ms;
                        }
                        existing.removed_at_ms = member.removed_at_ms;
                    }
                    None => {
                        self.members.insert(key, member.clone());
                    }
                }
            }
            ProjectionMutation::SetMemberStatus {
                jar_id,
                member_id,
                status,
                joined_at_ms,
                removed_at_ms,
            } => {
                let key = (*jar_id, member_id.to_string());
                let member = self.members.get_mut(&key).ok_or_else(|| {
                    StoreError::NotFound(format!("jar member ({}, {})", jar_id, member_id))
                })?;
                member.status = *status;
                if joined_at_ms.is_some() {
                    member.joined_at_ms = *joined_at_ms;
                }
                if removed_at_ms.is_some() {
                    member.removed_at_ms = *removed_at_ms;
                }
            }
            ProjectionMutation::PinDevice {
                member_id,
                device_id,
                pk_sign,
                pk_agree,
                registered_at_ms,
            } => {
                let key = (member_id.to_string(), *device_id);
                match self.devices.get(&key) {
                    None => {
                        self.devices.insert(
                            key,
                            DeviceRecord {
                                member_id: member_id.clone(),
                                device_id: *device_id,
                                pk_sign: *pk_sign,
                                pk_agree: *pk_agree,
                                status: crate::traits::DeviceStatus::Active,
                                registered_at_ms: *registered_at_ms,
                            },
                        );
                    }
                    Some(existing)
                        if existing.pk_sign == *pk_sign && existing.pk_agree == *pk_agree => {}
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
                match self.content_items.get_mut(bud_uuid) {
                    Some(item) => {
                        item.jar_id = Some(*jar_id);
                        if caption.is_some() {
                            item.caption = caption.clone();
                        }
                        item.linked_at_ms = *linked_at_ms;
                    }
                    None => {
                        self.content_items.insert(
                            bud_uuid.clone(),
                            ContentItemRecord {
                                bud_uuid: bud_uuid.clone(),
                                jar_id: Some(*jar_id),
                                author_member_id: author_member_id.clone(),
                                caption: caption.clone(),
                                linked_at_ms: *linked_at_ms,
                            },
                        );
                    }
                }
            }
            ProjectionMutation::UnlinkBud { bud_uuid } => {
                if let Some(item) = self.content_items.get_mut(bud_uuid) {
                    item.jar_id = None;
                }
            }
            ProjectionMutation::UnlinkAllBuds { jar_id } => {
                for item in self.content_items.values_mut() {
                    if item.jar_id == Some(*jar_id) {
                        item.jar_id = None;
                    }
                }
            }
            ProjectionMutation::TombstoneJar {
                jar_id,
                deleted_by,
                deleted_at_ms,
            } => {
                self.tombstones
                    .entry(*jar_id)
                    .or_insert_with(|| JarTombstoneRecord {
                        jar_id: *jar_id,
                        deleted_by: deleted_by.clone(),
                        deleted_at_ms: *deleted_at_ms,
                    });
            }
            ProjectionMutation::DeleteJarRows { jar_id } => {
                self.jars.remove(jar_id);
                self.members.retain(|(j, _), _| j != jar_id);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn apply_receipt(
        &self,
        envelope: &AppliedEnvelope,
        receipt: ReceiptRecord,
        mutations: Vec<ProjectionMutation>,
    ) -> Result<()> {
        let mut inner = self.write()?;

        if inner.tombstones.contains_key(&envelope.jar_id) {
            return Err(StoreError::Tombstoned(envelope.jar_id));
        }

        let pos = (envelope.jar_id, envelope.sequence_number);
        if let Some(existing) = inner.processed_by_pos.get(&pos) {
            if *existing != envelope.cid {
                return Err(StoreError::ProcessedCidMismatch {
                    jar_id: envelope.jar_id,
                    sequence_number: envelope.sequence_number,
                    existing: *existing,
                    incoming: envelope.cid,
                });
            }
            return Ok(());
        }

        // Apply against a scratch copy so a failed mutation leaves nothing
        // behind (the SQLite path gets this from the transaction).
        let mut scratch = Inner {
            next_queue_id: inner.next_queue_id,
            receipts: inner.receipts.clone(),
            jars: inner.jars.clone(),
            members: inner.members.clone(),
            content_items: inner.content_items.clone(),
            tombstones: inner.tombstones.clone(),
            processed_by_cid: inner.processed_by_cid.clone(),
            processed_by_pos: inner.processed_by_pos.clone(),
            queue: inner.queue.clone(),
            queue_positions: inner.queue_positions.clone(),
            sync_states: inner.sync_states.clone(),
            devices: inner.devices.clone(),
        };

        scratch.receipts.entry(receipt.cid).or_insert(receipt);
        for mutation in &mutations {
            scratch.apply_mutation(mutation)?;
        }
        scratch.processed_by_cid.insert(envelope.cid);
        scratch.processed_by_pos.insert(pos, envelope.cid);
        if let Some(jar) = scratch.jars.get_mut(&envelope.jar_id) {
            jar.last_applied_sequence = envelope.sequence_number;
            jar.parent_cid = Some(envelope.cid);
        }

        *inner = scratch;
        Ok(())
    }

    async fn is_processed_cid(&self, cid: &Cid) -> Result<bool> {
        Ok(self.read()?.processed_by_cid.contains(cid))
    }

    async fn processed_cid_at(
        &self,
        jar_id: &JarId,
        sequence_number: u64,
    ) -> Result<Option<Cid>> {
        Ok(self
            .read()?
            .processed_by_pos
            .get(&(*jar_id, sequence_number))
            .copied())
    }

    async fn get_receipt(&self, cid: &Cid) -> Result<Option<ReceiptRecord>> {
        Ok(self.read()?.receipts.get(cid).cloned())
    }

    async fn get_jar(&self, jar_id: &JarId) -> Result<Option<JarRecord>> {
        Ok(self.read()?.jars.get(jar_id).cloned())
    }

    async fn list_jars(&self) -> Result<Vec<JarRecord>> {
        let mut jars: Vec<JarRecord> = self.read()?.jars.values().cloned().collect();
        jars.sort_by_key(|j| j.created_at_ms);
        Ok(jars)
    }

    async fn get_member(
        &self,
        jar_id: &JarId,
        member_id: &MemberId,
    ) -> Result<Option<JarMemberRecord>> {
        Ok(self
            .read()?
            .members
            .get(&(*jar_id, member_id.to_string()))
            .cloned())
    }

    async fn list_members(&self, jar_id: &JarId) -> Result<Vec<JarMemberRecord>> {
        Ok(self
            .read()?
            .members
            .iter()
            .filter(|((j, _), _)| j == jar_id)
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn get_content_item(&self, bud_uuid: &str) -> Result<Option<ContentItemRecord>> {
        Ok(self.read()?.content_items.get(bud_uuid).cloned())
    }

    async fn list_content_items(&self, jar_id: &JarId) -> Result<Vec<ContentItemRecord>> {
        let mut items: Vec<ContentItemRecord> = self
            .read()?
            .content_items
            .values()
            .filter(|item| item.jar_id == Some(*jar_id))
            .cloned()
            .collect();
        items.sort_by_key(|i| i.linked_at_ms);
        Ok(items)
    }

    async fn is_tombstoned(&self, jar_id: &JarId) -> Result<bool> {
        Ok(self.read()?.tombstones.contains_key(jar_id))
    }

    async fn get_tombstone(&self, jar_id: &JarId) -> Result<Option<JarTombstoneRecord>> {
        Ok(self.read()?.tombstones.get(jar_id).cloned())
    }

    async fn pin_device(&self, record: DeviceRecord) -> Result<PinOutcome> {
        let mut inner = self.write()?;
        let key = (record.member_id.to_string(), record.device_id);
        match inner.devices.get(&key) {
            None => {
                inner.devices.insert(key, record);
                Ok(PinOutcome::Pinned)
            }
            Some(existing)
                if existing.pk_sign == record.pk_sign && existing.pk_agree == record.pk_agree =>
            {
                Ok(PinOutcome::AlreadyPinned)
            }
            Some(_) => Ok(PinOutcome::Mismatch),
        }
    }

    async fn get_device(
        &self,
        member_id: &MemberId,
        device_id: &DeviceId,
    ) -> Result<Option<DeviceRecord>> {
        Ok(self
            .read()?
            .devices
            .get(&(member_id.to_string(), *device_id))
            .cloned())
    }

    async fn revoke_device(&self, device_id: &DeviceId) -> Result<()> {
        let mut inner = self.write()?;
        for record in inner.devices.values_mut() {
            if record.device_id == *device_id {
                record.status = crate::traits::DeviceStatus::Revoked;
            }
        }
        Ok(())
    }

    async fn enqueue_receipt(&self, mut record: QueuedReceiptRecord) -> Result<()> {
        let mut inner = self.write()?;
        let pos = (record.jar_id, record.sequence_number);
        if inner.queue_positions.contains(&pos) {
            return Ok(());
        }
        record.queue_id = inner.next_queue_id;
        inner.next_queue_id += 1;
        inner.queue_positions.insert(pos);
        inner.queue.insert(record.queue_id, record);
        Ok(())
    }

    async fn queued_receipts(&self, jar_id: &JarId) -> Result<Vec<QueuedReceiptRecord>> {
        let mut queued: Vec<QueuedReceiptRecord> = self
            .read()?
            .queue
            .values()
            .filter(|q| q.jar_id == *jar_id)
            .cloned()
            .collect();
        queued.sort_by_key(|q| q.sequence_number);
        Ok(queued)
    }

    async fn bump_queue_retry(&self, queue_id: i64, now_ms: i64) -> Result<u32> {
        let mut inner = self.write()?;
        let entry = inner
            .queue
            .get_mut(&queue_id)
            .ok_or_else(|| StoreError::NotFound(format!("queue entry {}", queue_id)))?;
        entry.retry_count += 1;
        entry.last_retry_at_ms = Some(now_ms);
        Ok(entry.retry_count)
    }

    async fn poison_queued(&self, queue_id: i64, reason: &str) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(entry) = inner.queue.get_mut(&queue_id) {
            entry.poison_reason = Some(reason.to_string());
        }
        Ok(())
    }

    async fn remove_queued(&self, queue_id: i64) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(removed) = inner.queue.remove(&queue_id) {
            inner
                .queue_positions
                .remove(&(removed.jar_id, removed.sequence_number));
        }
        Ok(())
    }

    async fn drop_queued_older_than(&self, jar_id: &JarId, cutoff_ms: i64) -> Result<u64> {
        let mut inner = self.write()?;
        let stale: Vec<i64> = inner
            .queue
            .values()
            .filter(|q| q.jar_id == *jar_id && q.queued_at_ms < cutoff_ms)
            .map(|q| q.queue_id)
            .collect();
        for queue_id in &stale {
            if let Some(removed) = inner.queue.remove(queue_id) {
                inner
                    .queue_positions
                    .remove(&(removed.jar_id, removed.sequence_number));
            }
        }
        Ok(stale.len() as u64)
    }

    async fn get_sync_state(&self, jar_id: &JarId) -> Result<JarSyncStateRecord> {
        Ok(self
            .read()?
            .sync_states
            .get(jar_id)
            .cloned()
            .unwrap_or_else(|| JarSyncStateRecord::healthy(*jar_id)))
    }

    async fn put_sync_state(&self, state: &JarSyncStateRecord) -> Result<()> {
        self.write()?.sync_states.insert(state.jar_id, state.clone());
        Ok(())
    }

    async fn halt_jar(&self, jar_id: &JarId, reason: &str, now_ms: i64) -> Result<()> {
        let mut inner = self.write()?;
        let state = inner
            .sync_states
            .entry(*jar_id)
            .or_insert_with(|| JarSyncStateRecord::healthy(*jar_id));
        state.is_halted = true;
        state.halt_reason = Some(reason.to_string());
        state.halted_at_ms = Some(now_ms);
        Ok(())
    }

    async fn unhalt_jar(&self, jar_id: &JarId) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(state) = inner.sync_states.get_mut(jar_id) {
            state.is_halted = false;
            state.halt_reason = None;
            state.halted_at_ms = None;
            state.backfill_attempt = 0;
            state.next_backfill_at_ms = None;
            state.backfill_from = None;
            state.backfill_to = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use budsync_core::Ed25519Signature;

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

    #[tokio::test]
    async fn test_memory_apply_and_projections() {
        let store = MemoryStore::new();
        let jar_id = JarId::from_bytes([0x11; 16]);
        let cid = Cid::from_preimage_bytes(b"r1");

        store
            .apply_receipt(
                &AppliedEnvelope {
                    jar_id,
                    sequence_number: 1,
                    cid,
                    processed_at_ms: 1000,
                },
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
        assert_eq!(jar.last_applied_sequence, 1);
    }

    #[tokio::test]
    async fn test_memory_failed_mutation_leaves_nothing() {
        let store = MemoryStore::new();
        let jar_id = JarId::from_bytes([0x11; 16]);
        let cid = Cid::from_preimage_bytes(b"r1");

        // SetMemberStatus on an absent member fails the apply.
        let result = store
            .apply_receipt(
                &AppliedEnvelope {
                    jar_id,
                    sequence_number: 1,
                    cid,
                    processed_at_ms: 1000,
                },
                test_receipt(cid),
                vec![
                    ProjectionMutation::InsertJar {
                        jar_id,
                        name: "Friends".to_string(),
                        description: None,
                        owner_member_id: MemberId::new("m1"),
                        created_at_ms: 1000,
                    },
                    ProjectionMutation::SetMemberStatus {
                        jar_id,
                        member_id: MemberId::new("missing"),
                        status: crate::traits::JarMemberStatus::Active,
                        joined_at_ms: None,
                        removed_at_ms: None,
                    },
                ],
            )
            .await;

        assert!(result.is_err());
        assert!(store.get_jar(&jar_id).await.unwrap().is_none());
        assert!(!store.is_processed_cid(&cid).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_queue_assigns_ids() {
        let store = MemoryStore::new();
        let jar_id = JarId::from_bytes([0x11; 16]);

        for seq in [4u64, 2, 3] {
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
                    queued_at_ms: 1000,
                    retry_count: 0,
                    last_retry_at_ms: None,
                    poison_reason: None,
                })
                .await
                .unwrap();
        }

        let queued = store.queued_receipts(&jar_id).await.unwrap();
        let seqs: Vec<u64> = queued.iter().map(|q| q.sequence_number).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
        assert!(queued.iter().all(|q| q.queue_id > 0));
    }
}
