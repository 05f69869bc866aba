//! Store trait: the abstract interface for receipt and projection persistence.
//!
//! The store is the only component that mutates persisted state. Handlers
//! compute [`ProjectionMutation`] lists; [`Store::apply_receipt`] executes
//! them together with the `processed_jar_receipts` insert and the
//! `last_applied_sequence` bump in one atomic write.
//!
//! # Design Notes
//!
//! - **Atomic apply**: a crash mid-apply leaves either "not applied" or
//!   "fully applied", never a partial prefix.
//! - **Corruption detection**: an existing `(jar_id, sequence_number)` row
//!   with a different CID fails the whole transaction.
//! - **Write-once pins**: device pins are check-and-set; mismatched keys
//!   roll the transaction back.
//! - **Single-writer per jar**: callers serialize writes within one jar;
//!   concurrent readers are allowed.

use async_trait::async_trait;

use budsync_core::{AgreementPublicKey, Cid, DeviceId, Ed25519PublicKey, Ed25519Signature, JarId, MemberId};

use crate::error::Result;

/// Role of a member within a jar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JarMemberRole {
    Owner,
    Member,
}

impl JarMemberRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Member => "member",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(Self::Owner),
            "member" => Some(Self::Member),
            _ => None,
        }
    }
}

/// Membership status within a jar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JarMemberStatus {
    Pending,
    Active,
    Removed,
}

impl JarMemberStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Removed => "removed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "removed" => Some(Self::Removed),
            _ => None,
        }
    }
}

/// Status of a pinned device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Active,
    Revoked,
}

impl DeviceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

/// Mutable jar projection derived from applied receipts.
#[derive(Debug, Clone, PartialEq)]
pub struct JarRecord {
    pub jar_id: JarId,
    pub name: String,
    pub description: Option<String>,
    pub owner_member_id: MemberId,
    pub created_at_ms: i64,
    /// Highest sequence ever committed for this jar; gaps below it are
    /// impossible.
    pub last_applied_sequence: u64,
    /// CID of the last applied receipt.
    pub parent_cid: Option<Cid>,
}

/// One member's row within a jar.
#[derive(Debug, Clone, PartialEq)]
pub struct JarMemberRecord {
    pub jar_id: JarId,
    pub member_id: MemberId,
    pub role: JarMemberRole,
    pub status: JarMemberStatus,
    pub display_name: Option<String>,
    pub joined_at_ms: Option<i64>,
    pub invited_at_ms: Option<i64>,
    pub removed_at_ms: Option<i64>,
}

/// A content item's link state.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentItemRecord {
    pub bud_uuid: String,
    /// None once unlinked (or after the jar is deleted).
    pub jar_id: Option<JarId>,
    pub author_member_id: MemberId,
    pub caption: Option<String>,
    pub linked_at_ms: i64,
}

/// A TOFU-pinned device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub member_id: MemberId,
    pub device_id: DeviceId,
    pub pk_sign: Ed25519PublicKey,
    pub pk_agree: AgreementPublicKey,
    pub status: DeviceStatus,
    pub registered_at_ms: i64,
}

/// A stored receipt header.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiptRecord {
    pub cid: Cid,
    pub author_member_id: MemberId,
    pub author_device_id: DeviceId,
    pub parent_cid: Option<Cid>,
    pub root_cid: Option<Cid>,
    pub receipt_type: String,
    pub preimage_cbor: Vec<u8>,
    pub signature: Ed25519Signature,
    pub received_at_ms: i64,
}

/// A verified receipt waiting for its sequence predecessors.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedReceiptRecord {
    pub queue_id: i64,
    pub jar_id: JarId,
    pub sequence_number: u64,
    pub cid: Cid,
    pub parent_cid: Option<Cid>,
    pub preimage_cbor: Vec<u8>,
    pub signature: Ed25519Signature,
    pub sender_member_id: MemberId,
    pub queued_at_ms: i64,
    pub retry_count: u32,
    pub last_retry_at_ms: Option<i64>,
    pub poison_reason: Option<String>,
}

/// Per-jar sync state.
#[derive(Debug, Clone, PartialEq)]
pub struct JarSyncStateRecord {
    pub jar_id: JarId,
    pub is_halted: bool,
    pub halt_reason: Option<String>,
    pub halted_at_ms: Option<i64>,
    pub backfill_attempt: u32,
    pub next_backfill_at_ms: Option<i64>,
    pub backfill_from: Option<u64>,
    pub backfill_to: Option<u64>,
}

impl JarSyncStateRecord {
    /// A fresh, healthy state for a jar.
    pub fn healthy(jar_id: JarId) -> Self {
        Self {
            jar_id,
            is_halted: false,
            halt_reason: None,
            halted_at_ms: None,
            backfill_attempt: 0,
            next_backfill_at_ms: None,
            backfill_from: None,
            backfill_to: None,
        }
    }
}

/// A jar-level tombstone: the jar was deleted; all future sync is blocked.
#[derive(Debug, Clone, PartialEq)]
pub struct JarTombstoneRecord {
    pub jar_id: JarId,
    pub deleted_by: MemberId,
    pub deleted_at_ms: i64,
}

/// A projection mutation computed by a receipt handler.
///
/// Handlers are pure; the store executes the mutations transactionally.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionMutation {
    InsertJar {
        jar_id: JarId,
        name: String,
        description: Option<String>,
        owner_member_id: MemberId,
        created_at_ms: i64,
    },
    RenameJar {
        jar_id: JarId,
        name: String,
    },
    UpsertMember {
        member: JarMemberRecord,
    },
    SetMemberStatus {
        jar_id: JarId,
        member_id: MemberId,
        status: JarMemberStatus,
        joined_at_ms: Option<i64>,
        removed_at_ms: Option<i64>,
    },
    PinDevice {
        member_id: MemberId,
        device_id: DeviceId,
        pk_sign: Ed25519PublicKey,
        pk_agree: AgreementPublicKey,
        registered_at_ms: i64,
    },
    LinkBud {
        bud_uuid: String,
        jar_id: JarId,
        author_member_id: MemberId,
        caption: Option<String>,
        linked_at_ms: i64,
    },
    UnlinkBud {
        bud_uuid: String,
    },
    /// Clear the jar link from every item in the jar (jar deletion).
    UnlinkAllBuds {
        jar_id: JarId,
    },
    TombstoneJar {
        jar_id: JarId,
        deleted_by: MemberId,
        deleted_at_ms: i64,
    },
    /// Remove the jar row and its member rows (after tombstoning).
    DeleteJarRows {
        jar_id: JarId,
    },
}

/// Metadata for an apply: which envelope is being committed.
#[derive(Debug, Clone)]
pub struct AppliedEnvelope {
    pub jar_id: JarId,
    pub sequence_number: u64,
    pub cid: Cid,
    pub processed_at_ms: i64,
}

/// Outcome of a TOFU pin attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinOutcome {
    /// The pin was inserted.
    Pinned,
    /// The exact same keys were already pinned (idempotent no-op).
    AlreadyPinned,
    /// Different keys are pinned. Security-critical signal.
    Mismatch,
}

/// The Store trait: async interface for all persistence.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Receipt application
    // ─────────────────────────────────────────────────────────────────────────

    /// Commit an applied receipt: receipt row, projection mutations,
    /// `processed_jar_receipts` insert and `last_applied_sequence` bump in a
    /// single atomic write.
    async fn apply_receipt(
        &self,
        envelope: &AppliedEnvelope,
        receipt: ReceiptRecord,
        mutations: Vec<ProjectionMutation>,
    ) -> Result<()>;

    /// Has this CID been processed for any jar? (Replay protection.)
    async fn is_processed_cid(&self, cid: &Cid) -> Result<bool>;

    /// The CID committed at `(jar_id, sequence_number)`, if any.
    async fn processed_cid_at(&self, jar_id: &JarId, sequence_number: u64)
        -> Result<Option<Cid>>;

    /// Fetch a stored receipt by CID.
    async fn get_receipt(&self, cid: &Cid) -> Result<Option<ReceiptRecord>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Projections
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_jar(&self, jar_id: &JarId) -> Result<Option<JarRecord>>;

    async fn list_jars(&self) -> Result<Vec<JarRecord>>;

    async fn get_member(
        &self,
        jar_id: &JarId,
        member_id: &MemberId,
    ) -> Result<Option<JarMemberRecord>>;

    async fn list_members(&self, jar_id: &JarId) -> Result<Vec<JarMemberRecord>>;

    async fn get_content_item(&self, bud_uuid: &str) -> Result<Option<ContentItemRecord>>;

    async fn list_content_items(&self, jar_id: &JarId) -> Result<Vec<ContentItemRecord>>;

    async fn is_tombstoned(&self, jar_id: &JarId) -> Result<bool>;

    async fn get_tombstone(&self, jar_id: &JarId) -> Result<Option<JarTombstoneRecord>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Devices (TOFU)
    // ─────────────────────────────────────────────────────────────────────────

    /// Check-and-set pin. Never overwrites existing keys.
    async fn pin_device(&self, record: DeviceRecord) -> Result<PinOutcome>;

    async fn get_device(
        &self,
        member_id: &MemberId,
        device_id: &DeviceId,
    ) -> Result<Option<DeviceRecord>>;

    /// Set status=revoked on every pin of this device id.
    async fn revoke_device(&self, device_id: &DeviceId) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Gap queue
    // ─────────────────────────────────────────────────────────────────────────

    /// Queue a verified receipt awaiting its predecessors. Idempotent on
    /// `(jar_id, sequence_number)`.
    async fn enqueue_receipt(&self, record: QueuedReceiptRecord) -> Result<()>;

    /// All queued receipts for a jar, ascending by sequence.
    async fn queued_receipts(&self, jar_id: &JarId) -> Result<Vec<QueuedReceiptRecord>>;

    /// Increment a queued receipt's retry count; returns the new count.
    async fn bump_queue_retry(&self, queue_id: i64, now_ms: i64) -> Result<u32>;

    /// Mark a queued receipt as poisoned.
    async fn poison_queued(&self, queue_id: i64, reason: &str) -> Result<()>;

    async fn remove_queued(&self, queue_id: i64) -> Result<()>;

    /// Drop queue entries older than the cutoff; returns how many went.
    async fn drop_queued_older_than(&self, jar_id: &JarId, cutoff_ms: i64) -> Result<u64>;

    // ─────────────────────────────────────────────────────────────────────────
    // Sync state
    // ─────────────────────────────────────────────────────────────────────────

    /// The sync state row for a jar; a fresh healthy state if absent.
    async fn get_sync_state(&self, jar_id: &JarId) -> Result<JarSyncStateRecord>;

    async fn put_sync_state(&self, state: &JarSyncStateRecord) -> Result<()>;

    async fn halt_jar(&self, jar_id: &JarId, reason: &str, now_ms: i64) -> Result<()>;

    /// Clear the halt flag and backfill bookkeeping.
    async fn unhalt_jar(&self, jar_id: &JarId) -> Result<()>;
}
