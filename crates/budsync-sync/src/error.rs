//! Error taxonomy for the sync engine.
//!
//! Transient failures retry; skip-and-log cases are outcomes, not errors;
//! hard local faults halt the jar; security alarms must reach the user.

use thiserror::Error;

use budsync_core::{Cid, DeviceId, JarId, MemberId};
use budsync_relay::RelayError;
use budsync_store::{StoreError, TofuError};

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The jar is halted; envelopes are rejected until manual unhalt.
    #[error("jar {jar_id} is halted: {reason}")]
    Halted { jar_id: JarId, reason: String },

    /// Recomputed CID does not match the envelope's claimed CID.
    #[error("cid mismatch: claimed {claimed}, computed {computed}")]
    CidMismatch { claimed: Cid, computed: Cid },

    /// Ed25519 verification failed against the pinned key.
    #[error("bad signature from ({member_id}, {device_id})")]
    BadSignature {
        member_id: MemberId,
        device_id: DeviceId,
    },

    /// No pinned key for the sender's device.
    ///
    /// Legitimate only before the sender's `jar.member_added` has applied;
    /// gap analysis queues those cases naturally.
    #[error("no pinned key for ({member_id}, {device_id})")]
    UnpinnedDevice {
        member_id: MemberId,
        device_id: DeviceId,
    },

    /// Two envelopes claimed the same `(jar_id, sequence_number)` with
    /// different CIDs: relay forgery or storage corruption. Halts the jar.
    #[error(
        "sequence cid mismatch for jar {jar_id} seq {sequence_number}: \
         existing {existing}, incoming {incoming}"
    )]
    SequenceCidMismatch {
        jar_id: JarId,
        sequence_number: u64,
        existing: Cid,
        incoming: Cid,
    },

    /// Receipt type this build does not recognize (strict policy).
    #[error("unknown receipt type: {0}")]
    UnknownType(String),

    /// The receipt bytes or payload do not decode.
    #[error("malformed receipt: {0}")]
    Malformed(String),

    /// A handler constraint failed. Retryable; repeated failure poisons.
    #[error("processing failed: {0}")]
    Processing(String),

    /// A queued receipt was poisoned and the jar halted.
    #[error("jar {jar_id} poisoned at seq {sequence_number}: {reason}")]
    Poisoned {
        jar_id: JarId,
        sequence_number: u64,
        reason: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Tofu(#[from] TofuError),

    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl SyncError {
    /// Hard local faults require operator action; everything else is
    /// transient or per-receipt.
    pub fn is_hard_fault(&self) -> bool {
        matches!(
            self,
            SyncError::SequenceCidMismatch { .. }
                | SyncError::Poisoned { .. }
                | SyncError::UnknownType(_)
                | SyncError::Tofu(TofuError::KeyMismatch { .. })
                | SyncError::Store(StoreError::ProcessedCidMismatch { .. })
                | SyncError::Store(StoreError::TofuMismatch { .. })
        )
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
