//! Error types for the store module.

use thiserror::Error;

use budsync_core::{Cid, DeviceId, JarId, MemberId};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A `(jar_id, sequence_number)` row exists with a different CID.
    ///
    /// This is a corruption signal (relay forgery or storage damage) and
    /// must surface to the caller as a hard error.
    #[error(
        "processed receipt cid mismatch for jar {jar_id} seq {sequence_number}: \
         existing {existing}, incoming {incoming}"
    )]
    ProcessedCidMismatch {
        jar_id: JarId,
        sequence_number: u64,
        existing: Cid,
        incoming: Cid,
    },

    /// A device pin exists with different keys. Security-critical.
    #[error("tofu key mismatch for ({member_id}, {device_id})")]
    TofuMismatch {
        member_id: MemberId,
        device_id: DeviceId,
    },

    /// The jar is tombstoned; projection mutations are rejected.
    #[error("jar {0} is tombstoned")]
    Tombstoned(JarId),

    /// Row not found where one was required.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Blocking storage task failed to complete.
    #[error("storage task failed: {0}")]
    Task(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors from the TOFU device registry.
#[derive(Debug, Error)]
pub enum TofuError {
    /// Keys differ from the pinned ones. This must propagate to the user,
    /// never be silently reconciled.
    #[error("key mismatch for pinned device ({member_id}, {device_id})")]
    KeyMismatch {
        member_id: MemberId,
        device_id: DeviceId,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}
