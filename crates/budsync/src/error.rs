//! Top-level error type for the budsync facade.

use thiserror::Error;

use budsync_core::EncoderError;
use budsync_relay::RelayError;
use budsync_store::StoreError;
use budsync_sync::SyncError;

/// Errors surfaced by the facade operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Encoder(#[from] EncoderError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The relay's acknowledgment disagrees with the locally computed CID.
    #[error("relay ack cid mismatch: local {local}, relay {relay}")]
    AckCidMismatch { local: String, relay: String },
}

/// Result type for facade operations.
pub type Result<T> = std::result::Result<T, Error>;
