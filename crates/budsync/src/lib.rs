//! # budsync
//!
//! Signed-receipt synchronization core for a private, multi-device,
//! content-sharing application. Members form small groups ("jars") and
//! exchange content as cryptographically signed, content-addressed
//! receipts through an untrusted sequencing relay.
//!
//! ## Guarantees
//!
//! 1. **Signature-verified**: every applied receipt verified against a
//!    TOFU-pinned device key.
//! 2. **Causally consistent**: receipts apply in relay-assigned sequence
//!    order; the applied prefix never has gaps.
//! 3. **Out-of-order resilient**: gaps queue, backfill, and converge.
//! 4. **Halts on poison**: unresolvable receipts halt the jar with a
//!    user-visible reason instead of silently diverging.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use budsync::{Context, DeviceIdentity, SyncConfig};
//! use budsync_relay::{HttpRelay, RelayConfig, StaticTokenProvider};
//! use budsync_store::SqliteStore;
//!
//! # async fn example() -> budsync::Result<()> {
//! let store = Arc::new(SqliteStore::open("budsync.db")?);
//! let relay = Arc::new(HttpRelay::new(
//!     RelayConfig::new("https://relay.example.com"),
//!     StaticTokenProvider::new("token"),
//! )?);
//! let context = Context::new(
//!     DeviceIdentity::generate(),
//!     store,
//!     relay,
//!     SyncConfig::default(),
//! );
//!
//! let (jar_id, _ack) = context.create_jar("Friends", None, 1_700_000_000_000).await?;
//! context.poll_jar(jar_id).await?;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod error;

pub use context::Context;
pub use error::{Error, Result};

pub use budsync_core::{
    receipt_type, Cid, DeviceId, DeviceKeys, Envelope, JarId, MemberId, ReceiptBuilder,
    ReceiptPayload, SignedReceipt, SigningKeypair,
};
pub use budsync_relay::{HttpRelay, MemoryRelay, Relay, RelayConfig, StoredReceipt};
pub use budsync_seal::{DeviceIdentity, EncryptedMessage};
pub use budsync_store::{MemoryStore, SqliteStore, Store, TofuRegistry};
pub use budsync_sync::{BatchReport, IngestOutcome, SyncConfig, SyncEngine, SyncError};
