//! # budsync sync
//!
//! The per-jar sync engine: the heart of the receipt core.
//!
//! ## Guarantees
//!
//! - **Strict order**: receipts apply in relay-assigned sequence order;
//!   the applied prefix never has gaps.
//! - **Verified before queued**: gap-queued receipts have already passed
//!   CID and signature checks, so the queue cannot be flooded with junk.
//! - **Poison halts, never skips**: a receipt that cannot apply after the
//!   retry/age threshold halts the jar with a user-visible reason.
//! - **Corruption detection**: two envelopes claiming one sequence with
//!   different CIDs halt the jar immediately.
//!
//! ## Concurrency
//!
//! One drain and one backfill may be in flight per jar, enforced by
//! in-memory guards with expiry timestamps. Writes within one jar are
//! serialized; jars advance independently.

pub mod engine;
pub mod error;
pub mod guards;
pub mod handlers;

pub use engine::{
    BackfillOutcome, BatchReport, IngestOutcome, SyncConfig, SyncEngine, UnknownTypePolicy,
};
pub use error::{Result, SyncError};
pub use guards::{ClaimOutcome, SyncGuards};
pub use handlers::{plan_mutations, HandlerContext, HandlerError};
