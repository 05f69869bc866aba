//! # budsync relay
//!
//! Thin, authenticated client for the sequencing relay. The relay is
//! untrusted for content integrity; every receipt verifies locally before
//! it touches a projection. It is trusted only to assign per-jar sequence
//! numbers, and even that assignment is cross-checked against the
//! processed-sequence index.
//!
//! ## Operations
//!
//! - [`Relay::store_receipt`] - submit an unsequenced receipt
//! - [`Relay::fetch_after`] - poll for envelopes past a sequence
//! - [`Relay::fetch_range`] - backfill an inclusive sequence range
//!
//! All requests carry `Authorization: Bearer <token>` from a
//! [`TokenProvider`] (the phone-number auth provider lives outside this
//! core).

pub mod client;
pub mod error;
pub mod memory;
pub mod wire;

pub use client::{HttpRelay, Relay, RelayConfig, StaticTokenProvider, TokenProvider};
pub use error::{RelayError, Result};
pub use memory::MemoryRelay;
pub use wire::{
    FetchReceiptsResponse, StoreReceiptRequest, StoreReceiptResponse, StoredReceipt, WireEnvelope,
};
