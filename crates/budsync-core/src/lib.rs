//! # budsync core
//!
//! Pure primitives for the budsync receipt core: canonical CBOR encoding,
//! content identifiers, signing identity, and the receipt model.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over cryptographic data structures.
//!
//! ## Key Types
//!
//! - [`SignedReceipt`] - An immutable, signed, type-tagged record
//! - [`Cid`] - Content identifier (SHA-256 over canonical preimage bytes)
//! - [`Envelope`] - The relay-assigned wrapper carrying the authoritative
//!   per-jar sequence number
//! - [`ReceiptPayload`] - Tagged union of the known receipt types
//!
//! ## Canonicalization
//!
//! All preimages are encoded with deterministic CBOR; see [`canonical`].
//! The encoding is frozen: any change invalidates existing signatures.

pub mod canonical;
pub mod crypto;
pub mod error;
pub mod payload;
pub mod receipt;
pub mod types;
pub mod validation;

pub use canonical::{canonical_preimage_bytes, decode_preimage, decode_value, encode_canonical};
pub use crypto::{AgreementPublicKey, Ed25519PublicKey, Ed25519Signature, SigningKeypair};
pub use error::{CryptoError, EncoderError, IdError, ValidationError};
pub use payload::{
    receipt_type, BudDeletedPayload, BudSharedPayload, DeviceKeys, InviteAcceptedPayload,
    JarCreatedPayload, JarDeletedPayload, MemberAddedPayload, MemberLeftPayload,
    MemberRemovedPayload, ReceiptPayload, RenamedPayload,
};
pub use receipt::{Envelope, ReceiptBuilder, ReceiptPreimage, SignedReceipt};
pub use types::{Cid, DeviceId, JarId, MemberId};
pub use validation::verify_receipt_bytes;
