//! # budsync seal
//!
//! End-to-end encryption envelope for per-receipt delivery.
//!
//! ## Encryption Model
//!
//! Sealed content uses a two-layer key model:
//!
//! 1. **Content key**: a fresh 256-bit AES-256-GCM key encrypts the payload,
//!    with the receipt CID as associated data.
//! 2. **Key wraps**: the content key is wrapped once per recipient device
//!    via static-static X25519 agreement and HKDF-SHA256.
//!
//! Unwrapping always uses the TOFU-pinned sender key, so a relay cannot
//! substitute agreement keys without breaking decryption.
//!
//! Forward secrecy and post-compromise security are explicitly out of
//! scope; the agreement keys are long-lived.

pub mod crypto;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod wrap;

pub use crypto::{AgreementSecret, ContentKey, SealNonce, SharedSecret};
pub use envelope::{open_payload, seal_payload, EncryptedMessage};
pub use error::{Result, SealError};
pub use identity::DeviceIdentity;
pub use wrap::{unwrap_content_key, wrap_content_key};
