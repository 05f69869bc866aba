//! Error types for the seal module.

use thiserror::Error;

/// Errors that can occur while sealing or opening encrypted payloads.
#[derive(Debug, Error)]
pub enum SealError {
    /// AEAD encryption failed.
    #[error("encryption failed: {0}")]
    EncryptFailed(String),

    /// AEAD tag mismatch or ciphertext corruption.
    ///
    /// For a single delivered message this is a drop, not a halt.
    #[error("decryption failed")]
    DecryptFailed,

    /// No wrapped key for this device in the message.
    #[error("no wrapped key for device {0}")]
    UnknownRecipient(String),

    /// A nonce was reused (all-zero sentinel). Defensive check.
    #[error("nonce reuse detected")]
    NonceReuse,

    /// Wrapped key or sealed payload bytes are too short or misshapen.
    #[error("malformed sealed data: {0}")]
    Malformed(String),
}

/// Result type for seal operations.
pub type Result<T> = std::result::Result<T, SealError>;
