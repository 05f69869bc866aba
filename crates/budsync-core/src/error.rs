//! Error types for budsync core.

use thiserror::Error;

/// Errors from canonical CBOR encoding and decoding.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// NaN or infinity in a float value. The canonical form only admits
    /// finite IEEE-754 binary64 values.
    #[error("forbidden float value (NaN or infinity)")]
    ForbiddenFloat,

    /// Integer outside the encodable CBOR range.
    #[error("integer out of range: {0}")]
    IntegerOverflow(i128),

    /// Input is not well-formed canonical CBOR.
    #[error("malformed canonical CBOR: {0}")]
    Malformed(String),
}

/// Errors from signing-key operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("bad signature")]
    BadSignature,

    #[error("invalid public key")]
    InvalidPublicKey,
}

/// Errors from identifier parsing.
#[derive(Debug, Error)]
pub enum IdError {
    #[error("invalid identifier length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("invalid identifier encoding: {0}")]
    InvalidEncoding(String),
}

/// Errors from receipt verification.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The recomputed CID does not match the claimed one.
    #[error("cid mismatch: expected {expected}, computed {computed}")]
    CidMismatch { expected: String, computed: String },

    /// Ed25519 signature verification failed against the pinned key.
    #[error("signature verification failed")]
    SignatureFailed,

    /// The preimage bytes do not decode.
    #[error("malformed receipt: {0}")]
    Malformed(String),
}

impl From<EncoderError> for ValidationError {
    fn from(e: EncoderError) -> Self {
        ValidationError::Malformed(e.to_string())
    }
}

impl From<CryptoError> for ValidationError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::BadSignature | CryptoError::InvalidPublicKey => {
                ValidationError::SignatureFailed
            }
        }
    }
}
