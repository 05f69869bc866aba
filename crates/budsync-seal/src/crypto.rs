//! Cryptographic utilities for sealed delivery.
//!
//! Provides X25519 key agreement, HKDF-SHA256 wrap-key derivation, and
//! AES-256-GCM authenticated encryption behind strong types.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

use budsync_core::AgreementPublicKey;

use crate::error::{Result, SealError};

/// HKDF info string for key wrapping. Frozen.
const WRAP_INFO: &[u8] = b"buds.wrap.v1";

/// An X25519 static secret for key agreement.
///
/// Long-lived, one per device. Unlike the signing key it never signs
/// anything; it only derives shared secrets.
pub struct AgreementSecret(StaticSecret);

impl AgreementSecret {
    /// Generate a new random secret.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self(StaticSecret::from(bytes))
    }

    /// Create from seed bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Get the raw secret bytes (for keystore adapters).
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Derive the public key.
    pub fn public_key(&self) -> AgreementPublicKey {
        AgreementPublicKey(*PublicKey::from(&self.0).as_bytes())
    }

    /// Perform key agreement with a peer's public key.
    pub fn diffie_hellman(&self, peer: &AgreementPublicKey) -> SharedSecret {
        let shared = self.0.diffie_hellman(&PublicKey::from(*peer.as_bytes()));
        SharedSecret(*shared.as_bytes())
    }
}

/// A shared secret from X25519 key agreement.
#[derive(Clone)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derive the wrap key: HKDF-SHA256 with empty salt and the frozen
    /// `buds.wrap.v1` info string.
    pub fn derive_wrap_key(&self) -> ContentKey {
        let hk = Hkdf::<Sha256>::new(None, &self.0);
        let mut okm = [0u8; 32];
        // 32-byte output for SHA-256 HKDF cannot fail.
        hk.expand(WRAP_INFO, &mut okm)
            .unwrap_or_else(|_| unreachable!("HKDF expand with 32-byte output"));
        ContentKey(okm)
    }
}

/// A 256-bit symmetric key for AES-256-GCM.
#[derive(Clone)]
pub struct ContentKey([u8; 32]);

impl ContentKey {
    /// Draw a fresh random key.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encrypt with this key. Output is ciphertext plus the 16-byte tag.
    pub fn seal(&self, plaintext: &[u8], nonce: &SealNonce, aad: &[u8]) -> Result<Vec<u8>> {
        if nonce.0 == [0u8; 12] {
            return Err(SealError::NonceReuse);
        }
        let cipher = Aes256Gcm::new_from_slice(&self.0)
            .map_err(|e| SealError::EncryptFailed(e.to_string()))?;

        cipher
            .encrypt(
                Nonce::from_slice(&nonce.0),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| SealError::EncryptFailed(e.to_string()))
    }

    /// Decrypt with this key. Fails on any tag mismatch.
    pub fn open(&self, ciphertext: &[u8], nonce: &SealNonce, aad: &[u8]) -> Result<Vec<u8>> {
        let cipher =
            Aes256Gcm::new_from_slice(&self.0).map_err(|_| SealError::DecryptFailed)?;

        cipher
            .decrypt(
                Nonce::from_slice(&nonce.0),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| SealError::DecryptFailed)
    }
}

/// A 96-bit AES-GCM nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealNonce(pub [u8; 12]);

impl SealNonce {
    /// Draw a fresh random nonce.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut bytes = [0u8; 12];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}
