//! Per-recipient key wrapping via X25519 key agreement.
//!
//! The content key for a sealed payload is wrapped once per recipient
//! device: a static-static X25519 agreement between the sender's and the
//! recipient's agreement keys, run through HKDF-SHA256, keys an AES-GCM
//! encryption of the content key.
//!
//! Wire shape: `wrap_nonce(12) || wrap_ciphertext || wrap_tag(16)`.

use budsync_core::AgreementPublicKey;

use crate::crypto::{AgreementSecret, ContentKey, SealNonce};
use crate::error::{Result, SealError};

/// Minimum wrapped blob: nonce + tag around an empty ciphertext.
const MIN_WRAPPED_LEN: usize = 12 + 16;

/// Wrap a content key for one recipient device.
pub fn wrap_content_key(
    sender_secret: &AgreementSecret,
    recipient_agree: &AgreementPublicKey,
    content_key: &ContentKey,
) -> Result<Vec<u8>> {
    let shared = sender_secret.diffie_hellman(recipient_agree);
    let wrap_key = shared.derive_wrap_key();
    let wrap_nonce = SealNonce::generate();

    let ciphertext = wrap_key.seal(content_key.as_bytes(), &wrap_nonce, b"")?;

    let mut out = Vec::with_capacity(12 + ciphertext.len());
    out.extend_from_slice(wrap_nonce.as_bytes());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Unwrap a content key with the recipient's agreement secret.
///
/// The sender's agreement key must come from the TOFU registry, never from
/// the wire envelope's claimed key.
pub fn unwrap_content_key(
    recipient_secret: &AgreementSecret,
    pinned_sender_agree: &AgreementPublicKey,
    wrapped: &[u8],
) -> Result<ContentKey> {
    if wrapped.len() < MIN_WRAPPED_LEN {
        return Err(SealError::Malformed(format!(
            "wrapped key too short: {} bytes",
            wrapped.len()
        )));
    }

    let mut nonce_bytes = [0u8; 12];
    nonce_bytes.copy_from_slice(&wrapped[..12]);
    let wrap_nonce = SealNonce::from_bytes(nonce_bytes);

    let shared = recipient_secret.diffie_hellman(pinned_sender_agree);
    let wrap_key = shared.derive_wrap_key();

    let key_bytes = wrap_key.open(&wrapped[12..], &wrap_nonce, b"")?;
    if key_bytes.len() != 32 {
        return Err(SealError::Malformed(format!(
            "unwrapped key has invalid length: {}",
            key_bytes.len()
        )));
    }

    let mut arr = [0u8; 32];
    arr.copy_from_slice(&key_bytes);
    Ok(ContentKey::from_bytes(arr))
}
