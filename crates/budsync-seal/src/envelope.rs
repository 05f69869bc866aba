//! Encrypted message envelope for per-device direct delivery.
//!
//! A sealed payload is AES-256-GCM over the plaintext with a fresh content
//! key and `aad = utf8(receipt_cid)`; the content key is wrapped once per
//! recipient device. Wire shape of the sealed payload:
//! `nonce(12) || ciphertext || tag(16)`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use budsync_core::{AgreementPublicKey, Cid, DeviceId, MemberId};

use crate::crypto::{AgreementSecret, ContentKey, SealNonce};
use crate::error::{Result, SealError};
use crate::wrap::{unwrap_content_key, wrap_content_key};

/// Minimum sealed payload: nonce + tag around an empty ciphertext.
const MIN_SEALED_LEN: usize = 12 + 16;

/// Seal a plaintext under a fresh content key, bound to a receipt CID.
///
/// Returns the content key (for wrapping) and the sealed bytes.
pub fn seal_payload(plaintext: &[u8], receipt_cid: &Cid) -> Result<(ContentKey, Vec<u8>)> {
    let key = ContentKey::generate();
    let nonce = SealNonce::generate();
    let aad = receipt_cid.to_string();

    let ciphertext = key.seal(plaintext, &nonce, aad.as_bytes())?;

    let mut sealed = Vec::with_capacity(12 + ciphertext.len());
    sealed.extend_from_slice(nonce.as_bytes());
    sealed.extend_from_slice(&ciphertext);
    Ok((key, sealed))
}

/// Open a sealed payload with a recovered content key.
pub fn open_payload(key: &ContentKey, receipt_cid: &Cid, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < MIN_SEALED_LEN {
        return Err(SealError::Malformed(format!(
            "sealed payload too short: {} bytes",
            sealed.len()
        )));
    }

    let mut nonce_bytes = [0u8; 12];
    nonce_bytes.copy_from_slice(&sealed[..12]);
    let nonce = SealNonce::from_bytes(nonce_bytes);
    let aad = receipt_cid.to_string();

    key.open(&sealed[12..], &nonce, aad.as_bytes())
}

/// The outer JSON envelope for per-device delivery.
///
/// Field names are wire-exact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMessage {
    pub message_id: String,
    /// The CID being delivered; also the AAD of the sealed payload.
    pub receipt_cid: String,
    /// base64 of `nonce || ciphertext || tag`.
    pub encrypted_payload: String,
    /// device id -> base64 of `wrap_nonce || wrap_ciphertext || wrap_tag`.
    pub wrapped_keys: BTreeMap<String, String>,
    pub sender_did: String,
    pub sender_device_id: String,
    pub created_at: i64,
    /// base64 of the receipt's Ed25519 signature (the same signature that
    /// is in the receipt itself).
    pub signature: String,
}

impl EncryptedMessage {
    /// Seal a plaintext for a set of recipient devices.
    #[allow(clippy::too_many_arguments)]
    pub fn seal(
        message_id: String,
        receipt_cid: &Cid,
        plaintext: &[u8],
        sender_member_id: &MemberId,
        sender_device_id: DeviceId,
        sender_agreement: &AgreementSecret,
        recipients: &[(DeviceId, AgreementPublicKey)],
        receipt_signature: &[u8],
        created_at: i64,
    ) -> Result<Self> {
        let (content_key, sealed) = seal_payload(plaintext, receipt_cid)?;

        let mut wrapped_keys = BTreeMap::new();
        for (device_id, agree_key) in recipients {
            let wrapped = wrap_content_key(sender_agreement, agree_key, &content_key)?;
            wrapped_keys.insert(device_id.to_string(), BASE64.encode(wrapped));
        }

        Ok(Self {
            message_id,
            receipt_cid: receipt_cid.to_string(),
            encrypted_payload: BASE64.encode(sealed),
            wrapped_keys,
            sender_did: sender_member_id.to_string(),
            sender_device_id: sender_device_id.to_string(),
            created_at,
            signature: BASE64.encode(receipt_signature),
        })
    }

    /// Open this message as the given recipient device.
    ///
    /// `pinned_sender_agree` must be the TOFU-pinned agreement key for
    /// `(sender_did, sender_device_id)`; the wire never chooses the key.
    pub fn open(
        &self,
        recipient_device_id: DeviceId,
        recipient_agreement: &AgreementSecret,
        pinned_sender_agree: &AgreementPublicKey,
    ) -> Result<Vec<u8>> {
        let device_key = recipient_device_id.to_string();
        let wrapped_b64 = self
            .wrapped_keys
            .get(&device_key)
            .ok_or(SealError::UnknownRecipient(device_key))?;

        let wrapped = BASE64
            .decode(wrapped_b64)
            .map_err(|e| SealError::Malformed(format!("wrapped key base64: {}", e)))?;

        let content_key =
            unwrap_content_key(recipient_agreement, pinned_sender_agree, &wrapped)?;

        let sealed = BASE64
            .decode(&self.encrypted_payload)
            .map_err(|e| SealError::Malformed(format!("payload base64: {}", e)))?;

        let cid = Cid::parse(&self.receipt_cid)
            .map_err(|e| SealError::Malformed(format!("receipt_cid: {}", e)))?;

        open_payload(&content_key, &cid, &sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid() -> Cid {
        Cid::from_preimage_bytes(b"some receipt")
    }

    #[test]
    fn test_seal_open_payload_roundtrip() {
        let (key, sealed) = seal_payload(b"bud photo bytes", &cid()).unwrap();
        let opened = open_payload(&key, &cid(), &sealed).unwrap();
        assert_eq!(opened, b"bud photo bytes");
    }

    #[test]
    fn test_open_payload_wrong_cid_fails() {
        let (key, sealed) = seal_payload(b"plaintext", &cid()).unwrap();
        let other = Cid::from_preimage_bytes(b"another receipt");
        assert!(open_payload(&key, &other, &sealed).is_err());
    }

    #[test]
    fn test_message_multi_device_roundtrip() {
        let sender = AgreementSecret::generate();
        let dev_a = AgreementSecret::generate();
        let dev_b = AgreementSecret::generate();
        let id_a = DeviceId::from_bytes([0xaa; 16]);
        let id_b = DeviceId::from_bytes([0xbb; 16]);

        let message = EncryptedMessage::seal(
            "msg-1".to_string(),
            &cid(),
            b"shared secret content",
            &MemberId::new("m1"),
            DeviceId::from_bytes([0x01; 16]),
            &sender,
            &[
                (id_a, dev_a.public_key()),
                (id_b, dev_b.public_key()),
            ],
            &[0u8; 64],
            1_700_000_000_000,
        )
        .unwrap();

        assert_eq!(message.wrapped_keys.len(), 2);

        let opened_a = message.open(id_a, &dev_a, &sender.public_key()).unwrap();
        let opened_b = message.open(id_b, &dev_b, &sender.public_key()).unwrap();
        assert_eq!(opened_a, b"shared secret content");
        assert_eq!(opened_b, b"shared secret content");
    }

    #[test]
    fn test_message_unknown_recipient() {
        let sender = AgreementSecret::generate();
        let dev_a = AgreementSecret::generate();
        let id_a = DeviceId::from_bytes([0xaa; 16]);
        let id_other = DeviceId::from_bytes([0xcc; 16]);

        let message = EncryptedMessage::seal(
            "msg-2".to_string(),
            &cid(),
            b"content",
            &MemberId::new("m1"),
            DeviceId::from_bytes([0x01; 16]),
            &sender,
            &[(id_a, dev_a.public_key())],
            &[0u8; 64],
            0,
        )
        .unwrap();

        let result = message.open(id_other, &dev_a, &sender.public_key());
        assert!(matches!(result, Err(SealError::UnknownRecipient(_))));
    }

    #[test]
    fn test_message_json_roundtrip() {
        let sender = AgreementSecret::generate();
        let dev_a = AgreementSecret::generate();
        let id_a = DeviceId::from_bytes([0xaa; 16]);

        let message = EncryptedMessage::seal(
            "msg-3".to_string(),
            &cid(),
            b"content",
            &MemberId::new("m1"),
            DeviceId::from_bytes([0x01; 16]),
            &sender,
            &[(id_a, dev_a.public_key())],
            &[7u8; 64],
            42,
        )
        .unwrap();

        let json = serde_json::to_string(&message).unwrap();
        let recovered: EncryptedMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(message, recovered);

        let opened = recovered.open(id_a, &dev_a, &sender.public_key()).unwrap();
        assert_eq!(opened, b"content");
    }
}
