//! Receipt: the atomic unit of state change.
//!
//! A receipt is an immutable, signed, type-tagged record. Once created it
//! cannot be edited; an edit is a new receipt whose `parent_cid` points at
//! the prior version and whose `root_cid` names the head of the chain.

use bytes::Bytes;
use ciborium::value::Value;
use std::fmt;

use crate::canonical::{canonical_preimage_bytes, decode_preimage};
use crate::crypto::{Ed25519Signature, SigningKeypair};
use crate::error::EncoderError;
use crate::payload::ReceiptPayload;
use crate::types::{Cid, DeviceId, JarId, MemberId};

/// The unsigned preimage of a receipt.
///
/// The canonical CBOR encoding of this struct is what gets signed and what
/// the CID is computed over. The relay-assigned sequence number is never
/// part of it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiptPreimage {
    pub author_member_id: MemberId,
    pub author_device_id: DeviceId,
    /// Prior version in an edit chain. None for a fresh record.
    pub parent_cid: Option<Cid>,
    /// First CID of the chain. None on the chain head, which cannot contain
    /// its own CID.
    pub root_cid: Option<Cid>,
    /// Versioned type tag, e.g. `jar.bud_shared/v1`.
    pub receipt_type: String,
    /// Type-specific payload map.
    pub payload: Value,
}

/// A receipt together with its canonical bytes, CID and signature.
#[derive(Clone, PartialEq)]
pub struct SignedReceipt {
    pub preimage: ReceiptPreimage,
    /// The exact canonical bytes the CID and signature bind to.
    pub preimage_bytes: Bytes,
    pub cid: Cid,
    pub signature: Ed25519Signature,
}

impl SignedReceipt {
    /// Reconstruct a receipt from wire bytes and signature.
    ///
    /// The CID is recomputed from the bytes; nothing is verified here.
    pub fn from_wire(
        preimage_bytes: Bytes,
        signature: Ed25519Signature,
    ) -> Result<Self, EncoderError> {
        let preimage = decode_preimage(&preimage_bytes)?;
        let cid = Cid::from_preimage_bytes(&preimage_bytes);
        Ok(Self {
            preimage,
            preimage_bytes,
            cid,
            signature,
        })
    }

    /// Parse the typed payload.
    pub fn payload(&self) -> Result<ReceiptPayload, EncoderError> {
        ReceiptPayload::from_parts(&self.preimage.receipt_type, &self.preimage.payload)
    }

    pub fn receipt_type(&self) -> &str {
        &self.preimage.receipt_type
    }

    pub fn author_member_id(&self) -> &MemberId {
        &self.preimage.author_member_id
    }

    pub fn author_device_id(&self) -> DeviceId {
        self.preimage.author_device_id
    }
}

impl fmt::Debug for SignedReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedReceipt")
            .field("cid", &self.cid)
            .field("receipt_type", &self.preimage.receipt_type)
            .field("author", &self.preimage.author_member_id)
            .field("len", &self.preimage_bytes.len())
            .finish()
    }
}

/// Builder for creating signed receipts.
pub struct ReceiptBuilder {
    author_member_id: MemberId,
    author_device_id: DeviceId,
    parent_cid: Option<Cid>,
    root_cid: Option<Cid>,
    receipt_type: String,
    payload: Value,
}

impl ReceiptBuilder {
    /// Start building a receipt authored by the given device.
    pub fn new(author_member_id: MemberId, author_device_id: DeviceId) -> Self {
        Self {
            author_member_id,
            author_device_id,
            parent_cid: None,
            root_cid: None,
            receipt_type: String::new(),
            payload: Value::Map(Vec::new()),
        }
    }

    /// Point at the prior version of an edit chain.
    pub fn parent(mut self, parent: Cid) -> Self {
        self.parent_cid = Some(parent);
        self
    }

    /// Name the chain head.
    pub fn root(mut self, root: Cid) -> Self {
        self.root_cid = Some(root);
        self
    }

    /// Set a typed payload (sets the receipt type tag too).
    pub fn payload(mut self, payload: &ReceiptPayload) -> Self {
        self.receipt_type = payload.receipt_type().to_string();
        self.payload = payload.to_value();
        self
    }

    /// Set a raw payload map under an explicit type tag.
    pub fn raw_payload(mut self, receipt_type: impl Into<String>, payload: Value) -> Self {
        self.receipt_type = receipt_type.into();
        self.payload = payload;
        self
    }

    /// Encode, hash and sign.
    ///
    /// The signature covers the exact canonical bytes that produced the CID.
    pub fn sign(self, keypair: &SigningKeypair) -> Result<SignedReceipt, EncoderError> {
        let preimage = ReceiptPreimage {
            author_member_id: self.author_member_id,
            author_device_id: self.author_device_id,
            parent_cid: self.parent_cid,
            root_cid: self.root_cid,
            receipt_type: self.receipt_type,
            payload: self.payload,
        };

        let bytes = canonical_preimage_bytes(&preimage)?;
        let cid = Cid::from_preimage_bytes(&bytes);
        let signature = keypair.sign(&bytes);

        Ok(SignedReceipt {
            preimage,
            preimage_bytes: Bytes::from(bytes),
            cid,
            signature,
        })
    }
}

/// A relay-assigned envelope around a signed receipt.
///
/// The sequence number is authoritative; the relay assigns it when it
/// accepts the receipt for a jar, and it is never inside the signed bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub jar_id: JarId,
    pub sequence_number: u64,
    pub cid: Cid,
    pub preimage_bytes: Bytes,
    pub signature: Ed25519Signature,
    pub sender_member_id: MemberId,
    /// Relay timestamp, advisory only (not signed).
    pub received_at_ms: i64,
    pub parent_cid: Option<Cid>,
}

impl Envelope {
    /// Reconstruct the signed receipt carried by this envelope.
    pub fn receipt(&self) -> Result<SignedReceipt, EncoderError> {
        SignedReceipt::from_wire(self.preimage_bytes.clone(), self.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{BudSharedPayload, ReceiptPayload};

    fn builder() -> ReceiptBuilder {
        ReceiptBuilder::new(MemberId::new("m1"), DeviceId::from_bytes([0x01; 16]))
    }

    #[test]
    fn test_build_and_recompute_cid() {
        let keypair = SigningKeypair::from_seed(&[0x42; 32]);
        let receipt = builder()
            .payload(&ReceiptPayload::BudShared(BudSharedPayload {
                bud_uuid: "B1".to_string(),
                caption: None,
                shared_at_ms: 1000,
            }))
            .sign(&keypair)
            .unwrap();

        assert_eq!(
            receipt.cid,
            Cid::from_preimage_bytes(&receipt.preimage_bytes)
        );
        assert_eq!(receipt.receipt_type(), "jar.bud_shared/v1");
    }

    #[test]
    fn test_wire_roundtrip() {
        let keypair = SigningKeypair::from_seed(&[0x42; 32]);
        let receipt = builder()
            .parent(Cid::from_preimage_bytes(b"prev"))
            .root(Cid::from_preimage_bytes(b"head"))
            .payload(&ReceiptPayload::Renamed(crate::payload::RenamedPayload {
                name: "new name".to_string(),
            }))
            .sign(&keypair)
            .unwrap();

        let recovered =
            SignedReceipt::from_wire(receipt.preimage_bytes.clone(), receipt.signature).unwrap();

        assert_eq!(receipt.cid, recovered.cid);
        assert_eq!(receipt.preimage, recovered.preimage);
    }

    #[test]
    fn test_cid_deterministic() {
        let keypair = SigningKeypair::from_seed(&[0x42; 32]);
        let make = || {
            builder()
                .payload(&ReceiptPayload::Renamed(crate::payload::RenamedPayload {
                    name: "x".to_string(),
                }))
                .sign(&keypair)
                .unwrap()
        };
        assert_eq!(make().cid, make().cid);
    }

    #[test]
    fn test_different_payload_different_cid() {
        let keypair = SigningKeypair::from_seed(&[0x42; 32]);
        let a = builder()
            .payload(&ReceiptPayload::Renamed(crate::payload::RenamedPayload {
                name: "a".to_string(),
            }))
            .sign(&keypair)
            .unwrap();
        let b = builder()
            .payload(&ReceiptPayload::Renamed(crate::payload::RenamedPayload {
                name: "b".to_string(),
            }))
            .sign(&keypair)
            .unwrap();
        assert_ne!(a.cid, b.cid);
    }

    #[test]
    fn test_typed_payload_parse() {
        let keypair = SigningKeypair::from_seed(&[0x42; 32]);
        let receipt = builder()
            .payload(&ReceiptPayload::BudShared(BudSharedPayload {
                bud_uuid: "B7".to_string(),
                caption: Some("sunset".to_string()),
                shared_at_ms: 5,
            }))
            .sign(&keypair)
            .unwrap();

        match receipt.payload().unwrap() {
            ReceiptPayload::BudShared(p) => {
                assert_eq!(p.bud_uuid, "B7");
                assert_eq!(p.caption.as_deref(), Some("sunset"));
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }
}
