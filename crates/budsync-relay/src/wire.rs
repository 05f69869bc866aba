//! Wire types for the relay HTTP surface.
//!
//! Field names are wire-exact; do not rename.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use budsync_core::{Cid, Ed25519Signature, Envelope, JarId, MemberId};

use crate::error::RelayError;

/// A relay-delivered envelope as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub jar_id: String,
    pub sequence_number: u64,
    pub receipt_cid: String,
    /// base64 of the canonical CBOR bytes of the signed preimage.
    pub receipt_data: String,
    /// base64 of the 64-byte Ed25519 signature.
    pub signature: String,
    pub sender_did: String,
    /// Relay timestamp (ms). Advisory, not signed.
    pub received_at: i64,
    pub parent_cid: Option<String>,
}

impl WireEnvelope {
    /// Parse into the internal envelope form.
    pub fn into_envelope(self) -> Result<Envelope, RelayError> {
        let jar_id = JarId::parse(&self.jar_id)
            .map_err(|e| RelayError::MalformedResponse(format!("jar_id: {}", e)))?;

        let cid = Cid::parse(&self.receipt_cid)
            .map_err(|e| RelayError::MalformedResponse(format!("receipt_cid: {}", e)))?;

        let preimage_bytes = BASE64
            .decode(&self.receipt_data)
            .map_err(|e| RelayError::MalformedResponse(format!("receipt_data: {}", e)))?;

        let signature_bytes = BASE64
            .decode(&self.signature)
            .map_err(|e| RelayError::MalformedResponse(format!("signature: {}", e)))?;
        let signature: [u8; 64] = signature_bytes.try_into().map_err(|_| {
            RelayError::MalformedResponse("signature must be 64 bytes".to_string())
        })?;

        let parent_cid = self
            .parent_cid
            .map(|s| Cid::parse(&s))
            .transpose()
            .map_err(|e| RelayError::MalformedResponse(format!("parent_cid: {}", e)))?;

        Ok(Envelope {
            jar_id,
            sequence_number: self.sequence_number,
            cid,
            preimage_bytes: Bytes::from(preimage_bytes),
            signature: Ed25519Signature::from_bytes(signature),
            sender_member_id: MemberId::new(self.sender_did),
            received_at_ms: self.received_at,
            parent_cid,
        })
    }

    /// Build the wire form of an internal envelope.
    pub fn from_envelope(envelope: &Envelope) -> Self {
        Self {
            jar_id: envelope.jar_id.to_string(),
            sequence_number: envelope.sequence_number,
            receipt_cid: envelope.cid.to_string(),
            receipt_data: BASE64.encode(&envelope.preimage_bytes),
            signature: BASE64.encode(envelope.signature.as_bytes()),
            sender_did: envelope.sender_member_id.to_string(),
            received_at: envelope.received_at_ms,
            parent_cid: envelope.parent_cid.map(|c| c.to_string()),
        }
    }
}

/// Request body for `POST /api/jars/{jar_id}/receipts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreReceiptRequest {
    pub receipt_data: String,
    pub signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_cid: Option<String>,
}

/// Response body for a stored receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreReceiptResponse {
    pub receipt_cid: String,
    pub sequence_number: u64,
    pub jar_id: String,
}

/// Response body for receipt fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchReceiptsResponse {
    pub receipts: Vec<WireEnvelope>,
}

/// A stored receipt acknowledgment in internal form.
///
/// The relay-assigned sequence number is authoritative; the author's local
/// projection stays pending until the echoed envelope applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredReceipt {
    pub cid: Cid,
    pub sequence_number: u64,
    pub jar_id: JarId,
}

impl StoreReceiptResponse {
    pub fn into_stored(self) -> Result<StoredReceipt, RelayError> {
        Ok(StoredReceipt {
            cid: Cid::parse(&self.receipt_cid)
                .map_err(|e| RelayError::MalformedResponse(format!("receipt_cid: {}", e)))?,
            sequence_number: self.sequence_number,
            jar_id: JarId::parse(&self.jar_id)
                .map_err(|e| RelayError::MalformedResponse(format!("jar_id: {}", e)))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire() -> WireEnvelope {
        let cid = Cid::from_preimage_bytes(b"preimage");
        WireEnvelope {
            jar_id: JarId::from_bytes([0x11; 16]).to_string(),
            sequence_number: 3,
            receipt_cid: cid.to_string(),
            receipt_data: BASE64.encode(b"preimage"),
            signature: BASE64.encode([7u8; 64]),
            sender_did: "did:buds:alice".to_string(),
            received_at: 1_700_000_000_000,
            parent_cid: None,
        }
    }

    #[test]
    fn test_wire_envelope_roundtrip() {
        let envelope = wire().into_envelope().unwrap();
        assert_eq!(envelope.sequence_number, 3);
        assert_eq!(envelope.preimage_bytes.as_ref(), b"preimage");

        let back = WireEnvelope::from_envelope(&envelope);
        assert_eq!(back.receipt_cid, wire().receipt_cid);
        assert_eq!(back.receipt_data, wire().receipt_data);
    }

    #[test]
    fn test_wire_envelope_bad_signature_length() {
        let mut w = wire();
        w.signature = BASE64.encode([7u8; 32]);
        assert!(matches!(
            w.into_envelope(),
            Err(RelayError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_wire_envelope_bad_base64() {
        let mut w = wire();
        w.receipt_data = "!!!not-base64!!!".to_string();
        assert!(matches!(
            w.into_envelope(),
            Err(RelayError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_store_request_omits_absent_parent() {
        let request = StoreReceiptRequest {
            receipt_data: "AA==".to_string(),
            signature: "AA==".to_string(),
            parent_cid: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("parent_cid"));
    }

    #[test]
    fn test_wire_field_names_are_exact() {
        let json = serde_json::to_value(wire()).unwrap();
        for field in [
            "jar_id",
            "sequence_number",
            "receipt_cid",
            "receipt_data",
            "signature",
            "sender_did",
            "received_at",
            "parent_cid",
        ] {
            assert!(json.get(field).is_some(), "missing wire field {}", field);
        }
    }
}
