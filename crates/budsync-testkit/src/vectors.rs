//! Golden test vectors for cross-implementation verification.
//!
//! The canonical encoding is frozen: any implementation must produce these
//! exact bytes for these preimages. A change that alters either hex
//! invalidates all signatures in production and requires a dual-version
//! migration.

use ciborium::value::Value;

use budsync_core::{canonical_preimage_bytes, Cid, DeviceId, MemberId, ReceiptPreimage};

/// The CID string for the digest `[0xab; 32]`, used by the full vector's
/// `parent_cid`.
pub const PARENT_CID_AB: &str =
    "bciqkxk5lvov2xk5lvov2xk5lvov2xk5lvov2xk5lvov2xk5lvov2xky";

/// Pinned canonical hex of the minimal preimage.
pub const MINIMAL_PREIMAGE_HEX: &str = concat!(
    "a4",
    "677061796c6f6164",
    "a0",
    "6c726563656970745f74797065",
    "67746573742f7631",
    "70617574686f725f6465766963655f6964",
    "7824",
    "30303030303030302d303030302d303030302d303030302d303030303030303030303031",
    "70617574686f725f6d656d6265725f6964",
    "626d31",
);

/// Pinned canonical hex of the full preimage.
pub const FULL_PREIMAGE_HEX: &str = concat!(
    "a5",
    // payload
    "677061796c6f6164",
    "ac",
    "6162420102",                 // "b": h'0102'
    "6166fb3ff8000000000000",     // "f": 1.5
    "616e3829",                   // "n": -42
    "61736368656a",               // "s": "hej"
    "62693000",                   // "i0": 0
    "62693117",                   // "i1": 23
    "6269321818",                 // "i2": 24
    "6269331903e8",               // "i3": 1000
    "6269341a000186a0",           // "i4": 100000
    "6269351b000000012a05f200",   // "i5": 5000000000
    "626f6bf5",                   // "ok": true
    "647461677382616102",         // "tags": ["a", 2]
    // parent_cid
    "6a706172656e745f636964",
    "7838",
    "626369716b786b356c",
    "766f7632786b356c",
    "766f7632786b356c",
    "766f7632786b356c",
    "766f7632786b356c",
    "766f7632786b356c",
    "766f7632786b79",
    // receipt_type
    "6c746573742f66756c6c2f7631",
    // author_device_id
    "70617574686f725f6465766963655f6964",
    "7824",
    "30303030303030302d303030302d303030302d303030302d303030303030303030303032",
    // author_member_id
    "70617574686f725f6d656d6265725f6964",
    "6e6469643a627564733a616c696365",
);

/// A single golden vector: a preimage plus its frozen canonical hex.
pub struct GoldenVector {
    pub name: &'static str,
    pub description: &'static str,
    pub preimage: ReceiptPreimage,
    pub canonical_hex: &'static str,
}

fn device_id(last: u8) -> DeviceId {
    let mut bytes = [0u8; 16];
    bytes[15] = last;
    DeviceId::from_bytes(bytes)
}

/// The minimal receipt: every optional omitted, empty payload.
pub fn minimal_vector() -> GoldenVector {
    GoldenVector {
        name: "minimal",
        description: "no optionals, empty payload map",
        preimage: ReceiptPreimage {
            author_member_id: MemberId::new("m1"),
            author_device_id: device_id(1),
            parent_cid: None,
            root_cid: None,
            receipt_type: "test/v1".to_string(),
            payload: Value::Map(Vec::new()),
        },
        canonical_hex: MINIMAL_PREIMAGE_HEX,
    }
}

/// The full receipt: strings, every integer width, a float, a byte string,
/// a bool, an array, a present optional and an omitted one.
///
/// Payload entries are deliberately scrambled; the encoder must sort them.
pub fn full_vector() -> GoldenVector {
    let payload = Value::Map(vec![
        entry("tags", Value::Array(vec![Value::Text("a".to_string()), Value::Integer(2.into())])),
        entry("i5", Value::Integer(5_000_000_000i64.into())),
        entry("b", Value::Bytes(vec![0x01, 0x02])),
        entry("ok", Value::Bool(true)),
        entry("f", Value::Float(1.5)),
        entry("i0", Value::Integer(0.into())),
        entry("s", Value::Text("hej".to_string())),
        entry("n", Value::Integer((-42).into())),
        entry("i2", Value::Integer(24.into())),
        entry("i1", Value::Integer(23.into())),
        entry("i4", Value::Integer(100_000.into())),
        entry("i3", Value::Integer(1_000.into())),
    ]);

    GoldenVector {
        name: "full",
        description: "every field type, scrambled payload entry order",
        preimage: ReceiptPreimage {
            author_member_id: MemberId::new("did:buds:alice"),
            author_device_id: device_id(2),
            parent_cid: Some(Cid::from_bytes([0xab; 32])),
            root_cid: None,
            receipt_type: "test/full/v1".to_string(),
            payload,
        },
        canonical_hex: FULL_PREIMAGE_HEX,
    }
}

/// All shipped vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![minimal_vector(), full_vector()]
}

/// Check every vector against its pinned hex.
pub fn verify_all_vectors() -> Result<(), String> {
    for vector in all_vectors() {
        let bytes = canonical_preimage_bytes(&vector.preimage)
            .map_err(|e| format!("{}: encode failed: {}", vector.name, e))?;
        let hex = hex::encode(&bytes);
        if hex != vector.canonical_hex {
            return Err(format!(
                "{}: canonical bytes diverged from pinned hex\n  expected: {}\n  got:      {}",
                vector.name, vector.canonical_hex, hex
            ));
        }
    }
    Ok(())
}

fn entry(key: &str, value: Value) -> (Value, Value) {
    (Value::Text(key.to_string()), value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use budsync_core::decode_preimage;

    #[test]
    fn test_parent_cid_constant_matches_display() {
        assert_eq!(Cid::from_bytes([0xab; 32]).to_string(), PARENT_CID_AB);
        assert_eq!(Cid::parse(PARENT_CID_AB).unwrap(), Cid::from_bytes([0xab; 32]));
    }

    #[test]
    fn test_vectors_match_pinned_hex() {
        verify_all_vectors().unwrap();
    }

    #[test]
    fn test_vectors_roundtrip() {
        for vector in all_vectors() {
            let bytes = canonical_preimage_bytes(&vector.preimage).unwrap();
            let decoded = decode_preimage(&bytes).unwrap();
            let reencoded = canonical_preimage_bytes(&decoded).unwrap();
            assert_eq!(
                hex::encode(reencoded),
                vector.canonical_hex,
                "roundtrip diverged for {}",
                vector.name
            );
        }
    }

    #[test]
    fn test_device_id_string_form() {
        assert_eq!(
            device_id(1).to_string(),
            "00000000-0000-0000-0000-000000000001"
        );
    }
}
