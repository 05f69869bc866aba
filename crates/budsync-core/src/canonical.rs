//! Canonical CBOR encoding for deterministic serialization.
//!
//! This module implements RFC 8949 Core Deterministic Encoding:
//! - Map keys sorted by the lexicographic order of their CBOR-encoded bytes
//! - Integers use the smallest valid encoding
//! - Floats are IEEE-754 binary64 only; NaN and infinities are rejected
//! - Definite lengths only
//! - Absent optional fields are omitted; explicit null is rejected
//!
//! The canonical encoding is critical: signatures and CIDs bind to these
//! exact bytes, so the same preimage must produce identical bytes on every
//! platform. **This encoding is FROZEN. Changes break all existing
//! signatures.**

use ciborium::value::Value;

use crate::error::EncoderError;
use crate::receipt::ReceiptPreimage;
use crate::types::Cid;

/// Preimage map key names.
mod keys {
    pub const AUTHOR_MEMBER_ID: &str = "author_member_id";
    pub const AUTHOR_DEVICE_ID: &str = "author_device_id";
    pub const PARENT_CID: &str = "parent_cid";
    pub const ROOT_CID: &str = "root_cid";
    pub const RECEIPT_TYPE: &str = "receipt_type";
    pub const PAYLOAD: &str = "payload";
}

/// Encode an unsigned receipt preimage to canonical CBOR bytes.
///
/// These are the bytes that get signed and hashed into the CID.
pub fn canonical_preimage_bytes(preimage: &ReceiptPreimage) -> Result<Vec<u8>, EncoderError> {
    let value = preimage_to_value(preimage)?;
    encode_canonical(&value)
}

/// Convert a preimage to a CBOR Value (map with string keys).
fn preimage_to_value(preimage: &ReceiptPreimage) -> Result<Value, EncoderError> {
    if !matches!(preimage.payload, Value::Map(_)) {
        return Err(EncoderError::Malformed("payload must be a map".into()));
    }

    let mut entries = Vec::with_capacity(6);

    entries.push((
        Value::Text(keys::AUTHOR_MEMBER_ID.to_string()),
        Value::Text(preimage.author_member_id.to_string()),
    ));
    entries.push((
        Value::Text(keys::AUTHOR_DEVICE_ID.to_string()),
        Value::Text(preimage.author_device_id.to_string()),
    ));

    // Optionals are omitted when absent; null never appears on the wire.
    if let Some(parent) = &preimage.parent_cid {
        entries.push((
            Value::Text(keys::PARENT_CID.to_string()),
            Value::Text(parent.to_string()),
        ));
    }
    if let Some(root) = &preimage.root_cid {
        entries.push((
            Value::Text(keys::ROOT_CID.to_string()),
            Value::Text(root.to_string()),
        ));
    }

    entries.push((
        Value::Text(keys::RECEIPT_TYPE.to_string()),
        Value::Text(preimage.receipt_type.clone()),
    ));
    entries.push((
        Value::Text(keys::PAYLOAD.to_string()),
        preimage.payload.clone(),
    ));

    Ok(Value::Map(entries))
}

/// Decode canonical preimage bytes back into a [`ReceiptPreimage`].
pub fn decode_preimage(bytes: &[u8]) -> Result<ReceiptPreimage, EncoderError> {
    let value = decode_value(bytes)?;

    let map = match &value {
        Value::Map(m) => m,
        _ => return Err(EncoderError::Malformed("expected map".into())),
    };

    let get = |key: &str| -> Option<&Value> {
        map.iter()
            .find(|(k, _)| matches!(k, Value::Text(s) if s == key))
            .map(|(_, v)| v)
    };

    let author_member_id = match get(keys::AUTHOR_MEMBER_ID) {
        Some(Value::Text(s)) => crate::types::MemberId::new(s.clone()),
        _ => return Err(EncoderError::Malformed("invalid author_member_id".into())),
    };

    let author_device_id = match get(keys::AUTHOR_DEVICE_ID) {
        Some(Value::Text(s)) => crate::types::DeviceId::parse(s)
            .map_err(|e| EncoderError::Malformed(format!("invalid author_device_id: {}", e)))?,
        _ => return Err(EncoderError::Malformed("invalid author_device_id".into())),
    };

    let parent_cid = match get(keys::PARENT_CID) {
        Some(Value::Text(s)) => Some(
            Cid::parse(s).map_err(|e| EncoderError::Malformed(format!("invalid parent_cid: {}", e)))?,
        ),
        Some(Value::Null) => {
            return Err(EncoderError::Malformed(
                "explicit null for optional parent_cid".into(),
            ))
        }
        None => None,
        _ => return Err(EncoderError::Malformed("invalid parent_cid".into())),
    };

    let root_cid = match get(keys::ROOT_CID) {
        Some(Value::Text(s)) => Some(
            Cid::parse(s).map_err(|e| EncoderError::Malformed(format!("invalid root_cid: {}", e)))?,
        ),
        Some(Value::Null) => {
            return Err(EncoderError::Malformed(
                "explicit null for optional root_cid".into(),
            ))
        }
        None => None,
        _ => return Err(EncoderError::Malformed("invalid root_cid".into())),
    };

    let receipt_type = match get(keys::RECEIPT_TYPE) {
        Some(Value::Text(s)) => s.clone(),
        _ => return Err(EncoderError::Malformed("invalid receipt_type".into())),
    };

    let payload = match get(keys::PAYLOAD) {
        Some(v @ Value::Map(_)) => v.clone(),
        _ => return Err(EncoderError::Malformed("invalid payload".into())),
    };

    Ok(ReceiptPreimage {
        author_member_id,
        author_device_id,
        parent_cid,
        root_cid,
        receipt_type,
        payload,
    })
}

/// Encode a CBOR value to canonical bytes.
pub fn encode_canonical(value: &Value) -> Result<Vec<u8>, EncoderError> {
    let mut buf = Vec::new();
    encode_value(&mut buf, value)?;
    Ok(buf)
}

/// Decode CBOR bytes into a value.
pub fn decode_value(bytes: &[u8]) -> Result<Value, EncoderError> {
    let cursor = std::io::Cursor::new(bytes);
    ciborium::from_reader(cursor).map_err(|e| EncoderError::Malformed(e.to_string()))
}

/// Recursively encode a CBOR value.
fn encode_value(buf: &mut Vec<u8>, value: &Value) -> Result<(), EncoderError> {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => {
            encode_bytes(buf, b);
            Ok(())
        }
        Value::Text(s) => {
            encode_text(buf, s);
            Ok(())
        }
        Value::Array(arr) => encode_array(buf, arr),
        Value::Map(entries) => encode_map(buf, entries),
        Value::Bool(b) => {
            buf.push(if *b { 0xf5 } else { 0xf4 });
            Ok(())
        }
        Value::Float(f) => encode_float(buf, *f),
        Value::Null => Err(EncoderError::Malformed(
            "explicit null is not canonical".into(),
        )),
        _ => Err(EncoderError::Malformed("unsupported CBOR value type".into())),
    }
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, i: ciborium::value::Integer) -> Result<(), EncoderError> {
    let n: i128 = i.into();

    if n >= 0 {
        let u = u64::try_from(n).map_err(|_| EncoderError::IntegerOverflow(n))?;
        encode_uint(buf, 0, u);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        let abs = u64::try_from(-1 - n).map_err(|_| EncoderError::IntegerOverflow(n))?;
        encode_uint(buf, 1, abs);
    }
    Ok(())
}

/// Encode an unsigned integer with the given major type, smallest width.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffffffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Encode a byte string (major type 2).
fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_uint(buf, 2, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Encode a text string (major type 3).
fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

/// Encode an array (major type 4), preserving caller order.
fn encode_array(buf: &mut Vec<u8>, arr: &[Value]) -> Result<(), EncoderError> {
    encode_uint(buf, 4, arr.len() as u64);
    for item in arr {
        encode_value(buf, item)?;
    }
    Ok(())
}

/// Encode a map canonically (major type 5).
///
/// Keys are sorted by their encoded byte comparison.
fn encode_map(buf: &mut Vec<u8>, entries: &[(Value, Value)]) -> Result<(), EncoderError> {
    let mut key_value_pairs = Vec::with_capacity(entries.len());
    for (k, v) in entries {
        let mut key_buf = Vec::new();
        encode_value(&mut key_buf, k)?;
        key_value_pairs.push((key_buf, v));
    }

    key_value_pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, key_value_pairs.len() as u64);
    for (key_bytes, value) in key_value_pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value(buf, value)?;
    }
    Ok(())
}

/// Encode a float as IEEE-754 binary64 (major type 7, additional info 27).
fn encode_float(buf: &mut Vec<u8>, f: f64) -> Result<(), EncoderError> {
    if !f.is_finite() {
        return Err(EncoderError::ForbiddenFloat);
    }
    buf.push(0xfb);
    buf.extend_from_slice(&f.to_be_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeviceId, MemberId};

    fn test_preimage() -> ReceiptPreimage {
        ReceiptPreimage {
            author_member_id: MemberId::new("m1"),
            author_device_id: DeviceId::from_bytes([0x01; 16]),
            parent_cid: None,
            root_cid: None,
            receipt_type: "test/v1".to_string(),
            payload: Value::Map(vec![(
                Value::Text("k".to_string()),
                Value::Integer(7.into()),
            )]),
        }
    }

    #[test]
    fn test_integer_encoding_widths() {
        let mut buf = Vec::new();

        encode_uint(&mut buf, 0, 0);
        assert_eq!(buf, vec![0x00]);

        buf.clear();
        encode_uint(&mut buf, 0, 23);
        assert_eq!(buf, vec![0x17]);

        buf.clear();
        encode_uint(&mut buf, 0, 24);
        assert_eq!(buf, vec![0x18, 24]);

        buf.clear();
        encode_uint(&mut buf, 0, 255);
        assert_eq!(buf, vec![0x18, 255]);

        buf.clear();
        encode_uint(&mut buf, 0, 256);
        assert_eq!(buf, vec![0x19, 0x01, 0x00]);

        buf.clear();
        encode_uint(&mut buf, 0, 65535);
        assert_eq!(buf, vec![0x19, 0xff, 0xff]);

        buf.clear();
        encode_uint(&mut buf, 0, 65536);
        assert_eq!(buf, vec![0x1a, 0x00, 0x01, 0x00, 0x00]);

        buf.clear();
        encode_uint(&mut buf, 0, u64::from(u32::MAX) + 1);
        assert_eq!(buf, vec![0x1b, 0, 0, 0, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn test_negative_integer_encoding() {
        let bytes = encode_canonical(&Value::Integer((-1).into())).unwrap();
        assert_eq!(bytes, vec![0x20]);

        let bytes = encode_canonical(&Value::Integer((-25).into())).unwrap();
        assert_eq!(bytes, vec![0x38, 24]);
    }

    #[test]
    fn test_integer_range_bounds() {
        // The full CBOR integer range encodes: u64::MAX and -2^64.
        let bytes = encode_canonical(&Value::Integer(u64::MAX.into())).unwrap();
        assert_eq!(bytes, vec![0x1b, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);

        let min: i128 = -(1i128 << 64);
        let bytes = encode_canonical(&Value::Integer(min.try_into().unwrap())).unwrap();
        assert_eq!(bytes, vec![0x3b, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn test_float_binary64() {
        let bytes = encode_canonical(&Value::Float(1.5)).unwrap();
        assert_eq!(bytes[0], 0xfb);
        assert_eq!(&bytes[1..], &1.5f64.to_be_bytes());
    }

    #[test]
    fn test_forbidden_floats() {
        for f in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let result = encode_canonical(&Value::Float(f));
            assert!(matches!(result, Err(EncoderError::ForbiddenFloat)));
        }
    }

    #[test]
    fn test_explicit_null_rejected() {
        let value = Value::Map(vec![(Value::Text("x".to_string()), Value::Null)]);
        assert!(encode_canonical(&value).is_err());
    }

    #[test]
    fn test_map_key_ordering_by_encoded_bytes() {
        // Shorter keys sort before longer keys because the length is part
        // of the encoded header byte.
        let value = Value::Map(vec![
            (Value::Text("bb".to_string()), Value::Integer(2.into())),
            (Value::Text("a".to_string()), Value::Integer(1.into())),
            (Value::Text("ab".to_string()), Value::Integer(3.into())),
        ]);
        let bytes = encode_canonical(&value).unwrap();

        // a3 | 61 'a' 01 | 62 'a' 'b' 03 | 62 'b' 'b' 02
        assert_eq!(
            bytes,
            vec![0xa3, 0x61, b'a', 0x01, 0x62, b'a', b'b', 0x03, 0x62, b'b', b'b', 0x02]
        );
    }

    #[test]
    fn test_preimage_roundtrip() {
        let preimage = test_preimage();
        let bytes = canonical_preimage_bytes(&preimage).unwrap();
        let decoded = decode_preimage(&bytes).unwrap();

        assert_eq!(preimage.author_member_id, decoded.author_member_id);
        assert_eq!(preimage.author_device_id, decoded.author_device_id);
        assert_eq!(preimage.parent_cid, decoded.parent_cid);
        assert_eq!(preimage.root_cid, decoded.root_cid);
        assert_eq!(preimage.receipt_type, decoded.receipt_type);
        assert_eq!(preimage.payload, decoded.payload);

        // Re-encoding must be byte-identical.
        let bytes2 = canonical_preimage_bytes(&decoded).unwrap();
        assert_eq!(bytes, bytes2);
    }

    #[test]
    fn test_preimage_with_chain_cids_roundtrip() {
        let mut preimage = test_preimage();
        preimage.parent_cid = Some(Cid::from_preimage_bytes(b"parent"));
        preimage.root_cid = Some(Cid::from_preimage_bytes(b"root"));

        let bytes = canonical_preimage_bytes(&preimage).unwrap();
        let decoded = decode_preimage(&bytes).unwrap();
        assert_eq!(preimage.parent_cid, decoded.parent_cid);
        assert_eq!(preimage.root_cid, decoded.root_cid);
    }

    #[test]
    fn test_absent_optionals_are_omitted() {
        let preimage = test_preimage();
        let bytes = canonical_preimage_bytes(&preimage).unwrap();

        // A 4-entry map: no parent_cid, no root_cid keys present.
        assert_eq!(bytes[0], 0xa4);
        let text = String::from_utf8_lossy(&bytes);
        assert!(!text.contains("parent_cid"));
        assert!(!text.contains("root_cid"));
    }

    #[test]
    fn test_canonical_deterministic() {
        let preimage = test_preimage();
        let b1 = canonical_preimage_bytes(&preimage).unwrap();
        let b2 = canonical_preimage_bytes(&preimage).unwrap();
        assert_eq!(b1, b2);
    }

    #[test]
    fn test_decode_garbage_is_malformed() {
        assert!(matches!(
            decode_preimage(&[0xff, 0x00, 0x01]),
            Err(EncoderError::Malformed(_))
        ));
        assert!(matches!(
            decode_preimage(&[]),
            Err(EncoderError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_non_map_is_malformed() {
        let bytes = encode_canonical(&Value::Integer(7.into())).unwrap();
        assert!(matches!(
            decode_preimage(&bytes),
            Err(EncoderError::Malformed(_))
        ));
    }
}
