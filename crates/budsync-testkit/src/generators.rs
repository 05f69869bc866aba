//! Proptest strategies for canonical values and receipt payloads.
//!
//! The generated values stay within the canonical contract: finite floats,
//! CBOR-range integers, string map keys, no nulls.

use ciborium::value::Value;
use proptest::prelude::*;

/// A leaf canonical value.
fn leaf_value() -> BoxedStrategy<Value> {
    prop_oneof![
        any::<i64>().prop_map(|n| Value::Integer(n.into())),
        any::<bool>().prop_map(Value::Bool),
        "[a-z0-9 /._-]{0,16}".prop_map(Value::Text),
        proptest::collection::vec(any::<u8>(), 0..24).prop_map(Value::Bytes),
        any::<f64>()
            .prop_filter("finite floats only", |f| f.is_finite())
            .prop_map(Value::Float),
    ]
    .boxed()
}

/// A canonical value of bounded depth: leaves, arrays and string-keyed maps.
pub fn canonical_value() -> impl Strategy<Value = Value> {
    leaf_value().prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            proptest::collection::btree_map("[a-z_]{1,10}", inner, 0..6).prop_map(|map| {
                Value::Map(
                    map.into_iter()
                        .map(|(k, v)| (Value::Text(k), v))
                        .collect(),
                )
            }),
        ]
    })
}

/// A payload-shaped value: a string-keyed map of canonical values.
pub fn payload_map() -> impl Strategy<Value = Value> {
    proptest::collection::btree_map("[a-z_]{1,10}", canonical_value(), 0..8).prop_map(|map| {
        Value::Map(
            map.into_iter()
                .map(|(k, v)| (Value::Text(k), v))
                .collect(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use budsync_core::{encode_canonical, decode_value};

    proptest! {
        // Round-trip identity over the fuzz corpus: decode(encode(v))
        // re-encodes to the same bytes.
        #[test]
        fn canonical_roundtrip_is_byte_identical(value in canonical_value()) {
            let encoded = encode_canonical(&value).unwrap();
            let decoded = decode_value(&encoded).unwrap();
            let reencoded = encode_canonical(&decoded).unwrap();
            prop_assert_eq!(encoded, reencoded);
        }

        #[test]
        fn payload_maps_roundtrip(payload in payload_map()) {
            let encoded = encode_canonical(&payload).unwrap();
            let decoded = decode_value(&encoded).unwrap();
            prop_assert_eq!(encode_canonical(&decoded).unwrap(), encoded);
        }

        // Encoding is a function of the value, not of entry order.
        #[test]
        fn map_entry_order_is_irrelevant(payload in payload_map()) {
            let reversed = match &payload {
                Value::Map(entries) => {
                    let mut reversed = entries.clone();
                    reversed.reverse();
                    Value::Map(reversed)
                }
                other => other.clone(),
            };
            prop_assert_eq!(
                encode_canonical(&payload).unwrap(),
                encode_canonical(&reversed).unwrap()
            );
        }
    }
}
