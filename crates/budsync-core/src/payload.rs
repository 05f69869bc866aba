//! Typed receipt payloads.
//!
//! Every receipt carries a versioned type tag (e.g. `jar.bud_shared/v1`) and
//! a type-specific payload map. This module models the known types as a
//! tagged union; types nobody recognizes decode into [`ReceiptPayload::Unknown`]
//! and the sync policy decides what to do with them.

use ciborium::value::Value;

use crate::crypto::{AgreementPublicKey, Ed25519PublicKey};
use crate::error::EncoderError;
use crate::types::{DeviceId, JarId, MemberId};

/// Receipt type tags.
pub mod receipt_type {
    pub const JAR_CREATED: &str = "jar.created/v1";
    pub const MEMBER_ADDED: &str = "jar.member_added/v1";
    pub const INVITE_ACCEPTED: &str = "jar.invite_accepted/v1";
    pub const MEMBER_REMOVED: &str = "jar.member_removed/v1";
    pub const MEMBER_LEFT: &str = "jar.member_left/v1";
    pub const RENAMED: &str = "jar.renamed/v1";
    pub const BUD_SHARED: &str = "jar.bud_shared/v1";
    pub const BUD_DELETED: &str = "jar.bud_deleted/v1";
    pub const JAR_DELETED: &str = "jar.deleted/v1";
}

/// A device's public keys as carried in membership receipts.
///
/// These are the keys that get TOFU-pinned when the receipt is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceKeys {
    pub device_id: DeviceId,
    pub pk_sign: Ed25519PublicKey,
    pub pk_agree: AgreementPublicKey,
}

impl DeviceKeys {
    fn to_value(&self) -> Value {
        Value::Map(vec![
            (
                Value::Text("device_id".to_string()),
                Value::Text(self.device_id.to_string()),
            ),
            (
                Value::Text("pk_sign".to_string()),
                Value::Bytes(self.pk_sign.as_bytes().to_vec()),
            ),
            (
                Value::Text("pk_agree".to_string()),
                Value::Bytes(self.pk_agree.as_bytes().to_vec()),
            ),
        ])
    }

    fn from_value(value: &Value) -> Result<Self, EncoderError> {
        let map = as_map(value)?;
        Ok(Self {
            device_id: DeviceId::parse(&req_text(map, "device_id")?)
                .map_err(|e| malformed(format!("invalid device_id: {}", e)))?,
            pk_sign: Ed25519PublicKey::from_bytes(req_bytes32(map, "pk_sign")?),
            pk_agree: AgreementPublicKey::from_bytes(req_bytes32(map, "pk_agree")?),
        })
    }
}

/// `jar.created/v1` — the first receipt of every jar stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JarCreatedPayload {
    pub jar_id: JarId,
    pub name: String,
    pub description: Option<String>,
    pub owner_member_id: MemberId,
    pub created_at_ms: i64,
    pub owner_devices: Vec<DeviceKeys>,
}

/// `jar.member_added/v1` — invite a member, carrying their device keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberAddedPayload {
    pub member_id: MemberId,
    pub display_name: Option<String>,
    pub devices: Vec<DeviceKeys>,
    pub invited_at_ms: i64,
}

/// `jar.invite_accepted/v1` — the invitee flips pending to active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteAcceptedPayload {
    pub member_id: MemberId,
    pub accepted_at_ms: i64,
}

/// `jar.member_removed/v1` — owner removes a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRemovedPayload {
    pub member_id: MemberId,
    pub removed_at_ms: i64,
}

/// `jar.member_left/v1` — the author removes themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberLeftPayload {
    pub left_at_ms: i64,
}

/// `jar.renamed/v1` — owner renames the jar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamedPayload {
    pub name: String,
}

/// `jar.bud_shared/v1` — link a content item into the jar by logical id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudSharedPayload {
    pub bud_uuid: String,
    pub caption: Option<String>,
    pub shared_at_ms: i64,
}

/// `jar.bud_deleted/v1` — unlink a content item from the jar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudDeletedPayload {
    pub bud_uuid: String,
    pub deleted_by_member_id: MemberId,
    pub deleted_at_ms: i64,
}

/// `jar.deleted/v1` — tombstone the jar itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JarDeletedPayload {
    pub deleted_at_ms: i64,
    pub reason: Option<String>,
}

/// The tagged union of receipt payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiptPayload {
    JarCreated(JarCreatedPayload),
    MemberAdded(MemberAddedPayload),
    InviteAccepted(InviteAcceptedPayload),
    MemberRemoved(MemberRemovedPayload),
    MemberLeft(MemberLeftPayload),
    Renamed(RenamedPayload),
    BudShared(BudSharedPayload),
    BudDeleted(BudDeletedPayload),
    JarDeleted(JarDeletedPayload),
    /// A receipt type this build does not recognize. The raw payload map is
    /// preserved so the bytes stay re-encodable.
    Unknown { receipt_type: String, raw: Value },
}

impl ReceiptPayload {
    /// The versioned type tag for this payload.
    pub fn receipt_type(&self) -> &str {
        match self {
            Self::JarCreated(_) => receipt_type::JAR_CREATED,
            Self::MemberAdded(_) => receipt_type::MEMBER_ADDED,
            Self::InviteAccepted(_) => receipt_type::INVITE_ACCEPTED,
            Self::MemberRemoved(_) => receipt_type::MEMBER_REMOVED,
            Self::MemberLeft(_) => receipt_type::MEMBER_LEFT,
            Self::Renamed(_) => receipt_type::RENAMED,
            Self::BudShared(_) => receipt_type::BUD_SHARED,
            Self::BudDeleted(_) => receipt_type::BUD_DELETED,
            Self::JarDeleted(_) => receipt_type::JAR_DELETED,
            Self::Unknown { receipt_type, .. } => receipt_type,
        }
    }

    /// Build the payload map for canonical encoding.
    pub fn to_value(&self) -> Value {
        match self {
            Self::JarCreated(p) => {
                let mut entries = vec![
                    text_entry("jar_id", p.jar_id.to_string()),
                    text_entry("name", p.name.clone()),
                    text_entry("owner_member_id", p.owner_member_id.to_string()),
                    int_entry("created_at_ms", p.created_at_ms),
                    (
                        Value::Text("owner_devices".to_string()),
                        Value::Array(p.owner_devices.iter().map(DeviceKeys::to_value).collect()),
                    ),
                ];
                if let Some(description) = &p.description {
                    entries.push(text_entry("description", description.clone()));
                }
                Value::Map(entries)
            }
            Self::MemberAdded(p) => {
                let mut entries = vec![
                    text_entry("member_id", p.member_id.to_string()),
                    int_entry("invited_at_ms", p.invited_at_ms),
                    (
                        Value::Text("devices".to_string()),
                        Value::Array(p.devices.iter().map(DeviceKeys::to_value).collect()),
                    ),
                ];
                if let Some(display_name) = &p.display_name {
                    entries.push(text_entry("display_name", display_name.clone()));
                }
                Value::Map(entries)
            }
            Self::InviteAccepted(p) => Value::Map(vec![
                text_entry("member_id", p.member_id.to_string()),
                int_entry("accepted_at_ms", p.accepted_at_ms),
            ]),
            Self::MemberRemoved(p) => Value::Map(vec![
                text_entry("member_id", p.member_id.to_string()),
                int_entry("removed_at_ms", p.removed_at_ms),
            ]),
            Self::MemberLeft(p) => Value::Map(vec![int_entry("left_at_ms", p.left_at_ms)]),
            Self::Renamed(p) => Value::Map(vec![text_entry("name", p.name.clone())]),
            Self::BudShared(p) => {
                let mut entries = vec![
                    text_entry("bud_uuid", p.bud_uuid.clone()),
                    int_entry("shared_at_ms", p.shared_at_ms),
                ];
                if let Some(caption) = &p.caption {
                    entries.push(text_entry("caption", caption.clone()));
                }
                Value::Map(entries)
            }
            Self::BudDeleted(p) => Value::Map(vec![
                text_entry("bud_uuid", p.bud_uuid.clone()),
                text_entry("deleted_by_member_id", p.deleted_by_member_id.to_string()),
                int_entry("deleted_at_ms", p.deleted_at_ms),
            ]),
            Self::JarDeleted(p) => {
                let mut entries = vec![int_entry("deleted_at_ms", p.deleted_at_ms)];
                if let Some(reason) = &p.reason {
                    entries.push(text_entry("reason", reason.clone()));
                }
                Value::Map(entries)
            }
            Self::Unknown { raw, .. } => raw.clone(),
        }
    }

    /// Parse a payload map for the given receipt type.
    pub fn from_parts(receipt_type_tag: &str, payload: &Value) -> Result<Self, EncoderError> {
        let map = as_map(payload)?;

        match receipt_type_tag {
            receipt_type::JAR_CREATED => Ok(Self::JarCreated(JarCreatedPayload {
                jar_id: JarId::parse(&req_text(map, "jar_id")?)
                    .map_err(|e| malformed(format!("invalid jar_id: {}", e)))?,
                name: req_text(map, "name")?,
                description: opt_text(map, "description")?,
                owner_member_id: MemberId::new(req_text(map, "owner_member_id")?),
                created_at_ms: req_i64(map, "created_at_ms")?,
                owner_devices: req_devices(map, "owner_devices")?,
            })),
            receipt_type::MEMBER_ADDED => Ok(Self::MemberAdded(MemberAddedPayload {
                member_id: MemberId::new(req_text(map, "member_id")?),
                display_name: opt_text(map, "display_name")?,
                devices: req_devices(map, "devices")?,
                invited_at_ms: req_i64(map, "invited_at_ms")?,
            })),
            receipt_type::INVITE_ACCEPTED => Ok(Self::InviteAccepted(InviteAcceptedPayload {
                member_id: MemberId::new(req_text(map, "member_id")?),
                accepted_at_ms: req_i64(map, "accepted_at_ms")?,
            })),
            receipt_type::MEMBER_REMOVED => Ok(Self::MemberRemoved(MemberRemovedPayload {
                member_id: MemberId::new(req_text(map, "member_id")?),
                removed_at_ms: req_i64(map, "removed_at_ms")?,
            })),
            receipt_type::MEMBER_LEFT => Ok(Self::MemberLeft(MemberLeftPayload {
                left_at_ms: req_i64(map, "left_at_ms")?,
            })),
            receipt_type::RENAMED => Ok(Self::Renamed(RenamedPayload {
                name: req_text(map, "name")?,
            })),
            receipt_type::BUD_SHARED => Ok(Self::BudShared(BudSharedPayload {
                bud_uuid: req_text(map, "bud_uuid")?,
                caption: opt_text(map, "caption")?,
                shared_at_ms: req_i64(map, "shared_at_ms")?,
            })),
            receipt_type::BUD_DELETED => Ok(Self::BudDeleted(BudDeletedPayload {
                bud_uuid: req_text(map, "bud_uuid")?,
                deleted_by_member_id: MemberId::new(req_text(map, "deleted_by_member_id")?),
                deleted_at_ms: req_i64(map, "deleted_at_ms")?,
            })),
            receipt_type::JAR_DELETED => Ok(Self::JarDeleted(JarDeletedPayload {
                deleted_at_ms: req_i64(map, "deleted_at_ms")?,
                reason: opt_text(map, "reason")?,
            })),
            other => Ok(Self::Unknown {
                receipt_type: other.to_string(),
                raw: payload.clone(),
            }),
        }
    }
}

// ── Map access helpers ───────────────────────────────────────────────────────

fn malformed(msg: impl Into<String>) -> EncoderError {
    EncoderError::Malformed(msg.into())
}

fn as_map(value: &Value) -> Result<&Vec<(Value, Value)>, EncoderError> {
    match value {
        Value::Map(m) => Ok(m),
        _ => Err(malformed("payload must be a map")),
    }
}

fn get<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| matches!(k, Value::Text(s) if s == key))
        .map(|(_, v)| v)
}

fn req_text(map: &[(Value, Value)], key: &str) -> Result<String, EncoderError> {
    match get(map, key) {
        Some(Value::Text(s)) => Ok(s.clone()),
        _ => Err(malformed(format!("missing or invalid field: {}", key))),
    }
}

fn opt_text(map: &[(Value, Value)], key: &str) -> Result<Option<String>, EncoderError> {
    match get(map, key) {
        Some(Value::Text(s)) => Ok(Some(s.clone())),
        Some(Value::Null) => Err(malformed(format!("explicit null for optional: {}", key))),
        None => Ok(None),
        _ => Err(malformed(format!("invalid field: {}", key))),
    }
}

fn req_i64(map: &[(Value, Value)], key: &str) -> Result<i64, EncoderError> {
    match get(map, key) {
        Some(Value::Integer(i)) => {
            let n: i128 = (*i).into();
            i64::try_from(n).map_err(|_| EncoderError::IntegerOverflow(n))
        }
        _ => Err(malformed(format!("missing or invalid field: {}", key))),
    }
}

fn req_bytes32(map: &[(Value, Value)], key: &str) -> Result<[u8; 32], EncoderError> {
    match get(map, key) {
        Some(Value::Bytes(b)) if b.len() == 32 => {
            let mut arr = [0u8; 32];
            arr.copy_from_slice(b);
            Ok(arr)
        }
        _ => Err(malformed(format!("missing or invalid field: {}", key))),
    }
}

fn req_devices(map: &[(Value, Value)], key: &str) -> Result<Vec<DeviceKeys>, EncoderError> {
    match get(map, key) {
        Some(Value::Array(arr)) => arr.iter().map(DeviceKeys::from_value).collect(),
        _ => Err(malformed(format!("missing or invalid field: {}", key))),
    }
}

fn text_entry(key: &str, value: String) -> (Value, Value) {
    (Value::Text(key.to_string()), Value::Text(value))
}

fn int_entry(key: &str, value: i64) -> (Value, Value) {
    (Value::Text(key.to_string()), Value::Integer(value.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_devices() -> Vec<DeviceKeys> {
        vec![DeviceKeys {
            device_id: DeviceId::from_bytes([0x2a; 16]),
            pk_sign: Ed25519PublicKey::from_bytes([0x01; 32]),
            pk_agree: AgreementPublicKey::from_bytes([0x02; 32]),
        }]
    }

    #[test]
    fn test_jar_created_roundtrip() {
        let payload = ReceiptPayload::JarCreated(JarCreatedPayload {
            jar_id: JarId::from_bytes([0x11; 16]),
            name: "Friends".to_string(),
            description: Some("close circle".to_string()),
            owner_member_id: MemberId::new("m1"),
            created_at_ms: 1_700_000_000_000,
            owner_devices: sample_devices(),
        });

        let value = payload.to_value();
        let parsed = ReceiptPayload::from_parts(payload.receipt_type(), &value).unwrap();
        assert_eq!(payload, parsed);
    }

    #[test]
    fn test_member_added_requires_fields() {
        let value = Value::Map(vec![text_entry("member_id", "m2".to_string())]);
        let result = ReceiptPayload::from_parts(receipt_type::MEMBER_ADDED, &value);
        assert!(result.is_err());
    }

    #[test]
    fn test_bud_payloads_roundtrip() {
        let shared = ReceiptPayload::BudShared(BudSharedPayload {
            bud_uuid: "B1".to_string(),
            caption: None,
            shared_at_ms: 1000,
        });
        let parsed =
            ReceiptPayload::from_parts(shared.receipt_type(), &shared.to_value()).unwrap();
        assert_eq!(shared, parsed);

        let deleted = ReceiptPayload::BudDeleted(BudDeletedPayload {
            bud_uuid: "B1".to_string(),
            deleted_by_member_id: MemberId::new("m1"),
            deleted_at_ms: 2000,
        });
        let parsed =
            ReceiptPayload::from_parts(deleted.receipt_type(), &deleted.to_value()).unwrap();
        assert_eq!(deleted, parsed);
    }

    #[test]
    fn test_unknown_type_preserves_raw() {
        let raw = Value::Map(vec![text_entry("anything", "goes".to_string())]);
        let parsed = ReceiptPayload::from_parts("jar.future_thing/v9", &raw).unwrap();

        match &parsed {
            ReceiptPayload::Unknown { receipt_type, raw: kept } => {
                assert_eq!(receipt_type, "jar.future_thing/v9");
                assert_eq!(kept, &raw);
            }
            other => panic!("expected Unknown, got {:?}", other),
        }
        assert_eq!(parsed.to_value(), raw);
    }

    #[test]
    fn test_timestamp_overflow_rejected() {
        let value = Value::Map(vec![(
            Value::Text("left_at_ms".to_string()),
            Value::Integer(u64::MAX.into()),
        )]);
        let result = ReceiptPayload::from_parts(receipt_type::MEMBER_LEFT, &value);
        assert!(matches!(result, Err(EncoderError::IntegerOverflow(_))));
    }

    #[test]
    fn test_optional_omitted_not_null() {
        let payload = ReceiptPayload::JarDeleted(JarDeletedPayload {
            deleted_at_ms: 1,
            reason: None,
        });
        match payload.to_value() {
            Value::Map(entries) => assert_eq!(entries.len(), 1),
            _ => panic!("expected map"),
        }
    }
}
