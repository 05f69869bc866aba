//! Identifier newtypes: members, devices, jars, and content identifiers.
//!
//! All identifiers are newtypes to prevent misuse at compile time. The
//! 128-bit identifiers (devices, jars) travel as uuid-formatted strings;
//! the CID travels as a multibase base32 string.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::crypto::Ed25519PublicKey;
use crate::error::IdError;

/// Domain separation prefix for member identity derivation.
const MEMBER_ID_DOMAIN: &[u8] = b"buds/member-id/v1";

/// Multihash tag for sha2-256 with 32-byte digest.
const MULTIHASH_SHA256: [u8; 2] = [0x12, 0x20];

/// A member identity, stable across all devices owned by one person.
///
/// Opaque to everything except the derivation helper.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(String);

impl MemberId {
    /// Wrap an opaque identity string.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Derive a member identity from the member's signing public key.
    pub fn from_signing_key(pk: &Ed25519PublicKey) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(MEMBER_ID_DOMAIN);
        hasher.update(pk.as_bytes());
        let digest: [u8; 32] = hasher.finalize().into();
        Self(format!("did:buds:{}", base32_encode(&digest)))
    }

    /// View as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemberId({})", self.0)
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MemberId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A 128-bit device identifier, unique per physical installation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub [u8; 16]);

/// A 128-bit jar identifier, minted by the jar creator.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JarId(pub [u8; 16]);

macro_rules! impl_uuid_id {
    ($name:ident, $label:expr) => {
        impl $name {
            /// Mint a fresh random identifier.
            pub fn generate() -> Self {
                Self(Uuid::new_v4().into_bytes())
            }

            /// Create from raw bytes.
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }

            /// Get the raw bytes.
            pub const fn as_bytes(&self) -> &[u8; 16] {
                &self.0
            }

            /// Parse from a uuid-formatted string.
            pub fn parse(s: &str) -> Result<Self, IdError> {
                let uuid =
                    Uuid::parse_str(s).map_err(|e| IdError::InvalidEncoding(e.to_string()))?;
                Ok(Self(uuid.into_bytes()))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $label, self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", Uuid::from_bytes(self.0).hyphenated())
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<[u8; 16]> for $name {
            fn from(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }
        }
    };
}

impl_uuid_id!(DeviceId, "DeviceId");
impl_uuid_id!(JarId, "JarId");

/// A content identifier: the SHA-256 digest of the canonical CBOR bytes of a
/// receipt's unsigned preimage.
///
/// Equality of CIDs implies equality of signed content. String form:
/// `b` + base32-lower(0x12 || 0x20 || digest).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid(pub [u8; 32]);

impl Cid {
    /// Compute the CID of canonical preimage bytes.
    pub fn from_preimage_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    /// Create from a raw digest.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw digest.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the multibase string form.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let rest = s
            .strip_prefix('b')
            .ok_or_else(|| IdError::InvalidEncoding("missing multibase prefix".into()))?;
        let decoded = base32_decode(rest)?;
        if decoded.len() != 34 {
            return Err(IdError::InvalidLength {
                expected: 34,
                got: decoded.len(),
            });
        }
        if decoded[..2] != MULTIHASH_SHA256 {
            return Err(IdError::InvalidEncoding("unknown multihash tag".into()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&decoded[2..]);
        Ok(Self(arr))
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tagged = Vec::with_capacity(34);
        tagged.extend_from_slice(&MULTIHASH_SHA256);
        tagged.extend_from_slice(&self.0);
        write!(f, "b{}", base32_encode(&tagged))
    }
}

impl FromStr for Cid {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<[u8]> for Cid {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Cid {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

macro_rules! impl_string_serde {
    ($name:ident) => {
        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

impl_string_serde!(DeviceId);
impl_string_serde!(JarId);
impl_string_serde!(Cid);

impl Serialize for MemberId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for MemberId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(MemberId(String::deserialize(deserializer)?))
    }
}

const BASE32_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz234567";

// RFC 4648 base32, lowercase, no padding.
fn base32_encode(data: &[u8]) -> String {
    let mut result = String::new();
    let mut buffer: u64 = 0;
    let mut bits_in_buffer = 0;

    for &byte in data {
        buffer = (buffer << 8) | (byte as u64);
        bits_in_buffer += 8;

        while bits_in_buffer >= 5 {
            bits_in_buffer -= 5;
            let index = ((buffer >> bits_in_buffer) & 0x1f) as usize;
            result.push(BASE32_ALPHABET[index] as char);
        }
    }

    if bits_in_buffer > 0 {
        let index = ((buffer << (5 - bits_in_buffer)) & 0x1f) as usize;
        result.push(BASE32_ALPHABET[index] as char);
    }

    result
}

fn base32_decode(s: &str) -> Result<Vec<u8>, IdError> {
    let mut result = Vec::with_capacity(s.len() * 5 / 8);
    let mut buffer: u64 = 0;
    let mut bits_in_buffer = 0;

    for c in s.bytes() {
        let index = BASE32_ALPHABET
            .iter()
            .position(|&a| a == c)
            .ok_or_else(|| IdError::InvalidEncoding(format!("invalid base32 char: {}", c as char)))?;
        buffer = (buffer << 5) | (index as u64);
        bits_in_buffer += 5;

        if bits_in_buffer >= 8 {
            bits_in_buffer -= 8;
            result.push(((buffer >> bits_in_buffer) & 0xff) as u8);
        }
    }

    // Trailing bits must be zero padding.
    if bits_in_buffer > 0 && (buffer & ((1 << bits_in_buffer) - 1)) != 0 {
        return Err(IdError::InvalidEncoding("non-zero trailing bits".into()));
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SigningKeypair;

    #[test]
    fn test_base32_rfc4648_vectors() {
        assert_eq!(base32_encode(b""), "");
        assert_eq!(base32_encode(b"f"), "my");
        assert_eq!(base32_encode(b"fo"), "mzxq");
        assert_eq!(base32_encode(b"foo"), "mzxw6");
        assert_eq!(base32_encode(b"foob"), "mzxw6yq");
        assert_eq!(base32_encode(b"fooba"), "mzxw6ytb");
        assert_eq!(base32_encode(b"foobar"), "mzxw6ytboi");
    }

    #[test]
    fn test_base32_decode_roundtrip() {
        for data in [&b""[..], b"f", b"foobar", &[0u8, 255, 3, 7]] {
            let encoded = base32_encode(data);
            let decoded = base32_decode(&encoded).unwrap();
            assert_eq!(decoded, data);
        }
    }

    #[test]
    fn test_cid_string_roundtrip() {
        let cid = Cid::from_preimage_bytes(b"hello");
        let s = cid.to_string();
        assert!(s.starts_with('b'));
        assert_eq!(s, s.to_lowercase());

        let recovered = Cid::parse(&s).unwrap();
        assert_eq!(cid, recovered);
    }

    #[test]
    fn test_cid_parse_rejects_garbage() {
        assert!(Cid::parse("not-a-cid").is_err());
        assert!(Cid::parse("bmzxw6").is_err());
        assert!(Cid::parse("").is_err());
    }

    #[test]
    fn test_cid_equality_tracks_content() {
        let a = Cid::from_preimage_bytes(b"payload-a");
        let b = Cid::from_preimage_bytes(b"payload-a");
        let c = Cid::from_preimage_bytes(b"payload-b");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_device_id_string_roundtrip() {
        let id = DeviceId::generate();
        let s = id.to_string();
        let recovered: DeviceId = s.parse().unwrap();
        assert_eq!(id, recovered);
    }

    #[test]
    fn test_jar_id_string_roundtrip() {
        let id = JarId::from_bytes([0xab; 16]);
        let recovered = JarId::parse(&id.to_string()).unwrap();
        assert_eq!(id, recovered);
    }

    #[test]
    fn test_member_id_derivation_stable() {
        let keypair = SigningKeypair::from_seed(&[0x42; 32]);
        let m1 = MemberId::from_signing_key(&keypair.public_key());
        let m2 = MemberId::from_signing_key(&keypair.public_key());
        assert_eq!(m1, m2);
        assert!(m1.as_str().starts_with("did:buds:"));

        let other = SigningKeypair::from_seed(&[0x43; 32]);
        assert_ne!(m1, MemberId::from_signing_key(&other.public_key()));
    }
}
