//! Receipt verification: CID recomputation and signature checks.

use crate::crypto::{Ed25519PublicKey, Ed25519Signature};
use crate::error::ValidationError;
use crate::types::Cid;

/// Verify wire receipt bytes against a claimed CID and a pinned signing key.
///
/// Both checks must pass: the recomputed CID must equal the claimed one, and
/// the Ed25519 signature must verify over the exact bytes. The pinned key
/// comes from the device registry, never from the wire.
pub fn verify_receipt_bytes(
    preimage_bytes: &[u8],
    claimed_cid: &Cid,
    signature: &Ed25519Signature,
    pinned_key: &Ed25519PublicKey,
) -> Result<(), ValidationError> {
    let computed = Cid::from_preimage_bytes(preimage_bytes);
    if &computed != claimed_cid {
        return Err(ValidationError::CidMismatch {
            expected: claimed_cid.to_string(),
            computed: computed.to_string(),
        });
    }

    pinned_key
        .verify(preimage_bytes, signature)
        .map_err(|_| ValidationError::SignatureFailed)
}
