//! Golden vectors and signature-binding properties.
//!
//! The canonical encoding is frozen; these tests pin it. Any change that
//! alters the vectors invalidates all production signatures.

use budsync::{DeviceId, MemberId, ReceiptBuilder, ReceiptPayload, SigningKeypair};
use budsync_core::{canonical_preimage_bytes, Cid, RenamedPayload};
use budsync_testkit::vectors::{all_vectors, verify_all_vectors};

#[test]
fn golden_vectors_match_pinned_hex() {
    verify_all_vectors().unwrap();
}

#[test]
fn golden_vectors_are_deterministic() {
    for vector in all_vectors() {
        let b1 = canonical_preimage_bytes(&vector.preimage).unwrap();
        let b2 = canonical_preimage_bytes(&vector.preimage).unwrap();
        assert_eq!(b1, b2, "encoding must be deterministic for {}", vector.name);
    }
}

#[test]
fn cid_is_stable_for_logically_identical_preimages() {
    for vector in all_vectors() {
        let bytes = canonical_preimage_bytes(&vector.preimage).unwrap();
        let again = canonical_preimage_bytes(&vector.preimage.clone()).unwrap();
        assert_eq!(
            Cid::from_preimage_bytes(&bytes),
            Cid::from_preimage_bytes(&again)
        );
    }
}

#[test]
fn any_bit_flip_invalidates_the_signature() {
    let keypair = SigningKeypair::from_seed(&[0x42; 32]);
    let receipt = ReceiptBuilder::new(
        MemberId::from_signing_key(&keypair.public_key()),
        DeviceId::from_bytes([0x01; 16]),
    )
    .payload(&ReceiptPayload::Renamed(RenamedPayload {
        name: "golden".to_string(),
    }))
    .sign(&keypair)
    .unwrap();

    let pk = keypair.public_key();
    pk.verify(&receipt.preimage_bytes, &receipt.signature)
        .expect("untampered receipt verifies");

    // Flip one bit at a sample of byte positions across the preimage.
    let bytes = receipt.preimage_bytes.to_vec();
    for position in [0, bytes.len() / 2, bytes.len() - 1] {
        let mut tampered = bytes.clone();
        tampered[position] ^= 0x01;
        assert!(
            pk.verify(&tampered, &receipt.signature).is_err(),
            "bit flip at byte {} must invalidate the signature",
            position
        );
        assert_ne!(
            Cid::from_preimage_bytes(&tampered),
            receipt.cid,
            "bit flip at byte {} must change the cid",
            position
        );
    }

    // Flip bits of the signature itself.
    for position in [0usize, 31, 63] {
        let mut sig = receipt.signature.0;
        sig[position] ^= 0x01;
        assert!(pk
            .verify(
                &receipt.preimage_bytes,
                &budsync_core::Ed25519Signature::from_bytes(sig)
            )
            .is_err());
    }
}
