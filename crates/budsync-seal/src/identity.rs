//! Per-device identity: the long-lived signing and agreement keypairs.

use budsync_core::{DeviceId, DeviceKeys, MemberId, SigningKeypair};

use crate::crypto::AgreementSecret;

/// The full identity of one installation.
///
/// Key material lives in the embedding application's keystore; this type
/// holds it for the lifetime of the process.
pub struct DeviceIdentity {
    pub member_id: MemberId,
    pub device_id: DeviceId,
    pub signing: SigningKeypair,
    pub agreement: AgreementSecret,
}

impl DeviceIdentity {
    /// Generate a fresh identity, deriving the member id from the signing key.
    pub fn generate() -> Self {
        let signing = SigningKeypair::generate();
        let member_id = MemberId::from_signing_key(&signing.public_key());
        Self {
            member_id,
            device_id: DeviceId::generate(),
            signing,
            agreement: AgreementSecret::generate(),
        }
    }

    /// Rebuild an identity from stored key material.
    pub fn from_parts(
        member_id: MemberId,
        device_id: DeviceId,
        signing_seed: [u8; 32],
        agreement_seed: [u8; 32],
    ) -> Self {
        Self {
            member_id,
            device_id,
            signing: SigningKeypair::from_seed(&signing_seed),
            agreement: AgreementSecret::from_bytes(agreement_seed),
        }
    }

    /// The public halves, as carried in membership receipts for pinning.
    pub fn device_keys(&self) -> DeviceKeys {
        DeviceKeys {
            device_id: self.device_id,
            pk_sign: self.signing.public_key(),
            pk_agree: self.agreement.public_key(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_identity_is_consistent() {
        let identity = DeviceIdentity::generate();
        assert_eq!(
            identity.member_id,
            MemberId::from_signing_key(&identity.signing.public_key())
        );

        let keys = identity.device_keys();
        assert_eq!(keys.device_id, identity.device_id);
        assert_eq!(keys.pk_sign, identity.signing.public_key());
        assert_eq!(keys.pk_agree, identity.agreement.public_key());
    }

    #[test]
    fn test_from_parts_rebuilds_same_keys() {
        let original = DeviceIdentity::generate();
        let rebuilt = DeviceIdentity::from_parts(
            original.member_id.clone(),
            original.device_id,
            original.signing.seed(),
            original.agreement.to_bytes(),
        );

        assert_eq!(rebuilt.device_keys(), original.device_keys());
    }
}
