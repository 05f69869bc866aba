//! Trust-on-first-use device registry.
//!
//! Pins `(member_id, device_id) -> (pk_sign, pk_agree)` on first observation
//! and refuses to overwrite. Pinning happens when membership receipts apply;
//! from that sequence point forward every jar member can encrypt to the new
//! devices and the relay cannot substitute keys.

use std::sync::Arc;

use tracing::warn;

use budsync_core::{AgreementPublicKey, DeviceId, Ed25519PublicKey, MemberId};

use crate::error::TofuError;
use crate::traits::{DeviceRecord, DeviceStatus, PinOutcome, Store};

/// TOFU registry over a store.
pub struct TofuRegistry<S> {
    store: Arc<S>,
}

impl<S: Store> TofuRegistry<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Pin a device's keys.
    ///
    /// First observation inserts; a matching re-pin is a no-op; differing
    /// keys fail with [`TofuError::KeyMismatch`], which is security-critical
    /// and must reach the user rather than be silently reconciled.
    pub async fn pin(
        &self,
        member_id: &MemberId,
        device_id: DeviceId,
        pk_sign: Ed25519PublicKey,
        pk_agree: AgreementPublicKey,
        now_ms: i64,
    ) -> Result<(), TofuError> {
        let outcome = self
            .store
            .pin_device(DeviceRecord {
                member_id: member_id.clone(),
                device_id,
                pk_sign,
                pk_agree,
                status: DeviceStatus::Active,
                registered_at_ms: now_ms,
            })
            .await?;

        match outcome {
            PinOutcome::Pinned | PinOutcome::AlreadyPinned => Ok(()),
            PinOutcome::Mismatch => {
                warn!(
                    member = %member_id,
                    device = %device_id,
                    "tofu key mismatch: refusing to overwrite pinned keys"
                );
                Err(TofuError::KeyMismatch {
                    member_id: member_id.clone(),
                    device_id,
                })
            }
        }
    }

    /// Look up the pinned signing key.
    pub async fn get_sign_key(
        &self,
        member_id: &MemberId,
        device_id: &DeviceId,
    ) -> Result<Option<Ed25519PublicKey>, TofuError> {
        Ok(self
            .store
            .get_device(member_id, device_id)
            .await?
            .map(|d| d.pk_sign))
    }

    /// Look up the pinned agreement key.
    pub async fn get_agree_key(
        &self,
        member_id: &MemberId,
        device_id: &DeviceId,
    ) -> Result<Option<AgreementPublicKey>, TofuError> {
        Ok(self
            .store
            .get_device(member_id, device_id)
            .await?
            .map(|d| d.pk_agree))
    }

    /// Revoke a device. Receipts already pinned remain verifiable.
    pub async fn revoke(&self, device_id: &DeviceId) -> Result<(), TofuError> {
        Ok(self.store.revoke_device(device_id).await?)
    }
}
