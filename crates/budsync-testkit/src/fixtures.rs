//! Test fixtures and helpers.
//!
//! Common setup for integration tests: seeded device identities, in-memory
//! stores and relays, and composed contexts.

use std::sync::Arc;

use budsync::{Context, SyncConfig};
use budsync_core::{
    DeviceId, Envelope, JarCreatedPayload, JarId, MemberAddedPayload, MemberId,
    ReceiptPayload, SignedReceipt, SigningKeypair,
};
use budsync_relay::MemoryRelay;
use budsync_seal::DeviceIdentity;
use budsync_store::MemoryStore;

/// Build a deterministic device identity from a one-byte seed.
pub fn seeded_identity(seed: u8) -> DeviceIdentity {
    let signing = SigningKeypair::from_seed(&[seed; 32]);
    let member_id = MemberId::from_signing_key(&signing.public_key());
    DeviceIdentity::from_parts(
        member_id,
        DeviceId::from_bytes([seed; 16]),
        [seed; 32],
        [seed.wrapping_add(0x80); 32],
    )
}

/// One device: its in-memory store and composed context.
pub struct DeviceFixture {
    pub store: Arc<MemoryStore>,
    pub context: Context<MemoryStore, MemoryRelay>,
}

impl DeviceFixture {
    pub fn new(identity: DeviceIdentity, relay: Arc<MemoryRelay>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let context = Context::new(identity, store.clone(), relay, SyncConfig::default());
        Self { store, context }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        self.context.identity()
    }
}

/// Two devices sharing one relay: the standard multi-device scenario.
pub struct TwoDeviceFixture {
    pub relay: Arc<MemoryRelay>,
    pub owner: DeviceFixture,
    pub guest: DeviceFixture,
}

impl TwoDeviceFixture {
    pub fn new() -> Self {
        let relay = Arc::new(MemoryRelay::new());
        Self {
            owner: DeviceFixture::new(seeded_identity(0x42), relay.clone()),
            guest: DeviceFixture::new(seeded_identity(0x43), relay.clone()),
            relay,
        }
    }
}

impl Default for TwoDeviceFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// The genesis payload for a jar owned by `identity`.
pub fn jar_created_payload(
    identity: &DeviceIdentity,
    jar_id: JarId,
    name: &str,
    created_at_ms: i64,
) -> ReceiptPayload {
    ReceiptPayload::JarCreated(JarCreatedPayload {
        jar_id,
        name: name.to_string(),
        description: None,
        owner_member_id: identity.member_id.clone(),
        created_at_ms,
        owner_devices: vec![identity.device_keys()],
    })
}

/// A member_added payload carrying the invitee's device keys.
pub fn member_added_payload(invitee: &DeviceIdentity, invited_at_ms: i64) -> ReceiptPayload {
    ReceiptPayload::MemberAdded(MemberAddedPayload {
        member_id: invitee.member_id.clone(),
        display_name: None,
        devices: vec![invitee.device_keys()],
        invited_at_ms,
    })
}

/// Wrap a signed receipt in a hand-made envelope, bypassing the relay.
pub fn envelope_for(jar_id: JarId, sequence_number: u64, receipt: &SignedReceipt) -> Envelope {
    Envelope {
        jar_id,
        sequence_number,
        cid: receipt.cid,
        preimage_bytes: receipt.preimage_bytes.clone(),
        signature: receipt.signature,
        sender_member_id: receipt.author_member_id().clone(),
        received_at_ms: 1_700_000_000_000 + sequence_number as i64,
        parent_cid: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_identity_deterministic() {
        let a = seeded_identity(0x42);
        let b = seeded_identity(0x42);
        assert_eq!(a.member_id, b.member_id);
        assert_eq!(a.device_keys(), b.device_keys());

        let c = seeded_identity(0x43);
        assert_ne!(a.member_id, c.member_id);
    }

    #[tokio::test]
    async fn test_two_device_fixture_shares_relay() {
        let fixture = TwoDeviceFixture::new();
        let (jar_id, ack) = fixture
            .owner
            .context
            .create_jar("Friends", None, 1_700_000_000_000)
            .await
            .unwrap();
        assert_eq!(ack.sequence_number, 1);

        // The guest sees the jar through the shared relay.
        let report = fixture.guest.context.poll_jar(jar_id).await.unwrap();
        assert_eq!(report.applied, 1);
    }
}
