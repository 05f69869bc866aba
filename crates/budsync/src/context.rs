//! The embedding context: identity, store, relay and engine wired together.
//!
//! Everything is dependency-injected; there are no ambient singletons. The
//! embedding application owns the context for its process lifetime and
//! hands in keystore-backed identity material and its storage path.

use std::sync::Arc;

use tracing::info;

use budsync_core::{
    Cid, JarCreatedPayload, JarId, ReceiptBuilder, ReceiptPayload, SignedReceipt,
};
use budsync_relay::{Relay, StoredReceipt};
use budsync_seal::DeviceIdentity;
use budsync_store::Store;
use budsync_sync::{BatchReport, SyncConfig, SyncEngine};

use crate::error::{Error, Result};

/// A composed budsync core for one device.
pub struct Context<S, R> {
    identity: DeviceIdentity,
    store: Arc<S>,
    relay: Arc<R>,
    engine: SyncEngine<S, R>,
}

impl<S: Store, R: Relay> Context<S, R> {
    pub fn new(
        identity: DeviceIdentity,
        store: Arc<S>,
        relay: Arc<R>,
        config: SyncConfig,
    ) -> Self {
        let engine = SyncEngine::new(store.clone(), relay.clone(), config);
        Self {
            identity,
            store,
            relay,
            engine,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn engine(&self) -> &SyncEngine<S, R> {
        &self.engine
    }

    /// Sign a payload and submit it to the relay.
    ///
    /// The relay's acknowledgment carries the authoritative sequence
    /// number. The local projection stays pending until the echoed
    /// envelope comes back through [`Context::poll_jar`] and applies.
    pub async fn publish(
        &self,
        jar_id: JarId,
        payload: &ReceiptPayload,
        parent_cid: Option<Cid>,
        root_cid: Option<Cid>,
    ) -> Result<StoredReceipt> {
        let receipt = self.sign(payload, parent_cid, root_cid)?;
        self.submit(jar_id, &receipt).await
    }

    /// Mint a jar and publish its genesis receipt.
    ///
    /// The genesis carries this device's keys so every member can verify
    /// and encrypt to the owner from sequence 1.
    pub async fn create_jar(
        &self,
        name: impl Into<String>,
        description: Option<String>,
        now_ms: i64,
    ) -> Result<(JarId, StoredReceipt)> {
        let jar_id = JarId::generate();
        let payload = ReceiptPayload::JarCreated(JarCreatedPayload {
            jar_id,
            name: name.into(),
            description,
            owner_member_id: self.identity.member_id.clone(),
            created_at_ms: now_ms,
            owner_devices: vec![self.identity.device_keys()],
        });

        let ack = self.publish(jar_id, &payload, None, None).await?;
        info!(jar = %jar_id, seq = ack.sequence_number, "jar created");
        Ok((jar_id, ack))
    }

    /// Fetch and ingest everything past the applied prefix.
    pub async fn poll_jar(&self, jar_id: JarId) -> Result<BatchReport> {
        let after = self
            .store
            .get_jar(&jar_id)
            .await?
            .map(|j| j.last_applied_sequence)
            .unwrap_or(0);

        let envelopes = self
            .relay
            .fetch_after(&jar_id, after, self.engine.config().fetch_limit)
            .await?;

        Ok(self.engine.ingest_batch(jar_id, envelopes).await?)
    }

    /// Operator action: clear a halt and re-drain the queue.
    pub async fn unhalt_jar(&self, jar_id: JarId) -> Result<u32> {
        Ok(self.engine.unhalt(jar_id).await?)
    }

    /// Build and sign a receipt without submitting it.
    pub fn sign(
        &self,
        payload: &ReceiptPayload,
        parent_cid: Option<Cid>,
        root_cid: Option<Cid>,
    ) -> Result<SignedReceipt> {
        let mut builder =
            ReceiptBuilder::new(self.identity.member_id.clone(), self.identity.device_id)
                .payload(payload);
        if let Some(parent) = parent_cid {
            builder = builder.parent(parent);
        }
        if let Some(root) = root_cid {
            builder = builder.root(root);
        }
        Ok(builder.sign(&self.identity.signing)?)
    }

    /// Submit a signed receipt, cross-checking the relay's CID.
    async fn submit(&self, jar_id: JarId, receipt: &SignedReceipt) -> Result<StoredReceipt> {
        let ack = self
            .relay
            .store_receipt(
                &jar_id,
                &receipt.preimage_bytes,
                &receipt.signature,
                receipt.preimage.parent_cid.as_ref(),
            )
            .await?;

        // The relay computes the CID over the same bytes; disagreement
        // means it mangled the submission.
        if ack.cid != receipt.cid {
            return Err(Error::AckCidMismatch {
                local: receipt.cid.to_string(),
                relay: ack.cid.to_string(),
            });
        }

        Ok(ack)
    }
}
