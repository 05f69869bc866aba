//! In-memory relay for tests.
//!
//! Behaves like the real relay's sequencing core: per-jar envelope logs
//! with monotonically increasing sequence numbers starting at 1. Content
//! is not inspected beyond what sequencing needs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use budsync_core::{decode_preimage, Cid, Ed25519Signature, Envelope, JarId};

use crate::client::Relay;
use crate::error::{RelayError, Result};
use crate::wire::StoredReceipt;

/// An in-memory sequencing relay.
pub struct MemoryRelay {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    logs: HashMap<JarId, Vec<Envelope>>,
    forbidden: HashMap<JarId, bool>,
    clock_ms: i64,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                clock_ms: 1_700_000_000_000,
                ..Inner::default()
            }),
        }
    }

    /// Simulate membership revocation: all requests for the jar return
    /// Forbidden.
    pub fn set_forbidden(&self, jar_id: JarId, forbidden: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.forbidden.insert(jar_id, forbidden);
        }
    }

    /// All envelopes the relay holds for a jar (test inspection).
    pub fn envelopes(&self, jar_id: &JarId) -> Vec<Envelope> {
        self.inner
            .lock()
            .map(|inner| inner.logs.get(jar_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn check_forbidden(inner: &Inner, jar_id: &JarId) -> Result<()> {
        if inner.forbidden.get(jar_id).copied().unwrap_or(false) {
            return Err(RelayError::Forbidden);
        }
        Ok(())
    }
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Relay for MemoryRelay {
    async fn store_receipt(
        &self,
        jar_id: &JarId,
        receipt_data: &[u8],
        signature: &Ed25519Signature,
        parent_cid: Option<&Cid>,
    ) -> Result<StoredReceipt> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|e| RelayError::Network(format!("relay lock poisoned: {}", e)))?;
        Self::check_forbidden(&inner, jar_id)?;

        // The relay computes the CID itself; it never trusts the client.
        let cid = Cid::from_preimage_bytes(receipt_data);
        let preimage = decode_preimage(receipt_data)
            .map_err(|e| RelayError::Http {
                status: 400,
                body: format!("undecodable receipt: {}", e),
            })?;

        inner.clock_ms += 1;
        let received_at_ms = inner.clock_ms;
        let log = inner.logs.entry(*jar_id).or_default();
        let sequence_number = log.len() as u64 + 1;

        log.push(Envelope {
            jar_id: *jar_id,
            sequence_number,
            cid,
            preimage_bytes: Bytes::from(receipt_data.to_vec()),
            signature: *signature,
            sender_member_id: preimage.author_member_id,
            received_at_ms,
            parent_cid: parent_cid.copied(),
        });

        Ok(StoredReceipt {
            cid,
            sequence_number,
            jar_id: *jar_id,
        })
    }

    async fn fetch_after(
        &self,
        jar_id: &JarId,
        after_sequence: u64,
        limit: u32,
    ) -> Result<Vec<Envelope>> {
        let inner = self
            .inner
            .lock()
            .map_err(|e| RelayError::Network(format!("relay lock poisoned: {}", e)))?;
        Self::check_forbidden(&inner, jar_id)?;

        Ok(inner
            .logs
            .get(jar_id)
            .map(|log| {
                log.iter()
                    .filter(|e| e.sequence_number > after_sequence)
                    .take(limit as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_range(
        &self,
        jar_id: &JarId,
        from_sequence: u64,
        to_sequence: u64,
    ) -> Result<Vec<Envelope>> {
        let inner = self
            .inner
            .lock()
            .map_err(|e| RelayError::Network(format!("relay lock poisoned: {}", e)))?;
        Self::check_forbidden(&inner, jar_id)?;

        Ok(inner
            .logs
            .get(jar_id)
            .map(|log| {
                log.iter()
                    .filter(|e| {
                        e.sequence_number >= from_sequence && e.sequence_number <= to_sequence
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use budsync_core::{
        MemberId, ReceiptBuilder, ReceiptPayload, RenamedPayload, SigningKeypair,
    };

    fn signed_bytes(name: &str) -> (Vec<u8>, Ed25519Signature) {
        let keypair = SigningKeypair::from_seed(&[0x42; 32]);
        let receipt = ReceiptBuilder::new(
            MemberId::new("m1"),
            budsync_core::DeviceId::from_bytes([0x01; 16]),
        )
        .payload(&ReceiptPayload::Renamed(RenamedPayload {
            name: name.to_string(),
        }))
        .sign(&keypair)
        .unwrap();
        (receipt.preimage_bytes.to_vec(), receipt.signature)
    }

    #[tokio::test]
    async fn test_sequences_start_at_one_and_increase() {
        let relay = MemoryRelay::new();
        let jar_id = JarId::from_bytes([0x11; 16]);

        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            let (bytes, sig) = signed_bytes(name);
            let stored = relay
                .store_receipt(&jar_id, &bytes, &sig, None)
                .await
                .unwrap();
            assert_eq!(stored.sequence_number, i as u64 + 1);
        }

        let all = relay.fetch_after(&jar_id, 0, 100).await.unwrap();
        assert_eq!(all.len(), 3);
        let seqs: Vec<u64> = all.iter().map(|e| e.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_fetch_range_inclusive() {
        let relay = MemoryRelay::new();
        let jar_id = JarId::from_bytes([0x11; 16]);

        for name in ["a", "b", "c", "d"] {
            let (bytes, sig) = signed_bytes(name);
            relay.store_receipt(&jar_id, &bytes, &sig, None).await.unwrap();
        }

        let range = relay.fetch_range(&jar_id, 2, 3).await.unwrap();
        let seqs: Vec<u64> = range.iter().map(|e| e.sequence_number).collect();
        assert_eq!(seqs, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_forbidden_jar() {
        let relay = MemoryRelay::new();
        let jar_id = JarId::from_bytes([0x11; 16]);
        relay.set_forbidden(jar_id, true);

        let result = relay.fetch_after(&jar_id, 0, 10).await;
        assert!(matches!(result, Err(RelayError::Forbidden)));
    }
}
