//! The per-jar sync engine.
//!
//! Maintains, for each jar, a consistent prefix of the relay-assigned
//! sequence: receipts apply in strict order, gaps queue and backfill, and
//! unresolvable poison halts the jar rather than silently skipping.
//!
//! State machine (per jar):
//!
//! ```text
//!   Healthy(S)
//!    ├── recv E, seq==S+1, valid ─→ Healthy(S+1) [+drain queue]
//!    ├── recv E, seq>S+1, valid  ─→ Backfilling(S+1, seq-1) [queue E]
//!    ├── recv E, seq<=S          ─→ Healthy(S) [drop]
//!    ├── recv E, cid/sig invalid ─→ Healthy(S) [surface error, no change]
//!    └── queued item poisoned    ─→ Halted(reason)
//!
//!   Backfilling(a,b)
//!    ├── range filled completely ─→ Healthy(S')
//!    ├── relay empty or partial  ─→ schedule retry, remain Backfilling
//!    └── queued item poisoned    ─→ Halted
//!
//!   Halted(r) ── unhalt(manual) ─→ Healthy(S)
//!   Tombstoned  (absorbing)
//! ```

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use budsync_core::{
    receipt_type, verify_receipt_bytes, Envelope, JarId, ReceiptPayload, SignedReceipt,
};
use budsync_relay::{Relay, RelayError};
use budsync_store::{
    AppliedEnvelope, QueuedReceiptRecord, ReceiptRecord, Store, StoreError, TofuRegistry,
};

use crate::error::{Result, SyncError};
use crate::guards::{ClaimOutcome, SyncGuards};
use crate::handlers::{plan_mutations, HandlerContext};

/// Policy for receipt types this build does not recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownTypePolicy {
    /// Halt the jar. Keeps "every applied prefix is a function of the
    /// receipt stream" intact. The default.
    Halt,
    /// Record the sequence as processed with no projection change.
    SkipAndLog,
}

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Drain failures before a queued receipt poisons.
    pub max_retries: u32,
    /// Queue age before a queued receipt poisons.
    pub max_queue_age_ms: i64,
    /// Expiry for the in-memory drain/backfill guards.
    pub guard_ttl_ms: i64,
    /// Backfill retry backoff schedule, capped at the last value.
    pub backfill_backoff_ms: [i64; 5],
    /// Batch fetch size.
    pub fetch_limit: u32,
    pub unknown_types: UnknownTypePolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            max_queue_age_ms: 7 * 24 * 60 * 60 * 1000,
            guard_ttl_ms: 15_000,
            backfill_backoff_ms: [5_000, 15_000, 60_000, 300_000, 900_000],
            fetch_limit: 500,
            unknown_types: UnknownTypePolicy::Halt,
        }
    }
}

/// What happened to one ingested envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Applied; the jar advanced.
    Applied,
    /// Verified and queued; a backfill was scheduled for the gap.
    Queued { backfill_from: u64, backfill_to: u64 },
    /// Verified but its handler failed; queued for drain retries.
    QueuedForRetry,
    /// CID already processed. Silent drop.
    ReplayDropped,
    /// The jar is tombstoned. Silent drop.
    TombstoneDropped,
    /// Sequence at or below the applied prefix. Drop.
    LateDropped,
    /// Backfill/drain path only: still ahead of the prefix.
    NotYetApplicable,
}

/// What a backfill attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillOutcome {
    /// The whole range applied; the jar is healthy again.
    Completed,
    /// Incomplete; a delayed retry is scheduled.
    RetryScheduled,
    /// Another backfill holds the guard.
    Suppressed,
    /// No pending range, or the jar is halted.
    Skipped,
}

/// Summary of a batch ingest.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub applied: u32,
    pub queued: u32,
    pub dropped: u32,
    pub errors: u32,
}

/// The sync engine. One instance serves all jars of one device.
pub struct SyncEngine<S, R> {
    store: Arc<S>,
    relay: Arc<R>,
    registry: TofuRegistry<S>,
    guards: SyncGuards,
    config: SyncConfig,
}

impl<S: Store, R: Relay> SyncEngine<S, R> {
    pub fn new(store: Arc<S>, relay: Arc<R>, config: SyncConfig) -> Self {
        let registry = TofuRegistry::new(store.clone());
        let guards = SyncGuards::new(config.guard_ttl_ms);
        Self {
            store,
            relay,
            registry,
            guards,
            config,
        }
    }

    pub fn registry(&self) -> &TofuRegistry<S> {
        &self.registry
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Ingest one relay-delivered envelope (gap analysis on).
    ///
    /// On a successful apply the queue drains transitively; on a detected
    /// gap a backfill is scheduled and attempted.
    pub async fn ingest(&self, envelope: &Envelope) -> Result<IngestOutcome> {
        let outcome = self.ingest_inner(envelope, true).await?;

        match outcome {
            IngestOutcome::Applied => {
                self.drain_queue(envelope.jar_id).await?;
            }
            IngestOutcome::Queued { .. } => {
                self.run_backfill(envelope.jar_id).await?;
            }
            _ => {}
        }

        Ok(outcome)
    }

    /// Ingest a polled batch for one jar.
    ///
    /// Sorts by sequence, deduplicates keeping the first, cross-checks the
    /// processed index, and continues past per-envelope errors. Hard local
    /// faults halt the jar and abort the batch.
    pub async fn ingest_batch(
        &self,
        jar_id: JarId,
        mut envelopes: Vec<Envelope>,
    ) -> Result<BatchReport> {
        envelopes.sort_by_key(|e| e.sequence_number);
        envelopes.dedup_by_key(|e| e.sequence_number);

        let mut report = BatchReport::default();

        for envelope in envelopes {
            // A (jar, seq) row with a different CID means relay forgery or
            // storage corruption: halt immediately.
            if let Some(existing) = self
                .store
                .processed_cid_at(&jar_id, envelope.sequence_number)
                .await?
            {
                if existing != envelope.cid {
                    let err = SyncError::SequenceCidMismatch {
                        jar_id,
                        sequence_number: envelope.sequence_number,
                        existing,
                        incoming: envelope.cid,
                    };
                    self.halt(jar_id, &err.to_string()).await?;
                    return Err(err);
                }
                report.dropped += 1;
                continue;
            }

            match self.ingest(&envelope).await {
                Ok(IngestOutcome::Applied) => report.applied += 1,
                Ok(IngestOutcome::Queued { .. }) | Ok(IngestOutcome::QueuedForRetry) => {
                    report.queued += 1;
                }
                Ok(_) => report.dropped += 1,
                Err(e) if e.is_hard_fault() => return Err(e),
                Err(e @ SyncError::Halted { .. }) => return Err(e),
                Err(e) => {
                    warn!(jar = %jar_id, seq = envelope.sequence_number, error = %e,
                          "batch envelope failed");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    /// The full ingest pipeline for one envelope.
    ///
    /// `gap_analysis` is off when called from the queue-drain or backfill
    /// pathway, so a mid-range missing envelope is caught by the next
    /// `seq == expected` check instead of recursing into backfill.
    async fn ingest_inner(&self, envelope: &Envelope, gap_analysis: bool) -> Result<IngestOutcome> {
        let jar_id = envelope.jar_id;
        let seq = envelope.sequence_number;

        // 1. Replay check.
        if self.store.is_processed_cid(&envelope.cid).await? {
            debug!(jar = %jar_id, seq, cid = %envelope.cid, "replay dropped");
            return Ok(IngestOutcome::ReplayDropped);
        }

        // 2. Tombstone check.
        if self.store.is_tombstoned(&jar_id).await? {
            debug!(jar = %jar_id, seq, "tombstoned jar, envelope dropped");
            return Ok(IngestOutcome::TombstoneDropped);
        }

        // 3. Halt check.
        let state = self.store.get_sync_state(&jar_id).await?;
        if state.is_halted {
            return Err(SyncError::Halted {
                jar_id,
                reason: state.halt_reason.unwrap_or_else(|| "halted".to_string()),
            });
        }

        let expected = self.last_applied(&jar_id).await? + 1;

        // 4. Gap analysis.
        if gap_analysis {
            if seq > expected {
                // Verify before queueing so invalid receipts cannot flood
                // the queue.
                self.verify_envelope(envelope).await?;

                let now = now_millis();
                self.store
                    .enqueue_receipt(queued_record(envelope, now))
                    .await?;
                self.schedule_backfill(jar_id, expected, seq - 1, now).await?;

                info!(jar = %jar_id, seq, expected, "gap detected, receipt queued");
                return Ok(IngestOutcome::Queued {
                    backfill_from: expected,
                    backfill_to: seq - 1,
                });
            }
            if seq < expected {
                debug!(jar = %jar_id, seq, expected, "late envelope dropped");
                return Ok(IngestOutcome::LateDropped);
            }
        } else {
            if seq < expected {
                return Ok(IngestOutcome::LateDropped);
            }
            if seq > expected {
                return Ok(IngestOutcome::NotYetApplicable);
            }
        }

        // 5-6. CID and signature verification.
        let receipt = self.verify_envelope(envelope).await?;

        // 7-8. Pre-application checks, dispatch, atomic apply.
        match self.apply_verified(envelope, &receipt).await {
            Ok(()) => Ok(IngestOutcome::Applied),
            Err(e) if e.is_hard_fault() => {
                self.halt(jar_id, &e.to_string()).await?;
                Err(e)
            }
            Err(SyncError::Processing(msg)) if gap_analysis => {
                // The receipt verified but its handler failed; park it so
                // drain retries can poison it if the failure is permanent.
                warn!(jar = %jar_id, seq, reason = %msg, "handler failed, queued for retry");
                self.store
                    .enqueue_receipt(queued_record(envelope, now_millis()))
                    .await?;
                Ok(IngestOutcome::QueuedForRetry)
            }
            Err(SyncError::Store(StoreError::Tombstoned(_))) => {
                Ok(IngestOutcome::TombstoneDropped)
            }
            Err(e) => Err(e),
        }
    }

    /// Steps 5-6: recompute the CID, look up the pinned key, verify.
    async fn verify_envelope(&self, envelope: &Envelope) -> Result<SignedReceipt> {
        let receipt = envelope
            .receipt()
            .map_err(|e| SyncError::Malformed(e.to_string()))?;

        if receipt.cid != envelope.cid {
            return Err(SyncError::CidMismatch {
                claimed: envelope.cid,
                computed: receipt.cid,
            });
        }

        let member_id = receipt.author_member_id().clone();
        let device_id = receipt.author_device_id();

        let pinned = self.registry.get_sign_key(&member_id, &device_id).await?;
        let key = match pinned {
            Some(key) => key,
            // A jar's genesis receipt carries the owner's own device keys;
            // verification uses the key the payload pins.
            None => genesis_sign_key(&receipt, envelope).ok_or(SyncError::UnpinnedDevice {
                member_id: member_id.clone(),
                device_id,
            })?,
        };

        verify_receipt_bytes(&receipt.preimage_bytes, &envelope.cid, &receipt.signature, &key)
            .map_err(|_| SyncError::BadSignature {
                member_id,
                device_id,
            })?;

        Ok(receipt)
    }

    /// Steps 7-8: decode the payload, preload projection context, dispatch
    /// the handler and commit atomically.
    async fn apply_verified(&self, envelope: &Envelope, receipt: &SignedReceipt) -> Result<()> {
        let jar_id = envelope.jar_id;
        let payload = receipt
            .payload()
            .map_err(|e| SyncError::Malformed(e.to_string()))?;

        let receipt_record = ReceiptRecord {
            cid: receipt.cid,
            author_member_id: receipt.author_member_id().clone(),
            author_device_id: receipt.author_device_id(),
            parent_cid: receipt.preimage.parent_cid,
            root_cid: receipt.preimage.root_cid,
            receipt_type: receipt.receipt_type().to_string(),
            preimage_cbor: receipt.preimage_bytes.to_vec(),
            signature: receipt.signature,
            received_at_ms: envelope.received_at_ms,
        };
        let applied = AppliedEnvelope {
            jar_id,
            sequence_number: envelope.sequence_number,
            cid: envelope.cid,
            processed_at_ms: now_millis(),
        };

        if let ReceiptPayload::Unknown { receipt_type, .. } = &payload {
            match self.config.unknown_types {
                UnknownTypePolicy::Halt => {
                    return Err(SyncError::UnknownType(receipt_type.clone()));
                }
                UnknownTypePolicy::SkipAndLog => {
                    warn!(jar = %jar_id, seq = envelope.sequence_number,
                          receipt_type = %receipt_type,
                          "unknown receipt type applied as no-op");
                    return self
                        .store
                        .apply_receipt(&applied, receipt_record, Vec::new())
                        .await
                        .map_err(map_apply_error);
                }
            }
        }

        let jar = self.store.get_jar(&jar_id).await?;

        let target_member = match &payload {
            ReceiptPayload::InviteAccepted(p) => {
                self.store.get_member(&jar_id, &p.member_id).await?
            }
            ReceiptPayload::MemberRemoved(p) => {
                self.store.get_member(&jar_id, &p.member_id).await?
            }
            ReceiptPayload::MemberLeft(_) => {
                self.store
                    .get_member(&jar_id, receipt.author_member_id())
                    .await?
            }
            _ => None,
        };

        let content_item = match &payload {
            ReceiptPayload::BudDeleted(p) => self.store.get_content_item(&p.bud_uuid).await?,
            _ => None,
        };

        let ctx = HandlerContext {
            author: receipt.author_member_id().clone(),
            jar_id,
            sequence_number: envelope.sequence_number,
            received_at_ms: envelope.received_at_ms,
            target_member,
            content_item,
        };

        let mutations = plan_mutations(jar.as_ref(), &payload, &ctx)
            .map_err(|e| SyncError::Processing(e.to_string()))?;

        self.store
            .apply_receipt(&applied, receipt_record, mutations)
            .await
            .map_err(map_apply_error)?;

        info!(jar = %jar_id, seq = envelope.sequence_number,
              receipt_type = receipt.receipt_type(), "receipt applied");
        Ok(())
    }

    /// Step 9: apply queued receipts whose sequence continues the prefix.
    ///
    /// At most one drain runs per jar; the guard is taken before draining
    /// and released on all exits.
    pub async fn drain_queue(&self, jar_id: JarId) -> Result<u32> {
        let now = now_millis();
        if self.guards.claim_drain(jar_id, now).await == ClaimOutcome::Suppressed {
            return Ok(0);
        }

        let result = self.drain_queue_inner(jar_id).await;
        self.guards.release_drain(jar_id).await;
        result
    }

    async fn drain_queue_inner(&self, jar_id: JarId) -> Result<u32> {
        let mut applied = 0u32;

        loop {
            let state = self.store.get_sync_state(&jar_id).await?;
            if state.is_halted {
                break;
            }

            let expected = self.last_applied(&jar_id).await? + 1;
            let queued = self.store.queued_receipts(&jar_id).await?;
            let Some(entry) = queued.iter().find(|q| q.sequence_number == expected) else {
                break;
            };

            let now = now_millis();
            if now - entry.queued_at_ms > self.config.max_queue_age_ms {
                return self
                    .poison(jar_id, entry, "max queue age exceeded".to_string())
                    .await;
            }

            let envelope = envelope_from_queued(entry);
            match self.ingest_inner(&envelope, false).await {
                Ok(IngestOutcome::Applied) => {
                    self.store.remove_queued(entry.queue_id).await?;
                    applied += 1;
                }
                Ok(IngestOutcome::ReplayDropped) | Ok(IngestOutcome::LateDropped) => {
                    // Applied through another path; the entry is stale.
                    self.store.remove_queued(entry.queue_id).await?;
                }
                Ok(_) => break,
                Err(e) if e.is_hard_fault() => return Err(e),
                Err(e @ SyncError::Halted { .. }) => return Err(e),
                Err(SyncError::Store(e)) => return Err(SyncError::Store(e)),
                Err(e) => {
                    // Verification or processing failure on a queued
                    // receipt. Retry on later drains; poison past the
                    // threshold.
                    let count = self.store.bump_queue_retry(entry.queue_id, now).await?;
                    warn!(jar = %jar_id, seq = entry.sequence_number, retries = count,
                          error = %e, "queued receipt failed to apply");
                    if count >= self.config.max_retries {
                        return self.poison(jar_id, entry, e.to_string()).await;
                    }
                    break;
                }
            }
        }

        Ok(applied)
    }

    async fn poison(
        &self,
        jar_id: JarId,
        entry: &QueuedReceiptRecord,
        reason: String,
    ) -> Result<u32> {
        self.store.poison_queued(entry.queue_id, &reason).await?;
        let halt_reason = format!(
            "poisoned receipt at seq {}: {}",
            entry.sequence_number, reason
        );
        self.halt(jar_id, &halt_reason).await?;
        Err(SyncError::Poisoned {
            jar_id,
            sequence_number: entry.sequence_number,
            reason,
        })
    }

    /// Record a pending backfill range, merging with any existing one.
    async fn schedule_backfill(
        &self,
        jar_id: JarId,
        from: u64,
        to: u64,
        now_ms: i64,
    ) -> Result<()> {
        let mut state = self.store.get_sync_state(&jar_id).await?;
        state.backfill_from = Some(state.backfill_from.map_or(from, |f| f.min(from)));
        state.backfill_to = Some(state.backfill_to.map_or(to, |t| t.max(to)));
        if state.next_backfill_at_ms.is_none() {
            state.next_backfill_at_ms = Some(now_ms);
        }
        self.store.put_sync_state(&state).await?;
        Ok(())
    }

    /// Attempt the pending backfill for a jar.
    pub async fn run_backfill(&self, jar_id: JarId) -> Result<BackfillOutcome> {
        let state = self.store.get_sync_state(&jar_id).await?;
        if state.is_halted {
            return Ok(BackfillOutcome::Skipped);
        }
        let (Some(from), Some(to)) = (state.backfill_from, state.backfill_to) else {
            return Ok(BackfillOutcome::Skipped);
        };

        let now = now_millis();
        if self.guards.claim_backfill(jar_id, from, to, now).await == ClaimOutcome::Suppressed {
            return Ok(BackfillOutcome::Suppressed);
        }

        let result = self.run_backfill_inner(jar_id, from, to).await;
        self.guards.release_backfill(jar_id).await;
        result
    }

    async fn run_backfill_inner(
        &self,
        jar_id: JarId,
        from: u64,
        to: u64,
    ) -> Result<BackfillOutcome> {
        let mut envelopes = match self.relay.fetch_range(&jar_id, from, to).await {
            Ok(envelopes) => envelopes,
            Err(RelayError::Forbidden) => {
                // Membership revoked mid-sync.
                self.halt(jar_id, "relay forbidden during backfill").await?;
                return Err(SyncError::Relay(RelayError::Forbidden));
            }
            Err(e) => {
                warn!(jar = %jar_id, from, to, error = %e, "backfill fetch failed");
                self.schedule_backfill_retry(jar_id).await?;
                return Ok(BackfillOutcome::RetryScheduled);
            }
        };

        envelopes.sort_by_key(|e| e.sequence_number);

        for envelope in &envelopes {
            match self.ingest_inner(envelope, false).await {
                Ok(_) => {}
                Err(e) if e.is_hard_fault() => return Err(e),
                Err(e @ SyncError::Halted { .. }) => return Err(e),
                Err(e) => {
                    warn!(jar = %jar_id, seq = envelope.sequence_number, error = %e,
                          "backfilled envelope failed");
                }
            }
        }

        // Consume the queued tail beyond the range.
        self.drain_queue(jar_id).await?;

        if self.last_applied(&jar_id).await? >= to {
            let mut state = self.store.get_sync_state(&jar_id).await?;
            state.backfill_attempt = 0;
            state.next_backfill_at_ms = None;
            state.backfill_from = None;
            state.backfill_to = None;
            self.store.put_sync_state(&state).await?;
            info!(jar = %jar_id, from, to, "backfill complete");
            return Ok(BackfillOutcome::Completed);
        }

        self.schedule_backfill_retry(jar_id).await?;
        Ok(BackfillOutcome::RetryScheduled)
    }

    /// Exponential backoff with an absolute deadline so restarts resume.
    async fn schedule_backfill_retry(&self, jar_id: JarId) -> Result<()> {
        let mut state = self.store.get_sync_state(&jar_id).await?;
        state.backfill_attempt += 1;
        let index = (state.backfill_attempt as usize - 1)
            .min(self.config.backfill_backoff_ms.len() - 1);
        let delay = self.config.backfill_backoff_ms[index];
        state.next_backfill_at_ms = Some(now_millis() + delay);
        self.store.put_sync_state(&state).await?;

        debug!(jar = %jar_id, attempt = state.backfill_attempt, delay_ms = delay,
               "backfill retry scheduled");
        Ok(())
    }

    /// Run the pending backfill if its deadline has passed.
    pub async fn poll_backfill(&self, jar_id: JarId) -> Result<BackfillOutcome> {
        let state = self.store.get_sync_state(&jar_id).await?;
        match state.next_backfill_at_ms {
            Some(due) if due <= now_millis() && !state.is_halted => {
                self.run_backfill(jar_id).await
            }
            _ => Ok(BackfillOutcome::Skipped),
        }
    }

    /// Manual operator action: clear the halt and resume.
    ///
    /// Queue entries older than the max queue age are dropped; the rest
    /// re-drain. Returns how many queued receipts applied.
    pub async fn unhalt(&self, jar_id: JarId) -> Result<u32> {
        self.store.unhalt_jar(&jar_id).await?;

        let cutoff = now_millis() - self.config.max_queue_age_ms;
        let dropped = self.store.drop_queued_older_than(&jar_id, cutoff).await?;
        if dropped > 0 {
            info!(jar = %jar_id, dropped, "stale queue entries dropped on unhalt");
        }

        self.drain_queue(jar_id).await
    }

    async fn halt(&self, jar_id: JarId, reason: &str) -> Result<()> {
        error!(jar = %jar_id, reason, "halting jar");
        self.store.halt_jar(&jar_id, reason, now_millis()).await?;
        Ok(())
    }

    async fn last_applied(&self, jar_id: &JarId) -> Result<u64> {
        Ok(self
            .store
            .get_jar(jar_id)
            .await?
            .map(|j| j.last_applied_sequence)
            .unwrap_or(0))
    }
}

/// A genesis receipt pins its own author: `jar.created/v1` at sequence 1
/// carries the owner's device keys, and verification uses the key the
/// payload is about to pin.
fn genesis_sign_key(
    receipt: &SignedReceipt,
    envelope: &Envelope,
) -> Option<budsync_core::Ed25519PublicKey> {
    if envelope.sequence_number != 1 || receipt.receipt_type() != receipt_type::JAR_CREATED {
        return None;
    }
    match receipt.payload().ok()? {
        ReceiptPayload::JarCreated(p) if p.owner_member_id == *receipt.author_member_id() => p
            .owner_devices
            .iter()
            .find(|d| d.device_id == receipt.author_device_id())
            .map(|d| d.pk_sign),
        _ => None,
    }
}

fn queued_record(envelope: &Envelope, now_ms: i64) -> QueuedReceiptRecord {
    QueuedReceiptRecord {
        queue_id: 0,
        jar_id: envelope.jar_id,
        sequence_number: envelope.sequence_number,
        cid: envelope.cid,
        parent_cid: envelope.parent_cid,
        preimage_cbor: envelope.preimage_bytes.to_vec(),
        signature: envelope.signature,
        sender_member_id: envelope.sender_member_id.clone(),
        queued_at_ms: now_ms,
        retry_count: 0,
        last_retry_at_ms: None,
        poison_reason: None,
    }
}

fn envelope_from_queued(entry: &QueuedReceiptRecord) -> Envelope {
    Envelope {
        jar_id: entry.jar_id,
        sequence_number: entry.sequence_number,
        cid: entry.cid,
        preimage_bytes: bytes::Bytes::from(entry.preimage_cbor.clone()),
        signature: entry.signature,
        sender_member_id: entry.sender_member_id.clone(),
        received_at_ms: entry.queued_at_ms,
        parent_cid: entry.parent_cid,
    }
}

fn map_apply_error(e: StoreError) -> SyncError {
    match e {
        StoreError::ProcessedCidMismatch {
            jar_id,
            sequence_number,
            existing,
            incoming,
        } => SyncError::SequenceCidMismatch {
            jar_id,
            sequence_number,
            existing,
            incoming,
        },
        StoreError::NotFound(msg) => SyncError::Processing(msg),
        other => SyncError::Store(other),
    }
}

/// Current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
