//! In-memory guards for the sync engine.
//!
//! Two per-jar exclusivity guards: at most one in-flight queue drain, and
//! at most one in-flight backfill request. Each claim carries an expiry so
//! a crashed task cannot deadlock the guard; an expired claim is free to
//! take.

use std::collections::HashMap;

use tokio::sync::Mutex;

use budsync_core::JarId;

/// Outcome of a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The claim is ours; the caller must release it.
    Claimed,
    /// Another claim is active; the request is suppressed.
    Suppressed,
}

#[derive(Debug, Clone, Copy)]
struct BackfillClaim {
    from: u64,
    to: u64,
    expires_at_ms: i64,
}

/// Per-jar drain and backfill guards.
pub struct SyncGuards {
    ttl_ms: i64,
    drains: Mutex<HashMap<JarId, i64>>,
    backfills: Mutex<HashMap<JarId, BackfillClaim>>,
}

impl SyncGuards {
    pub fn new(ttl_ms: i64) -> Self {
        Self {
            ttl_ms,
            drains: Mutex::new(HashMap::new()),
            backfills: Mutex::new(HashMap::new()),
        }
    }

    /// Try to take the drain guard for a jar.
    pub async fn claim_drain(&self, jar_id: JarId, now_ms: i64) -> ClaimOutcome {
        let mut drains = self.drains.lock().await;
        match drains.get(&jar_id) {
            Some(&expires_at) if expires_at > now_ms => ClaimOutcome::Suppressed,
            _ => {
                drains.insert(jar_id, now_ms + self.ttl_ms);
                ClaimOutcome::Claimed
            }
        }
    }

    /// Release the drain guard. Safe to call on all exits.
    pub async fn release_drain(&self, jar_id: JarId) {
        self.drains.lock().await.remove(&jar_id);
    }

    /// Try to take the backfill guard for a range.
    ///
    /// A request whose range is fully contained within an active claim is
    /// suppressed; any other active claim also suppresses (one in-flight
    /// backfill per jar), with the active claim widened to the union so the
    /// in-flight run knows the full extent.
    pub async fn claim_backfill(
        &self,
        jar_id: JarId,
        from: u64,
        to: u64,
        now_ms: i64,
    ) -> ClaimOutcome {
        let mut backfills = self.backfills.lock().await;
        match backfills.get_mut(&jar_id) {
            Some(claim) if claim.expires_at_ms > now_ms => {
                claim.from = claim.from.min(from);
                claim.to = claim.to.max(to);
                ClaimOutcome::Suppressed
            }
            _ => {
                backfills.insert(
                    jar_id,
                    BackfillClaim {
                        from,
                        to,
                        expires_at_ms: now_ms + self.ttl_ms,
                    },
                );
                ClaimOutcome::Claimed
            }
        }
    }

    /// Release the backfill guard.
    pub async fn release_backfill(&self, jar_id: JarId) {
        self.backfills.lock().await.remove(&jar_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jar() -> JarId {
        JarId::from_bytes([0x11; 16])
    }

    #[tokio::test]
    async fn test_drain_guard_exclusive() {
        let guards = SyncGuards::new(15_000);

        assert_eq!(guards.claim_drain(jar(), 1000).await, ClaimOutcome::Claimed);
        assert_eq!(
            guards.claim_drain(jar(), 2000).await,
            ClaimOutcome::Suppressed
        );

        guards.release_drain(jar()).await;
        assert_eq!(guards.claim_drain(jar(), 3000).await, ClaimOutcome::Claimed);
    }

    #[tokio::test]
    async fn test_drain_guard_expires() {
        let guards = SyncGuards::new(15_000);

        assert_eq!(guards.claim_drain(jar(), 1000).await, ClaimOutcome::Claimed);
        // The holder crashed; after the TTL the guard frees itself.
        assert_eq!(
            guards.claim_drain(jar(), 16_001).await,
            ClaimOutcome::Claimed
        );
    }

    #[tokio::test]
    async fn test_backfill_guard_suppresses_contained_range() {
        let guards = SyncGuards::new(15_000);

        assert_eq!(
            guards.claim_backfill(jar(), 2, 9, 1000).await,
            ClaimOutcome::Claimed
        );
        assert_eq!(
            guards.claim_backfill(jar(), 3, 5, 1001).await,
            ClaimOutcome::Suppressed
        );
    }

    #[tokio::test]
    async fn test_backfill_guard_independent_jars() {
        let guards = SyncGuards::new(15_000);
        let other = JarId::from_bytes([0x22; 16]);

        assert_eq!(
            guards.claim_backfill(jar(), 1, 3, 1000).await,
            ClaimOutcome::Claimed
        );
        assert_eq!(
            guards.claim_backfill(other, 1, 3, 1000).await,
            ClaimOutcome::Claimed
        );
    }

    #[tokio::test]
    async fn test_backfill_guard_expiry_frees() {
        let guards = SyncGuards::new(15_000);

        assert_eq!(
            guards.claim_backfill(jar(), 1, 3, 1000).await,
            ClaimOutcome::Claimed
        );
        assert_eq!(
            guards.claim_backfill(jar(), 1, 3, 20_000).await,
            ClaimOutcome::Claimed
        );
    }
}
