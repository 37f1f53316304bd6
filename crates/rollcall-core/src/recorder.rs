//! Recording coordinator.
//!
//! Turns an admitted scan into a durable presence event:
//!
//! 1. Look up the identity registered for the origin
//! 2. None registered → `UnknownOrigin` (expected, not a fault)
//! 3. Append the event → `Recorded`, or `StoreError` if the store fails
//!
//! Exactly one append happens per `Recorded`; every other outcome leaves the
//! presence log untouched. Nothing is retried here; retry policy belongs to
//! the store.

use std::{
    collections::{HashMap, VecDeque},
    net::IpAddr,
    sync::Arc,
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::{
    record::{IdentityRecord, PresenceEvent},
    store::{RecordStore, StoreError},
};

/// How repeated admitted scans from one origin are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Every admitted scan appends an event.
    #[default]
    EveryScan,

    /// At most one event per origin per token; later scans under the same
    /// token report `AlreadyRecorded`.
    OncePerToken,
}

/// Result of recording an admitted scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Event appended for this identity
    Recorded {
        /// Resolved identity
        identity: IdentityRecord,
        /// Timestamp written to the event
        recorded_at: DateTime<Utc>,
    },

    /// Origin already recorded under this token (`OncePerToken` only)
    AlreadyRecorded {
        /// Resolved identity
        identity: IdentityRecord,
    },

    /// No identity registered for the origin
    UnknownOrigin,

    /// Lookup or append failed
    StoreError(StoreError),
}

/// Tokens whose claims are kept. A scan admitted just before a rotation may
/// finish after scans under the next token started, so the previous token's
/// claims must survive one rotation.
const RETAINED_TOKENS: usize = 2;

/// Claim on one origin under one token. Locked for the whole recording so a
/// concurrent scan from the same device waits for the outcome instead of
/// guessing it; `true` once an event was appended.
type Claim = Arc<tokio::sync::Mutex<bool>>;

/// Per-token claims, oldest token first.
#[derive(Debug, Default)]
struct SeenOrigins {
    tokens: VecDeque<(String, HashMap<IpAddr, Claim>)>,
}

impl SeenOrigins {
    /// The claim for `origin` under `token`, created if absent.
    ///
    /// A token not seen before evicts the oldest retained one.
    fn claim(&mut self, token: &str, origin: IpAddr) -> Claim {
        let index = match self.tokens.iter().position(|(seen, _)| seen == token) {
            Some(index) => index,
            None => {
                if self.tokens.len() == RETAINED_TOKENS {
                    self.tokens.pop_front();
                }
                self.tokens.push_back((token.to_string(), HashMap::new()));
                self.tokens.len() - 1
            },
        };

        let claims = &mut self.tokens[index].1;
        Arc::clone(claims.entry(origin).or_default())
    }

    #[cfg(test)]
    fn retained(&self) -> Vec<&str> {
        self.tokens.iter().map(|(token, _)| token.as_str()).collect()
    }
}

/// Resolves origins to identities and appends presence events.
pub struct RecordingCoordinator<S> {
    store: Arc<S>,
    policy: DuplicatePolicy,
    seen: Mutex<SeenOrigins>,
}

impl<S: RecordStore> RecordingCoordinator<S> {
    /// Create a coordinator writing to `store`.
    pub fn new(store: Arc<S>, policy: DuplicatePolicy) -> Self {
        Self { store, policy, seen: Mutex::new(SeenOrigins::default()) }
    }

    /// The store events are written to.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Duplicate policy in force.
    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Record a scan from `origin` at `now`, ignoring the duplicate policy.
    pub async fn record(&self, origin: IpAddr, now: DateTime<Utc>) -> RecordOutcome {
        let origin = origin.to_canonical();

        let identity = match self.store.find_by_origin(origin).await {
            Ok(Some(identity)) => identity,
            Ok(None) => return RecordOutcome::UnknownOrigin,
            Err(e) => {
                tracing::error!(%origin, error = %e, "identity lookup failed");
                return RecordOutcome::StoreError(e);
            },
        };

        let event = PresenceEvent::for_identity(&identity, origin, now);
        match self.store.append_event(&event).await {
            Ok(()) => RecordOutcome::Recorded { identity, recorded_at: now },
            Err(e) => {
                tracing::error!(%origin, identity = %identity.id, error = %e, "append failed");
                RecordOutcome::StoreError(e)
            },
        }
    }

    /// Record a scan admitted under `token`, applying the duplicate policy.
    ///
    /// Under `OncePerToken` each `(token, origin)` pair has a claim that is
    /// held across the lookup and append. A concurrent scan from the same
    /// device waits for it, then either sees the appended event or records
    /// itself if the first attempt failed.
    pub async fn record_admitted(
        &self,
        token: &str,
        origin: IpAddr,
        now: DateTime<Utc>,
    ) -> RecordOutcome {
        if self.policy == DuplicatePolicy::EveryScan {
            return self.record(origin, now).await;
        }

        let origin = origin.to_canonical();
        let claim = self.seen.lock().claim(token, origin);
        let mut recorded = claim.lock().await;

        if *recorded {
            return match self.store.find_by_origin(origin).await {
                Ok(Some(identity)) => RecordOutcome::AlreadyRecorded { identity },
                Ok(None) => RecordOutcome::UnknownOrigin,
                Err(e) => RecordOutcome::StoreError(e),
            };
        }

        let outcome = self.record(origin, now).await;
        *recorded = matches!(outcome, RecordOutcome::Recorded { .. });
        outcome
    }
}

impl<S> std::fmt::Debug for RecordingCoordinator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingCoordinator").field("policy", &self.policy).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use chrono::TimeZone;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::store::{ChaoticStore, MemoryStore};

    /// Appends wait for a permit; the first one fails.
    struct GatedStore {
        inner: MemoryStore,
        gate: Semaphore,
        fail_next: AtomicBool,
    }

    #[async_trait]
    impl RecordStore for GatedStore {
        async fn find_by_origin(
            &self,
            origin: IpAddr,
        ) -> Result<Option<IdentityRecord>, StoreError> {
            self.inner.find_by_origin(origin).await
        }

        async fn append_event(&self, event: &PresenceEvent) -> Result<(), StoreError> {
            self.gate.acquire().await.unwrap().forget();
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            self.inner.append_event(event).await
        }

        async fn list_events(&self) -> Result<Vec<PresenceEvent>, StoreError> {
            self.inner.list_events().await
        }
    }

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, secs).unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn store_with_alice() -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        store.register(IdentityRecord::new("URK23CS1161", "Alice", ip("10.0.0.5")));
        Arc::new(store)
    }

    #[tokio::test]
    async fn registered_origin_is_recorded_once() {
        let store = store_with_alice();
        let coordinator = RecordingCoordinator::new(Arc::clone(&store), DuplicatePolicy::EveryScan);

        let outcome = coordinator.record(ip("10.0.0.5"), at(29)).await;

        match outcome {
            RecordOutcome::Recorded { identity, recorded_at } => {
                assert_eq!(identity.id, "URK23CS1161");
                assert_eq!(recorded_at, at(29));
            },
            other => panic!("expected Recorded, got {other:?}"),
        }
        let events = store.list_events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].identity_id, "URK23CS1161");
        assert_eq!(events[0].origin, ip("10.0.0.5"));
    }

    #[tokio::test]
    async fn unknown_origin_appends_nothing() {
        let store = store_with_alice();
        let coordinator = RecordingCoordinator::new(Arc::clone(&store), DuplicatePolicy::EveryScan);

        assert_eq!(coordinator.record(ip("10.0.0.6"), at(0)).await, RecordOutcome::UnknownOrigin);
        assert_eq!(store.event_count(), 0);
    }

    #[tokio::test]
    async fn store_failure_is_reported_and_appends_nothing() {
        let inner = store_with_alice();
        let chaotic = Arc::new(ChaoticStore::new(Arc::clone(&inner), 1.0, 1));
        let coordinator = RecordingCoordinator::new(chaotic, DuplicatePolicy::EveryScan);

        let outcome = coordinator.record(ip("10.0.0.5"), at(0)).await;

        assert!(matches!(outcome, RecordOutcome::StoreError(StoreError::Unavailable(_))));
        assert_eq!(inner.event_count(), 0);
    }

    #[tokio::test]
    async fn every_scan_policy_counts_duplicates() {
        let store = store_with_alice();
        let coordinator = RecordingCoordinator::new(Arc::clone(&store), DuplicatePolicy::EveryScan);

        for secs in [1, 2, 3] {
            let outcome = coordinator.record_admitted("T", ip("10.0.0.5"), at(secs)).await;
            assert!(matches!(outcome, RecordOutcome::Recorded { .. }));
        }
        assert_eq!(store.event_count(), 3);
    }

    #[tokio::test]
    async fn once_per_token_policy_suppresses_repeats() {
        let store = store_with_alice();
        let coordinator =
            RecordingCoordinator::new(Arc::clone(&store), DuplicatePolicy::OncePerToken);

        let first = coordinator.record_admitted("T1", ip("10.0.0.5"), at(1)).await;
        let second = coordinator.record_admitted("T1", ip("10.0.0.5"), at(2)).await;
        let next_token = coordinator.record_admitted("T2", ip("10.0.0.5"), at(3)).await;

        assert!(matches!(first, RecordOutcome::Recorded { .. }));
        assert!(matches!(second, RecordOutcome::AlreadyRecorded { .. }));
        assert!(matches!(next_token, RecordOutcome::Recorded { .. }));
        assert_eq!(store.event_count(), 2);
    }

    #[tokio::test]
    async fn once_per_token_releases_claim_on_unknown_origin() {
        let store = Arc::new(MemoryStore::new());
        let coordinator =
            RecordingCoordinator::new(Arc::clone(&store), DuplicatePolicy::OncePerToken);

        let first = coordinator.record_admitted("T", ip("10.0.0.9"), at(1)).await;
        assert_eq!(first, RecordOutcome::UnknownOrigin);

        store.register(IdentityRecord::new("ID9", "Late", ip("10.0.0.9")));
        let retry = coordinator.record_admitted("T", ip("10.0.0.9"), at(2)).await;
        assert!(matches!(retry, RecordOutcome::Recorded { .. }));
    }

    #[tokio::test]
    async fn late_scan_under_previous_token_keeps_current_claims() {
        let store = store_with_alice();
        store.register(IdentityRecord::new("ID2", "Bob", ip("10.0.0.6")));
        let coordinator =
            RecordingCoordinator::new(Arc::clone(&store), DuplicatePolicy::OncePerToken);

        let alice = coordinator.record_admitted("T2", ip("10.0.0.5"), at(31)).await;
        let late_bob = coordinator.record_admitted("T1", ip("10.0.0.6"), at(31)).await;
        let alice_again = coordinator.record_admitted("T2", ip("10.0.0.5"), at(32)).await;

        assert!(matches!(alice, RecordOutcome::Recorded { .. }));
        assert!(matches!(late_bob, RecordOutcome::Recorded { .. }));
        assert!(matches!(alice_again, RecordOutcome::AlreadyRecorded { .. }));
        assert_eq!(store.event_count(), 2);
    }

    #[test]
    fn claims_for_old_tokens_are_pruned() {
        let mut seen = SeenOrigins::default();
        for token in ["T1", "T2", "T2", "T3"] {
            seen.claim(token, ip("10.0.0.5"));
        }
        assert_eq!(seen.retained(), vec!["T2", "T3"]);
    }

    #[tokio::test]
    async fn overlapping_scan_records_after_first_attempt_fails() {
        let store = Arc::new(GatedStore {
            inner: MemoryStore::new(),
            gate: Semaphore::new(0),
            fail_next: AtomicBool::new(true),
        });
        store.inner.register(IdentityRecord::new("URK23CS1161", "Alice", ip("10.0.0.5")));
        let coordinator =
            Arc::new(RecordingCoordinator::new(Arc::clone(&store), DuplicatePolicy::OncePerToken));

        let first = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.record_admitted("T", ip("10.0.0.5"), at(1)).await }
        });
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        let second = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.record_admitted("T", ip("10.0.0.5"), at(2)).await }
        });
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert!(!second.is_finished());

        store.gate.add_permits(2);

        assert!(matches!(first.await.unwrap(), RecordOutcome::StoreError(_)));
        assert!(matches!(second.await.unwrap(), RecordOutcome::Recorded { .. }));
        assert_eq!(store.inner.event_count(), 1);

        let third = coordinator.record_admitted("T", ip("10.0.0.5"), at(3)).await;
        assert!(matches!(third, RecordOutcome::AlreadyRecorded { .. }));
    }
}
