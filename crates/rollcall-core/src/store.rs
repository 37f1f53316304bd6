//! Record store abstraction.
//!
//! The store holds the identity directory (origin → identity) and the
//! append-only presence log. The core only ever reads identities and
//! appends events; registration and export are the store owner's business.
//!
//! # Invariants
//!
//! - A single `append_event` is all-or-nothing
//! - `list_events` returns the most recent event first
//! - Events are never mutated or removed by the core

use std::{collections::HashMap, net::IpAddr, sync::Arc};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::record::{IdentityRecord, PresenceEvent};

/// Errors from record store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Backend cannot be reached (connection refused, pool closed, ...)
    #[error("record store unavailable: {0}")]
    Unavailable(String),

    /// Backend answered but the operation failed
    #[error("record store query failed: {0}")]
    Query(String),

    /// Stored data could not be decoded
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Identity directory plus presence log.
///
/// Calls may block on I/O; handlers await them independently, so no lock is
/// held across requests by the caller.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Look up the identity registered for `origin`.
    async fn find_by_origin(&self, origin: IpAddr) -> Result<Option<IdentityRecord>, StoreError>;

    /// Append one presence event.
    async fn append_event(&self, event: &PresenceEvent) -> Result<(), StoreError>;

    /// All presence events, most recent first.
    async fn list_events(&self) -> Result<Vec<PresenceEvent>, StoreError>;

    /// Cheap liveness probe for status reporting.
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl<S: RecordStore + ?Sized> RecordStore for Arc<S> {
    async fn find_by_origin(&self, origin: IpAddr) -> Result<Option<IdentityRecord>, StoreError> {
        (**self).find_by_origin(origin).await
    }

    async fn append_event(&self, event: &PresenceEvent) -> Result<(), StoreError> {
        (**self).append_event(event).await
    }

    async fn list_events(&self) -> Result<Vec<PresenceEvent>, StoreError> {
        (**self).list_events().await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        (**self).health_check().await
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    identities: HashMap<IpAddr, IdentityRecord>,
    events: Vec<PresenceEvent>,
}

/// In-memory store for tests and database-less runs.
///
/// Events are kept in insertion order and listed newest first.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the identity for its origin.
    pub fn register(&self, identity: IdentityRecord) {
        self.inner.write().identities.insert(identity.origin.to_canonical(), identity);
    }

    /// Number of presence events stored.
    pub fn event_count(&self) -> usize {
        self.inner.read().events.len()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find_by_origin(&self, origin: IpAddr) -> Result<Option<IdentityRecord>, StoreError> {
        Ok(self.inner.read().identities.get(&origin.to_canonical()).cloned())
    }

    async fn append_event(&self, event: &PresenceEvent) -> Result<(), StoreError> {
        self.inner.write().events.push(event.clone());
        Ok(())
    }

    async fn list_events(&self) -> Result<Vec<PresenceEvent>, StoreError> {
        Ok(self.inner.read().events.iter().rev().cloned().collect())
    }
}

/// Fault-injecting wrapper around another store.
///
/// Each call fails with `StoreError::Unavailable` with probability
/// `failure_rate`, driven by a seeded RNG so failures reproduce exactly. A
/// failed append never reaches the inner store.
#[derive(Debug)]
pub struct ChaoticStore<S> {
    inner: S,
    failure_rate: f64,
    rng: Mutex<ChaCha8Rng>,
}

impl<S: RecordStore> ChaoticStore<S> {
    /// Wrap `inner`, failing calls with probability `failure_rate` (clamped
    /// to `0.0..=1.0`, NaN treated as zero).
    pub fn new(inner: S, failure_rate: f64, seed: u64) -> Self {
        let failure_rate = if failure_rate.is_nan() { 0.0 } else { failure_rate.clamp(0.0, 1.0) };
        Self {
            inner,
            failure_rate,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn roll(&self, op: &str) -> Result<(), StoreError> {
        if self.rng.lock().gen_bool(self.failure_rate) {
            tracing::debug!(op, "injected store failure");
            return Err(StoreError::Unavailable(format!("injected failure during {op}")));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: RecordStore> RecordStore for ChaoticStore<S> {
    async fn find_by_origin(&self, origin: IpAddr) -> Result<Option<IdentityRecord>, StoreError> {
        self.roll("find_by_origin")?;
        self.inner.find_by_origin(origin).await
    }

    async fn append_event(&self, event: &PresenceEvent) -> Result<(), StoreError> {
        self.roll("append_event")?;
        self.inner.append_event(event).await
    }

    async fn list_events(&self) -> Result<Vec<PresenceEvent>, StoreError> {
        self.roll("list_events")?;
        self.inner.list_events().await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.roll("health_check")?;
        self.inner.health_check().await
    }
}
