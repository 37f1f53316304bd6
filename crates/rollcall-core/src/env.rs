//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples token rotation and scan handling from
//! the system clock. Production uses the wall clock and Tokio timers; tests
//! pin the clock to fixed instants so expiry boundaries are reproducible to
//! the second.
//!
//! # Invariants
//!
//! - Wall-clock semantics: `now()` is an absolute UTC timestamp. It may step
//!   backwards (NTP corrections), so nothing in the core relies on it being
//!   monotonic. The issuer guards token uniqueness separately.
//! - Isolation: implementations must not share global state

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Abstract environment providing wall-clock time and async sleeping.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Returns the current wall-clock time.
    ///
    /// Token expiry and presence timestamps are absolute, so this is a
    /// `DateTime<Utc>` rather than a monotonic instant.
    fn now(&self) -> DateTime<Utc>;

    /// Sleeps for the specified duration.
    ///
    /// This is the ONLY async method in the trait, and it should only be used
    /// by driver code (the rotation loop), never by validation logic.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;
}
