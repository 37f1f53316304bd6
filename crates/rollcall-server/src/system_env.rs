//! Production Environment implementation using the system clock.
//!
//! This module provides `SystemEnv`, the production implementation of the
//! `Environment` trait backed by the wall clock and Tokio timers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rollcall_core::Environment;

/// Production environment using the system wall clock.
///
/// This implementation:
/// - Uses `Utc::now()` for time, so token stamps and presence events carry
///   absolute timestamps
/// - Uses `tokio::time::sleep()` for async sleeping
#[derive(Debug, Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}
