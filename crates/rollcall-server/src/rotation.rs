//! Background token rotation.
//!
//! Publishes a fresh token immediately on start and then once per token
//! lifetime. The loop keeps its own schedule: manual refreshes through
//! [`TokenAuthority::force_refresh`] replace the current token but do not
//! move the next scheduled publish.
//!
//! ```text
//! tick ─▶ publish ─ ok ──▶ next tick on the ttl grid ──────┐
//!                 ─ err ─▶ sleep(backoff), tick at once ───┤
//!   ▲                                                      │
//!   └─────────────────────────────── unless shutdown ◀─────┘
//! ```
//!
//! Ticks come from a fixed-period interval, so publish latency does not push
//! the schedule back. A tick that is missed entirely (stalled runtime) is
//! skipped and the loop resumes on the next multiple of the period.
//!
//! A failed publish is logged and retried after the backoff; the loop only
//! ends on shutdown. Shutdown is observed between publishes, never during
//! one.

use std::{sync::Arc, time::Duration};

use rollcall_core::{Environment, TokenAuthority};
use tokio::{
    sync::watch,
    time::{MissedTickBehavior, interval},
};

/// Default delay before retrying a failed publish.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Periodic publisher driving a [`TokenAuthority`].
pub struct RotationLoop<E> {
    env: E,
    authority: Arc<TokenAuthority>,
    retry_backoff: Duration,
}

impl<E: Environment> RotationLoop<E> {
    /// Create a loop rotating `authority` every token lifetime.
    pub fn new(env: E, authority: Arc<TokenAuthority>, retry_backoff: Duration) -> Self {
        Self { env, authority, retry_backoff }
    }

    /// Interval between scheduled publishes.
    ///
    /// Equal to the token lifetime; a lifetime that is not a positive
    /// duration falls back to the retry backoff so the loop never spins.
    /// Never zero.
    pub fn period(&self) -> Duration {
        match self.authority.ttl().to_std() {
            Ok(period) if !period.is_zero() => period,
            _ if !self.retry_backoff.is_zero() => self.retry_backoff,
            _ => DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Run until `shutdown` carries `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let period = self.period();
        tracing::info!(period_secs = period.as_secs_f64(), "token rotation started");

        let mut ticks = interval(period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                },
                _ = ticks.tick() => {},
            }

            match self.authority.force_refresh(self.env.now()) {
                Ok(token) => tracing::debug!(token = %token, "scheduled rotation"),
                Err(e) => {
                    tracing::error!(error = %e, retry_secs = self.retry_backoff.as_secs_f64(), "token publish failed");

                    tokio::select! {
                        () = self.env.sleep(self.retry_backoff) => ticks.reset_immediately(),
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        },
                    }
                },
            }
        }

        tracing::info!("token rotation stopped");
    }
}

impl<E> std::fmt::Debug for RotationLoop<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationLoop")
            .field("authority", &self.authority)
            .field("retry_backoff", &self.retry_backoff)
            .finish_non_exhaustive()
    }
}
