//! Token authority: the single publish path.
//!
//! Scheduled rotation and manual refresh both go through
//! [`TokenAuthority::publish`]. A publish lock serialises issue → swap →
//! notify, so two publishes racing each other never interleave; the later
//! one wins outright.
//!
//! Subscribers (the presentation shim, tests) register a listener that is
//! called synchronously, in registration order, after every successful swap.
//! Listeners run while the publish lock is held and must return quickly;
//! hand work off to a channel instead of doing I/O inline.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};

use crate::{
    issuer::TokenIssuer,
    token::{PublishError, Token, TokenCell},
};

/// Callback invoked with each newly published token.
pub type PublishListener = Arc<dyn Fn(&Token) + Send + Sync>;

/// Owns the issuer and the current-token cell.
pub struct TokenAuthority {
    issuer: TokenIssuer,
    ttl: TimeDelta,
    cell: TokenCell,
    listeners: RwLock<Vec<PublishListener>>,
    publish_lock: Mutex<()>,
}

impl TokenAuthority {
    /// Create an authority issuing tokens that live for `ttl`.
    pub fn new(issuer: TokenIssuer, ttl: TimeDelta) -> Self {
        Self {
            issuer,
            ttl,
            cell: TokenCell::new(),
            listeners: RwLock::new(Vec::new()),
            publish_lock: Mutex::new(()),
        }
    }

    /// Token lifetime, which is also the rotation interval.
    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    /// Shared handle to the current-token cell, for the validator.
    pub fn cell(&self) -> TokenCell {
        self.cell.clone()
    }

    /// Consistent copy of the current token, if any has been published.
    pub fn current_token_snapshot(&self) -> Option<Token> {
        self.cell.snapshot()
    }

    /// Register a callback for future publishes.
    ///
    /// The callback is not invoked for the token that is already current.
    pub fn register_publish_listener(&self, listener: impl Fn(&Token) + Send + Sync + 'static) {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Issue and publish a new token at `now`, invalidating the previous one.
    ///
    /// Used both by the rotation loop and by manual refresh. Does not affect
    /// when the rotation loop fires next.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::InvalidLifetime` if the configured TTL is not
    /// positive. The previous token remains current.
    pub fn force_refresh(&self, now: DateTime<Utc>) -> Result<Token, PublishError> {
        let _guard = self.publish_lock.lock();
        let token = self.issuer.issue(now, self.ttl);
        self.publish_locked(token)
    }

    /// Publish an externally built token.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::InvalidLifetime` if `expires_at <= issued_at`.
    pub fn publish(&self, token: Token) -> Result<Token, PublishError> {
        let _guard = self.publish_lock.lock();
        self.publish_locked(token)
    }

    fn publish_locked(&self, token: Token) -> Result<Token, PublishError> {
        let previous = self.cell.publish(token.clone())?;

        tracing::info!(
            token = %token,
            expires_at = %token.expires_at(),
            replaced = previous.as_ref().map(Token::value),
            "token published"
        );

        // Snapshot so a listener registering another listener cannot deadlock
        let listeners: Vec<PublishListener> = self.listeners.read().clone();
        for listener in &listeners {
            listener(&token);
        }

        Ok(token)
    }
}

impl std::fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthority")
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .field("current", &self.cell.snapshot())
            .field("listener_count", &self.listeners.read().len())
            .finish()
    }
}
