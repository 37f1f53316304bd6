//! Attendance tokens and the shared current-token cell.
//!
//! A [`Token`] is an opaque string bound to an absolute expiry. Exactly one
//! token is current at a time; it lives in a [`TokenCell`] shared between
//! the publisher (rotation loop, manual refresh) and every scan handler.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// An issued attendance token.
///
/// Tokens are compared by exact string equality. The value carries no
/// cryptographic binding; it is only meant to be unguessable enough for a
/// classroom, and short-lived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    value: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Token {
    /// Create a token from its parts.
    ///
    /// No lifetime check happens here; [`TokenCell::publish`] refuses tokens
    /// whose expiry does not come after their issue time.
    pub fn new(
        value: impl Into<String>,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self { value: value.into(), issued_at, expires_at }
    }

    /// The opaque token value clients present when scanning.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// When the token was issued.
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Last instant at which the token is still accepted (inclusive).
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Whether the token is still within its lifetime at `now`.
    ///
    /// The boundary is inclusive: a scan at exactly `expires_at` is valid.
    /// Display countdowns round to the same second, so this must not be
    /// turned into a strict comparison.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }

    /// Last eight characters of the value, for status displays.
    pub fn tail(&self) -> &str {
        let start = self.value.char_indices().rev().nth(7).map_or(0, |(i, _)| i);
        &self.value[start..]
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Errors raised when publishing a token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// The token would be expired the moment it is published.
    #[error("token {value} expires at {expires_at} which is not after its issue time {issued_at}")]
    InvalidLifetime {
        /// Offending token value
        value: String,
        /// Issue timestamp
        issued_at: DateTime<Utc>,
        /// Expiry timestamp
        expires_at: DateTime<Utc>,
    },
}

/// Lock-guarded holder of the current token.
///
/// Cloning the cell shares the same slot. Readers always observe a complete
/// `(value, expires_at)` pair because the whole [`Token`] is replaced under
/// the write lock.
#[derive(Debug, Clone, Default)]
pub struct TokenCell {
    current: Arc<RwLock<Option<Token>>>,
}

impl TokenCell {
    /// Create an empty cell. Every scan is rejected until a token is
    /// published.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current token, returning the one it displaced.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::InvalidLifetime` if `expires_at <= issued_at`.
    /// The previous token stays current in that case.
    pub fn publish(&self, token: Token) -> Result<Option<Token>, PublishError> {
        if token.expires_at <= token.issued_at {
            return Err(PublishError::InvalidLifetime {
                value: token.value,
                issued_at: token.issued_at,
                expires_at: token.expires_at,
            });
        }

        let previous = self.current.write().replace(token);
        Ok(previous)
    }

    /// Consistent copy of the current token, if any.
    pub fn snapshot(&self) -> Option<Token> {
        self.current.read().clone()
    }

    /// Run `f` against the current token without cloning it.
    pub fn with_current<R>(&self, f: impl FnOnce(Option<&Token>) -> R) -> R {
        f(self.current.read().as_ref())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone};

    use super::*;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, secs).unwrap()
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let token = Token::new("ATTEND-20240101120000", at(0), at(30));

        assert!(token.is_live_at(at(29)));
        assert!(token.is_live_at(at(30)));
        assert!(!token.is_live_at(at(30) + TimeDelta::milliseconds(1)));
    }

    #[test]
    fn publish_replaces_and_returns_previous() {
        let cell = TokenCell::new();
        let first = Token::new("A", at(0), at(30));
        let second = Token::new("B", at(10), at(40));

        assert_eq!(cell.publish(first.clone()).unwrap(), None);
        assert_eq!(cell.publish(second.clone()).unwrap(), Some(first));
        assert_eq!(cell.snapshot(), Some(second));
    }

    #[test]
    fn publish_rejects_non_positive_lifetime_and_keeps_previous() {
        let cell = TokenCell::new();
        let good = Token::new("A", at(0), at(30));
        cell.publish(good.clone()).unwrap();

        let zero = Token::new("B", at(5), at(5));
        assert!(matches!(cell.publish(zero), Err(PublishError::InvalidLifetime { .. })));

        let backwards = Token::new("C", at(5), at(4));
        assert!(cell.publish(backwards).is_err());

        assert_eq!(cell.snapshot(), Some(good));
    }

    #[test]
    fn clones_share_the_slot() {
        let cell = TokenCell::new();
        let reader = cell.clone();

        cell.publish(Token::new("A", at(0), at(30))).unwrap();

        assert_eq!(reader.with_current(|t| t.map(|t| t.value().to_string())), Some("A".into()));
    }

    #[test]
    fn tail_keeps_last_eight_chars() {
        let token = Token::new("ATTEND-20240101120000", at(0), at(30));
        assert_eq!(token.tail(), "01120000");

        let short = Token::new("ABC", at(0), at(30));
        assert_eq!(short.tail(), "ABC");
    }
}
