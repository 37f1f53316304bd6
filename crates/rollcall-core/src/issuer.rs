//! Token issuance.
//!
//! Values look like `ATTEND-20240101120000`: a fixed prefix and the UTC
//! issue time to the second. Two issuances inside the same second (a manual
//! refresh racing the schedule) or after the clock stepped backwards would
//! collide, so the issuer remembers the newest stamp it has used and falls
//! back to `<prefix>-<newest stamp>-<n>` with a strictly increasing `n`.

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

use crate::token::Token;

/// Prefix used by the original scanner clients.
pub const DEFAULT_TOKEN_PREFIX: &str = "ATTEND";

const STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Newest stamp used so far and how many suffixed values were derived from it.
#[derive(Debug, Default)]
struct IssueState {
    newest_stamp: Option<String>,
    collisions: u32,
}

/// Produces unique token values bound to an absolute expiry.
///
/// Issuance is infallible. Uniqueness holds for the lifetime of one issuer;
/// the server keeps exactly one.
#[derive(Debug)]
pub struct TokenIssuer {
    prefix: String,
    state: Mutex<IssueState>,
}

impl TokenIssuer {
    /// Create an issuer using `prefix` for every value.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), state: Mutex::new(IssueState::default()) }
    }

    /// The prefix this issuer stamps on every value.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Issue a token at `now` that expires at `now + ttl`.
    ///
    /// An expiry past the representable range saturates at the maximum
    /// timestamp. A zero or negative `ttl` still issues a token; publishing
    /// it is what fails.
    pub fn issue(&self, now: DateTime<Utc>, ttl: TimeDelta) -> Token {
        let value = self.next_value(now);
        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        Token::new(value, now, expires_at)
    }

    fn next_value(&self, now: DateTime<Utc>) -> String {
        let stamp = now.format(STAMP_FORMAT).to_string();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        // Stamps are fixed-width digits, so string order is time order
        match state.newest_stamp.as_deref() {
            Some(newest) if stamp.as_str() <= newest => {
                state.collisions += 1;
                format!("{}-{}-{}", self.prefix, newest, state.collisions)
            },
            _ => {
                let value = format!("{}-{}", self.prefix, stamp);
                state.newest_stamp = Some(stamp);
                state.collisions = 0;
                value
            },
        }
    }
}

impl Default for TokenIssuer {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_PREFIX)
    }
}
