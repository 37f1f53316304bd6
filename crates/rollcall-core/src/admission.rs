//! Admission validation.
//!
//! Decides whether a `(claimed_token, origin)` pair may proceed to
//! recording. Checks run in a fixed order (token first, then network) so a
//! stale token from an off-site address reports as expired, matching what
//! scanner clients expect.

use std::net::IpAddr;

use chrono::{DateTime, Utc};

use crate::{network::NetworkPolicy, token::TokenCell};

/// Result of validating a scan request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    /// Token is current and live, origin is on the accepted network
    Admit,
    /// No current token, token mismatch, or past its expiry
    RejectExpired,
    /// Origin outside the accepted network prefix
    RejectNetwork,
}

impl Decision {
    /// Whether the request may proceed to recording.
    pub fn is_admit(self) -> bool {
        matches!(self, Self::Admit)
    }
}

/// Validates scan requests against the current token and network policy.
///
/// Holds a shared handle to the token cell; it never writes to it.
#[derive(Debug, Clone)]
pub struct AdmissionValidator {
    tokens: TokenCell,
    policy: NetworkPolicy,
}

impl AdmissionValidator {
    /// Create a validator reading from `tokens`.
    pub fn new(tokens: TokenCell, policy: NetworkPolicy) -> Self {
        Self { tokens, policy }
    }

    /// The network policy in force.
    pub fn policy(&self) -> &NetworkPolicy {
        &self.policy
    }

    /// Decide whether a scan may proceed.
    ///
    /// 1. No current token, a mismatching value, or `now > expires_at` →
    ///    `RejectExpired`
    /// 2. Origin prefix differs from the server's → `RejectNetwork`
    /// 3. Otherwise `Admit`
    ///
    /// Pure read of the current snapshot: repeating the call with the same
    /// inputs and no publish in between gives the same answer.
    pub fn validate(&self, claimed_token: &str, origin: IpAddr, now: DateTime<Utc>) -> Decision {
        let token_ok = self.tokens.with_current(|current| {
            current.is_some_and(|token| token.value() == claimed_token && token.is_live_at(now))
        });
        if !token_ok {
            return Decision::RejectExpired;
        }

        if !self.policy.admits(origin) {
            return Decision::RejectNetwork;
        }

        Decision::Admit
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::token::Token;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, secs).unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn validator() -> (TokenCell, AdmissionValidator) {
        let cell = TokenCell::new();
        let policy = NetworkPolicy::same_subnet(ip("10.166.185.1")).unwrap();
        (cell.clone(), AdmissionValidator::new(cell, policy))
    }

    #[test]
    fn rejects_everything_before_first_publish() {
        let (_, validator) = validator();

        assert_eq!(
            validator.validate("ATTEND-20240101120000", ip("10.166.185.20"), at(0)),
            Decision::RejectExpired
        );
    }

    #[test]
    fn admits_current_token_from_same_subnet() {
        let (cell, validator) = validator();
        cell.publish(Token::new("ATTEND-20240101120000", at(0), at(30))).unwrap();

        let decision = validator.validate("ATTEND-20240101120000", ip("10.166.185.20"), at(29));
        assert_eq!(decision, Decision::Admit);
        assert!(decision.is_admit());
    }

    #[test]
    fn mismatched_token_is_expired() {
        let (cell, validator) = validator();
        cell.publish(Token::new("ATTEND-20240101120000", at(0), at(30))).unwrap();

        assert_eq!(
            validator.validate("ATTEND-20240101115930", ip("10.166.185.20"), at(1)),
            Decision::RejectExpired
        );
    }

    #[test]
    fn token_check_precedes_network_check() {
        let (cell, validator) = validator();
        cell.publish(Token::new("T", at(0), at(30))).unwrap();

        assert_eq!(validator.validate("T", ip("192.168.0.5"), at(31)), Decision::RejectExpired);
        assert_eq!(validator.validate("T", ip("192.168.0.5"), at(10)), Decision::RejectNetwork);
    }

    #[test]
    fn expiry_instant_itself_is_valid() {
        let (cell, validator) = validator();
        cell.publish(Token::new("T", at(0), at(30))).unwrap();

        assert_eq!(validator.validate("T", ip("10.166.185.20"), at(30)), Decision::Admit);
        assert_eq!(validator.validate("T", ip("10.166.185.20"), at(31)), Decision::RejectExpired);
    }

    #[test]
    fn replaced_token_is_rejected_before_its_expiry() {
        let (cell, validator) = validator();
        cell.publish(Token::new("OLD", at(0), at(30))).unwrap();
        cell.publish(Token::new("NEW", at(10), at(40))).unwrap();

        assert_eq!(validator.validate("OLD", ip("10.166.185.20"), at(11)), Decision::RejectExpired);
        assert_eq!(validator.validate("NEW", ip("10.166.185.20"), at(11)), Decision::Admit);
    }
}
