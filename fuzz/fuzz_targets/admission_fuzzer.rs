//! Fuzz target for [`AdmissionValidator`] decisions
//!
//! Prevent scans from being admitted with stale, foreign or malformed input
//!
//! # Strategy
//!
//! - Event sequences: Arbitrary interleavings of publishes, clock moves
//!   (including backwards steps) and scans
//! - Claimed tokens: current, previously current, or arbitrary strings
//! - Origins: arbitrary IPv4, IPv6 and IPv4-mapped IPv6 addresses
//!
//! # Invariants
//!
//! - `Admit` ONLY when the claim equals the current token, `now <=
//!   expires_at`, and the origin shares the server prefix
//! - A replaced token is NEVER admitted again
//! - Issued token values never repeat, even when the clock steps backwards
//! - `validate` is idempotent for identical inputs
//! - NEVER panic on arbitrary token strings or addresses

#![no_main]

use std::{
    collections::HashSet,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

use arbitrary::Arbitrary;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use libfuzzer_sys::fuzz_target;
use rollcall_core::{
    AdmissionValidator, Decision, NetworkPolicy, NetworkPrefix, TokenAuthority, TokenIssuer,
};

#[derive(Debug, Clone, Arbitrary)]
enum FuzzOrigin {
    V4([u8; 4]),
    V6([u16; 8]),
    Mapped([u8; 4]),
}

impl FuzzOrigin {
    fn addr(&self) -> IpAddr {
        match self {
            Self::V4(octets) => IpAddr::V4(Ipv4Addr::from(*octets)),
            Self::V6(groups) => IpAddr::V6(Ipv6Addr::from(*groups)),
            Self::Mapped(octets) => IpAddr::V6(Ipv4Addr::from(*octets).to_ipv6_mapped()),
        }
    }
}

#[derive(Debug, Clone, Arbitrary)]
enum FuzzClaim {
    Current,
    Previous,
    Raw(String),
}

#[derive(Debug, Clone, Arbitrary)]
enum AdmissionEvent {
    Publish,
    Advance { secs: u8 },
    StepBack { secs: u8 },
    Scan { claim: FuzzClaim, origin: FuzzOrigin },
}

/// Fuzz input with deterministic server address and lifetime.
#[derive(Debug, Clone, Arbitrary)]
struct FuzzInput {
    /// Server address the network policy is anchored on.
    server: FuzzOrigin,
    /// Leading segments compared (reduced into the valid range).
    segments: u8,
    /// Token lifetime in seconds (reduced to 1..=120).
    ttl_secs: u8,
    /// Event sequence to process.
    events: Vec<AdmissionEvent>,
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fuzz_target!(|input: FuzzInput| {
    let server = input.server.addr();
    let max = if server.to_canonical().is_ipv4() { 4 } else { 8 };
    let segments = input.segments % max + 1;
    let ttl = TimeDelta::seconds(i64::from(input.ttl_secs % 120) + 1);

    let policy = match NetworkPolicy::new(server, segments) {
        Ok(policy) => policy,
        Err(e) => panic!("segment count {segments} rejected: {e}"),
    };
    let accepted = NetworkPrefix::of(server, segments);

    let authority = TokenAuthority::new(TokenIssuer::default(), ttl);
    let validator = AdmissionValidator::new(authority.cell(), policy);

    let mut now = start();
    let mut previous: Option<String> = None;
    let mut retired: HashSet<String> = HashSet::new();
    let mut issued: HashSet<String> = HashSet::new();

    for event in input.events {
        match event {
            AdmissionEvent::Publish => {
                let before = authority.current_token_snapshot();
                let token = match authority.force_refresh(now) {
                    Ok(token) => token,
                    Err(e) => panic!("positive lifetime rejected: {e}"),
                };

                assert!(issued.insert(token.value().to_string()), "repeated value {}", token.value());
                if let Some(old) = before {
                    retired.insert(old.value().to_string());
                    previous = Some(old.value().to_string());
                }
            },

            AdmissionEvent::Advance { secs } => {
                now += TimeDelta::seconds(i64::from(secs));
            },

            AdmissionEvent::StepBack { secs } => {
                now -= TimeDelta::seconds(i64::from(secs % 16));
            },

            AdmissionEvent::Scan { claim, origin } => {
                let current = authority.current_token_snapshot();
                let claimed = match claim {
                    FuzzClaim::Current => current.as_ref().map(|t| t.value().to_string()),
                    FuzzClaim::Previous => previous.clone(),
                    FuzzClaim::Raw(raw) => Some(raw),
                }
                .unwrap_or_default();
                let origin = origin.addr();

                let decision = validator.validate(&claimed, origin, now);
                assert_eq!(decision, validator.validate(&claimed, origin, now));

                if decision == Decision::Admit {
                    let current = current.as_ref().map_or_else(
                        || panic!("admitted with no current token"),
                        Clone::clone,
                    );
                    assert_eq!(claimed, current.value());
                    assert!(now <= current.expires_at());
                    assert_eq!(NetworkPrefix::of(origin, segments), accepted);
                    assert!(!retired.contains(&claimed), "retired token {claimed} admitted");
                }

                if retired.contains(&claimed) {
                    assert_eq!(decision, Decision::RejectExpired);
                }
            },
        }
    }
});
