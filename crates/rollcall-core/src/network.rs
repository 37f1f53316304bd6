//! Subnet admission policy.
//!
//! A scan is only accepted from the same network as the server, judged by
//! the leading segments of the address: the first three octets of an IPv4
//! address by default, or the first N 16-bit groups of an IPv6 address.
//! This keeps out casual off-site access; it is not a defence against
//! spoofed source addresses.

use std::net::IpAddr;

/// Default number of leading segments compared (`a.b.c` of `a.b.c.d`).
pub const DEFAULT_PREFIX_SEGMENTS: u8 = 3;

/// Errors building a [`NetworkPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// Segment count does not fit the server's address family.
    #[error("prefix of {segments} segments is invalid for {family} (allowed 1..={max})")]
    InvalidSegments {
        /// Requested segment count
        segments: u8,
        /// Address family of the server origin
        family: &'static str,
        /// Largest count allowed for that family
        max: u8,
    },
}

/// Leading segments of an address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NetworkPrefix {
    /// Leading IPv4 octets
    V4(Vec<u8>),
    /// Leading IPv6 groups
    V6(Vec<u16>),
}

impl NetworkPrefix {
    /// Take the first `segments` segments of `addr`.
    ///
    /// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`, as reported by
    /// dual-stack listeners) are folded back to IPv4 first. `segments` is
    /// clamped to the family's width.
    pub fn of(addr: IpAddr, segments: u8) -> Self {
        match addr.to_canonical() {
            IpAddr::V4(v4) => {
                let n = usize::from(segments).min(4);
                Self::V4(v4.octets()[..n].to_vec())
            },
            IpAddr::V6(v6) => {
                let n = usize::from(segments).min(8);
                Self::V6(v6.segments()[..n].to_vec())
            },
        }
    }
}

/// Accepts origins sharing the server's network prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPolicy {
    server_origin: IpAddr,
    segments: u8,
    accepted: NetworkPrefix,
}

impl NetworkPolicy {
    /// Derive the accepted prefix from the server's own address.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::InvalidSegments` if `segments` is zero or wider
    /// than the address (4 for IPv4, 8 for IPv6).
    pub fn new(server_origin: IpAddr, segments: u8) -> Result<Self, PolicyError> {
        let server_origin = server_origin.to_canonical();
        let (family, max) = match server_origin {
            IpAddr::V4(_) => ("IPv4", 4),
            IpAddr::V6(_) => ("IPv6", 8),
        };
        if segments == 0 || segments > max {
            return Err(PolicyError::InvalidSegments { segments, family, max });
        }

        let accepted = NetworkPrefix::of(server_origin, segments);
        Ok(Self { server_origin, segments, accepted })
    }

    /// Policy using the default three-segment prefix.
    ///
    /// # Errors
    ///
    /// Never fails for IPv4 or IPv6 origins; the `Result` mirrors [`Self::new`].
    pub fn same_subnet(server_origin: IpAddr) -> Result<Self, PolicyError> {
        Self::new(server_origin, DEFAULT_PREFIX_SEGMENTS)
    }

    /// The server address the prefix was derived from.
    pub fn server_origin(&self) -> IpAddr {
        self.server_origin
    }

    /// The accepted prefix.
    pub fn accepted_prefix(&self) -> &NetworkPrefix {
        &self.accepted
    }

    /// Whether `origin` shares the server's prefix. Mixed families never match.
    pub fn admits(&self, origin: IpAddr) -> bool {
        NetworkPrefix::of(origin, self.segments) == self.accepted
    }
}
