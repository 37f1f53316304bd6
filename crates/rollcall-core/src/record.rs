//! Identity records and presence events.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered device owner, keyed by the address their device scans from.
///
/// Read-only to the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Stable identifier (registration number)
    pub id: String,
    /// Display name
    pub name: String,
    /// Registered network origin
    pub origin: IpAddr,
}

impl IdentityRecord {
    /// Create a record.
    pub fn new(id: impl Into<String>, name: impl Into<String>, origin: IpAddr) -> Self {
        Self { id: id.into(), name: name.into(), origin }
    }
}

/// One successful admission, as stored in the presence log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEvent {
    /// Identifier of the admitted identity
    pub identity_id: String,
    /// Display name at the time of recording
    pub name: String,
    /// Address the scan came from
    pub origin: IpAddr,
    /// When the scan was recorded
    pub recorded_at: DateTime<Utc>,
}

impl PresenceEvent {
    /// Build the event for `identity` scanning from `origin` at `recorded_at`.
    pub fn for_identity(
        identity: &IdentityRecord,
        origin: IpAddr,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self { identity_id: identity.id.clone(), name: identity.name.clone(), origin, recorded_at }
    }
}
