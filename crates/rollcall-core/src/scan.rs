//! Scan desk: the per-request pipeline exposed to the transport.
//!
//! ```text
//! RECEIVED ─ token check ──▶ TokenInvalid
//!          ─ network check ▶ NetworkBlocked
//!          ─ lookup ───────▶ DeviceUnknown
//!          ─ append ───────▶ Recorded | StoreError
//! ```
//!
//! Every path ends in a [`ScanOutcome`] value; nothing here returns an error
//! or panics on bad input. The transport maps outcomes to HTTP responses
//! using the stable tags and status codes defined on the enum.

use std::{net::IpAddr, sync::Arc};

use chrono::{DateTime, Utc};

use crate::{
    admission::{AdmissionValidator, Decision},
    authority::TokenAuthority,
    network::NetworkPolicy,
    record::IdentityRecord,
    recorder::{DuplicatePolicy, RecordOutcome, RecordingCoordinator},
    store::RecordStore,
    token::{PublishError, Token},
};

/// Terminal state of one scan request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Presence recorded for this identity
    Recorded {
        /// Identity the origin resolved to
        identity: IdentityRecord,
        /// Timestamp written to the event
        recorded_at: DateTime<Utc>,
    },

    /// Already recorded under this token (once-per-token policy)
    AlreadyRecorded {
        /// Identity the origin resolved to
        identity: IdentityRecord,
    },

    /// Missing, mismatched or expired token
    TokenInvalid,

    /// Origin outside the accepted network prefix
    NetworkBlocked,

    /// Origin admitted but not registered
    DeviceUnknown {
        /// The unregistered origin
        origin: IpAddr,
    },

    /// Record store failed during lookup or append
    StoreError {
        /// Failure description, for logs only
        reason: String,
    },
}

impl ScanOutcome {
    /// Stable machine-readable tag consumed by scanner clients.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Recorded { .. } => "ATTENDANCE_RECORDED",
            Self::AlreadyRecorded { .. } => "ALREADY_RECORDED",
            Self::TokenInvalid => "TOKEN_INVALID",
            Self::NetworkBlocked => "NETWORK_BLOCKED",
            Self::DeviceUnknown { .. } => "DEVICE_UNKNOWN",
            Self::StoreError { .. } => "DB_ERROR",
        }
    }

    /// HTTP status code for the outcome.
    ///
    /// An unregistered device is informational (200), not a client error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Recorded { .. } | Self::AlreadyRecorded { .. } | Self::DeviceUnknown { .. } => {
                200
            },
            Self::TokenInvalid | Self::NetworkBlocked => 403,
            Self::StoreError { .. } => 500,
        }
    }

    /// Short human-readable status line.
    pub fn status_text(&self) -> &'static str {
        match self {
            Self::Recorded { .. } => "Attendance Recorded",
            Self::AlreadyRecorded { .. } => "Attendance Already Recorded",
            Self::TokenInvalid => "QR Code Expired",
            Self::NetworkBlocked => "Access Denied",
            Self::DeviceUnknown { .. } => "Device Not Registered",
            Self::StoreError { .. } => "Database Error",
        }
    }

    /// Longer message shown to the person scanning, for non-success outcomes.
    pub fn message(&self) -> Option<String> {
        match self {
            Self::Recorded { .. } => None,
            Self::AlreadyRecorded { .. } => {
                Some("Your attendance for this code was already recorded".to_string())
            },
            Self::TokenInvalid => Some("Please scan the latest QR code".to_string()),
            Self::NetworkBlocked => Some("Access from this network is not allowed".to_string()),
            Self::DeviceUnknown { origin } => Some(format!("Device {origin} is not registered")),
            Self::StoreError { .. } => Some("Failed to record attendance".to_string()),
        }
    }

    /// Whether the scan resulted in a new presence event.
    pub fn is_recorded(&self) -> bool {
        matches!(self, Self::Recorded { .. })
    }

    /// Identity fields, when the origin resolved to one.
    pub fn identity(&self) -> Option<&IdentityRecord> {
        match self {
            Self::Recorded { identity, .. } | Self::AlreadyRecorded { identity } => Some(identity),
            _ => None,
        }
    }
}

/// Token lifecycle plus scan pipeline, shared by the rotation loop and every
/// request handler.
pub struct ScanDesk<S> {
    authority: Arc<TokenAuthority>,
    validator: AdmissionValidator,
    coordinator: RecordingCoordinator<S>,
}

impl<S: RecordStore> ScanDesk<S> {
    /// Wire a desk around `authority`, validating against `policy` and
    /// recording into `store`.
    pub fn new(
        authority: Arc<TokenAuthority>,
        policy: NetworkPolicy,
        store: Arc<S>,
        duplicates: DuplicatePolicy,
    ) -> Self {
        let validator = AdmissionValidator::new(authority.cell(), policy);
        let coordinator = RecordingCoordinator::new(store, duplicates);
        Self { authority, validator, coordinator }
    }

    /// The token authority driving rotation.
    pub fn authority(&self) -> &Arc<TokenAuthority> {
        &self.authority
    }

    /// The admission validator.
    pub fn validator(&self) -> &AdmissionValidator {
        &self.validator
    }

    /// The backing record store.
    pub fn store(&self) -> &Arc<S> {
        self.coordinator.store()
    }

    /// Consistent copy of the current token, if any.
    pub fn current_token_snapshot(&self) -> Option<Token> {
        self.authority.current_token_snapshot()
    }

    /// Issue and publish a fresh token now.
    ///
    /// # Errors
    ///
    /// Returns `PublishError` if the configured lifetime is not positive.
    pub fn force_refresh(&self, now: DateTime<Utc>) -> Result<Token, PublishError> {
        self.authority.force_refresh(now)
    }

    /// Register a callback for every future publish.
    pub fn register_publish_listener(&self, listener: impl Fn(&Token) + Send + Sync + 'static) {
        self.authority.register_publish_listener(listener);
    }

    /// Run one scan request through validation and recording.
    pub async fn on_scan(
        &self,
        claimed_token: &str,
        origin: IpAddr,
        now: DateTime<Utc>,
    ) -> ScanOutcome {
        match self.validator.validate(claimed_token, origin, now) {
            Decision::RejectExpired => {
                tracing::warn!(%origin, token = claimed_token, "invalid or expired token");
                return ScanOutcome::TokenInvalid;
            },
            Decision::RejectNetwork => {
                tracing::warn!(%origin, "scan blocked from foreign network");
                return ScanOutcome::NetworkBlocked;
            },
            Decision::Admit => {},
        }

        match self.coordinator.record_admitted(claimed_token, origin, now).await {
            RecordOutcome::Recorded { identity, recorded_at } => {
                tracing::info!(id = %identity.id, name = %identity.name, %origin, "attendance recorded");
                ScanOutcome::Recorded { identity, recorded_at }
            },
            RecordOutcome::AlreadyRecorded { identity } => {
                tracing::info!(id = %identity.id, %origin, "duplicate scan under current token");
                ScanOutcome::AlreadyRecorded { identity }
            },
            RecordOutcome::UnknownOrigin => {
                tracing::info!(%origin, "unknown device");
                ScanOutcome::DeviceUnknown { origin: origin.to_canonical() }
            },
            RecordOutcome::StoreError(e) => ScanOutcome::StoreError { reason: e.to_string() },
        }
    }
}

impl<S> std::fmt::Debug for ScanDesk<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanDesk")
            .field("authority", &self.authority)
            .field("validator", &self.validator)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}
