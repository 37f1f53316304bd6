//! Presentation shim.
//!
//! Turns every published token into what the room display shows: the scan
//! URL encoded in the QR code and the expiry time. Attached to the token
//! authority as a publish listener; the latest rendering is kept in a watch
//! channel so displays can follow along.
//!
//! Tokens and events carry UTC timestamps; everything a person reads (the
//! expiry on the display, scan receipts, CSV columns) is rendered in a
//! [`DisplayZone`], the host's local zone unless configured otherwise.

use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    str::FromStr,
    sync::Arc,
};

use chrono::{DateTime, FixedOffset, Local, Offset, Utc};
use rollcall_core::{Token, TokenAuthority};
use serde::Serialize;
use tokio::sync::watch;

/// Time zone user-visible clock fields are rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayZone {
    /// The host's local zone
    #[default]
    Local,
    /// A fixed offset from UTC
    Fixed(FixedOffset),
}

impl DisplayZone {
    /// Render everything in UTC.
    pub fn utc() -> Self {
        Self::Fixed(Utc.fix())
    }

    /// Format `at` with a strftime pattern in this zone.
    pub fn format(self, at: DateTime<Utc>, pattern: &str) -> String {
        match self {
            Self::Local => at.with_timezone(&Local).format(pattern).to_string(),
            Self::Fixed(offset) => at.with_timezone(&offset).format(pattern).to_string(),
        }
    }

    /// `HH:MM:SS` in this zone.
    pub fn time_of_day(self, at: DateTime<Utc>) -> String {
        self.format(at, "%H:%M:%S")
    }

    /// `YYYY-MM-DD` in this zone.
    pub fn date(self, at: DateTime<Utc>) -> String {
        self.format(at, "%Y-%m-%d")
    }
}

/// Error parsing a [`DisplayZone`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid time zone {0:?}: expected `local`, `utc` or an offset like `+05:30`")]
pub struct ParseZoneError(String);

impl FromStr for DisplayZone {
    type Err = ParseZoneError;

    /// `local`, `utc`, or `[+-]HH[:MM]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseZoneError(s.to_string());

        match s.to_ascii_lowercase().as_str() {
            "local" => return Ok(Self::Local),
            "utc" | "z" => return Ok(Self::utc()),
            _ => {},
        }

        let (sign, rest) = match s.as_bytes().first() {
            Some(b'+') => (1, &s[1..]),
            Some(b'-') => (-1, &s[1..]),
            _ => return Err(invalid()),
        };
        let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
        let hours: i32 = hours.parse().map_err(|_| invalid())?;
        let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
        if !(0..60).contains(&minutes) {
            return Err(invalid());
        }

        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            .map(Self::Fixed)
            .ok_or_else(invalid)
    }
}

impl fmt::Display for DisplayZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Fixed(offset) => write!(f, "{offset}"),
        }
    }
}

/// What the display shows for one token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanDisplay {
    /// URL encoded into the QR code
    pub scan_url: String,
    /// Last characters of the token, for operators
    pub token_tail: String,
    /// Absolute expiry
    pub expires_at: DateTime<Utc>,
    /// Expiry formatted `HH:MM:SS` in the display zone
    pub expiry_display: String,
}

/// Renders tokens into scan URLs for a fixed server address.
#[derive(Debug, Clone)]
pub struct Presenter {
    base_url: Arc<str>,
    zone: DisplayZone,
    latest: Arc<watch::Sender<Option<ScanDisplay>>>,
}

impl Presenter {
    /// Presenter for a server reachable at `server_ip:port`.
    pub fn new(server_ip: IpAddr, port: u16) -> Self {
        let base_url = format!("http://{}", SocketAddr::new(server_ip, port));
        let (latest, _) = watch::channel(None);
        Self { base_url: base_url.into(), zone: DisplayZone::default(), latest: Arc::new(latest) }
    }

    /// Render expiry times in `zone` instead of local time.
    #[must_use]
    pub fn with_zone(mut self, zone: DisplayZone) -> Self {
        self.zone = zone;
        self
    }

    /// `http://<ip>:<port>`, IPv6 hosts bracketed.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Scan URL carrying `token`.
    pub fn scan_url(&self, token: &Token) -> String {
        format!("{}/scan/{}", self.base_url, token.value())
    }

    /// Display state for `token`.
    pub fn render(&self, token: &Token) -> ScanDisplay {
        ScanDisplay {
            scan_url: self.scan_url(token),
            token_tail: token.tail().to_string(),
            expires_at: token.expires_at(),
            expiry_display: self.zone.time_of_day(token.expires_at()),
        }
    }

    /// Register with `authority` so every publish is rendered.
    pub fn attach(&self, authority: &TokenAuthority) {
        let presenter = self.clone();
        authority.register_publish_listener(move |token| presenter.show(token));
    }

    /// Render `token` and make it the latest display state.
    pub fn show(&self, token: &Token) {
        let shown = self.render(token);
        tracing::info!(url = %shown.scan_url, expires = %shown.expiry_display, "scan code refreshed");
        self.latest.send_replace(Some(shown));
    }

    /// Most recent display state, if anything was published yet.
    pub fn latest(&self) -> Option<ScanDisplay> {
        self.latest.borrow().clone()
    }

    /// Follow display updates.
    pub fn subscribe(&self) -> watch::Receiver<Option<ScanDisplay>> {
        self.latest.subscribe()
    }
}
