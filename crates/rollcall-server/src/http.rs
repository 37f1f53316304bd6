//! HTTP transport.
//!
//! Endpoints:
//!   Scan:          /scan/:token (GET, POST), /scan (GET, POST, no token)
//!   Observability: /health /api/status
//!   Operator:      /api/refresh (POST, server host only)
//!
//! The handler extracts the claimed token and the peer address, runs the
//! scan desk, and serialises the resulting [`ScanOutcome`]. Nothing here
//! decides admission.
//!
//! Manual refresh replaces the code on the room display. Only the server's
//! own host may trigger it (loopback or the advertised server address);
//! a scanner on the classroom network gets 403.

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use axum::{
    Json, Router,
    extract::{ConnectInfo, Path, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use rollcall_core::{Environment, RecordStore, ScanDesk, ScanOutcome};
use serde::{Deserialize, Serialize};

use crate::presentation::DisplayZone;

/// Shared handler state.
pub struct AppState<S, E> {
    desk: Arc<ScanDesk<S>>,
    env: E,
    zone: DisplayZone,
}

impl<S, E: Clone> Clone for AppState<S, E> {
    fn clone(&self) -> Self {
        Self { desk: Arc::clone(&self.desk), env: self.env.clone(), zone: self.zone }
    }
}

impl<S, E> AppState<S, E> {
    /// State serving `desk`, timestamping scans with `env`.
    pub fn new(desk: Arc<ScanDesk<S>>, env: E) -> Self {
        Self { desk, env, zone: DisplayZone::default() }
    }

    /// Render receipt times in `zone` instead of local time.
    #[must_use]
    pub fn with_zone(mut self, zone: DisplayZone) -> Self {
        self.zone = zone;
        self
    }
}

/// Identity fields echoed back to the scanning device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentInfo {
    /// Registration number
    pub regno: String,
    /// Display name
    pub name: String,
}

/// JSON body of every scan response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResponse {
    /// Human-readable status line
    pub status: String,
    /// Stable outcome tag
    pub outcome: String,
    /// Failure tag, absent on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Explanation for the person scanning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Resolved identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student: Option<StudentInfo>,
    /// Recording time, `HH:MM:SS` in the display zone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Recording date, `YYYY-MM-DD` in the display zone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Unregistered address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl ScanResponse {
    /// Response body for `outcome`, with times rendered in `zone`.
    pub fn from_outcome(outcome: &ScanOutcome, zone: DisplayZone) -> Self {
        let mut response = Self {
            status: outcome.status_text().to_string(),
            outcome: outcome.tag().to_string(),
            error: None,
            message: outcome.message(),
            student: outcome
                .identity()
                .map(|i| StudentInfo { regno: i.id.clone(), name: i.name.clone() }),
            timestamp: None,
            date: None,
            ip: None,
        };

        match outcome {
            ScanOutcome::Recorded { recorded_at, .. } => {
                response.timestamp = Some(zone.time_of_day(*recorded_at));
                response.date = Some(zone.date(*recorded_at));
            },
            ScanOutcome::AlreadyRecorded { .. } => {},
            ScanOutcome::DeviceUnknown { origin } => {
                response.error = Some(outcome.tag().to_string());
                response.ip = Some(origin.to_string());
            },
            ScanOutcome::TokenInvalid
            | ScanOutcome::NetworkBlocked
            | ScanOutcome::StoreError { .. } => {
                response.error = Some(outcome.tag().to_string());
            },
        }

        response
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `healthy` while the process serves requests
    pub status: &'static str,
    /// Server clock
    pub timestamp: DateTime<Utc>,
    /// Always `online`
    pub server: &'static str,
}

/// Body of `GET /api/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    /// Always `online`
    pub server: &'static str,
    /// `online` if the record store answers its probe, else `offline`
    pub database: &'static str,
    /// Last characters of the current token
    pub current_token: Option<String>,
    /// Expiry of the current token
    pub expires: Option<DateTime<Utc>>,
}

/// Body of a successful `POST /api/refresh`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshResponse {
    /// Last characters of the new token
    pub current_token: String,
    /// Expiry of the new token
    pub expires: DateTime<Utc>,
    /// Expiry formatted `HH:MM:SS` in the display zone
    pub expiry_display: String,
}

/// Body of a rejected `POST /api/refresh`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshError {
    /// `REFRESH_FORBIDDEN` or `REFRESH_FAILED`
    pub error: String,
    /// Explanation for the operator
    pub message: String,
}

/// Build the router for `state`.
pub fn router<S, E>(state: AppState<S, E>) -> Router
where
    S: RecordStore + 'static,
    E: Environment,
{
    Router::new()
        .route("/scan/:token", get(scan::<S, E>).post(scan::<S, E>))
        .route("/scan", get(scan_without_token::<S, E>).post(scan_without_token::<S, E>))
        .route("/health", get(health::<S, E>))
        .route("/api/status", get(status::<S, E>))
        .route("/api/refresh", post(refresh::<S, E>))
        .with_state(state)
}

async fn scan<S, E>(
    State(state): State<AppState<S, E>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(token): Path<String>,
) -> (StatusCode, Json<ScanResponse>)
where
    S: RecordStore + 'static,
    E: Environment,
{
    tracing::debug!(%peer, token = %token, "scan request");
    respond(&state, &token, peer).await
}

async fn scan_without_token<S, E>(
    State(state): State<AppState<S, E>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> (StatusCode, Json<ScanResponse>)
where
    S: RecordStore + 'static,
    E: Environment,
{
    tracing::debug!(%peer, "scan request without token");
    respond(&state, "", peer).await
}

async fn respond<S, E>(
    state: &AppState<S, E>,
    token: &str,
    peer: SocketAddr,
) -> (StatusCode, Json<ScanResponse>)
where
    S: RecordStore + 'static,
    E: Environment,
{
    let outcome = state.desk.on_scan(token, peer.ip(), state.env.now()).await;
    let code =
        StatusCode::from_u16(outcome.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (code, Json(ScanResponse::from_outcome(&outcome, state.zone)))
}

async fn health<S, E>(State(state): State<AppState<S, E>>) -> Json<HealthResponse>
where
    S: RecordStore + 'static,
    E: Environment,
{
    Json(HealthResponse { status: "healthy", timestamp: state.env.now(), server: "online" })
}

async fn status<S, E>(State(state): State<AppState<S, E>>) -> Json<StatusResponse>
where
    S: RecordStore + 'static,
    E: Environment,
{
    let database = match state.desk.store().health_check().await {
        Ok(()) => "online",
        Err(e) => {
            tracing::warn!(error = %e, "record store probe failed");
            "offline"
        },
    };
    let token = state.desk.current_token_snapshot();

    Json(StatusResponse {
        server: "online",
        database,
        current_token: token.as_ref().map(|t| t.tail().to_string()),
        expires: token.as_ref().map(rollcall_core::Token::expires_at),
    })
}

async fn refresh<S, E>(
    State(state): State<AppState<S, E>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Result<Json<RefreshResponse>, (StatusCode, Json<RefreshError>)>
where
    S: RecordStore + 'static,
    E: Environment,
{
    let server = state.desk.validator().policy().server_origin();
    if !is_server_host(peer.ip(), server) {
        tracing::warn!(%peer, "manual refresh refused for remote peer");
        return Err((
            StatusCode::FORBIDDEN,
            Json(RefreshError {
                error: "REFRESH_FORBIDDEN".to_string(),
                message: "Only the server host can refresh the scan code".to_string(),
            }),
        ));
    }

    match state.desk.force_refresh(state.env.now()) {
        Ok(token) => {
            tracing::info!(%peer, token = %token, "manual refresh");
            Ok(Json(RefreshResponse {
                current_token: token.tail().to_string(),
                expires: token.expires_at(),
                expiry_display: state.zone.time_of_day(token.expires_at()),
            }))
        },
        Err(e) => {
            tracing::error!(error = %e, "manual refresh failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RefreshError { error: "REFRESH_FAILED".to_string(), message: e.to_string() }),
            ))
        },
    }
}

fn is_server_host(peer: IpAddr, server: IpAddr) -> bool {
    let peer = peer.to_canonical();
    peer.is_loopback() || peer == server.to_canonical()
}
