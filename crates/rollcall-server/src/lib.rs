//! Rollcall production server.
//!
//! This crate provides the production runtime around `rollcall-core`:
//! - Axum for the HTTP scan endpoint
//! - Tokio for the async runtime and the rotation timer
//! - SQLite (sqlx) for the identity directory and presence log
//!
//! ## Architecture
//!
//! ```text
//! rollcall-server
//!   ├─ SystemEnv      (production Environment impl)
//!   ├─ RotationLoop   (scheduled token publishes)
//!   ├─ Presenter      (scan URL + expiry for the room display)
//!   ├─ http::router   (scan, health, status and refresh endpoints)
//!   ├─ SqliteStore    (students + attendance tables)
//!   └─ export         (CSV dump of the presence log)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
pub mod export;
pub mod http;
pub mod net;
pub mod presentation;
pub mod rotation;
pub mod sqlite_store;
mod system_env;

use std::{
    future::Future,
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use chrono::TimeDelta;
pub use error::ServerError;
pub use export::{ExportError, default_export_name, export_to_path, write_csv};
pub use http::{AppState, RefreshError, RefreshResponse, ScanResponse, StudentInfo, router};
pub use presentation::{DisplayZone, ParseZoneError, Presenter, ScanDisplay};
use rollcall_core::{
    DEFAULT_TOKEN_PREFIX, DuplicatePolicy, NetworkPolicy, ScanDesk, TokenAuthority, TokenIssuer,
    network::DEFAULT_PREFIX_SEGMENTS,
};
pub use rotation::{DEFAULT_RETRY_BACKOFF, RotationLoop};
pub use sqlite_store::SqliteStore;
pub use system_env::SystemEnv;
use tokio::{net::TcpListener, sync::watch};

/// Default token lifetime and rotation period.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30);

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:5000")
    pub bind_address: String,
    /// Address advertised in scan URLs and used as the network policy
    /// anchor; detected from the outbound route when `None`
    pub server_ip: Option<IpAddr>,
    /// Token lifetime, also the rotation period
    pub token_ttl: Duration,
    /// Token value prefix
    pub token_prefix: String,
    /// Leading address segments a client must share with the server
    pub prefix_segments: u8,
    /// How repeated scans from one device are counted
    pub duplicates: DuplicatePolicy,
    /// Delay before retrying a failed publish
    pub retry_backoff: Duration,
    /// SQLite database file; in-memory database when `None`
    pub database_path: Option<PathBuf>,
    /// Zone for displayed and exported times
    pub display_zone: DisplayZone,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5000".to_string(),
            server_ip: None,
            token_ttl: DEFAULT_TOKEN_TTL,
            token_prefix: DEFAULT_TOKEN_PREFIX.to_string(),
            prefix_segments: DEFAULT_PREFIX_SEGMENTS,
            duplicates: DuplicatePolicy::default(),
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            database_path: None,
            display_zone: DisplayZone::Local,
        }
    }
}

impl ServerRuntimeConfig {
    /// Token lifetime as a signed delta, rejecting zero and out-of-range
    /// values.
    pub fn ttl_delta(&self) -> Result<TimeDelta, ServerError> {
        if self.token_ttl.is_zero() {
            return Err(ServerError::Config("token TTL must be positive".to_string()));
        }
        TimeDelta::from_std(self.token_ttl)
            .map_err(|e| ServerError::Config(format!("token TTL out of range: {e}")))
    }
}

/// Production Rollcall server.
///
/// Wraps `ScanDesk` with the HTTP transport, the rotation loop and the
/// system environment.
pub struct Server {
    /// Scan pipeline shared by the rotation loop and request handlers
    desk: Arc<ScanDesk<SqliteStore>>,
    /// Room display state
    presenter: Presenter,
    /// HTTP listener
    listener: TcpListener,
    /// Environment
    env: SystemEnv,
    retry_backoff: Duration,
    display_zone: DisplayZone,
}

impl Server {
    /// Create and bind a new server.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The configuration is invalid
    /// - Opening the database fails
    /// - Binding to the address fails
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let ttl = config.ttl_delta()?;
        if config.token_prefix.is_empty() {
            return Err(ServerError::Config("token prefix must not be empty".to_string()));
        }

        let server_ip = match config.server_ip {
            Some(ip) => ip,
            None => net::detect_local_ip().await,
        };
        let policy = NetworkPolicy::new(server_ip, config.prefix_segments)?;

        let store = match &config.database_path {
            Some(path) => SqliteStore::open(path).await?,
            None => SqliteStore::open_in_memory().await?,
        };

        let authority =
            Arc::new(TokenAuthority::new(TokenIssuer::new(config.token_prefix.clone()), ttl));
        let desk = Arc::new(ScanDesk::new(authority, policy, Arc::new(store), config.duplicates));

        let listener = TcpListener::bind(&config.bind_address).await?;
        let presenter =
            Presenter::new(server_ip, listener.local_addr()?.port()).with_zone(config.display_zone);
        presenter.attach(desk.authority());

        tracing::info!(
            server_ip = %server_ip,
            prefix = ?desk.validator().policy().accepted_prefix(),
            duplicates = ?config.duplicates,
            zone = %config.display_zone,
            "server configured"
        );

        Ok(Self {
            desk,
            presenter,
            listener,
            env: SystemEnv::new(),
            retry_backoff: config.retry_backoff,
            display_zone: config.display_zone,
        })
    }

    /// Get the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// The scan pipeline.
    pub fn desk(&self) -> &Arc<ScanDesk<SqliteStore>> {
        &self.desk
    }

    /// The room display presenter.
    pub fn presenter(&self) -> &Presenter {
        &self.presenter
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutdown signal received");
        })
        .await
    }

    /// Run until `shutdown` resolves, then stop rotation and drain in-flight
    /// requests.
    pub async fn run_until(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        tracing::info!("Server starting on {}", self.listener.local_addr()?);

        let (stop_tx, stop_rx) = watch::channel(false);

        let rotation =
            RotationLoop::new(self.env.clone(), Arc::clone(self.desk.authority()), self.retry_backoff);
        let rotation = tokio::spawn(rotation.run(stop_rx.clone()));

        let signal_tx = stop_tx.clone();
        tokio::spawn(async move {
            shutdown.await;
            let _ = signal_tx.send(true);
        });

        let state = AppState::new(Arc::clone(&self.desk), self.env).with_zone(self.display_zone);
        let app = router(state).into_make_service_with_connect_info::<SocketAddr>();

        let served = axum::serve(self.listener, app)
            .with_graceful_shutdown(stopped(stop_rx))
            .await;

        let _ = stop_tx.send(true);
        rotation.await.map_err(|e| ServerError::Internal(format!("rotation task failed: {e}")))?;

        tracing::info!("server stopped");
        served.map_err(ServerError::from)
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("desk", &self.desk)
            .field("listener", &self.listener)
            .finish_non_exhaustive()
    }
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}
