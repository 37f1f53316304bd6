//! Rollcall server binary.
//!
//! # Usage
//!
//! ```bash
//! # Serve with an in-memory database (development)
//! rollcall-server serve --bind 0.0.0.0:5000
//!
//! # Serve with a persistent database
//! rollcall-server --database attendance.db serve
//!
//! # Register a device owner
//! rollcall-server --database attendance.db enroll --regno URK23CS1161 --name Alice --ip 10.166.185.227
//!
//! # Dump the presence log with times in a fixed zone
//! rollcall-server --database attendance.db --timezone +05:30 export
//!
//! # Replace the displayed code (from the server host only)
//! curl -X POST http://127.0.0.1:5000/api/refresh
//! ```

use std::{net::IpAddr, path::PathBuf, time::Duration};

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use rollcall_core::{DuplicatePolicy, IdentityRecord};
use rollcall_server::{
    DisplayZone, Server, ServerError, ServerRuntimeConfig, SqliteStore, default_export_name,
    export_to_path,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Rollcall attendance server
#[derive(Parser, Debug)]
#[command(name = "rollcall-server")]
#[command(about = "Rotating-token attendance server")]
#[command(version)]
struct Args {
    /// SQLite database file
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Zone for displayed times: `local`, `utc` or an offset like `+05:30`
    #[arg(long, global = true, default_value = "local")]
    timezone: DisplayZone,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scan server (default)
    Serve(ServeArgs),

    /// Register a device owner
    Enroll {
        /// Registration number
        #[arg(long)]
        regno: String,

        /// Display name
        #[arg(long)]
        name: String,

        /// Address the device scans from
        #[arg(long)]
        ip: IpAddr,
    },

    /// Export the presence log as CSV
    Export {
        /// Output file (defaults to attendance_export_<timestamp>.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:5000")]
    bind: String,

    /// Address advertised in scan URLs (detected when omitted)
    #[arg(long)]
    server_ip: Option<IpAddr>,

    /// Token lifetime in seconds
    #[arg(long, default_value = "30")]
    ttl_secs: u64,

    /// Token value prefix
    #[arg(long, default_value = "ATTEND")]
    prefix: String,

    /// Leading address segments a client must share with the server
    #[arg(long, default_value = "3")]
    segments: u8,

    /// How repeated scans from one device are counted
    #[arg(long, value_enum, default_value = "every-scan")]
    duplicates: Duplicates,

    /// Seconds to wait before retrying a failed token publish
    #[arg(long, default_value = "5")]
    retry_secs: u64,
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
            server_ip: None,
            ttl_secs: 30,
            prefix: "ATTEND".to_string(),
            segments: 3,
            duplicates: Duplicates::EveryScan,
            retry_secs: 5,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Duplicates {
    /// Record every admitted scan
    EveryScan,
    /// Record one scan per device per token
    OncePerToken,
}

impl From<Duplicates> for DuplicatePolicy {
    fn from(value: Duplicates) -> Self {
        match value {
            Duplicates::EveryScan => Self::EveryScan,
            Duplicates::OncePerToken => Self::OncePerToken,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    match args.command.unwrap_or_else(|| Command::Serve(ServeArgs::default())) {
        Command::Serve(serve) => run_server(serve, args.database, args.timezone).await?,
        Command::Enroll { regno, name, ip } => {
            let store = open_store(args.database, "enroll").await?;
            store.register_identity(&IdentityRecord::new(regno, name, ip)).await?;
        },
        Command::Export { output } => {
            let store = open_store(args.database, "export").await?;
            let path = output.unwrap_or_else(|| PathBuf::from(default_export_name(Utc::now())));
            let count = export_to_path(&store, &path, args.timezone).await?;
            tracing::info!("Exported {} records to {}", count, path.display());
        },
    }

    Ok(())
}

async fn run_server(
    args: ServeArgs,
    database: Option<PathBuf>,
    display_zone: DisplayZone,
) -> Result<(), ServerError> {
    tracing::info!("Rollcall server starting");
    tracing::info!("Binding to {}", args.bind);

    if database.is_none() {
        tracing::warn!("No database path provided - using in-memory database");
        tracing::warn!("Attendance will be lost when the server stops!");
    }

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        server_ip: args.server_ip,
        token_ttl: Duration::from_secs(args.ttl_secs),
        token_prefix: args.prefix,
        prefix_segments: args.segments,
        duplicates: args.duplicates.into(),
        retry_backoff: Duration::from_secs(args.retry_secs),
        database_path: database,
        display_zone,
    };

    let server = Server::bind(config).await?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    server.run().await
}

async fn open_store(database: Option<PathBuf>, command: &str) -> Result<SqliteStore, ServerError> {
    let path = database
        .ok_or_else(|| ServerError::Config(format!("{command} requires --database <PATH>")))?;
    Ok(SqliteStore::open(path).await?)
}
