//! SQLite-backed record store.
//!
//! Two tables, created on open:
//!
//! ```text
//! students   (id, regno UNIQUE, name, ip)
//! attendance (id, regno, name, ip, created_at)
//! ```
//!
//! Addresses are stored in canonical text form (IPv4-mapped IPv6 collapsed
//! to IPv4), timestamps as fixed-width RFC 3339 UTC strings so that text
//! order is time order.

use std::{net::IpAddr, path::Path};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rollcall_core::{IdentityRecord, PresenceEvent, RecordStore, StoreError};
use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
};

/// Record store over a SQLite connection pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open or create a database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, sqlx::Error> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                sqlx::Error::Configuration(format!("failed to create db directory: {e}").into())
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;

        Self::with_pool(pool).await
    }

    /// Private in-memory database, gone when the store is dropped.
    pub async fn open_in_memory() -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new().in_memory(true);

        // Every connection gets its own memory database; keep exactly one alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    /// Wrap an existing pool, creating tables if they don't exist.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self, sqlx::Error> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS students (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                regno TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                ip TEXT NOT NULL
            )
            ",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS attendance (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                regno TEXT NOT NULL,
                name TEXT NOT NULL,
                ip TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_students_ip ON students (ip)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    /// Register `identity`, replacing name and address if the id exists.
    pub async fn register_identity(&self, identity: &IdentityRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            INSERT INTO students (regno, name, ip) VALUES (?1, ?2, ?3)
            ON CONFLICT (regno) DO UPDATE SET name = excluded.name, ip = excluded.ip
            ",
        )
        .bind(&identity.id)
        .bind(&identity.name)
        .bind(origin_text(identity.origin))
        .execute(&self.pool)
        .await?;

        tracing::info!(id = %identity.id, origin = %identity.origin, "identity registered");
        Ok(())
    }

    /// All registered identities, ordered by id.
    pub async fn list_identities(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        let rows = sqlx::query("SELECT regno, name, ip FROM students ORDER BY regno")
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;

        rows.iter().map(identity_from_row).collect()
    }

    /// Close the pool; later calls fail as unavailable.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn find_by_origin(&self, origin: IpAddr) -> Result<Option<IdentityRecord>, StoreError> {
        let row = sqlx::query("SELECT regno, name, ip FROM students WHERE ip = ?1 ORDER BY id LIMIT 1")
            .bind(origin_text(origin))
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;

        row.as_ref().map(identity_from_row).transpose()
    }

    async fn append_event(&self, event: &PresenceEvent) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO attendance (regno, name, ip, created_at) VALUES (?1, ?2, ?3, ?4)")
            .bind(&event.identity_id)
            .bind(&event.name)
            .bind(origin_text(event.origin))
            .bind(event.recorded_at.to_rfc3339_opts(SecondsFormat::Micros, true))
            .execute(&self.pool)
            .await
            .map_err(store_error)?;

        Ok(())
    }

    async fn list_events(&self) -> Result<Vec<PresenceEvent>, StoreError> {
        let rows = sqlx::query(
            "SELECT regno, name, ip, created_at FROM attendance ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.iter().map(event_from_row).collect()
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(store_error)?;
        Ok(())
    }
}

fn origin_text(origin: IpAddr) -> String {
    origin.to_canonical().to_string()
}

fn store_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            StoreError::Unavailable(err.to_string())
        },
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(err.to_string())
        },
        _ => StoreError::Query(err.to_string()),
    }
}

fn parse_origin(text: &str) -> Result<IpAddr, StoreError> {
    text.parse().map_err(|_| StoreError::Corrupt(format!("invalid address {text:?}")))
}

fn identity_from_row(row: &SqliteRow) -> Result<IdentityRecord, StoreError> {
    let id: String = row.try_get("regno").map_err(store_error)?;
    let name: String = row.try_get("name").map_err(store_error)?;
    let ip: String = row.try_get("ip").map_err(store_error)?;
    Ok(IdentityRecord::new(id, name, parse_origin(&ip)?))
}

fn event_from_row(row: &SqliteRow) -> Result<PresenceEvent, StoreError> {
    let identity_id: String = row.try_get("regno").map_err(store_error)?;
    let name: String = row.try_get("name").map_err(store_error)?;
    let ip: String = row.try_get("ip").map_err(store_error)?;
    let created_at: String = row.try_get("created_at").map_err(store_error)?;

    let recorded_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| StoreError::Corrupt(format!("invalid timestamp {created_at:?}: {e}")))?
        .with_timezone(&Utc);

    Ok(PresenceEvent { identity_id, name, origin: parse_origin(&ip)?, recorded_at })
}
