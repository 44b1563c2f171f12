//! Durable resource state.
//!
//! One row per link. Rows are created on the first check of a link and
//! upserted on every detected change.

use crate::types::{Fingerprint, StoredState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Error, Result};
use sqlx::FromRow;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Persistence of resource state, keyed by link.
///
/// Implementations must be safe to call from many check tasks at once.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the stored state of `link`, `None` if it was never persisted.
    async fn load(&self, link: &str) -> Result<Option<StoredState>>;

    /// Insert or replace the row of `state.link`.
    async fn upsert(&self, state: &StoredState) -> Result<()>;
}

/// SQLite-backed state store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (and create if missing) the database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(Error::store)?;

        info!(path = %path.as_ref().display(), "Opened state store");
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(Error::store)?;

        // A single connection that never expires, every new connection
        // would see its own empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(Error::store)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS resources (
                link TEXT PRIMARY KEY,
                last_change TEXT NOT NULL,
                fingerprint BLOB NOT NULL,
                status INTEGER NOT NULL,
                error TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(Error::store)?;

        Ok(())
    }

    /// Number of persisted rows.
    pub async fn count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM resources")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::store)?;
        Ok(count.max(0) as u64)
    }
}

#[derive(Debug, FromRow)]
struct ResourceRow {
    link: String,
    last_change: DateTime<Utc>,
    fingerprint: Vec<u8>,
    status: i64,
    error: String,
}

impl ResourceRow {
    fn into_stored_state(self) -> Result<StoredState> {
        let fingerprint = Fingerprint::from_slice(&self.fingerprint).ok_or_else(|| {
            Error::store(format!(
                "Invalid fingerprint length {} for {}",
                self.fingerprint.len(),
                self.link
            ))
        })?;

        let status = u16::try_from(self.status)
            .map_err(|_| Error::store(format!("Invalid status {} for {}", self.status, self.link)))?;

        Ok(StoredState {
            link: self.link,
            last_change: self.last_change,
            fingerprint,
            status,
            error: self.error,
        })
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn load(&self, link: &str) -> Result<Option<StoredState>> {
        let row: Option<ResourceRow> = sqlx::query_as(
            "SELECT link, last_change, fingerprint, status, error FROM resources WHERE link = ?",
        )
        .bind(link)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::store)?;

        row.map(ResourceRow::into_stored_state).transpose()
    }

    async fn upsert(&self, state: &StoredState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO resources (link, last_change, fingerprint, status, error)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(link) DO UPDATE SET
                last_change = excluded.last_change,
                fingerprint = excluded.fingerprint,
                status = excluded.status,
                error = excluded.error
            "#,
        )
        .bind(&state.link)
        .bind(state.last_change)
        .bind(state.fingerprint.as_bytes())
        .bind(i64::from(state.status))
        .bind(&state.error)
        .execute(&self.pool)
        .await
        .map_err(Error::store)?;

        Ok(())
    }
}
