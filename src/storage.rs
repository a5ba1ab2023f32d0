//! Storage abstraction for the watch pipeline.
//!
//! Defines the contract shared by the Dedup Guard, the Keyword Matcher's
//! startup snapshot and the external command/backfill collaborators. The
//! SQLite implementation keeps every shared operation to a single atomic
//! round-trip so concurrent workers and processes never race on
//! read-then-write sequences.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, Pool, Sqlite};
use std::sync::Arc;
use tracing::info;

use crate::types::{DenyKind, DenylistEntry, NotificationRecord, WatchlistEntry};

/// Persistent operations required by the pipeline.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Atomic insert-if-absent of a notification record, keyed by address.
    /// Returns true if this call created the record, false if one existed.
    async fn try_record_notification(&self, record: &NotificationRecord) -> Result<bool>;

    /// Whether a notification record exists for the address.
    async fn is_notified(&self, address: &str) -> Result<bool>;

    /// Snapshot of the watchlist for a scope, in configuration order.
    async fn watchlist(&self, scope: &str) -> Result<Vec<WatchlistEntry>>;

    /// Add a keyword to a scope. Returns false if it already existed
    /// (uniqueness is case-insensitive per scope).
    async fn add_keyword(&self, keyword: &str, scope: &str) -> Result<bool>;

    /// Remove a keyword from a scope. Returns false if it was absent.
    async fn remove_keyword(&self, keyword: &str, scope: &str) -> Result<bool>;

    /// Denylist entries loaded at startup.
    async fn denylist(&self) -> Result<Vec<DenylistEntry>>;

    /// Marker consumed by the external backfill collaborator.
    async fn last_processed_timestamp(&self) -> Result<Option<i64>>;

    /// Advance the backfill marker.
    async fn set_last_processed_timestamp(&self, timestamp: i64) -> Result<()>;

    /// Total notification records (operator visibility).
    async fn notified_count(&self) -> Result<i64>;

    /// Health check for the storage backend.
    async fn health_check(&self) -> Result<bool>;
}

#[derive(FromRow)]
struct WatchlistRow {
    keyword: String,
    scope: String,
}

#[derive(FromRow)]
struct DenylistRow {
    pattern: String,
    kind: String,
}

/// SQLite implementation of the `AlertStore` contract.
pub struct SqliteAlertStore {
    pool: Pool<Sqlite>,
}

impl SqliteAlertStore {
    /// Connect to (or create) the database file and ensure the schema.
    pub async fn connect(db_path: &str) -> Result<Arc<Self>> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await
            .context("Failed to connect to SQLite database")?;

        Self::create_schema(&pool).await?;

        info!("AlertStore initialized and connected to {}", db_path);

        Ok(Arc::new(Self { pool }))
    }

    async fn create_schema(pool: &Pool<Sqlite>) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notified_tokens (
                address TEXT PRIMARY KEY,
                token_name TEXT NOT NULL,
                notification_type TEXT NOT NULL,
                notified_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await
        .context("Failed to create notified_tokens table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS watchlist (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                keyword TEXT NOT NULL COLLATE NOCASE,
                scope TEXT NOT NULL,
                UNIQUE (keyword, scope)
            );
            "#,
        )
        .execute(pool)
        .await
        .context("Failed to create watchlist table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS denylist (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pattern TEXT NOT NULL,
                kind TEXT NOT NULL,
                UNIQUE (pattern, kind)
            );
            "#,
        )
        .execute(pool)
        .await
        .context("Failed to create denylist table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pipeline_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await
        .context("Failed to create pipeline_state table")?;

        Ok(())
    }

    /// Pool handle for collaborators sharing the same database.
    pub fn get_db_pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl AlertStore for SqliteAlertStore {
    async fn try_record_notification(&self, record: &NotificationRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO notified_tokens (address, token_name, notification_type, notified_at)
            VALUES (?, ?, ?, ?);
            "#,
        )
        .bind(&record.address)
        .bind(&record.token_name)
        .bind(&record.notification_type)
        .bind(record.notified_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert notification record")?;

        Ok(result.rows_affected() == 1)
    }

    async fn is_notified(&self, address: &str) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM notified_tokens WHERE address = ?")
                .bind(address)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to query notification record")?;

        Ok(row.is_some())
    }

    async fn watchlist(&self, scope: &str) -> Result<Vec<WatchlistEntry>> {
        let rows: Vec<WatchlistRow> = sqlx::query_as(
            "SELECT keyword, scope FROM watchlist WHERE scope = ? ORDER BY id ASC",
        )
        .bind(scope)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch watchlist")?;

        Ok(rows
            .into_iter()
            .map(|row| WatchlistEntry {
                keyword: row.keyword,
                scope: row.scope,
            })
            .collect())
    }

    async fn add_keyword(&self, keyword: &str, scope: &str) -> Result<bool> {
        let result =
            sqlx::query("INSERT OR IGNORE INTO watchlist (keyword, scope) VALUES (?, ?)")
                .bind(keyword)
                .bind(scope)
                .execute(&self.pool)
                .await
                .context("Failed to add watchlist keyword")?;

        Ok(result.rows_affected() == 1)
    }

    async fn remove_keyword(&self, keyword: &str, scope: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM watchlist WHERE keyword = ? AND scope = ?")
            .bind(keyword)
            .bind(scope)
            .execute(&self.pool)
            .await
            .context("Failed to remove watchlist keyword")?;

        Ok(result.rows_affected() > 0)
    }

    async fn denylist(&self) -> Result<Vec<DenylistEntry>> {
        let rows: Vec<DenylistRow> =
            sqlx::query_as("SELECT pattern, kind FROM denylist ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch denylist")?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                DenyKind::parse(&row.kind).map(|kind| DenylistEntry {
                    pattern: row.pattern,
                    kind,
                })
            })
            .collect())
    }

    async fn last_processed_timestamp(&self) -> Result<Option<i64>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT value FROM pipeline_state WHERE key = 'last_processed_timestamp'",
        )
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read last processed timestamp")?;

        Ok(row.and_then(|(value,)| value.parse::<i64>().ok()))
    }

    async fn set_last_processed_timestamp(&self, timestamp: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_state (key, value) VALUES ('last_processed_timestamp', ?)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value;
            "#,
        )
        .bind(timestamp.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to persist last processed timestamp")?;

        Ok(())
    }

    async fn notified_count(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notified_tokens")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count notification records")?;

        Ok(count.0)
    }

    async fn health_check(&self) -> Result<bool> {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}
