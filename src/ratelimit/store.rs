//! Durable keyed-counter storage.
//!
//! The limiter's correctness under concurrency rests entirely on
//! [`CounterStore::increment`] being a single atomic insert-or-increment.
//! Implementations must never read the count and write it back as two
//! separate steps.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::{debug, info};

use super::key::StorageKey;
use crate::clock::millis_to_datetime;
use crate::error::Result;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS rate_limits (
    key          TEXT PRIMARY KEY,
    window_start INTEGER NOT NULL,
    count        INTEGER NOT NULL,
    expires_at   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rate_limits_expires_at ON rate_limits (expires_at);
"#;

/// Storage for fixed-window counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically create the counter at 1 or add 1 to it, returning the new count.
    async fn increment(
        &self,
        key: &StorageKey,
        window_start: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<u64>;

    /// Delete every counter whose window ended at or before `now`.
    ///
    /// Returns the number of counters removed.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// A counter row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRecord {
    /// Full storage key
    pub key: String,
    /// Start of the window this row counts
    pub window_start: DateTime<Utc>,
    /// Hits recorded so far
    pub count: u64,
    /// When the window ends and the row becomes dead
    pub expires_at: DateTime<Utc>,
}

/// In-process counter store.
///
/// Increments go through the map's entry API, which holds the shard lock for
/// the whole insert-or-increment, so it is atomic per key. Only suitable for
/// a single process.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: DashMap<String, RateLimitRecord>,
}

impl MemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a counter.
    pub fn get(&self, key: &StorageKey) -> Option<RateLimitRecord> {
        self.counters.get(&key.to_string()).map(|r| r.clone())
    }

    /// Number of stored counters, live or dead.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether the store holds no counters.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(
        &self,
        key: &StorageKey,
        window_start: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<u64> {
        let storage_key = key.to_string();
        let count = self
            .counters
            .entry(storage_key.clone())
            .and_modify(|record| record.count += 1)
            .or_insert_with(|| RateLimitRecord {
                key: storage_key,
                window_start,
                count: 1,
                expires_at,
            })
            .count;
        Ok(count)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let before = self.counters.len();
        self.counters.retain(|_, record| record.expires_at > now);
        Ok(before.saturating_sub(self.counters.len()) as u64)
    }
}

/// SQLite-backed counter store.
///
/// Timestamps are stored as epoch milliseconds.
#[derive(Debug, Clone)]
pub struct SqliteCounterStore {
    pool: Pool<Sqlite>,
}

impl SqliteCounterStore {
    /// Wrap an existing pool. Call [`SqliteCounterStore::migrate`] before use.
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Connect to the database at `url` and ensure the schema exists.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        info!(url = %url, max_connections, "Opening rate limit store");

        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Create the counter table and its expiry index if missing.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Fetch a single counter row.
    pub async fn get(&self, key: &StorageKey) -> Result<Option<RateLimitRecord>> {
        let row: Option<(String, i64, i64, i64)> = sqlx::query_as(
            "SELECT key, window_start, count, expires_at FROM rate_limits WHERE key = ?",
        )
        .bind(key.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(key, window_start, count, expires_at)| RateLimitRecord {
            key,
            window_start: millis_to_datetime(window_start),
            count: u64::try_from(count).unwrap_or(0),
            expires_at: millis_to_datetime(expires_at),
        }))
    }
}

#[async_trait]
impl CounterStore for SqliteCounterStore {
    async fn increment(
        &self,
        key: &StorageKey,
        window_start: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "INSERT INTO rate_limits (key, window_start, count, expires_at) \
             VALUES (?, ?, 1, ?) \
             ON CONFLICT(key) DO UPDATE SET count = rate_limits.count + 1 \
             RETURNING count",
        )
        .bind(key.to_string())
        .bind(window_start.timestamp_millis())
        .bind(expires_at.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM rate_limits WHERE expires_at <= ?")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await?;

        debug!(rows = result.rows_affected(), "Deleted expired rate limit rows");
        Ok(result.rows_affected())
    }
}
