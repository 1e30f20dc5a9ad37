//! A facade over an ordered key-value engine, exposing named FIFO queues
//! and timestamp-ordered sets.
//!
//! The engine is SQLite via `sqlx`: queue entries are ordered by an
//! autoincrement rowid, timed-set entries by the `(set, ts, jid)` primary
//! key of a B-tree table. The journal runs in WAL mode with
//! `synchronous=FULL`, so every successful write has reached disk before
//! the call returns.

mod queue;
mod timed_set;

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};

use crate::error::Result;

pub use queue::Queue;
pub use timed_set::{TimedEntry, TimedSet};

/// Set names, one namespace per lifecycle stage.
pub const SCHEDULED: &str = "scheduled";
pub const RETRIES: &str = "retries";
pub const WORKING: &str = "working";
pub const DEAD: &str = "dead";

#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (creating if necessary) the backing database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Store> {
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue_entries (
                id      INTEGER PRIMARY KEY AUTOINCREMENT,
                queue   TEXT NOT NULL,
                payload BLOB NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_queue_entries_queue
            ON queue_entries (queue, id)
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS timed_entries (
                set_name TEXT NOT NULL,
                ts       TEXT NOT NULL,
                jid      TEXT NOT NULL,
                payload  BLOB NOT NULL,
                PRIMARY KEY (set_name, ts, jid)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_timed_entries_jid
            ON timed_entries (set_name, jid)
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Store { pool })
    }

    /// The named queue. Queues exist implicitly: pushing to a new name
    /// creates it.
    pub fn queue(&self, name: &str) -> Queue {
        Queue::new(self.pool.clone(), name)
    }

    /// Jobs parked for future execution, keyed by their `at` time.
    pub fn scheduled(&self) -> TimedSet {
        TimedSet::new(self.pool.clone(), SCHEDULED)
    }

    /// Failed jobs awaiting their backoff, keyed by `next_at`.
    pub fn retries(&self) -> TimedSet {
        TimedSet::new(self.pool.clone(), RETRIES)
    }

    /// In-flight reservations, keyed by reservation expiry.
    pub fn working(&self) -> TimedSet {
        TimedSet::new(self.pool.clone(), WORKING)
    }

    /// Jobs whose retry budget is exhausted, keyed by time of death.
    pub fn dead(&self) -> TimedSet {
        TimedSet::new(self.pool.clone(), DEAD)
    }

    /// Backend statistics as a string map.
    pub async fn stats(&self) -> Result<HashMap<String, String>> {
        let mut stats = HashMap::new();

        let queued: i64 = sqlx::query("SELECT COUNT(*) FROM queue_entries")
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;
        stats.insert("queued".to_string(), queued.to_string());

        for set in [SCHEDULED, RETRIES, WORKING, DEAD] {
            let size = TimedSet::new(self.pool.clone(), set).size().await?;
            stats.insert(set.to_string(), size.to_string());
        }

        let version: String = sqlx::query("SELECT sqlite_version()")
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;
        stats.insert("engine".to_string(), format!("sqlite {version}"));

        Ok(stats)
    }

    /// Closes the pool, blocking until outstanding writes have committed.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
