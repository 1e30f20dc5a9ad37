use sqlx::{Row, SqlitePool};

use crate::error::Result;

/// An entry of a [`TimedSet`], keyed by `(ts, jid)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimedEntry {
    pub ts: String,
    pub jid: String,
    pub payload: Vec<u8>,
}

/// A durable set ordered by `(timestamp, jid)`. Timestamps are the
/// lexically-sortable strings produced by [`crate::util::now_ts`], so the
/// B-tree's byte order is chronological order.
#[derive(Clone, Debug)]
pub struct TimedSet {
    pool: SqlitePool,
    name: &'static str,
}

impl TimedSet {
    pub(super) fn new(pool: SqlitePool, name: &'static str) -> TimedSet {
        TimedSet { pool, name }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Inserts (or overwrites) the entry keyed by `(ts, jid)`.
    pub async fn add(&self, ts: &str, jid: &str, payload: &[u8]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO timed_entries (set_name, ts, jid, payload)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(self.name)
        .bind(ts)
        .bind(jid)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All entries with key at or before `ts`, in ascending key order. The
    /// entries are not removed; callers remove each one once it has been
    /// handed off.
    pub async fn entries_before(&self, ts: &str) -> Result<Vec<TimedEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT ts, jid, payload FROM timed_entries
            WHERE set_name = ?1 AND ts <= ?2
            ORDER BY ts, jid
            "#,
        )
        .bind(self.name)
        .bind(ts)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| TimedEntry {
                ts: r.get(0),
                jid: r.get(1),
                payload: r.get(2),
            })
            .collect())
    }

    /// Removes the entry keyed by `(ts, jid)`, reporting whether it existed.
    pub async fn remove(&self, ts: &str, jid: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM timed_entries WHERE set_name = ?1 AND ts = ?2 AND jid = ?3",
        )
        .bind(self.name)
        .bind(ts)
        .bind(jid)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Removes the entry for `jid` regardless of its key, returning its
    /// payload. Used by ACK and FAIL, which know the job but not the
    /// reservation expiry it is keyed under.
    pub async fn remove_by_jid(&self, jid: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query(
            r#"
            DELETE FROM timed_entries
            WHERE set_name = ?1 AND jid = ?2
            RETURNING payload
            "#,
        )
        .bind(self.name)
        .bind(jid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get::<Vec<u8>, _>(0)))
    }

    pub async fn size(&self) -> Result<u64> {
        let count: i64 = sqlx::query("SELECT COUNT(*) FROM timed_entries WHERE set_name = ?1")
            .bind(self.name)
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;
        Ok(count as u64)
    }

    /// Retention for the dead set: drops entries older than `cutoff_ts`,
    /// then all but the newest `max_entries`.
    pub async fn trim(&self, max_entries: u64, cutoff_ts: &str) -> Result<()> {
        sqlx::query("DELETE FROM timed_entries WHERE set_name = ?1 AND ts < ?2")
            .bind(self.name)
            .bind(cutoff_ts)
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            DELETE FROM timed_entries
            WHERE set_name = ?1 AND rowid NOT IN (
                SELECT rowid FROM timed_entries
                WHERE set_name = ?1
                ORDER BY ts DESC, jid DESC
                LIMIT ?2
            )
            "#,
        )
        .bind(self.name)
        .bind(max_entries as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
