use sqlx::{Row, SqlitePool};

use crate::error::Result;

/// A named durable FIFO of serialized jobs.
///
/// Handles are cheap: they hold a pool clone and the queue name, and every
/// operation is a single statement against the shared table.
#[derive(Clone, Debug)]
pub struct Queue {
    pool: SqlitePool,
    name: String,
}

impl Queue {
    pub(super) fn new(pool: SqlitePool, name: &str) -> Queue {
        Queue {
            pool,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends `payload` to the tail of the queue.
    pub async fn push(&self, payload: &[u8]) -> Result<()> {
        sqlx::query("INSERT INTO queue_entries (queue, payload) VALUES (?1, ?2)")
            .bind(&self.name)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Removes and returns the head of the queue, or None when empty. The
    /// removal is a single statement, so two concurrent pops never return
    /// the same entry.
    pub async fn pop(&self) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query(
            r#"
            DELETE FROM queue_entries
            WHERE id = (
                SELECT id FROM queue_entries WHERE queue = ?1 ORDER BY id LIMIT 1
            )
            RETURNING payload
            "#,
        )
        .bind(&self.name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get::<Vec<u8>, _>(0)))
    }

    /// Returns the head of the queue without removing it, along with the
    /// row key needed to [`remove`](Queue::remove) it later.
    pub async fn peek(&self) -> Result<Option<(i64, Vec<u8>)>> {
        let row = sqlx::query(
            "SELECT id, payload FROM queue_entries WHERE queue = ?1 ORDER BY id LIMIT 1",
        )
        .bind(&self.name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| (r.get::<i64, _>(0), r.get::<Vec<u8>, _>(1))))
    }

    /// Removes a specific entry previously returned by
    /// [`peek`](Queue::peek). Returns false when the entry was already
    /// taken, which tells a racing caller to rescan.
    pub async fn remove(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM queue_entries WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn size(&self) -> Result<u64> {
        let count: i64 = sqlx::query("SELECT COUNT(*) FROM queue_entries WHERE queue = ?1")
            .bind(&self.name)
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;
        Ok(count as u64)
    }
}
