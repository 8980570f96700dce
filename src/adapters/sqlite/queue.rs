//! SQLite-backed work queues with lease-based delivery.
//!
//! A pull leases messages by pushing their visibility past the lease
//! horizon inside one transaction; an unacked message becomes deliverable
//! again when the lease lapses. Delivery is therefore at-least-once and
//! consumers must be idempotent.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::{Row, SqlitePool};

use crate::domain::error::QueueError;
use crate::domain::ports::{QueueBackend, QueueMessage};

pub struct SqliteQueue {
    pool: SqlitePool,
    lease_ms: i64,
}

impl SqliteQueue {
    pub fn new(pool: SqlitePool, lease_seconds: i64) -> Self {
        Self {
            pool,
            lease_ms: lease_seconds * 1000,
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[async_trait]
impl QueueBackend for SqliteQueue {
    async fn enqueue(&self, queue: &str, body: Value) -> Result<(), QueueError> {
        let raw =
            serde_json::to_string(&body).map_err(|e| QueueError::Decode(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO queue_messages (queue, body, attempts, visible_at, enqueued_at)
            VALUES (?, ?, 0, ?, ?)
            "#,
        )
        .bind(queue)
        .bind(raw)
        .bind(now_ms())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn pull(&self, queue: &str, max: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let now = now_ms();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        let rows = sqlx::query(
            r#"
            SELECT id, body, attempts FROM queue_messages
            WHERE queue = ? AND visible_at <= ?
            ORDER BY id
            LIMIT ?
            "#,
        )
        .bind(queue)
        .bind(now)
        .bind(max as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| QueueError::Backend(e.to_string()))?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get("id");
            let raw: String = row.get("body");
            let attempts: i64 = row.get("attempts");

            sqlx::query("UPDATE queue_messages SET visible_at = ?, attempts = ? WHERE id = ?")
                .bind(now + self.lease_ms)
                .bind(attempts + 1)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| QueueError::Backend(e.to_string()))?;

            let body =
                serde_json::from_str(&raw).map_err(|e| QueueError::Decode(e.to_string()))?;
            messages.push(QueueMessage {
                receipt: id,
                body,
                attempts: (attempts + 1) as u32,
            });
        }

        tx.commit()
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(messages)
    }

    async fn ack(&self, queue: &str, receipt: i64) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM queue_messages WHERE queue = ? AND id = ?")
            .bind(queue)
            .bind(receipt)
            .execute(&self.pool)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn retry(&self, queue: &str, receipt: i64) -> Result<(), QueueError> {
        sqlx::query("UPDATE queue_messages SET visible_at = ? WHERE queue = ? AND id = ?")
            .bind(now_ms())
            .bind(queue)
            .bind(receipt)
            .execute(&self.pool)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn depth(&self, queue: &str) -> Result<u64, QueueError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM queue_messages WHERE queue = ?")
            .bind(queue)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }
}
