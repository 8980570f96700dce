//! SQLite-backed shared KV cache with per-key TTL.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::{Row, SqlitePool};

use crate::domain::error::KvError;
use crate::domain::ports::KvCache;

pub struct SqliteKvCache {
    pool: SqlitePool,
}

impl SqliteKvCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[async_trait]
impl KvCache for SqliteKvCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, KvError> {
        let row = sqlx::query(
            "SELECT value FROM kv_cache WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(now_ms())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| KvError::Backend(e.to_string()))?;

        row.map(|row| {
            let raw: String = row.get("value");
            serde_json::from_str(&raw).map_err(|e| KvError::Serialization(e.to_string()))
        })
        .transpose()
    }

    async fn put(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<(), KvError> {
        let raw =
            serde_json::to_string(value).map_err(|e| KvError::Serialization(e.to_string()))?;
        let expires_at = ttl.map(|ttl| now_ms() + ttl.as_millis() as i64);

        sqlx::query(
            r#"
            INSERT INTO kv_cache (key, value, expires_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(raw)
        .bind(expires_at)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| KvError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        sqlx::query("DELETE FROM kv_cache WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, KvError> {
        let result =
            sqlx::query("DELETE FROM kv_cache WHERE expires_at IS NOT NULL AND expires_at <= ?")
                .bind(now_ms())
                .execute(&self.pool)
                .await
                .map_err(|e| KvError::Backend(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::DatabaseConnection;
    use serde_json::json;

    async fn cache() -> SqliteKvCache {
        let db = DatabaseConnection::new("sqlite::memory:", 1).await.unwrap();
        db.migrate().await.unwrap();
        SqliteKvCache::new(db.pool().clone())
    }

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let cache = cache().await;
        let value = json!({"full_name": "acme/foo"});

        cache.put("repo:acme/foo", &value, None).await.unwrap();
        assert_eq!(cache.get("repo:acme/foo").await.unwrap(), Some(value));

        cache.delete("repo:acme/foo").await.unwrap();
        assert_eq!(cache.get("repo:acme/foo").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent_and_purge() {
        let cache = cache().await;

        cache
            .put("stale", &json!(1), Some(Duration::from_millis(0)))
            .await
            .unwrap();
        cache.put("live", &json!(2), None).await.unwrap();

        assert_eq!(cache.get("stale").await.unwrap(), None);
        assert_eq!(cache.get("live").await.unwrap(), Some(json!(2)));

        let purged = cache.purge_expired().await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(cache.get("live").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn overwrite_refreshes_ttl() {
        let cache = cache().await;
        cache
            .put("key", &json!("old"), Some(Duration::from_millis(0)))
            .await
            .unwrap();
        cache.put("key", &json!("new"), None).await.unwrap();
        assert_eq!(cache.get("key").await.unwrap(), Some(json!("new")));
    }
}
