//! SQLite-backed component state store.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::{Row, SqlitePool};

use crate::domain::error::StoreError;
use crate::domain::ports::StateStore;

/// Persists each component's whole state as one JSON blob. The upsert is a
/// single statement, so the per-key write is atomic.
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn load(&self, component: &str) -> Result<Option<Value>, StoreError> {
        let row = sqlx::query("SELECT state FROM component_state WHERE name = ?")
            .bind(component)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        row.map(|row| {
            let raw: String = row.get("state");
            serde_json::from_str(&raw).map_err(|e| StoreError::Serialization(e.to_string()))
        })
        .transpose()
    }

    async fn save(&self, component: &str, state: &Value) -> Result<(), StoreError> {
        let raw =
            serde_json::to_string(state).map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO component_state (name, state, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                state = excluded.state,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(component)
        .bind(raw)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }
}
