//! Shared key-value cache with per-key TTL.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::error::KvError;

/// Best-effort shared cache. Canonical per-entity keys are written by the
/// owning component; everything else is a fast-path mirror that may expire.
#[async_trait]
pub trait KvCache: Send + Sync {
    /// Fetch a live value; expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<Value>, KvError>;

    /// Write a value; `ttl = None` means the entry never expires.
    async fn put(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<(), KvError>;

    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// Drop expired rows, returning how many were removed.
    async fn purge_expired(&self) -> Result<u64, KvError>;
}

/// Key layout shared across components.
pub mod keys {
    /// Canonical repo record (no TTL from the engine, 1 h from the mirror)
    pub fn repo(full_name: &str) -> String {
        format!("repo:{full_name}")
    }

    /// Score snapshot, 1-hour TTL
    pub fn cohesiveness(full_name: &str) -> String {
        format!("cohesiveness:{full_name}")
    }

    /// Skipped-notification record, 7-day TTL
    pub fn skipped(task_id: &str) -> String {
        format!("skipped:{task_id}")
    }

    /// Escalated-task record, no TTL
    pub fn escalated(task_id: &str) -> String {
        format!("escalated:{task_id}")
    }

    /// Per-job scratch cache cleared by clear_cache_retry
    pub fn job_cache(job_id: &str) -> String {
        format!("cache:{job_id}")
    }

    /// Daily operations report, 30-day TTL
    pub fn daily_report(date: &str) -> String {
        format!("report:daily:{date}")
    }

    /// Rolling status timestamps, no TTL
    pub fn metric(name: &str) -> String {
        format!("metrics:{name}")
    }
}
