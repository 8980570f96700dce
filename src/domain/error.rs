//! Domain error types for the roadwarden control plane.
//!
//! One enum per domain or infrastructure concern. Transience classifiers
//! drive the processors' retry-or-heal decisions.

use thiserror::Error;

/// Errors from job coordinator operations.
#[derive(Error, Debug)]
pub enum JobError {
    /// Job with the given id was not found
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Invalid status transition attempted
    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    /// A patch violated a job invariant
    #[error("Invalid job update: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Errors from sync engine operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A full sync is already running
    #[error("Full sync already in progress")]
    SyncInProgress,

    /// Repository is not tracked by the engine
    #[error("Repository not found: {0}")]
    RepoNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Cache(#[from] KvError),
}

impl SyncError {
    /// True when the error signals a state conflict rather than a failure.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::SyncInProgress)
    }
}

/// Errors from self-healer operations.
#[derive(Error, Debug)]
pub enum HealError {
    #[error("Healing task not found: {0}")]
    TaskNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Cache(#[from] KvError),
}

/// Errors from the code-host scraper.
#[derive(Error, Debug)]
pub enum ScrapeError {
    /// Network-level failure reaching the code host
    #[error("Upstream request failed: {0}")]
    Network(String),

    /// Code host returned an error status
    #[error("Upstream error {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Rate limit exhausted on the code host
    #[error("Upstream rate limit exceeded")]
    RateLimited,

    /// Repository does not exist upstream
    #[error("Repository not found upstream: {0}")]
    RepoMissing(String),

    /// Payload could not be decoded
    #[error("Invalid upstream payload: {0}")]
    Decode(String),
}

impl ScrapeError {
    /// True if a retry could succeed.
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimited => true,
            Self::Upstream { status, .. } => *status >= 500,
            Self::RepoMissing(_) | Self::Decode(_) => false,
        }
    }
}

/// Errors from the durable state store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("State store backend error: {0}")]
    Backend(String),

    #[error("State serialization failed: {0}")]
    Serialization(String),
}

/// Errors from the work queues.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue backend error: {0}")]
    Backend(String),

    #[error("Queue message decode failed: {0}")]
    Decode(String),
}

/// Errors from the shared KV cache.
#[derive(Error, Debug)]
pub enum KvError {
    #[error("KV backend error: {0}")]
    Backend(String),

    #[error("KV value serialization failed: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrape_error_transience() {
        assert!(ScrapeError::Network("reset".into()).is_transient());
        assert!(ScrapeError::RateLimited.is_transient());
        assert!(ScrapeError::Upstream {
            status: 502,
            message: "bad gateway".into()
        }
        .is_transient());
        assert!(!ScrapeError::Upstream {
            status: 404,
            message: "missing".into()
        }
        .is_transient());
        assert!(!ScrapeError::RepoMissing("acme/foo".into()).is_transient());
        assert!(!ScrapeError::Decode("truncated".into()).is_transient());
    }

    #[test]
    fn sync_conflict_classification() {
        assert!(SyncError::SyncInProgress.is_conflict());
        assert!(!SyncError::RepoNotFound("acme/foo".into()).is_conflict());
    }

    #[test]
    fn job_error_display() {
        let err = JobError::InvalidStatusTransition {
            from: "completed".into(),
            to: "running".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid status transition from completed to running"
        );
    }
}
