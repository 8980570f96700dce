//! Durable work queues with at-least-once delivery.
//!
//! `QueueBackend` is the raw transport; `TypedQueue` layers serde on top so
//! components enqueue and consume domain shapes. Consumers must be
//! idempotent per message id: redelivery after a lease lapse or an explicit
//! `retry` is expected, not exceptional.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::domain::error::QueueError;

/// Names of the three work queues.
pub mod queues {
    pub const JOBS: &str = "jobs";
    pub const SCRAPES: &str = "scrape-tasks";
    pub const HEALING: &str = "healing-tasks";
}

/// A leased message as the backend hands it out.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Backend receipt used to ack or retry this delivery
    pub receipt: i64,
    pub body: Value,
    /// Delivery attempts so far, including this one
    pub attempts: u32,
}

/// Raw queue transport.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn enqueue(&self, queue: &str, body: Value) -> Result<(), QueueError>;

    /// Lease up to `max` visible messages. Leased messages become invisible
    /// until acked, retried, or the lease lapses.
    async fn pull(&self, queue: &str, max: usize) -> Result<Vec<QueueMessage>, QueueError>;

    /// Delete a delivered message.
    async fn ack(&self, queue: &str, receipt: i64) -> Result<(), QueueError>;

    /// Make a delivered message immediately visible again. The attempt
    /// counter is bumped on delivery, not here.
    async fn retry(&self, queue: &str, receipt: i64) -> Result<(), QueueError>;

    /// Visible + leased messages currently on the queue.
    async fn depth(&self, queue: &str) -> Result<u64, QueueError>;
}

/// A delivery decoded into its domain shape.
#[derive(Debug, Clone)]
pub struct Delivery<M> {
    pub receipt: i64,
    pub attempts: u32,
    pub message: M,
}

/// Serde-typed view over one named queue.
pub struct TypedQueue<M> {
    backend: Arc<dyn QueueBackend>,
    name: String,
    _marker: PhantomData<fn() -> M>,
}

impl<M> Clone for TypedQueue<M> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<M: Serialize + DeserializeOwned> TypedQueue<M> {
    pub fn new(backend: Arc<dyn QueueBackend>, name: impl Into<String>) -> Self {
        Self {
            backend,
            name: name.into(),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn enqueue(&self, message: &M) -> Result<(), QueueError> {
        let body = serde_json::to_value(message)
            .map_err(|e| QueueError::Decode(format!("encode for {}: {e}", self.name)))?;
        self.backend.enqueue(&self.name, body).await
    }

    pub async fn pull(&self, max: usize) -> Result<Vec<Delivery<M>>, QueueError> {
        let raw = self.backend.pull(&self.name, max).await?;
        raw.into_iter()
            .map(|msg| {
                let message = serde_json::from_value(msg.body)
                    .map_err(|e| QueueError::Decode(format!("decode from {}: {e}", self.name)))?;
                Ok(Delivery {
                    receipt: msg.receipt,
                    attempts: msg.attempts,
                    message,
                })
            })
            .collect()
    }

    pub async fn ack(&self, receipt: i64) -> Result<(), QueueError> {
        self.backend.ack(&self.name, receipt).await
    }

    pub async fn retry(&self, receipt: i64) -> Result<(), QueueError> {
        self.backend.retry(&self.name, receipt).await
    }

    pub async fn depth(&self) -> Result<u64, QueueError> {
        self.backend.depth(&self.name).await
    }
}
