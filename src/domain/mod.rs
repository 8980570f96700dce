//! Domain layer: models, error types, and the ports infrastructure adapters
//! implement.

pub mod error;
pub mod models;
pub mod ports;

pub use error::{HealError, JobError, KvError, QueueError, ScrapeError, StoreError, SyncError};
