//! Port trait definitions (hexagonal architecture).
//!
//! Async trait interfaces the infrastructure adapters implement:
//! - `StateStore`: whole-state persistence per component
//! - `KvCache`: shared cache with TTLs
//! - `QueueBackend` / `TypedQueue`: durable work queues
//! - `RepoScraper`: code-host access
//! - `Clock` / `IdProvider`: time and identifiers

pub mod clock;
pub mod kv_cache;
pub mod queue;
pub mod scraper;
pub mod state_store;

pub use clock::{Clock, IdProvider, SystemClock, UuidIds};
pub use kv_cache::{keys, KvCache};
pub use queue::{queues, Delivery, QueueBackend, QueueMessage, TypedQueue};
pub use scraper::RepoScraper;
pub use state_store::StateStore;
