//! SQLite adapters for the durable store, the KV cache, and the work
//! queues.

pub mod connection;
pub mod kv_cache;
pub mod queue;
pub mod state_store;

pub use connection::DatabaseConnection;
pub use kv_cache::SqliteKvCache;
pub use queue::SqliteQueue;
pub use state_store::SqliteStateStore;
