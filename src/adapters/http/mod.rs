//! Thin HTTP adapter: routes map one-to-one onto component operations.

pub mod router;

pub use router::{AppState, HttpServer};
