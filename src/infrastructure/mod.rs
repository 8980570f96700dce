//! Cross-cutting infrastructure: configuration loading and logging.

pub mod config;
pub mod logging;

pub use config::{ConfigError, ConfigLoader};
