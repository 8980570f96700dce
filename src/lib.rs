//! roadwarden - control plane keeping a fleet of repositories mirrored,
//! scored for cohesiveness, and operationally healthy.

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::models::Config;
pub use infrastructure::{ConfigError, ConfigLoader};
