//! Wall-clock and identifier provision.
//!
//! Injected rather than called directly so tests can pin time (cleanup
//! horizons, stuck-job detection) and scripts can replay deterministically.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Generator of opaque unique identifiers.
pub trait IdProvider: Send + Sync {
    fn new_id(&self) -> String;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Production id provider backed by UUID v4.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIds;

impl IdProvider for UuidIds {
    fn new_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_ids_are_unique() {
        let ids = UuidIds;
        assert_ne!(ids.new_id(), ids.new_id());
    }
}
