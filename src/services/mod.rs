//! Service layer: the three stateful components, the cohesiveness scorer,
//! the queue processors, and the ops loops.

pub mod cohesiveness;
pub mod health;
pub mod job_coordinator;
pub mod processors;
pub mod reporting;
pub mod scheduler;
pub mod self_healer;
pub mod sync_engine;

#[cfg(test)]
pub(crate) mod testing;

pub use health::{HealthService, OpsHealthReport};
pub use job_coordinator::{CleanupOutcome, JobCoordinator, JobFilter, JobListing};
pub use processors::{
    spawn_consumer, DeliveryHandler, Disposition, HealingProcessor, JobProcessor, ScrapeProcessor,
};
pub use reporting::ReportingService;
pub use scheduler::Scheduler;
pub use self_healer::{HealOutcome, HealerHealth, SelfHealer};
pub use sync_engine::{
    CohesivenessCheckOutcome, CohesivenessReport, RepoListing, SyncEngine, SyncReceipt, SyncStatus,
};
