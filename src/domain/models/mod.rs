//! Domain models for jobs, tracked repositories, healing tasks and
//! configuration.

pub mod config;
pub mod healing;
pub mod job;
pub mod repo;

pub use config::{
    Config, DatabaseConfig, LoggingConfig, QueueConfig, ScraperConfig, ServerConfig,
};
pub use healing::{
    HealSeverity, HealerMetrics, HealingIssue, HealingStatus, HealingStrategy, HealingTask,
    Resolution, ResolutionMetrics, StrategyConfig,
};
pub use job::{
    Job, JobMetrics, JobMetricsReport, JobPatch, JobPriority, JobStatus, JobType, NewJob,
    StatusCounts,
};
pub use repo::{
    CohesivenessIssue, CohesivenessScore, IssueKind, IssueSeverity, RepoData, RepoStructure,
    ScrapeTask, ScrapeType, SyncFailure,
};
