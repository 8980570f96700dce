//! Job domain model.
//!
//! Jobs are the units of work the coordinator tracks: scrapes, syncs,
//! cohesiveness checks, healing runs and housekeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Status of a job in the coordinator's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Registered and enqueued, waiting for a processor
    Pending,
    /// A processor is executing the job
    Running,
    /// Finished successfully
    Completed,
    /// Finished unsuccessfully with the retry budget exhausted
    Failed,
    /// Handed to the self-healer
    Healing,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Healing => "healing",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "healing" => Some(Self::Healing),
            _ => None,
        }
    }

    /// Terminal for garbage-collection purposes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Valid transitions from this status.
    ///
    /// Progression is monotone except for the healing reopening path
    /// (failed -> healing -> pending) and the processor retry path
    /// (running -> pending).
    pub fn valid_transitions(&self) -> Vec<JobStatus> {
        match self {
            Self::Pending => vec![Self::Running, Self::Completed, Self::Failed, Self::Healing],
            Self::Running => vec![Self::Pending, Self::Completed, Self::Failed, Self::Healing],
            Self::Failed => vec![Self::Healing],
            Self::Healing => vec![Self::Pending],
            Self::Completed => vec![],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// What kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    ScrapeRepo,
    SyncContent,
    CheckCohesiveness,
    SelfHeal,
    UpdateCache,
    FullSync,
    Cleanup,
    Notify,
}

impl Default for JobType {
    fn default() -> Self {
        Self::SyncContent
    }
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScrapeRepo => "scrape_repo",
            Self::SyncContent => "sync_content",
            Self::CheckCohesiveness => "check_cohesiveness",
            Self::SelfHeal => "self_heal",
            Self::UpdateCache => "update_cache",
            Self::FullSync => "full_sync",
            Self::Cleanup => "cleanup",
            Self::Notify => "notify",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "scrape_repo" => Some(Self::ScrapeRepo),
            "sync_content" => Some(Self::SyncContent),
            "check_cohesiveness" => Some(Self::CheckCohesiveness),
            "self_heal" => Some(Self::SelfHeal),
            "update_cache" => Some(Self::UpdateCache),
            "full_sync" => Some(Self::FullSync),
            "cleanup" => Some(Self::Cleanup),
            "notify" => Some(Self::Notify),
            _ => None,
        }
    }
}

/// Priority level. `rank()` gives the listing order: critical sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Critical,
    High,
    Normal,
    Low,
}

impl Default for JobPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl JobPriority {
    /// Total rank order used by job listings: lower rank lists first.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "normal" => Some(Self::Normal),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// A unit of work tracked by the coordinator.
///
/// Uniquely keyed by `id` across the coordinator's lifetime. Queue consumers
/// must treat redeliveries of the same id as idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: JobPriority,
    /// Opaque key/value bag interpreted by the job's handler
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Times the self-healer has reopened this job
    pub healing_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Job {
    /// Create a job with coordinator defaults filled in.
    pub fn new(id: impl Into<String>, max_retries: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            job_type: JobType::default(),
            status: JobStatus::default(),
            priority: JobPriority::default(),
            payload: Map::new(),
            retry_count: 0,
            max_retries,
            healing_attempts: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            error: None,
            result: None,
        }
    }

    pub fn with_type(mut self, job_type: JobType) -> Self {
        self.job_type = job_type;
        self
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn can_transition_to(&self, new_status: JobStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    /// Retry budget is evaluated at the start of each attempt against the
    /// current count.
    pub fn has_retry_budget(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Effective completion time used by the cleanup horizon.
    pub fn effective_completion(&self) -> DateTime<Utc> {
        self.completed_at.unwrap_or(self.updated_at)
    }
}

/// Partial job description accepted by `create_job`; missing fields take
/// coordinator defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewJob {
    #[serde(rename = "type")]
    pub job_type: Option<JobType>,
    pub priority: Option<JobPriority>,
    pub payload: Option<Map<String, Value>>,
    pub max_retries: Option<u32>,
}

/// Patch applied by `update_job`. Absent fields are left untouched. The
/// work-description fields (`job_type`, `payload`, `max_retries`) are
/// patched when a healed job re-enters with a rebuilt description.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    #[serde(rename = "type")]
    pub job_type: Option<JobType>,
    pub priority: Option<JobPriority>,
    pub payload: Option<Map<String, Value>>,
    pub retry_count: Option<u32>,
    pub max_retries: Option<u32>,
    pub healing_attempts: Option<u32>,
    pub error: Option<String>,
    pub result: Option<Value>,
}

/// Monotonic counters maintained by the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetrics {
    pub total_created: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_healing: u64,
}

/// Per-status population, recomputed on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub healing: u64,
}

/// Counters plus current per-status counts, returned by `metrics()` and
/// attached to every listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetricsReport {
    #[serde(flatten)]
    pub counters: JobMetrics,
    pub status: StatusCounts,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_job_fields() {
        let now = Utc::now();
        let job = Job::new("job-1", 3, now);
        assert_eq!(job.job_type, JobType::SyncContent);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.priority, JobPriority::Normal);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.max_retries, 3);
        assert!(job.payload.is_empty());
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn status_transition_graph() {
        use JobStatus::*;

        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Pending)); // processor retry
        assert!(Failed.can_transition_to(Healing));
        assert!(Healing.can_transition_to(Pending)); // healing reopens

        assert!(!Completed.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Running));
        assert!(!Healing.can_transition_to(Completed));
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Healing.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn priority_rank_ordering() {
        let mut priorities = vec![
            JobPriority::Low,
            JobPriority::Critical,
            JobPriority::Normal,
            JobPriority::High,
        ];
        priorities.sort_by_key(|p| p.rank());
        assert_eq!(
            priorities,
            vec![
                JobPriority::Critical,
                JobPriority::High,
                JobPriority::Normal,
                JobPriority::Low
            ]
        );
    }

    #[test]
    fn retry_budget_boundary() {
        let now = Utc::now();
        let mut job = Job::new("job-1", 2, now);
        assert!(job.has_retry_budget());
        job.retry_count = 2;
        assert!(!job.has_retry_budget());
    }

    #[test]
    fn serde_uses_snake_case_tags() {
        let json = serde_json::to_value(JobStatus::Healing).unwrap();
        assert_eq!(json, serde_json::json!("healing"));
        let json = serde_json::to_value(JobType::CheckCohesiveness).unwrap();
        assert_eq!(json, serde_json::json!("check_cohesiveness"));
    }
}
