//! Job coordinator: the authoritative registry of jobs.
//!
//! Source of truth for job status and metrics. The coordinator records the
//! transitions processors report; it never decides when to retry a job
//! itself. All operations serialize on one state mutex and write the whole
//! state back through the store after every mutation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
#[cfg(test)]
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::domain::error::{JobError, StoreError};
use crate::domain::models::{
    Job, JobMetrics, JobMetricsReport, JobPatch, JobStatus, JobType, NewJob, StatusCounts,
};
use crate::domain::ports::{Clock, IdProvider, StateStore, TypedQueue};

/// Fixed state-store key for this component.
const COMPONENT: &str = "job-coordinator";

/// Jobs older than this in a terminal state are garbage-collected.
const CLEANUP_HORIZON_HOURS: i64 = 24;

const DEFAULT_LIST_LIMIT: usize = 100;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CoordinatorState {
    jobs: HashMap<String, Job>,
    metrics: JobMetrics,
}

/// Filters accepted by `list_jobs`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    #[serde(rename = "type")]
    pub job_type: Option<JobType>,
    pub limit: Option<usize>,
}

/// Listing result: jobs in priority order plus the global metrics.
#[derive(Debug, Clone, Serialize)]
pub struct JobListing {
    pub jobs: Vec<Job>,
    pub metrics: JobMetricsReport,
}

/// Result of a cleanup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CleanupOutcome {
    pub cleaned: usize,
    pub remaining: usize,
}

pub struct JobCoordinator {
    state: Mutex<CoordinatorState>,
    store: Arc<dyn StateStore>,
    job_queue: TypedQueue<Job>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdProvider>,
    default_max_retries: u32,
}

impl JobCoordinator {
    /// Hydrate the coordinator from the durable store. No work is accepted
    /// before this completes.
    pub async fn load(
        store: Arc<dyn StateStore>,
        job_queue: TypedQueue<Job>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdProvider>,
        default_max_retries: u32,
    ) -> Result<Self, JobError> {
        let state = match store.load(COMPONENT).await? {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            None => CoordinatorState::default(),
        };

        Ok(Self {
            state: Mutex::new(state),
            store,
            job_queue,
            clock,
            ids,
            default_max_retries,
        })
    }

    async fn persist(&self, state: &CoordinatorState) -> Result<(), JobError> {
        let value =
            serde_json::to_value(state).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.store.save(COMPONENT, &value).await?;
        Ok(())
    }

    /// List jobs sorted by priority rank ascending, then `created_at`
    /// descending, truncated to the filter's limit. Metrics ride along on
    /// every listing.
    #[instrument(skip(self))]
    pub async fn list_jobs(&self, filter: JobFilter) -> JobListing {
        let state = self.state.lock().await;
        let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT);

        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| filter.status.is_none_or(|s| j.status == s))
            .filter(|j| filter.job_type.is_none_or(|t| j.job_type == t))
            .cloned()
            .collect();

        jobs.sort_by(|a, b| {
            a.priority
                .rank()
                .cmp(&b.priority.rank())
                .then(b.created_at.cmp(&a.created_at))
        });
        jobs.truncate(limit);

        JobListing {
            jobs,
            metrics: report_from(&state),
        }
    }

    /// Register a job with defaults filled in and enqueue it for a
    /// processor. Fails without observable state change if the enqueue
    /// fails.
    #[instrument(skip(self, new), err)]
    pub async fn create_job(&self, new: NewJob) -> Result<Job, JobError> {
        let now = self.clock.now();
        let mut job = Job::new(self.ids.new_id(), self.default_max_retries, now);

        if let Some(job_type) = new.job_type {
            job.job_type = job_type;
        }
        if let Some(priority) = new.priority {
            job.priority = priority;
        }
        if let Some(payload) = new.payload {
            job.payload = payload;
        }
        if let Some(max_retries) = new.max_retries {
            job.max_retries = max_retries;
        }

        let mut state = self.state.lock().await;
        state.jobs.insert(job.id.clone(), job.clone());
        state.metrics.total_created += 1;
        if let Err(e) = self.persist(&state).await {
            state.jobs.remove(&job.id);
            state.metrics.total_created -= 1;
            return Err(e);
        }

        if let Err(e) = self.job_queue.enqueue(&job).await {
            // Roll back so the registry never advertises a job no processor
            // will ever see.
            state.jobs.remove(&job.id);
            state.metrics.total_created -= 1;
            if let Err(persist_err) = self.persist(&state).await {
                warn!(job_id = %job.id, error = %persist_err, "rollback persist failed");
            }
            return Err(e.into());
        }

        info!(job_id = %job.id, job_type = job.job_type.as_str(), "job created");
        Ok(job)
    }

    #[instrument(skip(self), err)]
    pub async fn get_job(&self, id: &str) -> Result<Job, JobError> {
        let state = self.state.lock().await;
        state
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// Delete a job regardless of its status.
    #[instrument(skip(self), err)]
    pub async fn delete_job(&self, id: &str) -> Result<(), JobError> {
        let mut state = self.state.lock().await;
        if state.jobs.remove(id).is_none() {
            return Err(JobError::NotFound(id.to_string()));
        }
        self.persist(&state).await?;
        info!(job_id = %id, "job deleted");
        Ok(())
    }

    /// Apply a patch reported by a processor.
    ///
    /// Status side effects: entering `completed` stamps `completed_at` and
    /// bumps `total_completed`; `failed` bumps `total_failed`; `healing`
    /// bumps `total_healing`. `updated_at` is always refreshed. Off-graph
    /// transitions and retry counts beyond the ceiling are rejected with the
    /// state unchanged.
    #[instrument(skip(self, patch), err)]
    pub async fn update_job(&self, id: &str, patch: JobPatch) -> Result<Job, JobError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let job = state
            .jobs
            .get(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;

        if let Some(new_status) = patch.status {
            if new_status != job.status && !job.can_transition_to(new_status) {
                return Err(JobError::InvalidStatusTransition {
                    from: job.status.as_str().to_string(),
                    to: new_status.as_str().to_string(),
                });
            }
        }

        let max_retries = patch.max_retries.unwrap_or(job.max_retries);
        let retry_count = patch.retry_count.unwrap_or(job.retry_count);
        if retry_count > max_retries {
            return Err(JobError::Validation(format!(
                "retry_count {retry_count} exceeds max_retries {max_retries}"
            )));
        }

        let prior_job = job.clone();
        let prior_metrics = state.metrics.clone();
        let old_status = job.status;
        let status_change = patch
            .status
            .filter(|new_status| *new_status != old_status);

        if let Some(new_status) = status_change {
            match new_status {
                JobStatus::Completed => state.metrics.total_completed += 1,
                JobStatus::Failed => state.metrics.total_failed += 1,
                JobStatus::Healing => state.metrics.total_healing += 1,
                JobStatus::Pending | JobStatus::Running => {}
            }
        }

        let job = state.jobs.get_mut(id).expect("presence checked above");

        if let Some(job_type) = patch.job_type {
            job.job_type = job_type;
        }
        if let Some(max_retries) = patch.max_retries {
            job.max_retries = max_retries;
        }
        if let Some(priority) = patch.priority {
            job.priority = priority;
        }
        if let Some(payload) = patch.payload {
            job.payload = payload;
        }
        if let Some(retry_count) = patch.retry_count {
            job.retry_count = retry_count;
        }
        if let Some(healing_attempts) = patch.healing_attempts {
            job.healing_attempts = healing_attempts;
        }
        if let Some(error) = patch.error {
            job.error = Some(error);
        }
        if let Some(result) = patch.result {
            job.result = Some(result);
        }

        if let Some(new_status) = status_change {
            job.status = new_status;
            if new_status == JobStatus::Completed {
                job.completed_at = Some(now);
            }
        }
        job.updated_at = now;
        let updated = job.clone();

        if let Err(e) = self.persist(&state).await {
            state.jobs.insert(id.to_string(), prior_job);
            state.metrics = prior_metrics;
            return Err(e);
        }
        debug!(job_id = %id, status = updated.status.as_str(), "job updated");
        Ok(updated)
    }

    /// Counters plus recomputed per-status counts.
    pub async fn metrics(&self) -> JobMetricsReport {
        let state = self.state.lock().await;
        report_from(&state)
    }

    /// Garbage-collect terminal jobs older than the 24-hour horizon.
    ///
    /// A job survives iff its status is non-terminal or its effective
    /// completion time (`completed_at`, else `updated_at`) is within the
    /// horizon.
    #[instrument(skip(self), err)]
    pub async fn cleanup(&self) -> Result<CleanupOutcome, JobError> {
        let cutoff = self.clock.now() - Duration::hours(CLEANUP_HORIZON_HOURS);
        let mut state = self.state.lock().await;

        let before = state.jobs.len();
        state
            .jobs
            .retain(|_, job| !job.status.is_terminal() || job.effective_completion() > cutoff);
        let remaining = state.jobs.len();
        let cleaned = before - remaining;

        if cleaned > 0 {
            self.persist(&state).await?;
        }

        info!(cleaned, remaining, "job cleanup pass finished");
        Ok(CleanupOutcome { cleaned, remaining })
    }

    /// Running jobs whose `updated_at` is older than `max_age`. The ops
    /// health pass feeds these back as full-reset healing tasks.
    pub async fn find_stuck_jobs(&self, max_age: Duration) -> Vec<Job> {
        let cutoff = self.clock.now() - max_age;
        let state = self.state.lock().await;
        state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Running && j.updated_at < cutoff)
            .cloned()
            .collect()
    }

    /// Return the authoritative record for a delivered job, registering the
    /// delivery if the id is unknown. Healer-rebuilt jobs (and any message
    /// that outlived a cleanup pass) re-enter the registry here.
    #[instrument(skip(self, delivered), fields(job_id = %delivered.id), err)]
    pub async fn adopt_job(&self, delivered: Job) -> Result<Job, JobError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.jobs.get(&delivered.id) {
            return Ok(existing.clone());
        }
        state.jobs.insert(delivered.id.clone(), delivered.clone());
        self.persist(&state).await?;
        debug!(job_id = %delivered.id, "delivered job adopted into registry");
        Ok(delivered)
    }
}

fn report_from(state: &CoordinatorState) -> JobMetricsReport {
    let mut counts = StatusCounts::default();
    for job in state.jobs.values() {
        match job.status {
            JobStatus::Pending => counts.pending += 1,
            JobStatus::Running => counts.running += 1,
            JobStatus::Completed => counts.completed += 1,
            JobStatus::Failed => counts.failed += 1,
            JobStatus::Healing => counts.healing += 1,
        }
    }
    JobMetricsReport {
        counters: state.metrics.clone(),
        status: counts,
    }
}
