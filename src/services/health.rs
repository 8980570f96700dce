//! Ops health pass: the 5-minute cron body.
//!
//! Combines the healer's own health check with a stuck-job scan over the
//! coordinator. Jobs stuck in `running` are moved to `healing` and fed back
//! as full-reset healing tasks.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{instrument, warn};

use crate::domain::models::{
    HealSeverity, HealingIssue, HealingStrategy, HealingTask, JobPatch, JobStatus,
};
use crate::domain::ports::{Clock, IdProvider, TypedQueue};
use crate::services::job_coordinator::JobCoordinator;
use crate::services::self_healer::{HealerHealth, SelfHealer};

/// Running jobs older than this are considered stuck.
const STUCK_JOB_MINUTES: i64 = 10;

/// Combined ops health report.
#[derive(Debug, Clone, Serialize)]
pub struct OpsHealthReport {
    pub healer: HealerHealth,
    pub stuck_jobs: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

pub struct HealthService {
    coordinator: Arc<JobCoordinator>,
    healer: Arc<SelfHealer>,
    healing_queue: TypedQueue<HealingTask>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdProvider>,
}

impl HealthService {
    pub fn new(
        coordinator: Arc<JobCoordinator>,
        healer: Arc<SelfHealer>,
        healing_queue: TypedQueue<HealingTask>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdProvider>,
    ) -> Self {
        Self {
            coordinator,
            healer,
            healing_queue,
            clock,
            ids,
        }
    }

    /// Run one health pass: healer check plus stuck-job remediation.
    #[instrument(skip(self), err)]
    pub async fn healing_check(&self) -> Result<OpsHealthReport> {
        let now = self.clock.now();
        let healer = self.healer.health_check().await;

        let stuck = self
            .coordinator
            .find_stuck_jobs(Duration::minutes(STUCK_JOB_MINUTES))
            .await;
        let mut stuck_ids = Vec::with_capacity(stuck.len());

        for job in stuck {
            warn!(job_id = %job.id, "job stuck in running, feeding full reset");

            // Park the job in healing so the next pass does not re-file it.
            self.coordinator
                .update_job(
                    &job.id,
                    JobPatch {
                        status: Some(JobStatus::Healing),
                        error: Some("stuck in running beyond 10 minutes".into()),
                        ..Default::default()
                    },
                )
                .await?;

            let mut context = Map::new();
            context.insert("payload".into(), Value::Object(job.payload.clone()));
            if let Some(repo) = job.payload.get("repo").and_then(Value::as_str) {
                context.insert("repo_name".into(), json!(repo));
            }

            let task = HealingTask::new(
                self.ids.new_id(),
                job.id.clone(),
                HealingIssue {
                    kind: "stuck_job".into(),
                    severity: HealSeverity::High,
                    description: format!(
                        "job {} stuck in running since {}",
                        job.id, job.updated_at
                    ),
                    context,
                    original_error: None,
                },
                HealingStrategy::FullReset,
                None,
                now,
            );
            self.healing_queue.enqueue(&task).await?;
            stuck_ids.push(job.id);
        }

        Ok(OpsHealthReport {
            healer,
            stuck_jobs: stuck_ids,
            checked_at: now,
        })
    }
}
