//! Daily operations report.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use serde_json::{json, Value};
use tracing::{info, instrument};

use crate::domain::ports::{keys, Clock, KvCache};
use crate::services::job_coordinator::{JobCoordinator, JobFilter};
use crate::services::self_healer::SelfHealer;
use crate::services::sync_engine::SyncEngine;

/// Daily reports are kept for 30 days.
const REPORT_TTL: StdDuration = StdDuration::from_secs(30 * 24 * 3600);

pub struct ReportingService {
    coordinator: Arc<JobCoordinator>,
    engine: Arc<SyncEngine>,
    healer: Arc<SelfHealer>,
    kv: Arc<dyn KvCache>,
    clock: Arc<dyn Clock>,
}

impl ReportingService {
    pub fn new(
        coordinator: Arc<JobCoordinator>,
        engine: Arc<SyncEngine>,
        healer: Arc<SelfHealer>,
        kv: Arc<dyn KvCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            coordinator,
            engine,
            healer,
            kv,
            clock,
        }
    }

    /// Snapshot job metrics, repo cohesiveness, and healer metrics under
    /// `report:daily:{YYYY-MM-DD}`.
    #[instrument(skip(self), err)]
    pub async fn write_daily_report(&self) -> Result<Value> {
        let now = self.clock.now();
        let date = now.format("%Y-%m-%d").to_string();

        let jobs = self.coordinator.metrics().await;
        let listing = self.coordinator.list_jobs(JobFilter::default()).await;
        let repos = self.engine.cohesiveness_report().await;
        let sync = self.engine.status().await;
        let healing = self.healer.metrics().await;

        let report = json!({
            "date": date,
            "generated_at": now.to_rfc3339(),
            "jobs": {
                "metrics": jobs,
                "tracked": listing.jobs.len(),
            },
            "repos": {
                "count": sync.repo_count,
                "average_cohesiveness": repos.average_overall,
                "issues_by_severity": repos.by_severity,
                "auto_fixable_issues": repos.auto_fixable,
                "last_full_sync": sync.last_full_sync,
            },
            "healing": healing,
        });

        self.kv
            .put(&keys::daily_report(&date), &report, Some(REPORT_TTL))
            .await?;

        info!(date = %date, "daily report written");
        Ok(report)
    }
}
