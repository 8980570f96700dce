//! Queue processors: glue between deliveries and component operations.
//!
//! A processor never owns state. It maps each delivered message onto calls
//! into the components, then tells the consumer loop whether to ack the
//! delivery or put it back for redelivery. Processors are also the boundary
//! where "something is broken" becomes "file a healing task".

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::models::{
    HealSeverity, HealingIssue, HealingStrategy, HealingTask, Job, JobPatch, JobStatus, JobType,
    QueueConfig, ScrapeTask, ScrapeType,
};
use crate::domain::ports::{keys, Clock, Delivery, IdProvider, KvCache, RepoScraper, TypedQueue};
use crate::services::job_coordinator::JobCoordinator;
use crate::services::self_healer::SelfHealer;
use crate::services::sync_engine::SyncEngine;

/// TTL on the scrape processor's fast-path repo mirror.
const MIRROR_TTL: StdDuration = StdDuration::from_secs(3600);

/// Healing budget for jobs that exhausted their retries.
const JOB_HEAL_MAX_ATTEMPTS: u32 = 5;

/// Healing budget for failed scrapes.
const SCRAPE_HEAL_MAX_ATTEMPTS: u32 = 3;

/// What the consumer loop should do with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Retry,
}

/// One processor handling one queue's message shape.
#[async_trait]
pub trait DeliveryHandler<M>: Send + Sync {
    async fn handle(&self, delivery: Delivery<M>) -> Result<Disposition>;
}

/// Run a batch-consumer loop for a queue until shutdown.
///
/// Pulls up to `batch_size` leased messages per poll tick and settles each
/// delivery per the handler's disposition. Handler errors are conservative:
/// the message is retried.
pub fn spawn_consumer<M, H>(
    queue: TypedQueue<M>,
    handler: Arc<H>,
    config: QueueConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()>
where
    M: Serialize + DeserializeOwned + Send + 'static,
    H: DeliveryHandler<M> + 'static,
{
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(StdDuration::from_millis(config.poll_interval_ms));
        info!(queue = queue.name(), "queue consumer started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(queue = queue.name(), "queue consumer shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let batch = match queue.pull(config.batch_size).await {
                        Ok(batch) => batch,
                        Err(e) => {
                            warn!(queue = queue.name(), error = %e, "queue pull failed");
                            continue;
                        }
                    };

                    for delivery in batch {
                        let receipt = delivery.receipt;
                        let disposition = match handler.handle(delivery).await {
                            Ok(disposition) => disposition,
                            Err(e) => {
                                warn!(queue = queue.name(), error = %e, "handler failed, retrying delivery");
                                Disposition::Retry
                            }
                        };
                        let settle = match disposition {
                            Disposition::Ack => queue.ack(receipt).await,
                            Disposition::Retry => queue.retry(receipt).await,
                        };
                        if let Err(e) = settle {
                            warn!(queue = queue.name(), receipt, error = %e, "failed to settle delivery");
                        }
                    }
                }
            }
        }
    })
}

/// Processor for the job queue.
pub struct JobProcessor {
    coordinator: Arc<JobCoordinator>,
    engine: Arc<SyncEngine>,
    scrape_queue: TypedQueue<ScrapeTask>,
    healing_queue: TypedQueue<HealingTask>,
    kv: Arc<dyn KvCache>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdProvider>,
}

impl JobProcessor {
    pub fn new(
        coordinator: Arc<JobCoordinator>,
        engine: Arc<SyncEngine>,
        scrape_queue: TypedQueue<ScrapeTask>,
        healing_queue: TypedQueue<HealingTask>,
        kv: Arc<dyn KvCache>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdProvider>,
    ) -> Self {
        Self {
            coordinator,
            engine,
            scrape_queue,
            healing_queue,
            kv,
            clock,
            ids,
        }
    }

    /// Execute one job type against the components.
    async fn dispatch(&self, job: &Job) -> Result<Value> {
        match job.job_type {
            JobType::ScrapeRepo => {
                let repo = payload_str(job, "repo").context("scrape_repo needs payload.repo")?;
                let scrape_type = match payload_str(job, "scrape_type").as_deref() {
                    Some("incremental") => ScrapeType::Incremental,
                    _ => ScrapeType::Full,
                };
                let task = ScrapeTask {
                    id: self.ids.new_id(),
                    repo,
                    scrape_type,
                    priority: job.priority,
                    requested_at: self.clock.now(),
                };
                self.scrape_queue.enqueue(&task).await?;
                Ok(json!({ "scrape_task_id": task.id, "repo": task.repo }))
            }
            JobType::SyncContent => {
                if let Some(repo) = payload_str(job, "repo") {
                    let task = ScrapeTask {
                        id: self.ids.new_id(),
                        repo,
                        scrape_type: ScrapeType::Full,
                        priority: job.priority,
                        requested_at: self.clock.now(),
                    };
                    self.scrape_queue.enqueue(&task).await?;
                    Ok(json!({ "scrape_task_id": task.id, "repo": task.repo }))
                } else {
                    let receipt = self.engine.trigger_incremental_sync().await?;
                    Ok(json!({ "enqueued": receipt.enqueued }))
                }
            }
            JobType::CheckCohesiveness => {
                let outcome = self.engine.trigger_cohesiveness_check().await?;
                Ok(json!({
                    "checked": outcome.checked,
                    "healing_enqueued": outcome.healing_enqueued,
                }))
            }
            JobType::FullSync => {
                let receipt = self.engine.trigger_full_sync().await?;
                Ok(json!({ "enqueued": receipt.enqueued }))
            }
            JobType::Cleanup => {
                let outcome = self.coordinator.cleanup().await?;
                Ok(json!({ "cleaned": outcome.cleaned, "remaining": outcome.remaining }))
            }
            JobType::UpdateCache => {
                let repo = payload_str(job, "repo").context("update_cache needs payload.repo")?;
                let Some(data) = self.engine.find_repo(&repo).await else {
                    bail!("update_cache: repo {repo} is not tracked");
                };
                let value = serde_json::to_value(&data)?;
                self.kv
                    .put(&keys::repo(&data.full_name), &value, Some(MIRROR_TTL))
                    .await?;
                Ok(json!({ "refreshed": data.full_name }))
            }
            JobType::Notify => {
                // The log pipeline is the escalation sink.
                error!(
                    job_id = %job.id,
                    payload = %serde_json::Value::Object(job.payload.clone()),
                    "operator notification"
                );
                Ok(json!({ "notified": true }))
            }
            JobType::SelfHeal => {
                let task = HealingTask::new(
                    self.ids.new_id(),
                    job.id.clone(),
                    HealingIssue {
                        kind: payload_str(job, "kind").unwrap_or_else(|| "self_heal".into()),
                        severity: HealSeverity::High,
                        description: payload_str(job, "description")
                            .unwrap_or_else(|| "self-heal requested".into()),
                        context: job.payload.clone(),
                        original_error: payload_str(job, "error"),
                    },
                    HealingStrategy::RetryWithBackoff,
                    None,
                    self.clock.now(),
                );
                self.healing_queue.enqueue(&task).await?;
                Ok(json!({ "healing_task_id": task.id }))
            }
        }
    }

    /// File the healing task for a job that exhausted its retry budget.
    async fn emit_healing_task(&self, job: &Job, error_message: &str) -> Result<()> {
        let mut context = Map::new();
        context.insert("payload".into(), Value::Object(job.payload.clone()));
        context.insert("job_type".into(), json!(job.job_type.as_str()));
        if let Some(repo) = payload_str(job, "repo") {
            context.insert("repo_name".into(), json!(repo));
        }

        let task = HealingTask::new(
            self.ids.new_id(),
            job.id.clone(),
            HealingIssue {
                kind: "job_failure".into(),
                severity: HealSeverity::High,
                description: format!(
                    "job {} ({}) failed with retry budget exhausted",
                    job.id,
                    job.job_type.as_str()
                ),
                context,
                original_error: Some(error_message.to_string()),
            },
            HealingStrategy::RetryWithBackoff,
            Some(JOB_HEAL_MAX_ATTEMPTS),
            self.clock.now(),
        );
        self.healing_queue.enqueue(&task).await?;
        Ok(())
    }
}

#[async_trait]
impl DeliveryHandler<Job> for JobProcessor {
    #[instrument(skip(self, delivery), fields(job_id = %delivery.message.id), err)]
    async fn handle(&self, delivery: Delivery<Job>) -> Result<Disposition> {
        let delivered = delivery.message;
        let mut job = self.coordinator.adopt_job(delivered.clone()).await?;

        if job.status.is_terminal() {
            debug!(job_id = %job.id, "duplicate delivery of terminal job");
            return Ok(Disposition::Ack);
        }

        // A healing job re-enters through the explicit reopening path. The
        // delivered message is the healer's rebuilt description; it replaces
        // the stale one in the registry.
        if job.status == JobStatus::Healing {
            job = self
                .coordinator
                .update_job(
                    &job.id,
                    JobPatch {
                        status: Some(JobStatus::Pending),
                        job_type: Some(delivered.job_type),
                        priority: Some(delivered.priority),
                        payload: Some(delivered.payload.clone()),
                        retry_count: Some(delivered.retry_count),
                        max_retries: Some(delivered.max_retries),
                        healing_attempts: Some(job.healing_attempts + 1),
                        ..Default::default()
                    },
                )
                .await?;
        }

        let job = self
            .coordinator
            .update_job(
                &job.id,
                JobPatch {
                    status: Some(JobStatus::Running),
                    ..Default::default()
                },
            )
            .await?;

        match self.dispatch(&job).await {
            Ok(result) => {
                self.coordinator
                    .update_job(
                        &job.id,
                        JobPatch {
                            status: Some(JobStatus::Completed),
                            result: Some(result),
                            ..Default::default()
                        },
                    )
                    .await?;
                Ok(Disposition::Ack)
            }
            Err(e) => {
                // Retry budget is evaluated against the count recorded at the
                // start of this attempt.
                if job.has_retry_budget() {
                    self.coordinator
                        .update_job(
                            &job.id,
                            JobPatch {
                                status: Some(JobStatus::Pending),
                                retry_count: Some(job.retry_count + 1),
                                error: Some(e.to_string()),
                                ..Default::default()
                            },
                        )
                        .await?;
                    Ok(Disposition::Retry)
                } else {
                    self.coordinator
                        .update_job(
                            &job.id,
                            JobPatch {
                                status: Some(JobStatus::Healing),
                                error: Some(e.to_string()),
                                ..Default::default()
                            },
                        )
                        .await?;
                    self.emit_healing_task(&job, &e.to_string()).await?;
                    warn!(job_id = %job.id, error = %e, "job handed to healing");
                    Ok(Disposition::Ack)
                }
            }
        }
    }
}

/// Processor for the scrape queue.
pub struct ScrapeProcessor {
    engine: Arc<SyncEngine>,
    scraper: Arc<dyn RepoScraper>,
    healing_queue: TypedQueue<HealingTask>,
    kv: Arc<dyn KvCache>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdProvider>,
    /// Code-host organization the short names resolve under
    org: String,
}

impl ScrapeProcessor {
    pub fn new(
        engine: Arc<SyncEngine>,
        scraper: Arc<dyn RepoScraper>,
        healing_queue: TypedQueue<HealingTask>,
        kv: Arc<dyn KvCache>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdProvider>,
        org: String,
    ) -> Self {
        Self {
            engine,
            scraper,
            healing_queue,
            kv,
            clock,
            ids,
            org,
        }
    }
}

#[async_trait]
impl DeliveryHandler<ScrapeTask> for ScrapeProcessor {
    #[instrument(skip(self, delivery), fields(repo = %delivery.message.repo), err)]
    async fn handle(&self, delivery: Delivery<ScrapeTask>) -> Result<Disposition> {
        let task = delivery.message;

        // Incremental scrapes lean on the stored ETag for a conditional
        // fetch; full scrapes always walk the tree.
        let etag = match task.scrape_type {
            ScrapeType::Incremental => self
                .engine
                .find_repo(&task.repo)
                .await
                .and_then(|r| r.etag),
            ScrapeType::Full => None,
        };

        match self
            .scraper
            .scrape(&task.repo, task.scrape_type, etag.as_deref())
            .await
        {
            Ok(None) => {
                debug!(repo = %task.repo, "upstream unchanged (etag match)");
                Ok(Disposition::Ack)
            }
            Ok(Some(data)) => {
                // Fast-path mirror; the engine's canonical write lands last.
                match serde_json::to_value(&data) {
                    Ok(value) => {
                        if let Err(e) = self
                            .kv
                            .put(&keys::repo(&data.full_name), &value, Some(MIRROR_TTL))
                            .await
                        {
                            warn!(repo = %data.full_name, error = %e, "mirror write failed");
                        }
                    }
                    Err(e) => warn!(repo = %data.full_name, error = %e, "mirror encode failed"),
                }
                self.engine.update_repo(data).await?;
                Ok(Disposition::Ack)
            }
            Err(e) => {
                self.engine
                    .record_sync_error(format!("scrape of {} failed: {e}", task.repo))
                    .await
                    .ok();

                let mut context = Map::new();
                context.insert(
                    "repo_name".into(),
                    json!(format!("{}/{}", self.org, task.repo)),
                );
                context.insert("scrape_type".into(), json!(task.scrape_type));

                let heal = HealingTask::new(
                    self.ids.new_id(),
                    format!("scrape-{}", task.id),
                    HealingIssue {
                        kind: "scrape_failure".into(),
                        severity: HealSeverity::Medium,
                        description: format!("scrape of {} failed", task.repo),
                        context,
                        original_error: Some(e.to_string()),
                    },
                    HealingStrategy::RetryWithBackoff,
                    Some(SCRAPE_HEAL_MAX_ATTEMPTS),
                    self.clock.now(),
                );
                self.healing_queue.enqueue(&heal).await?;
                warn!(repo = %task.repo, error = %e, "scrape failed, healing filed");
                Ok(Disposition::Retry)
            }
        }
    }
}

/// Processor for the healing queue. Strategy progression belongs to the
/// healer; this only settles deliveries.
pub struct HealingProcessor {
    healer: Arc<SelfHealer>,
}

impl HealingProcessor {
    pub fn new(healer: Arc<SelfHealer>) -> Self {
        Self { healer }
    }
}

#[async_trait]
impl DeliveryHandler<HealingTask> for HealingProcessor {
    #[instrument(skip(self, delivery), fields(task_id = %delivery.message.id), err)]
    async fn handle(&self, delivery: Delivery<HealingTask>) -> Result<Disposition> {
        let outcome = self.healer.handle(delivery.message).await?;
        if outcome.should_ack() {
            Ok(Disposition::Ack)
        } else {
            Ok(Disposition::Retry)
        }
    }
}

fn payload_str(job: &Job, key: &str) -> Option<String> {
    job.payload.get(key).and_then(Value::as_str).map(str::to_string)
}
