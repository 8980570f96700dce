//! Self-healer: progressive multi-strategy remediation.
//!
//! Takes healing tasks off the healing queue, executes the active strategy,
//! and walks the escalation graph on exhaustion. Strategy progression lives
//! entirely in this component's state; re-attempts ride the healing queue's
//! redelivery, so there is exactly one live message per task and consumers
//! stay idempotent per task id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::domain::error::{HealError, StoreError};
use crate::domain::models::{
    HealerMetrics, HealingStatus, HealingStrategy, HealingTask, Job, JobPriority, JobStatus,
    JobType, Resolution, ResolutionMetrics, ScrapeTask, ScrapeType,
};
use crate::domain::ports::{keys, Clock, IdProvider, KvCache, RepoScraper, StateStore, TypedQueue};

const COMPONENT: &str = "self-healer";

/// TTL on skipped-notification records.
const SKIPPED_TTL: StdDuration = StdDuration::from_secs(7 * 24 * 3600);

/// Tasks pending longer than this raise a health warning.
const PENDING_WARNING_MINUTES: i64 = 30;

/// Escalation-rate ceiling before the health check turns critical.
const ESCALATION_RATE_CEILING: f64 = 0.30;

/// Attempts required before the escalation rate is meaningful.
const ESCALATION_RATE_MIN_ATTEMPTS: u64 = 10;

const DEFAULT_BATCH_SIZE: u64 = 10;

#[derive(Debug, Default, Serialize, Deserialize)]
struct HealerState {
    tasks: HashMap<String, HealingTask>,
    metrics: HealerMetrics,
}

/// What one attempt did, as the healing processor needs to see it.
#[derive(Debug, Clone)]
pub struct HealOutcome {
    pub task_id: String,
    pub status: HealingStatus,
    pub strategy: HealingStrategy,
    pub success: bool,
    pub message: String,
}

impl HealOutcome {
    /// The delivery is done when the attempt succeeded or the task reached a
    /// terminal status; anything else needs redelivery to keep progressing.
    pub fn should_ack(&self) -> bool {
        self.success || self.status.is_terminal()
    }
}

/// Healer health report for the ops loop.
#[derive(Debug, Clone, Serialize)]
pub struct HealerHealth {
    pub healthy: bool,
    pub critical: bool,
    pub warnings: Vec<String>,
    pub pending_over_30m: usize,
    pub escalation_rate: f64,
    pub total_tasks: usize,
}

/// Result of one strategy-body execution.
struct StrategyResult {
    success: bool,
    message: String,
    resources_used: Vec<String>,
    /// Set only by the escalate_to_agent body, which always terminates
    escalated: bool,
}

impl StrategyResult {
    fn ok(message: impl Into<String>, resources: &[&str]) -> Self {
        Self {
            success: true,
            message: message.into(),
            resources_used: resources.iter().map(|s| s.to_string()).collect(),
            escalated: false,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            resources_used: vec![],
            escalated: false,
        }
    }
}

pub struct SelfHealer {
    state: Mutex<HealerState>,
    store: Arc<dyn StateStore>,
    job_queue: TypedQueue<Job>,
    scrape_queue: TypedQueue<ScrapeTask>,
    kv: Arc<dyn KvCache>,
    scraper: Arc<dyn RepoScraper>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdProvider>,
    enabled: bool,
    default_max_retries: u32,
}

impl SelfHealer {
    /// Hydrate the healer from the durable store.
    #[allow(clippy::too_many_arguments)]
    pub async fn load(
        store: Arc<dyn StateStore>,
        job_queue: TypedQueue<Job>,
        scrape_queue: TypedQueue<ScrapeTask>,
        kv: Arc<dyn KvCache>,
        scraper: Arc<dyn RepoScraper>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdProvider>,
        enabled: bool,
        default_max_retries: u32,
    ) -> Result<Self, HealError> {
        let state = match store.load(COMPONENT).await? {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            None => HealerState::default(),
        };

        Ok(Self {
            state: Mutex::new(state),
            store,
            job_queue,
            scrape_queue,
            kv,
            scraper,
            clock,
            ids,
            enabled,
            default_max_retries,
        })
    }

    async fn persist(&self, state: &HealerState) -> Result<(), HealError> {
        let value =
            serde_json::to_value(state).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.store.save(COMPONENT, &value).await?;
        Ok(())
    }

    /// Execute one healing attempt for a delivered task.
    ///
    /// Per attempt: mark attempting and charge the budget, sleep the
    /// strategy's backoff, run the strategy body, then resolve, escalate the
    /// strategy on exhaustion, or leave the task pending for redelivery. The
    /// resolution of the attempt is always persisted on the task.
    #[instrument(skip(self, delivered), fields(task_id = %delivered.id), err)]
    pub async fn handle(&self, delivered: HealingTask) -> Result<HealOutcome, HealError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        // The stored task is authoritative; the message is only a trigger.
        let mut task = match state.tasks.get(&delivered.id) {
            Some(stored) => stored.clone(),
            None => {
                state.tasks.insert(delivered.id.clone(), delivered.clone());
                delivered
            }
        };

        if task.status.is_terminal() {
            debug!(task_id = %task.id, "duplicate delivery of terminal task");
            return Ok(HealOutcome {
                task_id: task.id.clone(),
                status: task.status,
                strategy: task.strategy,
                success: task.status == HealingStatus::Resolved,
                message: "task already terminal".into(),
            });
        }

        if !self.enabled {
            let result = self.escalate_body(&task).await;
            let elapsed_ms = elapsed_ms(&task, now);
            task.status = HealingStatus::Escalated;
            task.resolution = Some(Resolution {
                strategy: task.strategy,
                success: false,
                message: "self-healing disabled; escalated".into(),
                attempt: task.attempts,
                resolved_at: now,
                metrics: ResolutionMetrics {
                    time_to_resolve_ms: elapsed_ms,
                    resources_used: result.resources_used,
                },
            });
            task.updated_at = now;
            state.metrics.escalations += 1;
            state.metrics.failed_resolutions += 1;
            let outcome = HealOutcome {
                task_id: task.id.clone(),
                status: task.status,
                strategy: task.strategy,
                success: false,
                message: "self-healing disabled; escalated".into(),
            };
            state.tasks.insert(task.id.clone(), task);
            self.persist(&state).await?;
            return Ok(outcome);
        }

        // Step 1: mark attempting, charge the attempt, record strategy use.
        task.status = HealingStatus::Attempting;
        task.attempts += 1;
        task.updated_at = now;
        state.metrics.record_use(task.strategy);
        state.tasks.insert(task.id.clone(), task.clone());
        self.persist(&state).await?;

        // Step 2: backoff for this attempt, then the strategy body.
        let ran_strategy = task.strategy;
        let ran_attempt = task.attempts;
        let backoff = ran_strategy.backoff_for_attempt(ran_attempt - 1);
        if backoff > 0 {
            sleep(StdDuration::from_millis(backoff)).await;
        }
        let result = self.execute_strategy(&mut task).await;

        let now = self.clock.now();
        let elapsed = elapsed_ms(&task, now);

        // Steps 3 and 4: settle the task.
        let outcome = if result.escalated {
            task.status = HealingStatus::Escalated;
            state.metrics.escalations += 1;
            state.metrics.failed_resolutions += 1;
            info!(task_id = %task.id, "healing task escalated to agent");
            HealOutcome {
                task_id: task.id.clone(),
                status: HealingStatus::Escalated,
                strategy: ran_strategy,
                success: false,
                message: result.message.clone(),
            }
        } else if result.success {
            task.status = HealingStatus::Resolved;
            state.metrics.record_success(ran_strategy, elapsed);
            info!(
                task_id = %task.id,
                strategy = ran_strategy.as_str(),
                attempt = ran_attempt,
                "healing task resolved"
            );
            HealOutcome {
                task_id: task.id.clone(),
                status: HealingStatus::Resolved,
                strategy: ran_strategy,
                success: true,
                message: result.message.clone(),
            }
        } else if task.is_exhausted() {
            if task.escalate_strategy(now) {
                debug!(
                    task_id = %task.id,
                    from = ran_strategy.as_str(),
                    to = task.strategy.as_str(),
                    "strategy exhausted, escalating"
                );
                HealOutcome {
                    task_id: task.id.clone(),
                    status: HealingStatus::Pending,
                    strategy: task.strategy,
                    success: false,
                    message: result.message.clone(),
                }
            } else {
                // Exhausted the terminal node.
                task.status = HealingStatus::Escalated;
                state.metrics.escalations += 1;
                state.metrics.failed_resolutions += 1;
                HealOutcome {
                    task_id: task.id.clone(),
                    status: HealingStatus::Escalated,
                    strategy: ran_strategy,
                    success: false,
                    message: result.message.clone(),
                }
            }
        } else {
            task.status = HealingStatus::Pending;
            HealOutcome {
                task_id: task.id.clone(),
                status: HealingStatus::Pending,
                strategy: ran_strategy,
                success: false,
                message: result.message.clone(),
            }
        };

        // Step 5: persist the attempt's resolution on the task.
        task.resolution = Some(Resolution {
            strategy: ran_strategy,
            success: result.success && !result.escalated,
            message: result.message,
            attempt: ran_attempt,
            resolved_at: now,
            metrics: ResolutionMetrics {
                time_to_resolve_ms: elapsed,
                resources_used: result.resources_used,
            },
        });
        task.updated_at = now;
        state.tasks.insert(task.id.clone(), task);
        self.persist(&state).await?;

        Ok(outcome)
    }

    async fn execute_strategy(&self, task: &mut HealingTask) -> StrategyResult {
        match task.strategy {
            HealingStrategy::RetryWithBackoff => self.reenqueue_job(task).await,
            HealingStrategy::ClearCacheRetry => {
                if let Some(repo_name) = context_str(task, "repo_name") {
                    let _ = self.kv.delete(&keys::repo(&repo_name)).await;
                    let _ = self.kv.delete(&keys::cohesiveness(&repo_name)).await;
                }
                let _ = self.kv.delete(&keys::job_cache(&task.job_id)).await;
                self.reenqueue_job(task).await
            }
            HealingStrategy::SwitchEndpoint => match self.scraper.probe_backup().await {
                Ok(()) => StrategyResult::ok("backup endpoint answered", &["backup-endpoint"]),
                Err(e) => StrategyResult::failed(format!("backup endpoint probe failed: {e}")),
            },
            HealingStrategy::ReduceBatchSize => {
                let current = task
                    .issue
                    .context
                    .get("batch_size")
                    .and_then(Value::as_u64)
                    .unwrap_or(DEFAULT_BATCH_SIZE);
                let reduced = (current / 2).max(1);
                task.issue
                    .context
                    .insert("batch_size".into(), json!(reduced));
                match self.reenqueue_job(task).await {
                    r if r.success => StrategyResult::ok(
                        format!("re-enqueued with batch size {reduced} (was {current})"),
                        &["job-queue"],
                    ),
                    r => r,
                }
            }
            HealingStrategy::NotifyAndSkip => {
                let record = match serde_json::to_value(&*task) {
                    Ok(v) => v,
                    Err(e) => return StrategyResult::failed(format!("task encode failed: {e}")),
                };
                match self
                    .kv
                    .put(&keys::skipped(&task.id), &record, Some(SKIPPED_TTL))
                    .await
                {
                    Ok(()) => StrategyResult::ok("notification skipped and recorded", &["kv-cache"]),
                    Err(e) => StrategyResult::failed(format!("skip record failed: {e}")),
                }
            }
            HealingStrategy::FullReset => {
                let Some(repo_name) = context_str(task, "repo_name") else {
                    return StrategyResult::failed("full reset needs repo_name in context");
                };
                let _ = self.kv.delete(&keys::repo(&repo_name)).await;
                let _ = self.kv.delete(&keys::cohesiveness(&repo_name)).await;

                let short = repo_name
                    .rsplit('/')
                    .next()
                    .unwrap_or(repo_name.as_str())
                    .to_string();
                let scrape = ScrapeTask {
                    id: self.ids.new_id(),
                    repo: short,
                    scrape_type: ScrapeType::Full,
                    priority: JobPriority::Critical,
                    requested_at: self.clock.now(),
                };
                match self.scrape_queue.enqueue(&scrape).await {
                    Ok(()) => StrategyResult::ok(
                        format!("cache cleared and full rescrape of {repo_name} enqueued"),
                        &["kv-cache", "scrape-queue"],
                    ),
                    Err(e) => StrategyResult::failed(format!("rescrape enqueue failed: {e}")),
                }
            }
            HealingStrategy::EscalateToAgent => self.escalate_body(task).await,
        }
    }

    /// Rebuild the original job and put it back on the job queue.
    async fn reenqueue_job(&self, task: &HealingTask) -> StrategyResult {
        let job = self.rebuild_job(task);
        match self.job_queue.enqueue(&job).await {
            Ok(()) => StrategyResult::ok(
                format!("job {} re-enqueued at high priority", job.id),
                &["job-queue"],
            ),
            Err(e) => StrategyResult::failed(format!("job re-enqueue failed: {e}")),
        }
    }

    /// Persist the escalation record and file a critical notify job. Always
    /// terminates the task, even when a sink write fails.
    async fn escalate_body(&self, task: &HealingTask) -> StrategyResult {
        let mut resources = vec!["kv-cache".to_string()];

        match serde_json::to_value(task) {
            Ok(record) => {
                if let Err(e) = self.kv.put(&keys::escalated(&task.id), &record, None).await {
                    warn!(task_id = %task.id, error = %e, "escalation record write failed");
                }
            }
            Err(e) => warn!(task_id = %task.id, error = %e, "escalation record encode failed"),
        }

        let notify = self.notify_job(task);
        match self.job_queue.enqueue(&notify).await {
            Ok(()) => resources.push("job-queue".into()),
            Err(e) => warn!(task_id = %task.id, error = %e, "notify job enqueue failed"),
        }

        StrategyResult {
            success: false,
            message: "escalated to agent".into(),
            resources_used: resources,
            escalated: true,
        }
    }

    /// The re-enqueued shape of the job this task is healing: sync_content
    /// at high priority, retry count mirroring the healing attempts.
    fn rebuild_job(&self, task: &HealingTask) -> Job {
        let now = self.clock.now();
        let mut payload = match task.issue.context.get("payload") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        if let Some(batch) = task.issue.context.get("batch_size") {
            payload.insert("batch_size".into(), batch.clone());
        }
        payload.insert("healing_task_id".into(), json!(task.id));

        let retry_count = task.attempts;
        Job {
            id: task.job_id.clone(),
            job_type: JobType::SyncContent,
            status: JobStatus::Pending,
            priority: JobPriority::High,
            payload,
            retry_count,
            max_retries: retry_count.max(self.default_max_retries),
            healing_attempts: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            error: None,
            result: None,
        }
    }

    fn notify_job(&self, task: &HealingTask) -> Job {
        let now = self.clock.now();
        let mut payload = Map::new();
        payload.insert("healing_task_id".into(), json!(task.id));
        payload.insert("job_id".into(), json!(task.job_id));
        payload.insert(
            "issue".into(),
            serde_json::to_value(&task.issue).unwrap_or(Value::Null),
        );

        Job {
            id: self.ids.new_id(),
            job_type: JobType::Notify,
            status: JobStatus::Pending,
            priority: JobPriority::Critical,
            payload,
            retry_count: 0,
            max_retries: self.default_max_retries,
            healing_attempts: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            error: None,
            result: None,
        }
    }

    /// Health check: warnings for tasks pending beyond the threshold, a
    /// critical flag once the escalation rate clears its ceiling with a
    /// meaningful sample.
    pub async fn health_check(&self) -> HealerHealth {
        let now = self.clock.now();
        let state = self.state.lock().await;

        let mut warnings = Vec::new();
        let mut pending_over_30m = 0usize;
        let threshold = Duration::minutes(PENDING_WARNING_MINUTES);
        for task in state.tasks.values() {
            if task.status == HealingStatus::Pending && now - task.updated_at > threshold {
                pending_over_30m += 1;
                warnings.push(format!(
                    "healing task {} pending for {} minutes on {}",
                    task.id,
                    (now - task.updated_at).num_minutes(),
                    task.strategy.as_str()
                ));
            }
        }

        let escalation_rate = state.metrics.escalation_rate();
        let critical = state.metrics.total_attempts > ESCALATION_RATE_MIN_ATTEMPTS
            && escalation_rate > ESCALATION_RATE_CEILING;
        if critical {
            warnings.push(format!(
                "escalation rate {:.0}% exceeds {:.0}% ceiling",
                escalation_rate * 100.0,
                ESCALATION_RATE_CEILING * 100.0
            ));
        }

        HealerHealth {
            healthy: warnings.is_empty(),
            critical,
            warnings,
            pending_over_30m,
            escalation_rate,
            total_tasks: state.tasks.len(),
        }
    }

    pub async fn metrics(&self) -> HealerMetrics {
        self.state.lock().await.metrics.clone()
    }

    pub async fn get_task(&self, id: &str) -> Option<HealingTask> {
        self.state.lock().await.tasks.get(id).cloned()
    }
}

fn elapsed_ms(task: &HealingTask, now: chrono::DateTime<chrono::Utc>) -> u64 {
    (now - task.created_at).num_milliseconds().max(0) as u64
}

fn context_str(task: &HealingTask, key: &str) -> Option<String> {
    task.issue
        .context
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::domain::models::{HealSeverity, HealingIssue};
    use crate::domain::ports::queues;
    use crate::services::testing::{
        ManualClock, MemoryKvCache, MemoryQueueBackend, MemoryStateStore, SeqIds, StubScraper,
    };

    struct Harness {
        healer: SelfHealer,
        backend: Arc<MemoryQueueBackend>,
        kv: Arc<MemoryKvCache>,
        clock: Arc<ManualClock>,
        scraper: Arc<StubScraper>,
    }

    async fn harness(enabled: bool) -> Harness {
        let store = Arc::new(MemoryStateStore::default());
        let backend = Arc::new(MemoryQueueBackend::default());
        let kv = Arc::new(MemoryKvCache::default());
        let clock = Arc::new(ManualClock::default());
        let scraper = Arc::new(StubScraper::default());
        let healer = SelfHealer::load(
            store,
            TypedQueue::new(backend.clone(), queues::JOBS),
            TypedQueue::new(backend.clone(), queues::SCRAPES),
            kv.clone(),
            scraper.clone(),
            clock.clone(),
            Arc::new(SeqIds::default()),
            enabled,
            3,
        )
        .await
        .unwrap();
        Harness {
            healer,
            backend,
            kv,
            clock,
            scraper,
        }
    }

    fn task(id: &str, strategy: HealingStrategy, context: Map<String, Value>) -> HealingTask {
        HealingTask::new(
            id,
            format!("job-for-{id}"),
            HealingIssue {
                kind: "job_failure".into(),
                severity: HealSeverity::High,
                description: "handler blew up".into(),
                context,
                original_error: Some("boom".into()),
            },
            strategy,
            None,
            chrono::Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn retry_with_backoff_reenqueues_the_job() {
        let h = harness(true).await;

        let outcome = h
            .healer
            .handle(task("t1", HealingStrategy::RetryWithBackoff, Map::new()))
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.status, HealingStatus::Resolved);
        assert!(outcome.should_ack());

        let bodies = h.backend.bodies(queues::JOBS);
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["id"], "job-for-t1");
        assert_eq!(bodies[0]["type"], "sync_content");
        assert_eq!(bodies[0]["priority"], "high");
        assert_eq!(bodies[0]["retry_count"], 1);

        let metrics = h.healer.metrics().await;
        assert_eq!(metrics.total_attempts, 1);
        assert_eq!(metrics.successful_resolutions, 1);
        assert_eq!(metrics.escalations, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn notify_and_skip_records_and_resolves() {
        let h = harness(true).await;

        let outcome = h
            .healer
            .handle(task("t2", HealingStrategy::NotifyAndSkip, Map::new()))
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.status, HealingStatus::Resolved);
        assert!(h.kv.get_sync("skipped:t2").is_some());

        let metrics = h.healer.metrics().await;
        assert_eq!(metrics.successful_resolutions, 1);
        assert_eq!(metrics.escalations, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn escalate_to_agent_is_terminal_and_never_success() {
        let h = harness(true).await;

        let outcome = h
            .healer
            .handle(task("t3", HealingStrategy::EscalateToAgent, Map::new()))
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.status, HealingStatus::Escalated);
        assert!(outcome.should_ack());
        assert!(h.kv.get_sync("escalated:t3").is_some());

        // One critical notify job filed.
        let bodies = h.backend.bodies(queues::JOBS);
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["type"], "notify");
        assert_eq!(bodies[0]["priority"], "critical");

        // Redelivery after terminal stays terminal and does not re-enqueue.
        let again = h
            .healer
            .handle(task("t3", HealingStrategy::EscalateToAgent, Map::new()))
            .await
            .unwrap();
        assert_eq!(again.status, HealingStatus::Escalated);
        assert_eq!(h.backend.bodies(queues::JOBS).len(), 1);

        let metrics = h.healer.metrics().await;
        assert_eq!(metrics.escalations, 1);
        assert_eq!(metrics.successful_resolutions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn full_escalation_walks_the_graph_and_skips() {
        let h = harness(true).await;
        // Every re-enqueue fails, the backup endpoint is down; only the KV
        // write behind notify_and_skip works.
        h.backend.set_fail_enqueue(true);
        h.scraper.set_backup_healthy(false);

        let seed = task("t4", HealingStrategy::RetryWithBackoff, Map::new());

        // retry_with_backoff x5 -> clear_cache_retry x2 -> switch_endpoint x3
        // -> reduce_batch_size x3 = 13 failed attempts, then notify_and_skip
        // succeeds.
        let mut statuses = Vec::new();
        for _ in 0..14 {
            let outcome = h.healer.handle(seed.clone()).await.unwrap();
            statuses.push((outcome.strategy, outcome.status));
            if outcome.status.is_terminal() {
                break;
            }
        }

        let stored = h.healer.get_task("t4").await.unwrap();
        assert_eq!(stored.status, HealingStatus::Resolved);
        assert_eq!(stored.strategy, HealingStrategy::NotifyAndSkip);
        assert!(h.kv.get_sync("skipped:t4").is_some());

        // Strategy after each exhaustion boundary.
        let after = |n: usize| statuses[n].0;
        assert_eq!(after(4), HealingStrategy::ClearCacheRetry); // 5th attempt exhausts retry
        assert_eq!(after(6), HealingStrategy::SwitchEndpoint); // 2 more exhaust clear-cache
        assert_eq!(after(9), HealingStrategy::ReduceBatchSize); // 3 more exhaust switch
        assert_eq!(after(12), HealingStrategy::NotifyAndSkip); // 3 more exhaust reduce

        let metrics = h.healer.metrics().await;
        assert_eq!(metrics.total_attempts, 14);
        assert_eq!(metrics.successful_resolutions, 1);
        // The walk resolved at notify_and_skip: no escalation happened.
        assert_eq!(metrics.escalations, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reduce_batch_size_halves_with_floor_one() {
        let h = harness(true).await;

        let mut context = Map::new();
        context.insert("batch_size".into(), json!(3));
        let outcome = h
            .healer
            .handle(task("t5", HealingStrategy::ReduceBatchSize, context))
            .await
            .unwrap();
        assert!(outcome.success);

        let bodies = h.backend.bodies(queues::JOBS);
        assert_eq!(bodies[0]["payload"]["batch_size"], 1);

        let stored = h.healer.get_task("t5").await.unwrap();
        assert_eq!(stored.issue.context["batch_size"], json!(1));
    }

    #[tokio::test(start_paused = true)]
    async fn full_reset_needs_repo_context() {
        let h = harness(true).await;

        // Without repo_name the single attempt fails and the task moves on
        // to escalate_to_agent.
        let outcome = h
            .healer
            .handle(task("t6", HealingStrategy::FullReset, Map::new()))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.strategy, HealingStrategy::EscalateToAgent);

        // With repo_name it clears cache and enqueues a critical rescrape.
        let mut context = Map::new();
        context.insert("repo_name".into(), json!("acme/foo"));
        let outcome = h
            .healer
            .handle(task("t7", HealingStrategy::FullReset, context))
            .await
            .unwrap();
        assert!(outcome.success);

        let scrapes = h.backend.bodies(queues::SCRAPES);
        assert_eq!(scrapes.len(), 1);
        assert_eq!(scrapes[0]["repo"], "foo");
        assert_eq!(scrapes[0]["scrape_type"], "full");
        assert_eq!(scrapes[0]["priority"], "critical");
    }

    #[tokio::test(start_paused = true)]
    async fn switch_endpoint_follows_the_probe() {
        let h = harness(true).await;
        h.scraper.set_backup_healthy(true);

        let outcome = h
            .healer
            .handle(task("t8", HealingStrategy::SwitchEndpoint, Map::new()))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.status, HealingStatus::Resolved);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_healer_escalates_immediately() {
        let h = harness(false).await;

        let outcome = h
            .healer
            .handle(task("t9", HealingStrategy::RetryWithBackoff, Map::new()))
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.status, HealingStatus::Escalated);
        assert!(h.kv.get_sync("escalated:t9").is_some());

        let metrics = h.healer.metrics().await;
        assert_eq!(metrics.escalations, 1);
        assert_eq!(metrics.total_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rolling_average_tracks_resolution_times() {
        let h = harness(true).await;

        h.clock.advance_secs(1); // created at t0, resolved 1s later
        let seed = task("t10", HealingStrategy::NotifyAndSkip, Map::new());
        h.healer.handle(seed).await.unwrap();

        let metrics = h.healer.metrics().await;
        assert_eq!(metrics.successful_resolutions, 1);
        assert_eq!(metrics.average_time_to_resolve_ms, 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn health_check_flags_stale_pending_and_escalation_rate() {
        let h = harness(true).await;
        h.backend.set_fail_enqueue(true);

        // One failed attempt leaves the task pending.
        let outcome = h
            .healer
            .handle(task("t11", HealingStrategy::RetryWithBackoff, Map::new()))
            .await
            .unwrap();
        assert_eq!(outcome.status, HealingStatus::Pending);

        h.clock.advance_secs(31 * 60);
        let health = h.healer.health_check().await;
        assert!(!health.healthy);
        assert_eq!(health.pending_over_30m, 1);
        assert!(!health.critical);

        // Push the escalation rate over the ceiling with >10 attempts.
        for i in 0..11 {
            h.healer
                .handle(task(
                    &format!("esc-{i}"),
                    HealingStrategy::EscalateToAgent,
                    Map::new(),
                ))
                .await
                .unwrap();
        }
        let health = h.healer.health_check().await;
        assert!(health.critical);
        assert!(health.escalation_rate > 0.3);
    }
}
