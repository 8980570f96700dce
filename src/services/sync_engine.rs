//! Repo sync engine: the authoritative registry of tracked repositories.
//!
//! Orchestrates full and incremental syncs by fanning scrape tasks onto the
//! scrape queue, runs the cohesiveness pass over stored repos, and files
//! healing tasks for critical auto-fixable findings. The tracked set starts
//! from the configured known list and grows through `update_repo`; it never
//! shrinks.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::domain::error::{StoreError, SyncError};
use crate::domain::models::{
    CohesivenessScore, HealSeverity, HealingIssue, HealingStrategy, HealingTask, IssueSeverity,
    JobPriority, RepoData, ScrapeTask, ScrapeType, SyncFailure,
};
use crate::domain::ports::{keys, Clock, IdProvider, KvCache, StateStore, TypedQueue};
use crate::services::cohesiveness;

const COMPONENT: &str = "repo-sync-engine";

/// Recent sync errors kept for the status operation.
const ERROR_RING_CAPACITY: usize = 10;

/// TTL on cohesiveness score snapshots in the shared cache.
const SCORE_SNAPSHOT_TTL: StdDuration = StdDuration::from_secs(3600);

#[derive(Debug, Default, Serialize, Deserialize)]
struct EngineState {
    repos: HashMap<String, RepoData>,
    last_full_sync: Option<DateTime<Utc>>,
    last_incremental_sync: Option<DateTime<Utc>>,
    in_progress: bool,
    recent_errors: VecDeque<SyncFailure>,
}

/// Result of `list_repos`.
#[derive(Debug, Clone, Serialize)]
pub struct RepoListing {
    pub repos: Vec<RepoData>,
    pub known_repos: Vec<String>,
    pub last_full_sync: Option<DateTime<Utc>>,
}

/// Result of `status`.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub in_progress: bool,
    pub last_full_sync: Option<DateTime<Utc>>,
    pub last_incremental_sync: Option<DateTime<Utc>>,
    pub repo_count: usize,
    pub recent_errors: Vec<SyncFailure>,
}

/// Receipt for a fire-and-forget sync trigger.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SyncReceipt {
    pub enqueued: usize,
}

/// Result of a cohesiveness pass.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CohesivenessCheckOutcome {
    pub checked: usize,
    pub healing_enqueued: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SeverityCounts {
    pub info: usize,
    pub warning: usize,
    pub critical: usize,
}

/// Aggregated cohesiveness report.
#[derive(Debug, Clone, Serialize)]
pub struct CohesivenessReport {
    pub repos: Vec<RepoScoreEntry>,
    pub average_overall: u8,
    pub by_severity: SeverityCounts,
    pub auto_fixable: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepoScoreEntry {
    pub full_name: String,
    pub score: CohesivenessScore,
}

pub struct SyncEngine {
    state: Mutex<EngineState>,
    store: Arc<dyn StateStore>,
    scrape_queue: TypedQueue<ScrapeTask>,
    healing_queue: TypedQueue<HealingTask>,
    kv: Arc<dyn KvCache>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdProvider>,
    known_repos: Vec<String>,
}

impl SyncEngine {
    /// Hydrate the engine from the durable store.
    #[allow(clippy::too_many_arguments)]
    pub async fn load(
        store: Arc<dyn StateStore>,
        scrape_queue: TypedQueue<ScrapeTask>,
        healing_queue: TypedQueue<HealingTask>,
        kv: Arc<dyn KvCache>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdProvider>,
        known_repos: Vec<String>,
    ) -> Result<Self, SyncError> {
        let state = match store.load(COMPONENT).await? {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            None => EngineState::default(),
        };

        Ok(Self {
            state: Mutex::new(state),
            store,
            scrape_queue,
            healing_queue,
            kv,
            clock,
            ids,
            known_repos,
        })
    }

    async fn persist(&self, state: &EngineState) -> Result<(), SyncError> {
        let value =
            serde_json::to_value(state).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.store.save(COMPONENT, &value).await?;
        Ok(())
    }

    pub async fn list_repos(&self) -> RepoListing {
        let state = self.state.lock().await;
        let mut repos: Vec<RepoData> = state.repos.values().cloned().collect();
        repos.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        RepoListing {
            repos,
            known_repos: self.known_repos.clone(),
            last_full_sync: state.last_full_sync,
        }
    }

    pub async fn status(&self) -> SyncStatus {
        let state = self.state.lock().await;
        SyncStatus {
            in_progress: state.in_progress,
            last_full_sync: state.last_full_sync,
            last_incremental_sync: state.last_incremental_sync,
            repo_count: state.repos.len(),
            recent_errors: state.recent_errors.iter().cloned().collect(),
        }
    }

    /// Fan out one full-scrape task per known short-name.
    ///
    /// Fire-and-forget: returns as soon as the tasks are enqueued. A second
    /// trigger that overlaps the enqueue loop observes `in_progress` and
    /// fails with a conflict. The lock is released across the loop on
    /// purpose; the flag, not the mutex, is the gate.
    #[instrument(skip(self), err)]
    pub async fn trigger_full_sync(&self) -> Result<SyncReceipt, SyncError> {
        {
            let mut state = self.state.lock().await;
            if state.in_progress {
                return Err(SyncError::SyncInProgress);
            }
            state.in_progress = true;
            if let Err(e) = self.persist(&state).await {
                state.in_progress = false;
                return Err(e);
            }
        }

        let now = self.clock.now();
        let mut enqueued = 0usize;
        for name in &self.known_repos {
            let task = ScrapeTask {
                id: self.ids.new_id(),
                repo: name.clone(),
                scrape_type: ScrapeType::Full,
                priority: JobPriority::Normal,
                requested_at: now,
            };
            if let Err(e) = self.scrape_queue.enqueue(&task).await {
                let mut state = self.state.lock().await;
                state.in_progress = false;
                push_error(&mut state, now, format!("full sync enqueue failed: {e}"));
                self.persist(&state).await?;
                return Err(e.into());
            }
            enqueued += 1;
        }

        let mut state = self.state.lock().await;
        state.last_full_sync = Some(self.clock.now());
        state.in_progress = false;
        self.persist(&state).await?;

        info!(enqueued, "full sync fan-out finished");
        Ok(SyncReceipt { enqueued })
    }

    /// Enqueue one incremental scrape per tracked repo (known list plus
    /// everything already stored). The 30-minute cron body.
    #[instrument(skip(self), err)]
    pub async fn trigger_incremental_sync(&self) -> Result<SyncReceipt, SyncError> {
        let now = self.clock.now();
        let tracked = self.tracked_short_names().await;

        let mut enqueued = 0usize;
        for name in &tracked {
            let task = ScrapeTask {
                id: self.ids.new_id(),
                repo: name.clone(),
                scrape_type: ScrapeType::Incremental,
                priority: JobPriority::Normal,
                requested_at: now,
            };
            self.scrape_queue.enqueue(&task).await?;
            enqueued += 1;
        }

        let mut state = self.state.lock().await;
        state.last_incremental_sync = Some(now);
        self.persist(&state).await?;

        Ok(SyncReceipt { enqueued })
    }

    /// Enqueue a single high-priority full scrape for one repo.
    #[instrument(skip(self), err)]
    pub async fn sync_repo(&self, repo: &str) -> Result<ScrapeTask, SyncError> {
        let task = ScrapeTask {
            id: self.ids.new_id(),
            repo: repo.to_string(),
            scrape_type: ScrapeType::Full,
            priority: JobPriority::High,
            requested_at: self.clock.now(),
        };
        self.scrape_queue.enqueue(&task).await?;
        info!(repo, task_id = %task.id, "single-repo sync enqueued");
        Ok(task)
    }

    /// Rescore every stored repo, persist scores on the repos and as cache
    /// snapshots, and file healing tasks for critical auto-fixable findings.
    #[instrument(skip(self), err)]
    pub async fn trigger_cohesiveness_check(
        &self,
    ) -> Result<CohesivenessCheckOutcome, SyncError> {
        let now = self.clock.now();
        let mut snapshots: Vec<(String, CohesivenessScore)> = Vec::new();

        {
            let mut state = self.state.lock().await;
            for repo in state.repos.values_mut() {
                let score = cohesiveness::score_structure(&repo.structure, now);
                repo.cohesiveness = Some(score.clone());
                snapshots.push((repo.full_name.clone(), score));
            }
            self.persist(&state).await?;
        }

        let mut healing_enqueued = 0usize;
        for (full_name, score) in &snapshots {
            let value = serde_json::to_value(score)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            self.kv
                .put(&keys::cohesiveness(full_name), &value, Some(SCORE_SNAPSHOT_TTL))
                .await?;

            let offending = score.critical_auto_fixable();
            if offending.is_empty() {
                continue;
            }

            let mut context = Map::new();
            context.insert("repo_name".into(), json!(full_name));
            context.insert(
                "issues".into(),
                serde_json::to_value(&offending)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?,
            );

            let task = HealingTask::new(
                self.ids.new_id(),
                format!("cron-cohesiveness-{full_name}"),
                HealingIssue {
                    kind: "cohesiveness_critical".into(),
                    severity: HealSeverity::High,
                    description: format!(
                        "{} critical auto-fixable cohesiveness issues in {full_name}",
                        offending.len()
                    ),
                    context,
                    original_error: None,
                },
                HealingStrategy::EscalateToAgent,
                None,
                now,
            );
            self.healing_queue.enqueue(&task).await?;
            healing_enqueued += 1;
            warn!(repo = %full_name, "critical auto-fixable issues handed to healing");
        }

        info!(
            checked = snapshots.len(),
            healing_enqueued, "cohesiveness pass finished"
        );
        Ok(CohesivenessCheckOutcome {
            checked: snapshots.len(),
            healing_enqueued,
        })
    }

    /// Aggregate the stored scores.
    pub async fn cohesiveness_report(&self) -> CohesivenessReport {
        let state = self.state.lock().await;

        let mut entries: Vec<RepoScoreEntry> = state
            .repos
            .values()
            .filter_map(|repo| {
                repo.cohesiveness.as_ref().map(|score| RepoScoreEntry {
                    full_name: repo.full_name.clone(),
                    score: score.clone(),
                })
            })
            .collect();
        entries.sort_by(|a, b| a.full_name.cmp(&b.full_name));

        let mut by_severity = SeverityCounts::default();
        let mut auto_fixable = 0usize;
        let mut overall_sum = 0u32;
        for entry in &entries {
            overall_sum += entry.score.overall as u32;
            for issue in &entry.score.issues {
                match issue.severity {
                    IssueSeverity::Info => by_severity.info += 1,
                    IssueSeverity::Warning => by_severity.warning += 1,
                    IssueSeverity::Critical => by_severity.critical += 1,
                }
                if issue.auto_fixable {
                    auto_fixable += 1;
                }
            }
        }

        let average_overall = if entries.is_empty() {
            0
        } else {
            ((overall_sum + entries.len() as u32 / 2) / entries.len() as u32) as u8
        };

        CohesivenessReport {
            repos: entries,
            average_overall,
            by_severity,
            auto_fixable,
        }
    }

    /// Upsert a scraped repo record. The scraper's ingestion path.
    ///
    /// The engine's cache write is the canonical one and carries no TTL. An
    /// incoming record without a score keeps the score already stored.
    #[instrument(skip(self, data), fields(repo = %data.full_name), err)]
    pub async fn update_repo(&self, mut data: RepoData) -> Result<RepoData, SyncError> {
        let now = self.clock.now();
        data.last_scraped_at = now;

        let mut state = self.state.lock().await;
        if data.cohesiveness.is_none() {
            if let Some(existing) = state.repos.get(&data.full_name) {
                data.cohesiveness = existing.cohesiveness.clone();
            }
        }
        state.repos.insert(data.full_name.clone(), data.clone());
        self.persist(&state).await?;
        drop(state);

        let value =
            serde_json::to_value(&data).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.kv.put(&keys::repo(&data.full_name), &value, None).await?;

        info!(repo = %data.full_name, "repo record updated");
        Ok(data)
    }

    /// Record an upstream failure in the status ring.
    pub async fn record_sync_error(&self, message: impl Into<String>) -> Result<(), SyncError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        push_error(&mut state, now, message.into());
        self.persist(&state).await?;
        Ok(())
    }

    /// Find a stored repo by short name or full name.
    pub async fn find_repo(&self, name: &str) -> Option<RepoData> {
        let state = self.state.lock().await;
        if let Some(repo) = state.repos.get(name) {
            return Some(repo.clone());
        }
        state
            .repos
            .values()
            .find(|r| r.short_name() == name)
            .cloned()
    }

    /// Known list plus the short names of everything stored, known first.
    async fn tracked_short_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut tracked = self.known_repos.clone();
        for repo in state.repos.values() {
            let short = repo.short_name().to_string();
            if !tracked.contains(&short) {
                tracked.push(short);
            }
        }
        tracked
    }
}

fn push_error(state: &mut EngineState, at: DateTime<Utc>, message: String) {
    state.recent_errors.push_back(SyncFailure { at, message });
    while state.recent_errors.len() > ERROR_RING_CAPACITY {
        state.recent_errors.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::RepoStructure;
    use crate::domain::ports::queues;
    use crate::services::testing::{ManualClock, MemoryKvCache, MemoryQueueBackend, MemoryStateStore, SeqIds};

    struct Harness {
        engine: SyncEngine,
        backend: Arc<MemoryQueueBackend>,
        kv: Arc<MemoryKvCache>,
        clock: Arc<ManualClock>,
    }

    async fn harness(known: &[&str]) -> Harness {
        let store = Arc::new(MemoryStateStore::default());
        let backend = Arc::new(MemoryQueueBackend::default());
        let kv = Arc::new(MemoryKvCache::default());
        let clock = Arc::new(ManualClock::default());
        let engine = SyncEngine::load(
            store,
            TypedQueue::new(backend.clone(), queues::SCRAPES),
            TypedQueue::new(backend.clone(), queues::HEALING),
            kv.clone(),
            clock.clone(),
            Arc::new(SeqIds::default()),
            known.iter().map(|s| s.to_string()).collect(),
        )
        .await
        .unwrap();
        Harness {
            engine,
            backend,
            kv,
            clock,
        }
    }

    fn repo(full_name: &str) -> RepoData {
        RepoData {
            full_name: full_name.to_string(),
            description: Some("test repo".into()),
            default_branch: "main".into(),
            pushed_at: None,
            structure: RepoStructure {
                files: vec!["README.md".into()],
                directories: vec!["src".into()],
                config_files: vec!["Cargo.toml".into()],
                has_package_manifest: true,
                has_type_config: true,
                has_deploy_config: true,
                primary_language: Some("Rust".into()),
            },
            cohesiveness: None,
            etag: Some("\"abc\"".into()),
            last_scraped_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn update_repo_upserts_and_mirrors_to_kv() {
        let h = harness(&[]).await;

        let stored = h.engine.update_repo(repo("acme/foo")).await.unwrap();
        let listing = h.engine.list_repos().await;
        assert_eq!(listing.repos.len(), 1);
        assert_eq!(listing.repos[0].full_name, "acme/foo");
        assert!(h.kv.get_sync("repo:acme/foo").is_some());

        // Second identical update only moves last_scraped_at.
        h.clock.advance_secs(60);
        let again = h.engine.update_repo(repo("acme/foo")).await.unwrap();
        assert!(again.last_scraped_at > stored.last_scraped_at);
        assert_eq!(h.engine.list_repos().await.repos.len(), 1);
    }

    #[tokio::test]
    async fn full_sync_enqueues_one_task_per_known_repo() {
        let h = harness(&["alpha", "beta", "gamma"]).await;

        let receipt = h.engine.trigger_full_sync().await.unwrap();
        assert_eq!(receipt.enqueued, 3);

        let bodies = h.backend.bodies(queues::SCRAPES);
        assert_eq!(bodies.len(), 3);
        assert_eq!(bodies[0]["repo"], "alpha");
        assert_eq!(bodies[0]["scrape_type"], "full");
        assert_eq!(bodies[0]["priority"], "normal");

        let status = h.engine.status().await;
        assert!(!status.in_progress);
        assert!(status.last_full_sync.is_some());
    }

    #[tokio::test]
    async fn full_sync_with_no_known_repos_still_records_timestamp() {
        let h = harness(&[]).await;
        let receipt = h.engine.trigger_full_sync().await.unwrap();
        assert_eq!(receipt.enqueued, 0);
        assert_eq!(h.backend.depth_sync(queues::SCRAPES), 0);
        assert!(h.engine.status().await.last_full_sync.is_some());
    }

    #[tokio::test]
    async fn sync_repo_enqueues_high_priority_full_scrape() {
        let h = harness(&[]).await;
        let task = h.engine.sync_repo("roadview").await.unwrap();
        assert_eq!(task.scrape_type, ScrapeType::Full);
        assert_eq!(task.priority, JobPriority::High);
        assert_eq!(h.backend.depth_sync(queues::SCRAPES), 1);
    }

    #[tokio::test]
    async fn incremental_sync_covers_known_and_stored_repos() {
        let h = harness(&["alpha"]).await;
        h.engine.update_repo(repo("acme/beta")).await.unwrap();

        let receipt = h.engine.trigger_incremental_sync().await.unwrap();
        assert_eq!(receipt.enqueued, 2);
        let bodies = h.backend.bodies(queues::SCRAPES);
        assert!(bodies.iter().all(|b| b["scrape_type"] == "incremental"));
        assert!(h.engine.status().await.last_incremental_sync.is_some());
    }

    #[tokio::test]
    async fn cohesiveness_check_scores_and_snapshots_every_repo() {
        let h = harness(&[]).await;
        h.engine.update_repo(repo("acme/foo")).await.unwrap();

        let outcome = h.engine.trigger_cohesiveness_check().await.unwrap();
        assert_eq!(outcome.checked, 1);
        // Clean repo: nothing critical, nothing handed to healing.
        assert_eq!(outcome.healing_enqueued, 0);
        assert_eq!(h.backend.depth_sync(queues::HEALING), 0);

        assert!(h.kv.get_sync("cohesiveness:acme/foo").is_some());
        let listing = h.engine.list_repos().await;
        let score = listing.repos[0].cohesiveness.as_ref().unwrap();
        assert_eq!(score.overall, 100);
    }

    #[tokio::test]
    async fn report_aggregates_scores_and_issue_counts() {
        let h = harness(&[]).await;
        h.engine.update_repo(repo("acme/clean")).await.unwrap();

        let mut bare = repo("acme/bare");
        bare.structure = RepoStructure {
            files: (0..10).map(|i| format!("f{i}.js")).collect(),
            directories: vec![],
            config_files: vec![],
            has_package_manifest: false,
            has_type_config: false,
            has_deploy_config: false,
            primary_language: None,
        };
        h.engine.update_repo(bare).await.unwrap();
        h.engine.trigger_cohesiveness_check().await.unwrap();

        let report = h.engine.cohesiveness_report().await;
        assert_eq!(report.repos.len(), 2);
        // (100 + 74) / 2 rounded
        assert_eq!(report.average_overall, 87);
        assert_eq!(report.by_severity.critical, 0);
        assert_eq!(report.by_severity.warning, 2);
        assert_eq!(report.by_severity.info, 3);
        assert_eq!(report.auto_fixable, 4);
    }

    #[tokio::test]
    async fn sync_errors_keep_only_the_last_ten() {
        let h = harness(&[]).await;
        for i in 0..13 {
            h.engine
                .record_sync_error(format!("failure {i}"))
                .await
                .unwrap();
        }
        let status = h.engine.status().await;
        assert_eq!(status.recent_errors.len(), 10);
        assert_eq!(status.recent_errors[0].message, "failure 3");
        assert_eq!(status.recent_errors[9].message, "failure 12");
    }

    #[tokio::test]
    async fn find_repo_matches_short_and_full_names() {
        let h = harness(&[]).await;
        h.engine.update_repo(repo("acme/foo")).await.unwrap();

        assert!(h.engine.find_repo("acme/foo").await.is_some());
        assert!(h.engine.find_repo("foo").await.is_some());
        assert!(h.engine.find_repo("bar").await.is_none());
    }
}
