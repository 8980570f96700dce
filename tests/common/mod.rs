//! Shared harness for the integration tests: real SQLite adapters over an
//! in-memory database, a pinned clock, and a scripted scraper.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use roadwarden::adapters::sqlite::{
    DatabaseConnection, SqliteKvCache, SqliteQueue, SqliteStateStore,
};
use roadwarden::domain::error::ScrapeError;
use roadwarden::domain::models::{
    HealingTask, Job, RepoData, RepoStructure, ScrapeTask, ScrapeType,
};
use roadwarden::domain::ports::{
    queues, Clock, IdProvider, KvCache, QueueBackend, RepoScraper, StateStore, TypedQueue,
};
use roadwarden::services::{
    HealthService, JobCoordinator, SelfHealer, SyncEngine,
};

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()),
        }
    }
}

impl ManualClock {
    pub fn advance_secs(&self, secs: i64) {
        let mut now = self.now.lock().unwrap();
        *now += Duration::seconds(secs);
    }

    /// Current pinned instant, without needing the `Clock` trait in scope.
    pub fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[derive(Default)]
pub struct SeqIds {
    counter: AtomicU64,
}

impl IdProvider for SeqIds {
    fn new_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("id-{n}")
    }
}

type ScrapeResult = Result<Option<RepoData>, ScrapeError>;

/// Scraper replaying scripted results; defaults to ETag-match when dry.
#[derive(Default)]
pub struct StubScraper {
    script: Mutex<VecDeque<ScrapeResult>>,
    backup_healthy: AtomicBool,
}

impl StubScraper {
    pub fn push(&self, result: ScrapeResult) {
        self.script.lock().unwrap().push_back(result);
    }

    #[allow(dead_code)]
    pub fn set_backup_healthy(&self, healthy: bool) {
        self.backup_healthy.store(healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl RepoScraper for StubScraper {
    async fn scrape(
        &self,
        _repo: &str,
        _scrape_type: ScrapeType,
        _etag: Option<&str>,
    ) -> ScrapeResult {
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(None))
    }

    async fn probe_backup(&self) -> Result<(), ScrapeError> {
        if self.backup_healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ScrapeError::Network("backup unreachable".into()))
        }
    }
}

/// Everything wired over one in-memory SQLite database.
pub struct World {
    pub coordinator: Arc<JobCoordinator>,
    pub engine: Arc<SyncEngine>,
    pub healer: Arc<SelfHealer>,
    pub health: Arc<HealthService>,
    pub job_queue: TypedQueue<Job>,
    pub scrape_queue: TypedQueue<ScrapeTask>,
    pub healing_queue: TypedQueue<HealingTask>,
    pub kv: Arc<dyn KvCache>,
    pub clock: Arc<ManualClock>,
    pub scraper: Arc<StubScraper>,
    #[allow(dead_code)]
    pub store: Arc<dyn StateStore>,
    db: DatabaseConnection,
}

impl World {
    pub async fn new(known_repos: &[&str], self_heal_enabled: bool) -> Self {
        let db = DatabaseConnection::new("sqlite::memory:", 1)
            .await
            .expect("open in-memory db");
        db.migrate().await.expect("migrate");

        let store: Arc<dyn StateStore> = Arc::new(SqliteStateStore::new(db.pool().clone()));
        let kv: Arc<dyn KvCache> = Arc::new(SqliteKvCache::new(db.pool().clone()));
        let backend: Arc<dyn QueueBackend> = Arc::new(SqliteQueue::new(db.pool().clone(), 120));

        let job_queue: TypedQueue<Job> = TypedQueue::new(backend.clone(), queues::JOBS);
        let scrape_queue: TypedQueue<ScrapeTask> =
            TypedQueue::new(backend.clone(), queues::SCRAPES);
        let healing_queue: TypedQueue<HealingTask> =
            TypedQueue::new(backend.clone(), queues::HEALING);

        let clock = Arc::new(ManualClock::default());
        let ids = Arc::new(SeqIds::default());
        let scraper = Arc::new(StubScraper::default());

        let coordinator = Arc::new(
            JobCoordinator::load(
                store.clone(),
                job_queue.clone(),
                clock.clone(),
                ids.clone(),
                3,
            )
            .await
            .expect("hydrate coordinator"),
        );
        let engine = Arc::new(
            SyncEngine::load(
                store.clone(),
                scrape_queue.clone(),
                healing_queue.clone(),
                kv.clone(),
                clock.clone(),
                ids.clone(),
                known_repos.iter().map(|s| s.to_string()).collect(),
            )
            .await
            .expect("hydrate engine"),
        );
        let healer = Arc::new(
            SelfHealer::load(
                store.clone(),
                job_queue.clone(),
                scrape_queue.clone(),
                kv.clone(),
                scraper.clone(),
                clock.clone(),
                ids.clone(),
                self_heal_enabled,
                3,
            )
            .await
            .expect("hydrate healer"),
        );
        let health = Arc::new(HealthService::new(
            coordinator.clone(),
            healer.clone(),
            healing_queue.clone(),
            clock.clone(),
            ids,
        ));

        Self {
            coordinator,
            engine,
            healer,
            health,
            job_queue,
            scrape_queue,
            healing_queue,
            kv,
            clock,
            scraper,
            store,
            db,
        }
    }

    #[allow(dead_code)]
    pub async fn close(self) {
        self.db.close().await;
    }
}

/// A scraped repo with every convention in place.
#[allow(dead_code)]
pub fn well_formed_repo(full_name: &str) -> RepoData {
    RepoData {
        full_name: full_name.to_string(),
        description: Some("a tidy repo".into()),
        default_branch: "main".into(),
        pushed_at: None,
        structure: RepoStructure {
            files: vec![
                "README.md".into(),
                "package.json".into(),
                "tsconfig.json".into(),
                "wrangler.toml".into(),
                "src/index.ts".into(),
            ],
            directories: vec!["src".into()],
            config_files: vec![
                "package.json".into(),
                "tsconfig.json".into(),
                "wrangler.toml".into(),
            ],
            has_package_manifest: true,
            has_type_config: true,
            has_deploy_config: true,
            primary_language: Some("TypeScript".into()),
        },
        cohesiveness: None,
        etag: Some("\"etag-1\"".into()),
        last_scraped_at: Utc::now(),
    }
}

/// A repo missing every convention: no configs, ten loose files, no README.
#[allow(dead_code)]
pub fn bare_repo(full_name: &str) -> RepoData {
    RepoData {
        full_name: full_name.to_string(),
        description: None,
        default_branch: "main".into(),
        pushed_at: None,
        structure: RepoStructure {
            files: (0..10).map(|i| format!("script{i}.js")).collect(),
            directories: vec![],
            config_files: vec![],
            has_package_manifest: false,
            has_type_config: false,
            has_deploy_config: false,
            primary_language: Some("JavaScript".into()),
        },
        cohesiveness: None,
        etag: None,
        last_scraped_at: Utc::now(),
    }
}
