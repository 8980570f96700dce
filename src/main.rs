use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tracing::info;

use roadwarden::adapters::github::GithubScraper;
use roadwarden::adapters::http::{AppState, HttpServer};
use roadwarden::adapters::sqlite::{
    DatabaseConnection, SqliteKvCache, SqliteQueue, SqliteStateStore,
};
use roadwarden::domain::ports::{
    queues, KvCache, QueueBackend, RepoScraper, StateStore, SystemClock, TypedQueue, UuidIds,
};
use roadwarden::infrastructure::{logging, ConfigLoader};
use roadwarden::services::{
    spawn_consumer, HealingProcessor, HealthService, JobCoordinator, JobProcessor,
    ReportingService, Scheduler, ScrapeProcessor, SelfHealer, SyncEngine,
};

#[derive(Parser)]
#[command(name = "roadwarden", about = "Repo fleet control plane", version)]
struct Cli {
    /// Path to a config file (defaults to .roadwarden/config.yaml merging)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };
    logging::init(&config.logging)?;
    info!(environment = %config.environment, org = %config.blackroad_org, "starting roadwarden");

    let db = DatabaseConnection::new(&config.database.path, config.database.max_connections)
        .await
        .context("opening database")?;
    db.migrate().await.context("running migrations")?;

    let store: Arc<dyn StateStore> = Arc::new(SqliteStateStore::new(db.pool().clone()));
    let kv: Arc<dyn KvCache> = Arc::new(SqliteKvCache::new(db.pool().clone()));
    let backend: Arc<dyn QueueBackend> = Arc::new(SqliteQueue::new(
        db.pool().clone(),
        config.queue.lease_seconds,
    ));

    let job_queue = TypedQueue::new(backend.clone(), queues::JOBS);
    let scrape_queue = TypedQueue::new(backend.clone(), queues::SCRAPES);
    let healing_queue = TypedQueue::new(backend.clone(), queues::HEALING);

    let clock = Arc::new(SystemClock);
    let ids = Arc::new(UuidIds);
    let scraper: Arc<dyn RepoScraper> = Arc::new(GithubScraper::new(
        &config.scraper,
        config.blackroad_org.clone(),
        config.github_token.clone(),
    ));

    let coordinator = Arc::new(
        JobCoordinator::load(
            store.clone(),
            job_queue.clone(),
            clock.clone(),
            ids.clone(),
            config.max_retry_attempts,
        )
        .await
        .context("hydrating job coordinator")?,
    );
    let engine = Arc::new(
        SyncEngine::load(
            store.clone(),
            scrape_queue.clone(),
            healing_queue.clone(),
            kv.clone(),
            clock.clone(),
            ids.clone(),
            config.known_repos.clone(),
        )
        .await
        .context("hydrating sync engine")?,
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
            config.self_heal_enabled,
            config.max_retry_attempts,
        )
        .await
        .context("hydrating self-healer")?,
    );

    let health = Arc::new(HealthService::new(
        coordinator.clone(),
        healer.clone(),
        healing_queue.clone(),
        clock.clone(),
        ids.clone(),
    ));
    let reporting = Arc::new(ReportingService::new(
        coordinator.clone(),
        engine.clone(),
        healer.clone(),
        kv.clone(),
        clock.clone(),
    ));

    let (shutdown_tx, _) = broadcast::channel(1);

    let mut handles = vec![
        spawn_consumer(
            job_queue.clone(),
            Arc::new(JobProcessor::new(
                coordinator.clone(),
                engine.clone(),
                scrape_queue.clone(),
                healing_queue.clone(),
                kv.clone(),
                clock.clone(),
                ids.clone(),
            )),
            config.queue.clone(),
            shutdown_tx.subscribe(),
        ),
        spawn_consumer(
            scrape_queue.clone(),
            Arc::new(ScrapeProcessor::new(
                engine.clone(),
                scraper.clone(),
                healing_queue.clone(),
                kv.clone(),
                clock.clone(),
                ids.clone(),
                config.blackroad_org.clone(),
            )),
            config.queue.clone(),
            shutdown_tx.subscribe(),
        ),
        spawn_consumer(
            healing_queue.clone(),
            Arc::new(HealingProcessor::new(healer.clone())),
            config.queue.clone(),
            shutdown_tx.subscribe(),
        ),
    ];

    let scheduler = Arc::new(Scheduler::new(
        health.clone(),
        reporting,
        engine.clone(),
        coordinator.clone(),
        kv.clone(),
        config.scrape_interval_minutes,
    ));
    handles.extend(scheduler.spawn(&shutdown_tx));

    let server = HttpServer::new(
        config.server.clone(),
        Arc::new(AppState {
            coordinator,
            engine,
            healer,
            health,
        }),
    );

    let shutdown_signal = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    };
    server.serve_with_shutdown(shutdown_signal).await?;

    let _ = shutdown_tx.send(());
    for handle in handles {
        let _ = handle.await;
    }
    db.close().await;
    info!("roadwarden stopped");
    Ok(())
}
