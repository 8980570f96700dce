//! Interval-based cron dispatcher.
//!
//! Drives the four cadences: healing check every 5 minutes, incremental
//! scrape on the configured interval, cohesiveness hourly, and the daily
//! 00:00 pass (full sync, cleanup, report, cache purge). Each loop stamps
//! `metrics:last_*` after a successful run.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Timelike, Utc};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::domain::ports::{keys, KvCache};
use crate::services::health::HealthService;
use crate::services::job_coordinator::JobCoordinator;
use crate::services::reporting::ReportingService;
use crate::services::sync_engine::SyncEngine;

const HEALING_CHECK_INTERVAL: StdDuration = StdDuration::from_secs(5 * 60);
const COHESIVENESS_INTERVAL: StdDuration = StdDuration::from_secs(3600);
const DAY: StdDuration = StdDuration::from_secs(24 * 3600);

pub struct Scheduler {
    health: Arc<HealthService>,
    reporting: Arc<ReportingService>,
    engine: Arc<SyncEngine>,
    coordinator: Arc<JobCoordinator>,
    kv: Arc<dyn KvCache>,
    scrape_interval: StdDuration,
}

impl Scheduler {
    pub fn new(
        health: Arc<HealthService>,
        reporting: Arc<ReportingService>,
        engine: Arc<SyncEngine>,
        coordinator: Arc<JobCoordinator>,
        kv: Arc<dyn KvCache>,
        scrape_interval_minutes: u64,
    ) -> Self {
        Self {
            health,
            reporting,
            engine,
            coordinator,
            kv,
            scrape_interval: StdDuration::from_secs(scrape_interval_minutes * 60),
        }
    }

    /// Spawn the four cron loops. Each runs until the shutdown channel
    /// fires.
    pub fn spawn(self: Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        vec![
            self.clone()
                .spawn_loop("healing_check", HEALING_CHECK_INTERVAL, shutdown.subscribe()),
            self.clone().spawn_loop(
                "incremental_sync",
                self.scrape_interval,
                shutdown.subscribe(),
            ),
            self.clone().spawn_loop(
                "cohesiveness_check",
                COHESIVENESS_INTERVAL,
                shutdown.subscribe(),
            ),
            self.spawn_daily_loop(shutdown.subscribe()),
        ]
    }

    fn spawn_loop(
        self: Arc<Self>,
        name: &'static str,
        period: StdDuration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick fires immediately; skip it so startup stays
            // quiet.
            interval.tick().await;
            info!(cadence = name, period_secs = period.as_secs(), "cron loop started");

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!(cadence = name, "cron loop shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        self.run(name).await;
                    }
                }
            }
        })
    }

    /// The daily pass waits until the next 00:00 UTC, then fires every 24h.
    fn spawn_daily_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let until_midnight = seconds_until_midnight();
            info!(
                delay_secs = until_midnight,
                "daily cron loop waiting for midnight"
            );

            tokio::select! {
                _ = shutdown.recv() => return,
                _ = tokio::time::sleep(StdDuration::from_secs(until_midnight)) => {}
            }

            let mut interval = tokio::time::interval(DAY);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!(cadence = "daily", "cron loop shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        self.run("daily").await;
                    }
                }
            }
        })
    }

    async fn run(&self, name: &str) {
        let outcome = match name {
            "healing_check" => self.health.healing_check().await.map(|_| ()),
            "incremental_sync" => self
                .engine
                .trigger_incremental_sync()
                .await
                .map(|_| ())
                .map_err(Into::into),
            "cohesiveness_check" => self
                .engine
                .trigger_cohesiveness_check()
                .await
                .map(|_| ())
                .map_err(Into::into),
            "daily" => self.run_daily().await,
            _ => Ok(()),
        };

        match outcome {
            Ok(()) => self.stamp(name).await,
            Err(e) => warn!(cadence = name, error = %e, "cron run failed"),
        }
    }

    /// Full sync, job cleanup, daily report, expired-cache purge.
    async fn run_daily(&self) -> anyhow::Result<()> {
        // A concurrent manual full sync is not an error for the cron pass.
        if let Err(e) = self.engine.trigger_full_sync().await {
            if e.is_conflict() {
                warn!("daily full sync skipped: one is already in progress");
            } else {
                return Err(e.into());
            }
        }
        self.coordinator.cleanup().await?;
        self.reporting.write_daily_report().await?;
        let purged = self.kv.purge_expired().await?;
        if purged > 0 {
            info!(purged, "expired cache entries dropped");
        }
        Ok(())
    }

    async fn stamp(&self, name: &str) {
        let key = keys::metric(&format!("last_{name}"));
        let value = json!(Utc::now().to_rfc3339());
        if let Err(e) = self.kv.put(&key, &value, None).await {
            warn!(cadence = name, error = %e, "metrics stamp failed");
        }
    }
}

fn seconds_until_midnight() -> u64 {
    let now = Utc::now();
    let elapsed_today =
        now.hour() as u64 * 3600 + now.minute() as u64 * 60 + now.second() as u64;
    (24u64 * 3600).saturating_sub(elapsed_today).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midnight_delay_is_within_a_day() {
        let secs = seconds_until_midnight();
        assert!(secs >= 1);
        assert!(secs <= 24 * 3600);
    }
}
