//! Background scheduler loop
//!
//! Each tick runs every due backup job and then prunes expired manifests.

use super::{BackupExecutor, BackupScheduler};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

#[derive(Debug, Clone, Default, Serialize)]
pub struct DaemonStatus {
    pub is_running: bool,
    /// Backup jobs executed
    pub run_count: u64,
    /// Ticks that ended in an error
    pub error_count: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub manifests_pruned: u64,
}

impl DaemonStatus {
    fn mark_success(&mut self, outcome: &TickOutcome) {
        self.last_run = Some(Utc::now());
        self.last_error = None;
        self.run_count += outcome.jobs_run as u64;
        self.manifests_pruned += outcome.manifests_pruned as u64;
    }

    fn mark_error(&mut self, error: String) {
        self.last_run = Some(Utc::now());
        self.last_error = Some(error);
        self.error_count += 1;
    }
}

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub jobs_run: usize,
    pub jobs_failed: usize,
    pub manifests_pruned: usize,
}

pub struct SchedulerDaemon {
    scheduler: Arc<BackupScheduler>,
    executor: Arc<dyn BackupExecutor>,
    tick_interval: Duration,
    status: RwLock<DaemonStatus>,
    shutdown: watch::Sender<bool>,
}

impl SchedulerDaemon {
    pub fn new(
        scheduler: Arc<BackupScheduler>,
        executor: Arc<dyn BackupExecutor>,
        tick_interval: Duration,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            scheduler,
            executor,
            tick_interval,
            status: RwLock::new(DaemonStatus::default()),
            shutdown,
        }
    }

    /// Run the loop on a new task
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let daemon = self.clone();
        tokio::spawn(async move { daemon.run().await })
    }

    /// Run the loop until [`stop`](Self::stop) is called
    pub async fn run(&self) {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return;
        }

        info!(
            "Starting scheduler daemon (interval: {}s)",
            self.tick_interval.as_secs()
        );
        self.status.write().await.is_running = true;

        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Errors are recorded in the status
                    let _ = self.run_now().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Scheduler daemon shutting down");
                        break;
                    }
                }
            }
        }

        self.status.write().await.is_running = false;
        info!("Scheduler daemon stopped");
    }

    pub fn stop(&self) {
        info!("Requesting scheduler daemon shutdown");
        self.shutdown.send_replace(true);
    }

    pub async fn status(&self) -> DaemonStatus {
        self.status.read().await.clone()
    }

    /// One tick, outside the interval
    pub async fn run_now(&self) -> Result<TickOutcome> {
        let result = self.tick().await;

        let mut status = self.status.write().await;
        match &result {
            Ok(outcome) => {
                status.mark_success(outcome);
                if outcome.jobs_run > 0 || outcome.manifests_pruned > 0 {
                    info!(
                        "Scheduler tick: {} jobs ({} failed), {} manifests pruned",
                        outcome.jobs_run, outcome.jobs_failed, outcome.manifests_pruned
                    );
                }
            }
            Err(e) => {
                status.mark_error(e.to_string());
                error!("Scheduler tick failed: {}", e);
            }
        }
        result
    }

    async fn tick(&self) -> Result<TickOutcome> {
        let manifests = self.scheduler.run_due_jobs(self.executor.as_ref()).await?;
        let manifests_pruned = self.scheduler.cleanup_old_backups()?;

        Ok(TickOutcome {
            jobs_run: manifests.len(),
            jobs_failed: manifests
                .iter()
                .filter(|m| m.status == super::ManifestStatus::Failed)
                .count(),
            manifests_pruned,
        })
    }
}
