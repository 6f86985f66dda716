//! Backup scheduler
//!
//! Named schedules decide when a backup job is due. Running a job hands it to
//! a [`BackupExecutor`] and records the outcome as a [`BackupManifest`];
//! manifests older than their schedule's retention are pruned on cleanup.

mod daemon;

pub use daemon::{DaemonStatus, SchedulerDaemon, TickOutcome};

use crate::checksum::{Checksum, StreamingChecksum};
use crate::clock::{Clock, MILLIS_PER_DAY, MILLIS_PER_HOUR};
use crate::error::{Error, Result};
use crate::events::{EventSink, VaultEvent};
use crate::metadata::{MetadataStore, Table, Tree};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    /// Only objects written since the previous completed backup
    Incremental,
    /// Every tracked object
    Full,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Incremental => "incremental",
            BackupType::Full => "full",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "incremental" => Ok(BackupType::Incremental),
            "full" => Ok(BackupType::Full),
            other => Err(Error::ValidationFailed(format!("unknown backup type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Hourly,
    Daily,
    Weekly,
}

impl Frequency {
    pub fn period_millis(&self) -> u64 {
        match self {
            Frequency::Hourly => MILLIS_PER_HOUR,
            Frequency::Daily => MILLIS_PER_DAY,
            Frequency::Weekly => 7 * MILLIS_PER_DAY,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Hourly => "hourly",
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" => Ok(Frequency::Hourly),
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            other => Err(Error::ValidationFailed(format!("unknown frequency '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSchedule {
    pub id: String,
    pub backup_type: BackupType,
    pub frequency: Frequency,
    pub enabled: bool,
    /// Due once the clock reaches this instant
    pub next_run: u64,
    pub retention_days: u64,
    pub replica_count: usize,
    pub compression_enabled: bool,
    pub encryption_enabled: bool,
}

impl BackupSchedule {
    pub fn is_due(&self, now: u64) -> bool {
        self.enabled && now >= self.next_run
    }

    /// The two schedules a fresh vault starts with
    pub fn defaults(now: u64) -> Vec<BackupSchedule> {
        vec![
            BackupSchedule {
                id: "hourly-incremental".to_string(),
                backup_type: BackupType::Incremental,
                frequency: Frequency::Hourly,
                enabled: true,
                next_run: now + Frequency::Hourly.period_millis(),
                retention_days: 7,
                replica_count: 3,
                compression_enabled: true,
                encryption_enabled: true,
            },
            BackupSchedule {
                id: "daily-full".to_string(),
                backup_type: BackupType::Full,
                frequency: Frequency::Daily,
                enabled: true,
                next_run: now + Frequency::Daily.period_millis(),
                retention_days: 30,
                replica_count: 3,
                compression_enabled: true,
                encryption_enabled: true,
            },
        ]
    }

    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::ValidationFailed("schedule id must not be empty".to_string()));
        }
        if self.replica_count == 0 {
            return Err(Error::ValidationFailed(format!(
                "schedule {} must keep at least one replica",
                self.id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestObject {
    pub object_id: String,
    pub checksum: Checksum,
    pub size: u64,
}

/// Record of one executed backup job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub id: String,
    pub schedule_id: String,
    pub timestamp: u64,
    pub backup_type: BackupType,
    pub file_count: u64,
    pub total_size: u64,
    /// Digest of the sorted object listing
    pub checksum: Checksum,
    pub replica_count: usize,
    pub status: ManifestStatus,
    pub objects: Vec<ManifestObject>,
    pub error: Option<String>,
}

impl BackupManifest {
    /// Store key; sorts chronologically
    fn key(&self) -> String {
        format!("{:020}-{}", self.timestamp, self.id)
    }
}

/// Digest of an object listing, independent of input order
pub fn listing_checksum(objects: &[ManifestObject]) -> Checksum {
    let mut lines: Vec<String> = objects
        .iter()
        .map(|o| format!("{}:{}\n", o.object_id, o.checksum))
        .collect();
    lines.sort();

    let mut hasher = StreamingChecksum::new();
    for line in &lines {
        hasher.update(line.as_bytes());
    }
    hasher.finalize()
}

/// Work handed to an executor
#[derive(Debug, Clone)]
pub struct BackupJob {
    pub schedule: BackupSchedule,
    /// Incremental jobs cover objects written at or after this instant
    pub since: Option<u64>,
    pub started_at: u64,
}

#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
    pub objects: Vec<ManifestObject>,
    /// Objects that could not be backed up
    pub skipped: Vec<String>,
}

/// Performs the storage side of a backup job
#[async_trait]
pub trait BackupExecutor: Send + Sync {
    async fn execute(&self, job: &BackupJob) -> Result<JobOutcome>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackupStatistics {
    pub total: usize,
    pub incremental: usize,
    pub full: usize,
    /// Bytes covered by completed manifests
    pub total_size: u64,
    pub last_backup: Option<u64>,
    /// Earliest `next_run` of an enabled schedule
    pub next_scheduled: Option<u64>,
}

/// Feed row describing one schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleStatus {
    pub id: String,
    pub backup_type: BackupType,
    pub frequency: Frequency,
    pub enabled: bool,
    pub due: bool,
    pub next_run: u64,
    pub last_run: Option<u64>,
    pub last_status: Option<ManifestStatus>,
}

pub struct BackupScheduler {
    schedules: Table<BackupSchedule>,
    manifests: Table<BackupManifest>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    /// One job at a time
    running: Mutex<()>,
}

impl BackupScheduler {
    pub fn new(metadata: Arc<dyn MetadataStore>, clock: Arc<dyn Clock>, events: Arc<dyn EventSink>) -> Self {
        Self {
            schedules: Table::new(metadata.clone(), Tree::Schedules),
            manifests: Table::new(metadata, Tree::Manifests),
            clock,
            events,
            running: Mutex::new(()),
        }
    }

    /// Install the default schedules if none exist; returns whether it did
    pub fn seed_defaults(&self) -> Result<bool> {
        if !self.schedules.values()?.is_empty() {
            return Ok(false);
        }
        for schedule in BackupSchedule::defaults(self.clock.now_millis()) {
            self.schedules.put(&schedule.id, &schedule)?;
        }
        self.schedules.flush()?;
        info!("Seeded default backup schedules");
        Ok(true)
    }

    pub fn list_schedules(&self) -> Result<Vec<BackupSchedule>> {
        self.schedules.values()
    }

    pub fn schedule(&self, id: &str) -> Result<BackupSchedule> {
        self.schedules
            .get(id)?
            .ok_or_else(|| Error::ScheduleNotFound(id.to_string()))
    }

    pub fn add_schedule(&self, schedule: BackupSchedule) -> Result<()> {
        schedule.validate()?;
        if self.schedules.contains(&schedule.id)? {
            return Err(Error::ValidationFailed(format!(
                "schedule {} already exists",
                schedule.id
            )));
        }
        self.schedules.put(&schedule.id, &schedule)?;
        self.schedules.flush()
    }

    /// Replace an existing schedule
    pub fn update_schedule(&self, schedule: BackupSchedule) -> Result<()> {
        schedule.validate()?;
        if !self.schedules.contains(&schedule.id)? {
            return Err(Error::ScheduleNotFound(schedule.id));
        }
        debug!("Updating schedule {}", schedule.id);
        self.schedules.put(&schedule.id, &schedule)?;
        self.schedules.flush()
    }

    pub fn remove_schedule(&self, id: &str) -> Result<()> {
        if !self.schedules.remove(id)? {
            return Err(Error::ScheduleNotFound(id.to_string()));
        }
        self.schedules.flush()
    }

    /// Enabled schedules whose `next_run` has passed, earliest first
    pub fn due_schedules(&self) -> Result<Vec<BackupSchedule>> {
        let now = self.clock.now_millis();
        let mut due: Vec<BackupSchedule> = self
            .schedules
            .values()?
            .into_iter()
            .filter(|s| s.is_due(now))
            .collect();
        due.sort_by_key(|s| s.next_run);
        Ok(due)
    }

    /// Execute one job and record its manifest. The schedule's next run is
    /// one period from now whether the job succeeded or not.
    pub async fn run_due_job(
        &self,
        schedule: &BackupSchedule,
        executor: &dyn BackupExecutor,
    ) -> Result<BackupManifest> {
        let _running = self.running.lock().await;
        let started_at = self.clock.now_millis();

        let since = match schedule.backup_type {
            BackupType::Full => None,
            BackupType::Incremental => self.last_backup()?.map(|m| m.timestamp),
        };
        let job = BackupJob {
            schedule: schedule.clone(),
            since,
            started_at,
        };

        let mut manifest = BackupManifest {
            id: uuid::Uuid::new_v4().to_string(),
            schedule_id: schedule.id.clone(),
            timestamp: started_at,
            backup_type: schedule.backup_type,
            file_count: 0,
            total_size: 0,
            checksum: listing_checksum(&[]),
            replica_count: schedule.replica_count,
            status: ManifestStatus::Pending,
            objects: Vec::new(),
            error: None,
        };
        self.manifests.put(&manifest.key(), &manifest)?;

        info!("Running {} backup for schedule {}", schedule.backup_type, schedule.id);
        match executor.execute(&job).await {
            Ok(outcome) => {
                let mut objects = outcome.objects;
                objects.sort_by(|a, b| a.object_id.cmp(&b.object_id));
                manifest.file_count = objects.len() as u64;
                manifest.total_size = objects.iter().map(|o| o.size).sum();
                manifest.checksum = listing_checksum(&objects);
                manifest.objects = objects;
                manifest.status = ManifestStatus::Completed;
                if !outcome.skipped.is_empty() {
                    warn!(
                        "Backup {} skipped {} unrecoverable objects",
                        manifest.id,
                        outcome.skipped.len()
                    );
                    manifest.error = Some(format!("skipped: {}", outcome.skipped.join(", ")));
                }
                self.events.emit(VaultEvent::BackupCompleted {
                    schedule_id: schedule.id.clone(),
                    manifest_id: manifest.id.clone(),
                    file_count: manifest.file_count,
                });
            }
            Err(e) => {
                error!("Backup for schedule {} failed: {}", schedule.id, e);
                manifest.status = ManifestStatus::Failed;
                manifest.error = Some(e.to_string());
                self.events.emit(VaultEvent::BackupFailed {
                    schedule_id: schedule.id.clone(),
                    reason: e.to_string(),
                });
            }
        }
        self.manifests.put(&manifest.key(), &manifest)?;

        // Re-read so a concurrent edit of other fields is kept
        match self.schedules.get(&schedule.id)? {
            Some(mut current) => {
                current.next_run = self.clock.now_millis() + current.frequency.period_millis();
                self.schedules.put(&current.id, &current)?;
                self.schedules.flush()?;
            }
            None => debug!("Schedule {} was removed while its job ran", schedule.id),
        }

        Ok(manifest)
    }

    /// Run every due schedule in turn
    pub async fn run_due_jobs(&self, executor: &dyn BackupExecutor) -> Result<Vec<BackupManifest>> {
        let mut manifests = Vec::new();
        for schedule in self.due_schedules()? {
            manifests.push(self.run_due_job(&schedule, executor).await?);
        }
        Ok(manifests)
    }

    /// Remove manifests past their retention.
    ///
    /// A manifest is matched to the first schedule of the same backup type;
    /// without a match it is kept.
    pub fn cleanup_old_backups(&self) -> Result<usize> {
        let now = self.clock.now_millis();
        let schedules = self.schedules.values()?;
        let mut removed = 0;

        for (key, manifest) in self.manifests.entries()? {
            let Some(schedule) = schedules.iter().find(|s| s.backup_type == manifest.backup_type) else {
                continue;
            };
            let max_age = schedule.retention_days.saturating_mul(MILLIS_PER_DAY);
            if now.saturating_sub(manifest.timestamp) > max_age {
                self.manifests.remove(&key)?;
                removed += 1;
            }
        }

        if removed > 0 {
            self.manifests.flush()?;
            info!("Pruned {} expired backup manifests", removed);
            self.events.emit(VaultEvent::ManifestsPruned { removed });
        }
        Ok(removed)
    }

    /// All manifests, newest first
    pub fn manifests(&self) -> Result<Vec<BackupManifest>> {
        let mut manifests = self.manifests.values()?;
        manifests.reverse();
        Ok(manifests)
    }

    /// Newest completed manifest
    pub fn last_backup(&self) -> Result<Option<BackupManifest>> {
        Ok(self
            .manifests()?
            .into_iter()
            .find(|m| m.status == ManifestStatus::Completed))
    }

    pub fn statistics(&self) -> Result<BackupStatistics> {
        let manifests = self.manifests()?;
        let completed = manifests.iter().filter(|m| m.status == ManifestStatus::Completed);

        Ok(BackupStatistics {
            total: manifests.len(),
            incremental: manifests
                .iter()
                .filter(|m| m.backup_type == BackupType::Incremental)
                .count(),
            full: manifests
                .iter()
                .filter(|m| m.backup_type == BackupType::Full)
                .count(),
            total_size: completed.clone().map(|m| m.total_size).sum(),
            last_backup: completed.map(|m| m.timestamp).next(),
            next_scheduled: self
                .schedules
                .values()?
                .iter()
                .filter(|s| s.enabled)
                .map(|s| s.next_run)
                .min(),
        })
    }

    pub fn schedule_status(&self) -> Result<Vec<ScheduleStatus>> {
        let now = self.clock.now_millis();
        let manifests = self.manifests()?;

        Ok(self
            .schedules
            .values()?
            .into_iter()
            .map(|s| {
                let last = manifests.iter().find(|m| m.schedule_id == s.id);
                ScheduleStatus {
                    due: s.is_due(now),
                    id: s.id,
                    backup_type: s.backup_type,
                    frequency: s.frequency,
                    enabled: s.enabled,
                    next_run: s.next_run,
                    last_run: last.map(|m| m.timestamp),
                    last_status: last.map(|m| m.status),
                }
            })
            .collect())
    }
}
