//! Engine facade
//!
//! Wires configuration, the metadata store, replica backends, the vault,
//! the verification gate and the backup scheduler together, and exposes the
//! put/get/verify/heal, schedule and quarantine operations callers use.

use crate::checksum::{Checksum, ChecksumEngine};
use crate::chunk::{ChunkInfo, Chunker};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::crypto::{Cipher, VaultKey, XorCipher};
use crate::error::{Error, Result};
use crate::events::{EventSink, TracingSink};
use crate::gate::{
    CorruptionStatistics, IntegrityReport, QuarantineRecord, ReportStatus, VerificationGate,
    VerificationStatistics,
};
use crate::metadata::{MetadataStore, SledMetadataStore};
use crate::replica::{
    ArchiveBackend, BackendHealth, DiskBackend, MemoryBackend, Pipeline, ReplicaBackend,
    ReplicaKind, ReplicaStore, RetryPolicy,
};
use crate::scheduler::{
    BackupExecutor, BackupJob, BackupManifest, BackupSchedule, BackupScheduler,
    BackupStatistics, JobOutcome, ManifestObject, ScheduleStatus, SchedulerDaemon,
};
use crate::vault::{
    IntegrityVault, ProgressCallback, ReplicaVerification, StoreOptions, SweepOptions,
    SweepReport, VaultEntry,
};
use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Accepted object ids
pub const OBJECT_ID_PATTERN: &str = r"^[A-Za-z0-9._:-]{1,256}$";

/// Per-put overrides; unset fields fall back to the storage config
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub compress: Option<bool>,
    pub encrypt: Option<bool>,
    pub replica_count: Option<usize>,
}

impl PutOptions {
    pub fn replicas(count: usize) -> Self {
        Self {
            replica_count: Some(count),
            ..Self::default()
        }
    }
}

/// Open every backend named in the config, in priority order
pub fn open_backends(config: &Config) -> Result<Vec<Arc<dyn ReplicaBackend>>> {
    let mut backends: Vec<Arc<dyn ReplicaBackend>> = Vec::with_capacity(config.backends.len());

    for backend in &config.backends {
        let path = config.backend_path(backend);
        let require_path = || {
            path.clone().ok_or_else(|| {
                Error::InvalidConfig(format!("Backend '{}' requires a path", backend.kind))
            })
        };

        let opened: Arc<dyn ReplicaBackend> = match backend.kind {
            ReplicaKind::Volatile => {
                Arc::new(MemoryBackend::new().with_max_object_size(backend.max_object_size))
            }
            ReplicaKind::Local => Arc::new(
                DiskBackend::open(require_path()?)?.with_max_object_size(backend.max_object_size),
            ),
            ReplicaKind::Archive => Arc::new(
                ArchiveBackend::open(require_path()?)?
                    .with_max_object_size(backend.max_object_size),
            ),
        };
        debug!("Opened {} backend", backend.kind);
        backends.push(opened);
    }

    Ok(backends)
}

/// Builder for [`Engine`]; anything not supplied is derived from the config
pub struct EngineBuilder {
    config: Config,
    metadata: Option<Arc<dyn MetadataStore>>,
    backends: Option<Vec<Arc<dyn ReplicaBackend>>>,
    cipher: Option<Arc<dyn Cipher>>,
    clock: Option<Arc<dyn Clock>>,
    events: Option<Arc<dyn EventSink>>,
}

impl EngineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            metadata: None,
            backends: None,
            cipher: None,
            clock: None,
            events: None,
        }
    }

    pub fn metadata(mut self, metadata: Arc<dyn MetadataStore>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn backends(mut self, backends: Vec<Arc<dyn ReplicaBackend>>) -> Self {
        self.backends = Some(backends);
        self
    }

    pub fn cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<Engine> {
        let config = self.config;
        config.validate()?;

        let metadata: Arc<dyn MetadataStore> = match self.metadata {
            Some(metadata) => metadata,
            None => {
                config.ensure_directories()?;
                Arc::new(SledMetadataStore::open(config.metadata_path())?)
            }
        };
        let backends = match self.backends {
            Some(backends) => backends,
            None => open_backends(&config)?,
        };
        let cipher: Arc<dyn Cipher> = match self.cipher {
            Some(cipher) => cipher,
            None => Arc::new(XorCipher::new(VaultKey::load_or_create(metadata.as_ref())?)),
        };
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let events: Arc<dyn EventSink> = self.events.unwrap_or_else(|| Arc::new(TracingSink));

        let checksums = ChecksumEngine::new(config.chunk.checksum_window);
        let retry = RetryPolicy::new(
            config.storage.retry_attempts,
            config.storage.retry_base_delay_ms,
        );
        let replicas = Arc::new(ReplicaStore::new(backends, retry, clock.clone())?);
        let pipeline = Pipeline::new(cipher, config.storage.compression_threshold, checksums);

        let vault = IntegrityVault::new(
            replicas,
            pipeline,
            metadata.clone(),
            clock.clone(),
            events.clone(),
        );
        let gate = VerificationGate::new(
            metadata.clone(),
            &config.integrity,
            checksums,
            clock.clone(),
            events.clone(),
        )?;
        let scheduler = Arc::new(BackupScheduler::new(metadata, clock, events));
        if config.scheduler.seed_defaults && scheduler.seed_defaults()? {
            info!("Seeded default backup schedules");
        }

        let chunker = Chunker::with_size(config.chunk.chunk_size)?.with_engine(checksums);
        let object_ids = Regex::new(OBJECT_ID_PATTERN)
            .map_err(|e| Error::Internal(format!("object id pattern: {}", e)))?;

        info!(
            "Engine ready with backends [{}]",
            vault
                .replica_store()
                .kinds()
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Engine {
            config,
            vault,
            gate,
            scheduler,
            chunker,
            object_ids,
        })
    }
}

pub struct Engine {
    config: Config,
    vault: IntegrityVault,
    gate: VerificationGate,
    scheduler: Arc<BackupScheduler>,
    chunker: Chunker,
    object_ids: Regex,
}

impl Engine {
    /// Open an engine backed by the sled store and backends the config names
    pub fn open(config: Config) -> Result<Self> {
        EngineBuilder::new(config).build()
    }

    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn vault(&self) -> &IntegrityVault {
        &self.vault
    }

    pub fn gate(&self) -> &VerificationGate {
        &self.gate
    }

    pub fn scheduler(&self) -> &Arc<BackupScheduler> {
        &self.scheduler
    }

    fn validate_object_id(&self, object_id: &str) -> Result<()> {
        if !self.object_ids.is_match(object_id) {
            return Err(Error::ValidationFailed(format!(
                "invalid object id '{}': expected 1-256 characters of [A-Za-z0-9._:-]",
                object_id
            )));
        }
        Ok(())
    }

    fn store_options(&self, options: PutOptions) -> Result<StoreOptions> {
        let storage = &self.config.storage;
        let resolved = StoreOptions {
            compress: options.compress.unwrap_or(storage.compression_enabled),
            encrypt: options.encrypt.unwrap_or(storage.encryption_enabled),
            replica_count: options.replica_count.unwrap_or(storage.default_replica_count),
        };
        if resolved.replica_count == 0 {
            return Err(Error::ValidationFailed(
                "replica count must be at least 1".to_string(),
            ));
        }
        Ok(resolved)
    }

    /// Admit, store and re-verify one object.
    ///
    /// An object that fails post-write verification is still returned; it is
    /// quarantined and unreadable until released.
    pub async fn put(
        &self,
        object_id: &str,
        name: &str,
        data: Bytes,
        options: PutOptions,
    ) -> Result<VaultEntry> {
        self.put_verified(object_id, name, data, None, options).await
    }

    /// Reassemble uploaded chunks, then store the result like [`put`](Self::put).
    ///
    /// Chunk errors abort before anything is written. When `expected` is
    /// given, post-write verification compares against it instead of the
    /// reassembled bytes' own checksum.
    pub async fn put_chunks(
        &self,
        object_id: &str,
        name: &str,
        chunks: &[ChunkInfo],
        expected: Option<&Checksum>,
        options: PutOptions,
    ) -> Result<VaultEntry> {
        self.validate_object_id(object_id)?;
        let reassembled = self
            .chunker
            .reassemble(chunks, expected.map(|c| c.as_str()))?;

        if let Some(expected) = expected {
            if !reassembled.valid {
                warn!(
                    "Reassembled {} does not match its declared checksum (expected {}, got {})",
                    object_id, expected, reassembled.checksum
                );
            }
        }

        self.put_verified(object_id, name, reassembled.data, expected, options)
            .await
    }

    /// Split a reader into chunks ready for [`put_chunks`](Self::put_chunks)
    pub fn chunk_reader<R: Read>(&self, reader: R) -> Result<Vec<ChunkInfo>> {
        self.chunker.split_reader(reader)
    }

    async fn put_verified(
        &self,
        object_id: &str,
        name: &str,
        data: Bytes,
        expected: Option<&Checksum>,
        options: PutOptions,
    ) -> Result<VaultEntry> {
        self.validate_object_id(object_id)?;
        let options = self.store_options(options)?;

        let admission = self.gate.validate_for_upload(name, &data);
        if !admission.valid {
            return Err(Error::ValidationFailed(
                admission
                    .error
                    .unwrap_or_else(|| "upload rejected".to_string()),
            ));
        }
        let expected = match (expected, admission.checksum) {
            (Some(expected), _) => expected.clone(),
            (None, Some(computed)) => computed,
            (None, None) => {
                return Err(Error::Internal(format!(
                    "admitted upload of {} carries no checksum",
                    object_id
                )))
            }
        };
        let size = data.len() as u64;

        let entry = self
            .vault
            .store_with_redundancy(object_id, name, data, options)
            .await?;

        let report = self
            .gate
            .perform_post_write_verification(&self.vault, object_id, name, &expected, size)
            .await?;
        if report.status == ReportStatus::Quarantined {
            warn!("{} stored but quarantined", object_id);
        } else {
            info!(
                "Stored {} ({} bytes, {} replicas, {})",
                object_id,
                size,
                entry.replicas.len(),
                entry.health
            );
        }

        Ok(self.vault.entry(object_id)?.unwrap_or(entry))
    }

    /// Read an object, repairing damaged replicas on the way
    pub async fn get(&self, object_id: &str) -> Result<Bytes> {
        self.validate_object_id(object_id)?;
        self.gate.ensure_readable(object_id)?;
        self.vault.retrieve_with_healing(object_id).await
    }

    /// Full integrity report for one object, recorded in the report log
    pub async fn verify(&self, object_id: &str) -> Result<IntegrityReport> {
        self.validate_object_id(object_id)?;
        self.gate.inspect(&self.vault, object_id).await
    }

    /// Per-replica status without a report
    pub async fn verify_replicas(&self, object_id: &str) -> Result<ReplicaVerification> {
        self.validate_object_id(object_id)?;
        self.vault.verify_replica_integrity(object_id).await
    }

    /// Compare bytes a client downloaded with the stored object
    pub async fn verify_download(&self, object_id: &str, downloaded: Bytes) -> Result<IntegrityReport> {
        self.validate_object_id(object_id)?;
        self.gate.ensure_readable(object_id)?;
        let entry = self
            .vault
            .entry(object_id)?
            .ok_or_else(|| Error::NotFound(object_id.to_string()))?;
        let original = self.vault.read_without_healing(object_id).await?;

        self.gate
            .verify_download_integrity(
                object_id,
                &entry.display_name,
                original,
                downloaded,
                &entry.primary_checksum,
            )
            .await
    }

    pub async fn heal(&self, object_id: &str) -> Result<Vec<ReplicaKind>> {
        self.validate_object_id(object_id)?;
        self.vault.heal(object_id).await
    }

    /// Remove every replica and release any quarantine hold
    pub async fn delete(&self, object_id: &str) -> Result<()> {
        self.validate_object_id(object_id)?;
        self.vault.delete(object_id).await?;
        self.gate.remove_from_quarantine(object_id)?;
        Ok(())
    }

    pub fn entry(&self, object_id: &str) -> Result<Option<VaultEntry>> {
        self.vault.entry(object_id)
    }

    pub fn entries(&self) -> Result<Vec<VaultEntry>> {
        self.vault.entries()
    }

    /// Verify every object, healing per the integrity config
    pub async fn sweep(&self, progress: Option<ProgressCallback>) -> Result<SweepReport> {
        let options = SweepOptions {
            concurrency: self.config.integrity.sweep_concurrency,
            auto_heal: self.config.integrity.auto_heal,
        };
        self.vault.sweep(options, progress).await
    }

    pub fn backend_health(&self) -> Vec<(ReplicaKind, BackendHealth)> {
        let store = self.vault.replica_store();
        store
            .kinds()
            .into_iter()
            .map(|kind| (kind, store.health().backend_health(kind)))
            .collect()
    }

    // Schedules

    pub fn list_schedules(&self) -> Result<Vec<BackupSchedule>> {
        self.scheduler.list_schedules()
    }

    pub fn add_schedule(&self, schedule: BackupSchedule) -> Result<()> {
        self.scheduler.add_schedule(schedule)
    }

    pub fn update_schedule(&self, schedule: BackupSchedule) -> Result<()> {
        self.scheduler.update_schedule(schedule)
    }

    pub fn remove_schedule(&self, id: &str) -> Result<()> {
        self.scheduler.remove_schedule(id)
    }

    pub fn due_schedules(&self) -> Result<Vec<BackupSchedule>> {
        self.scheduler.due_schedules()
    }

    pub async fn run_due_job(&self, schedule: &BackupSchedule) -> Result<BackupManifest> {
        self.scheduler.run_due_job(schedule, self).await
    }

    pub async fn run_due_jobs(&self) -> Result<Vec<BackupManifest>> {
        self.scheduler.run_due_jobs(self).await
    }

    pub fn cleanup_old_backups(&self) -> Result<usize> {
        self.scheduler.cleanup_old_backups()
    }

    pub fn backup_statistics(&self) -> Result<BackupStatistics> {
        self.scheduler.statistics()
    }

    pub fn manifests(&self) -> Result<Vec<BackupManifest>> {
        self.scheduler.manifests()
    }

    pub fn schedule_status(&self) -> Result<Vec<ScheduleStatus>> {
        self.scheduler.schedule_status()
    }

    /// Background loop running due jobs on the configured interval
    pub fn daemon(self: &Arc<Self>) -> SchedulerDaemon {
        SchedulerDaemon::new(
            self.scheduler.clone(),
            self.clone(),
            Duration::from_secs(self.config.scheduler.tick_interval_secs),
        )
    }

    // Quarantine

    pub fn list_quarantined(&self) -> Result<Vec<QuarantineRecord>> {
        self.gate.list_quarantined()
    }

    /// Release one object; returns whether it was held
    pub fn clear_quarantine(&self, object_id: &str) -> Result<bool> {
        self.gate.remove_from_quarantine(object_id)
    }

    pub fn clear_all_quarantine(&self) -> Result<usize> {
        self.gate.clear_quarantine()
    }

    // Feeds

    pub fn reports(&self) -> Result<Vec<IntegrityReport>> {
        self.gate.reports()
    }

    pub fn reports_for(&self, object_id: &str) -> Result<Vec<IntegrityReport>> {
        self.gate.reports_for(object_id)
    }

    pub fn corruption_statistics(&self) -> Result<CorruptionStatistics> {
        self.gate.corruption_statistics()
    }

    pub fn verification_statistics(&self) -> Result<VerificationStatistics> {
        self.gate.verification_statistics()
    }
}

#[async_trait]
impl BackupExecutor for Engine {
    /// Verify and heal the covered objects up to the schedule's replica
    /// count. Quarantined and unrecoverable objects are skipped.
    async fn execute(&self, job: &BackupJob) -> Result<JobOutcome> {
        let mut outcome = JobOutcome::default();
        let covered: Vec<VaultEntry> = self
            .vault
            .entries()?
            .into_iter()
            .filter(|e| job.since.map_or(true, |since| e.updated_at >= since))
            .collect();
        debug!(
            "Backup {} covers {} objects",
            job.schedule.id,
            covered.len()
        );

        for entry in covered {
            if self.gate.is_quarantined(&entry.object_id)? {
                outcome.skipped.push(entry.object_id);
                continue;
            }

            match self
                .vault
                .heal_to(&entry.object_id, Some(job.schedule.replica_count))
                .await
            {
                Ok(_) => outcome.objects.push(ManifestObject {
                    object_id: entry.object_id,
                    checksum: entry.primary_checksum,
                    size: entry.original_size,
                }),
                Err(e @ Error::AllBackendsFailed(_)) | Err(e @ Error::NotFound(_)) => {
                    warn!("Backup {} skipped {}: {}", job.schedule.id, entry.object_id, e);
                    outcome.skipped.push(entry.object_id);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(outcome)
    }
}
