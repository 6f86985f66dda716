//! Integrity vault
//!
//! Owns the index of stored objects. Writes fan out to the configured
//! backends, reads fall through replicas in priority order and repair what
//! they find broken, and verification publishes per-object health only after
//! every replica has been checked.

mod locks;
mod sweep;

pub use locks::KeyedLocks;
pub use sweep::{
    IntegrityIssue, IssueKind, ProgressCallback, Severity, SweepOptions, SweepPhase,
    SweepProgress, SweepReport,
};

use crate::checksum::Checksum;
use crate::clock::Clock;
use crate::error::{ChecksumScope, Error, Result};
use crate::events::{EventSink, VaultEvent};
use crate::metadata::{MetadataStore, Table, Tree};
use crate::replica::{Pipeline, Processed, ReplicaKind, ReplicaLocation, ReplicaStore};
use bytes::Bytes;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Derived health of an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Two or more intact replicas
    Healthy,
    /// Exactly one intact replica
    Degraded,
    /// No intact replica
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Critical => "critical",
        }
    }

    pub fn from_healthy_count(count: usize) -> Self {
        match count {
            0 => HealthStatus::Critical,
            1 => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of checking one replica
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaStatus {
    Healthy,
    Corrupted,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaCheck {
    pub kind: ReplicaKind,
    pub status: ReplicaStatus,
}

/// Result of [`IntegrityVault::verify_replica_integrity`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicaVerification {
    pub object_id: String,
    /// At least one replica is intact
    pub healthy: bool,
    pub health: HealthStatus,
    pub replicas: Vec<ReplicaCheck>,
}

impl ReplicaVerification {
    pub fn healthy_count(&self) -> usize {
        self.replicas
            .iter()
            .filter(|r| r.status == ReplicaStatus::Healthy)
            .count()
    }
}

/// Index record for one stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEntry {
    pub object_id: String,
    pub display_name: String,
    pub original_size: u64,
    /// Checksum of the original, unprocessed bytes
    pub primary_checksum: Checksum,
    /// Replicas in backend priority order
    pub replicas: Vec<ReplicaLocation>,
    /// Number of replicas requested at write time, after clamping
    pub replica_target: usize,
    /// Compression requested at write time
    pub compress: bool,
    /// Encryption requested at write time
    pub encrypt: bool,
    pub created_at: u64,
    /// Last time any replica was written (stored or healed)
    pub updated_at: u64,
    pub last_verified_at: Option<u64>,
    pub health: HealthStatus,
}

impl VaultEntry {
    pub fn replica(&self, kind: ReplicaKind) -> Option<&ReplicaLocation> {
        self.replicas.iter().find(|r| r.kind == kind)
    }

    pub fn replica_kinds(&self) -> Vec<ReplicaKind> {
        self.replicas.iter().map(|r| r.kind).collect()
    }
}

/// Per-write processing and replication options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub compress: bool,
    pub encrypt: bool,
    pub replica_count: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            compress: true,
            encrypt: true,
            replica_count: 3,
        }
    }
}

/// What one replica read produced
enum ReplicaRead {
    Intact(Bytes),
    Corrupted(Checksum),
    Missing(Error),
}

impl ReplicaRead {
    fn status(&self) -> ReplicaStatus {
        match self {
            ReplicaRead::Intact(_) => ReplicaStatus::Healthy,
            ReplicaRead::Corrupted(_) => ReplicaStatus::Corrupted,
            ReplicaRead::Missing(_) => ReplicaStatus::Missing,
        }
    }
}

pub struct IntegrityVault {
    replicas: Arc<ReplicaStore>,
    pipeline: Pipeline,
    entries: Table<VaultEntry>,
    locks: KeyedLocks,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl IntegrityVault {
    pub fn new(
        replicas: Arc<ReplicaStore>,
        pipeline: Pipeline,
        metadata: Arc<dyn MetadataStore>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            replicas,
            pipeline,
            entries: Table::new(metadata, Tree::Entries),
            locks: KeyedLocks::new(),
            clock,
            events,
        }
    }

    pub fn replica_store(&self) -> &ReplicaStore {
        &self.replicas
    }

    pub fn entry(&self, object_id: &str) -> Result<Option<VaultEntry>> {
        self.entries.get(object_id)
    }

    pub fn entries(&self) -> Result<Vec<VaultEntry>> {
        self.entries.values()
    }

    fn require_entry(&self, object_id: &str) -> Result<VaultEntry> {
        self.entries
            .get(object_id)?
            .ok_or_else(|| Error::NotFound(object_id.to_string()))
    }

    /// Kinds an object should live on: the first `target` backends
    fn target_kinds(&self, target: usize) -> Vec<ReplicaKind> {
        let kinds = self.replicas.kinds();
        let target = target.min(kinds.len());
        kinds[..target].to_vec()
    }

    fn sort_replicas(&self, replicas: &mut [ReplicaLocation]) {
        let order = self.replicas.kinds();
        replicas.sort_by_key(|r| order.iter().position(|k| *k == r.kind).unwrap_or(usize::MAX));
    }

    fn persist(&self, entry: &VaultEntry) -> Result<()> {
        self.entries.put(&entry.object_id, entry)?;
        self.entries.flush()
    }

    fn publish_health(&self, object_id: &str, before: Option<HealthStatus>, after: HealthStatus) {
        if before != Some(after) {
            self.events.emit(VaultEvent::HealthChanged {
                object_id: object_id.to_string(),
                health: after,
            });
        }
    }

    /// Write processed bytes to several backends concurrently
    async fn write_replicas(
        &self,
        object_id: &str,
        processed: &Processed,
        kinds: &[ReplicaKind],
    ) -> Vec<(ReplicaKind, Result<ReplicaLocation>)> {
        let writes = kinds.iter().map(|kind| async move {
            (*kind, self.replicas.write(object_id, processed, *kind).await)
        });
        let results = join_all(writes).await;

        for (kind, result) in &results {
            match result {
                Ok(location) => self.events.emit(VaultEvent::ReplicaWritten {
                    object_id: object_id.to_string(),
                    kind: *kind,
                    size: location.size,
                }),
                Err(e) => self.events.emit(VaultEvent::BackendFailed {
                    object_id: object_id.to_string(),
                    kind: *kind,
                    operation: "write",
                    reason: e.to_string(),
                }),
            }
        }

        results
    }

    /// Read one replica and check its processed-bytes checksum
    async fn read_replica(&self, object_id: &str, location: &ReplicaLocation) -> ReplicaRead {
        match self.replicas.read(object_id, location.kind).await {
            Ok(data) => {
                let actual = match self.pipeline.engine().checksum_offloaded(data.clone()).await {
                    Ok(sum) => sum,
                    Err(e) => return ReplicaRead::Missing(e),
                };
                if actual.matches(location.checksum.as_str()) {
                    ReplicaRead::Intact(data)
                } else {
                    ReplicaRead::Corrupted(actual)
                }
            }
            Err(e) => ReplicaRead::Missing(e),
        }
    }

    /// Reverse the pipeline and check the result against the primary checksum
    async fn decode(&self, entry: &VaultEntry, location: &ReplicaLocation, data: Bytes) -> Result<Bytes> {
        let plain = self
            .pipeline
            .reverse_offloaded(data, location.compressed, location.encrypted)
            .await?;
        let actual = self.pipeline.engine().checksum_offloaded(plain.clone()).await?;
        if !actual.matches(entry.primary_checksum.as_str()) {
            return Err(Error::ChecksumMismatch {
                scope: ChecksumScope::Object,
                expected: entry.primary_checksum.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(plain)
    }

    fn report_bad_replica(&self, object_id: &str, kind: ReplicaKind, read: &ReplicaRead) {
        match read {
            ReplicaRead::Intact(_) => {}
            ReplicaRead::Corrupted(actual) => {
                warn!("{} replica of {} is corrupted (got {})", kind, object_id, actual);
                self.events.emit(VaultEvent::ReplicaCorrupted {
                    object_id: object_id.to_string(),
                    kind,
                });
            }
            ReplicaRead::Missing(e) => {
                debug!("{} replica of {} unavailable: {}", kind, object_id, e);
            }
        }
    }

    /// Store `data` on up to `options.replica_count` backends.
    ///
    /// Individual backend failures downgrade health; only a write that lands
    /// nowhere fails, and then nothing is persisted.
    pub async fn store_with_redundancy(
        &self,
        object_id: &str,
        name: &str,
        data: Bytes,
        options: StoreOptions,
    ) -> Result<VaultEntry> {
        let _guard = self.locks.lock(object_id).await;

        let original_size = data.len() as u64;
        let primary_checksum = self.pipeline.engine().checksum_offloaded(data.clone()).await?;
        let processed = self
            .pipeline
            .process_offloaded(data, options.compress, options.encrypt)
            .await?;

        let targets = self.target_kinds(options.replica_count);
        if targets.len() < options.replica_count {
            debug!(
                "Requested {} replicas of {} but only {} backends are configured",
                options.replica_count,
                object_id,
                targets.len()
            );
        }

        let results = self.write_replicas(object_id, &processed, &targets).await;
        let mut replicas: Vec<ReplicaLocation> =
            results.into_iter().filter_map(|(_, r)| r.ok()).collect();

        if replicas.is_empty() {
            warn!("No replica of {} could be written", object_id);
            return Err(Error::AllBackendsFailed(object_id.to_string()));
        }
        self.sort_replicas(&mut replicas);

        let previous = self.entries.get(object_id)?;
        if let Some(previous) = &previous {
            // Replicas of an overwritten object on backends that were not rewritten
            let written: HashSet<ReplicaKind> = replicas.iter().map(|r| r.kind).collect();
            for stale in previous.replicas.iter().filter(|r| !written.contains(&r.kind)) {
                if let Err(e) = self.replicas.delete(object_id, stale.kind).await {
                    warn!("Failed to remove stale {} replica of {}: {}", stale.kind, object_id, e);
                }
            }
        }

        let now = self.clock.now_millis();
        let health = HealthStatus::from_healthy_count(replicas.len());
        let entry = VaultEntry {
            object_id: object_id.to_string(),
            display_name: name.to_string(),
            original_size,
            primary_checksum,
            replicas,
            replica_target: targets.len(),
            compress: options.compress,
            encrypt: options.encrypt,
            created_at: previous.as_ref().map(|p| p.created_at).unwrap_or(now),
            updated_at: now,
            last_verified_at: Some(now),
            health,
        };
        self.persist(&entry)?;

        info!(
            "Stored {} ({} bytes) on {}/{} backends",
            object_id,
            original_size,
            entry.replicas.len(),
            targets.len()
        );
        self.publish_health(object_id, previous.map(|p| p.health), health);
        Ok(entry)
    }

    /// Return the original bytes, repairing failed and absent replicas from
    /// the first intact one.
    pub async fn retrieve_with_healing(&self, object_id: &str) -> Result<Bytes> {
        let _guard = self.locks.lock(object_id).await;
        let mut entry = self.require_entry(object_id)?;

        let mut failed: Vec<ReplicaKind> = Vec::new();
        let mut recovered: Option<(Bytes, ReplicaLocation)> = None;

        for location in &entry.replicas {
            let read = self.read_replica(object_id, location).await;
            match read {
                ReplicaRead::Intact(data) => match self.decode(&entry, location, data).await {
                    Ok(plain) => {
                        recovered = Some((plain, location.clone()));
                        break;
                    }
                    Err(e) => {
                        warn!("{} replica of {} failed to decode: {}", location.kind, object_id, e);
                        failed.push(location.kind);
                    }
                },
                other => {
                    self.report_bad_replica(object_id, location.kind, &other);
                    failed.push(location.kind);
                }
            }
        }

        let (plain, source) = match recovered {
            Some(found) => found,
            None => {
                warn!("No readable replica of {}", object_id);
                let before = entry.health;
                entry.health = HealthStatus::Critical;
                self.persist(&entry)?;
                self.publish_health(object_id, Some(before), entry.health);
                return Err(Error::NotFound(object_id.to_string()));
            }
        };

        let present = entry.replica_kinds();
        let to_heal: Vec<ReplicaKind> = self
            .target_kinds(entry.replica_target)
            .into_iter()
            .filter(|k| failed.contains(k) || !present.contains(k))
            .filter(|k| self.replicas.accepts(*k, source.size))
            .collect();

        if to_heal.is_empty() && failed.is_empty() {
            return Ok(plain);
        }

        let healed = if to_heal.is_empty() {
            Vec::new()
        } else {
            self.heal_from(&mut entry, &plain, &source, &to_heal).await?
        };

        let still_failed = failed.iter().filter(|k| !healed.contains(k)).count();
        let before = entry.health;
        entry.health = HealthStatus::from_healthy_count(entry.replicas.len() - still_failed);
        if healed.is_empty() && entry.health == before {
            return Ok(plain);
        }
        self.persist(&entry)?;
        self.publish_health(object_id, Some(before), entry.health);

        Ok(plain)
    }

    /// Re-derive processed bytes from `plain` with the source replica's
    /// flags and write them to `kinds`, updating `entry.replicas`
    async fn heal_from(
        &self,
        entry: &mut VaultEntry,
        plain: &Bytes,
        source: &ReplicaLocation,
        kinds: &[ReplicaKind],
    ) -> Result<Vec<ReplicaKind>> {
        let processed = self
            .pipeline
            .process_offloaded(plain.clone(), source.compressed, source.encrypted)
            .await?;

        let results = self.write_replicas(&entry.object_id, &processed, kinds).await;
        let mut healed = Vec::new();
        for (kind, result) in results {
            match result {
                Ok(location) => {
                    entry.replicas.retain(|r| r.kind != kind);
                    entry.replicas.push(location);
                    healed.push(kind);
                    info!("Healed {} replica of {}", kind, entry.object_id);
                    self.events.emit(VaultEvent::ReplicaHealed {
                        object_id: entry.object_id.clone(),
                        kind,
                    });
                }
                Err(e) => warn!("Failed to heal {} replica of {}: {}", kind, entry.object_id, e),
            }
        }

        if !healed.is_empty() {
            self.sort_replicas(&mut entry.replicas);
            entry.updated_at = self.clock.now_millis();
        }
        Ok(healed)
    }

    /// Check every replica without repairing anything
    pub async fn verify_replica_integrity(&self, object_id: &str) -> Result<ReplicaVerification> {
        let _guard = self.locks.lock(object_id).await;
        let mut entry = self.require_entry(object_id)?;
        let (verification, _) = self.check_all(&entry).await;

        let before = entry.health;
        entry.health = verification.health;
        entry.last_verified_at = Some(self.clock.now_millis());
        self.persist(&entry)?;
        self.publish_health(object_id, Some(before), entry.health);

        Ok(verification)
    }

    /// Read all replicas concurrently; returns the verification and the
    /// intact bytes keyed by replica position
    async fn check_all(&self, entry: &VaultEntry) -> (ReplicaVerification, Vec<Option<Bytes>>) {
        let reads = join_all(
            entry
                .replicas
                .iter()
                .map(|location| self.read_replica(&entry.object_id, location)),
        )
        .await;

        let mut replicas = Vec::with_capacity(reads.len());
        let mut intact = Vec::with_capacity(reads.len());
        for (location, read) in entry.replicas.iter().zip(reads) {
            self.report_bad_replica(&entry.object_id, location.kind, &read);
            replicas.push(ReplicaCheck {
                kind: location.kind,
                status: read.status(),
            });
            intact.push(match read {
                ReplicaRead::Intact(data) => Some(data),
                _ => None,
            });
        }

        let healthy_count = replicas
            .iter()
            .filter(|r| r.status == ReplicaStatus::Healthy)
            .count();
        let verification = ReplicaVerification {
            object_id: entry.object_id.clone(),
            healthy: healthy_count > 0,
            health: HealthStatus::from_healthy_count(healthy_count),
            replicas,
        };
        (verification, intact)
    }

    /// Repair corrupted, missing and absent target replicas from the first
    /// intact one. A fully healthy object is left untouched.
    pub async fn heal(&self, object_id: &str) -> Result<Vec<ReplicaKind>> {
        self.heal_to(object_id, None).await
    }

    /// Like [`heal`](Self::heal), optionally raising the object's replica
    /// target first
    pub async fn heal_to(&self, object_id: &str, min_replicas: Option<usize>) -> Result<Vec<ReplicaKind>> {
        let _guard = self.locks.lock(object_id).await;
        let mut entry = self.require_entry(object_id)?;
        let (verification, intact) = self.check_all(&entry).await;

        let mut source: Option<(Bytes, ReplicaLocation)> = None;
        for (location, data) in entry.replicas.iter().zip(intact) {
            if let Some(data) = data {
                match self.decode(&entry, location, data).await {
                    Ok(plain) => {
                        source = Some((plain, location.clone()));
                        break;
                    }
                    Err(e) => warn!("{} replica of {} failed to decode: {}", location.kind, object_id, e),
                }
            }
        }

        let before = entry.health;
        let (plain, source) = match source {
            Some(found) => found,
            None => {
                entry.health = HealthStatus::Critical;
                entry.last_verified_at = Some(self.clock.now_millis());
                self.persist(&entry)?;
                self.publish_health(object_id, Some(before), entry.health);
                return Err(Error::AllBackendsFailed(object_id.to_string()));
            }
        };

        if let Some(min) = min_replicas {
            entry.replica_target = entry.replica_target.max(min.min(self.replicas.backend_count()));
        }

        let bad: Vec<ReplicaKind> = verification
            .replicas
            .iter()
            .filter(|r| r.status != ReplicaStatus::Healthy)
            .map(|r| r.kind)
            .collect();
        let present = entry.replica_kinds();
        let to_heal: Vec<ReplicaKind> = self
            .target_kinds(entry.replica_target)
            .into_iter()
            .filter(|k| bad.contains(k) || !present.contains(k))
            .collect();

        let healed = if to_heal.is_empty() {
            Vec::new()
        } else {
            self.heal_from(&mut entry, &plain, &source, &to_heal).await?
        };

        let still_bad = bad.iter().filter(|k| !healed.contains(k)).count();
        entry.health = HealthStatus::from_healthy_count(entry.replicas.len() - still_bad);
        entry.last_verified_at = Some(self.clock.now_millis());
        self.persist(&entry)?;
        self.publish_health(object_id, Some(before), entry.health);

        Ok(healed)
    }

    /// Decode the first intact replica; no repair and no index update
    pub async fn read_without_healing(&self, object_id: &str) -> Result<Bytes> {
        let _guard = self.locks.lock(object_id).await;
        let entry = self.require_entry(object_id)?;

        let mut last_error = None;
        for location in &entry.replicas {
            match self.read_replica(object_id, location).await {
                ReplicaRead::Intact(data) => match self.decode(&entry, location, data).await {
                    Ok(plain) => return Ok(plain),
                    Err(e) => last_error = Some(e),
                },
                ReplicaRead::Corrupted(actual) => {
                    last_error = Some(Error::ChecksumMismatch {
                        scope: ChecksumScope::Replica(location.kind),
                        expected: location.checksum.to_string(),
                        actual: actual.to_string(),
                    })
                }
                ReplicaRead::Missing(e) => last_error = Some(e),
            }
        }

        debug!(
            "No intact replica of {} ({})",
            object_id,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        );
        Err(Error::AllBackendsFailed(object_id.to_string()))
    }

    /// Read one replica's decoded bytes regardless of its checksum.
    ///
    /// Diagnostic only: feeds the binary diff of a damaged replica.
    pub async fn read_replica_raw(&self, object_id: &str, kind: ReplicaKind) -> Result<Bytes> {
        let entry = self.require_entry(object_id)?;
        let location = entry.replica(kind).ok_or_else(|| Error::ReplicaNotFound {
            object_id: object_id.to_string(),
            kind,
        })?;
        let data = self.replicas.read(object_id, kind).await?;
        self.pipeline
            .reverse_offloaded(data, location.compressed, location.encrypted)
            .await
    }

    /// Remove every replica and the index entry
    pub async fn delete(&self, object_id: &str) -> Result<()> {
        {
            let _guard = self.locks.lock(object_id).await;
            let entry = self.require_entry(object_id)?;

            for location in &entry.replicas {
                if let Err(e) = self.replicas.delete(object_id, location.kind).await {
                    warn!("Failed to delete {} replica of {}: {}", location.kind, object_id, e);
                    self.events.emit(VaultEvent::BackendFailed {
                        object_id: object_id.to_string(),
                        kind: location.kind,
                        operation: "delete",
                        reason: e.to_string(),
                    });
                }
            }

            self.entries.remove(object_id)?;
            self.entries.flush()?;
            info!("Deleted {}", object_id);
            self.events.emit(VaultEvent::ObjectDeleted {
                object_id: object_id.to_string(),
            });
        }
        self.locks.remove_idle();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::checksum;
    use crate::events::MemorySink;
    use crate::replica::ReplicaBackend;
    use crate::testing::{flip_byte, TestVault};

    fn payload(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i * 7 % 256) as u8).collect::<Vec<u8>>())
    }

    #[tokio::test]
    async fn test_store_on_three_backends_is_healthy() {
        let t = TestVault::new();
        let data = payload(1024);

        let entry = t
            .vault
            .store_with_redundancy("f1", "a.txt", data.clone(), StoreOptions::default())
            .await
            .unwrap();

        assert_eq!(entry.health, HealthStatus::Healthy);
        assert_eq!(entry.replicas.len(), 3);
        assert_eq!(
            entry.replica_kinds(),
            vec![ReplicaKind::Volatile, ReplicaKind::Local, ReplicaKind::Archive]
        );
        assert_eq!(entry.primary_checksum, checksum(&data));
        assert_eq!(entry.original_size, 1024);
        assert_eq!(t.vault.entry("f1").unwrap(), Some(entry));
    }

    #[tokio::test]
    async fn test_replica_count_is_clamped() {
        let t = TestVault::new();
        let options = StoreOptions {
            replica_count: 10,
            ..StoreOptions::default()
        };
        let entry = t
            .vault
            .store_with_redundancy("f1", "a", payload(10), options)
            .await
            .unwrap();
        assert_eq!(entry.replica_target, 3);
        assert_eq!(entry.replicas.len(), 3);

        let options = StoreOptions {
            replica_count: 1,
            ..StoreOptions::default()
        };
        let entry = t
            .vault
            .store_with_redundancy("f2", "b", payload(10), options)
            .await
            .unwrap();
        assert_eq!(entry.health, HealthStatus::Degraded);
        assert_eq!(entry.replica_kinds(), vec![ReplicaKind::Volatile]);
    }

    #[tokio::test]
    async fn test_zero_replicas_persists_nothing() {
        let t = TestVault::new();
        let options = StoreOptions {
            replica_count: 0,
            ..StoreOptions::default()
        };
        let err = t
            .vault
            .store_with_redundancy("f1", "a", payload(10), options)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AllBackendsFailed(_)));
        assert!(t.vault.entry("f1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_one_failing_backend_degrades_but_reads() {
        let t = TestVault::with_failing_local();
        let data = payload(2048);

        let entry = t
            .vault
            .store_with_redundancy("f1", "a.bin", data.clone(), StoreOptions::default())
            .await
            .unwrap();
        // Two of three written: still at least two intact replicas
        assert_eq!(entry.replicas.len(), 2);
        assert_eq!(entry.health, HealthStatus::Healthy);

        assert_eq!(t.vault.retrieve_with_healing("f1").await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_all_backends_failing() {
        let t = TestVault::all_failing();
        let err = t
            .vault
            .store_with_redundancy("f1", "a", payload(5), StoreOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AllBackendsFailed(_)));
        assert!(t.vault.entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupted_first_replica_example() {
        let t = TestVault::new();
        let data = payload(1024);
        t.vault
            .store_with_redundancy("f1", "a.txt", data.clone(), StoreOptions::default())
            .await
            .unwrap();

        flip_byte(t.volatile.as_ref(), "f1", 0).await;

        let verification = t.vault.verify_replica_integrity("f1").await.unwrap();
        assert!(verification.healthy);
        let statuses: Vec<ReplicaStatus> = verification.replicas.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![ReplicaStatus::Corrupted, ReplicaStatus::Healthy, ReplicaStatus::Healthy]
        );
        assert_eq!(t.vault.entry("f1").unwrap().unwrap().health, HealthStatus::Healthy);

        // Falls through to a healthy replica and repairs the corrupted one
        assert_eq!(t.vault.retrieve_with_healing("f1").await.unwrap(), data);
        let verification = t.vault.verify_replica_integrity("f1").await.unwrap();
        assert_eq!(verification.healthy_count(), 3);
    }

    #[tokio::test]
    async fn test_verify_publishes_degraded_and_critical() {
        let t = TestVault::new();
        t.vault
            .store_with_redundancy("f1", "a", payload(100), StoreOptions::default())
            .await
            .unwrap();

        flip_byte(t.volatile.as_ref(), "f1", 3).await;
        t.local.delete("f1").await.unwrap();
        let verification = t.vault.verify_replica_integrity("f1").await.unwrap();
        assert_eq!(verification.health, HealthStatus::Degraded);
        assert_eq!(verification.replicas[1].status, ReplicaStatus::Missing);

        flip_byte(t.archive.as_ref(), "f1", 3).await;
        let verification = t.vault.verify_replica_integrity("f1").await.unwrap();
        assert!(!verification.healthy);
        assert_eq!(t.vault.entry("f1").unwrap().unwrap().health, HealthStatus::Critical);

        let err = t.vault.retrieve_with_healing("f1").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_retrieve_heals_absent_target_kinds() {
        let t = TestVault::new();
        let data = payload(300);
        t.vault
            .store_with_redundancy("f1", "a", data.clone(), StoreOptions::default())
            .await
            .unwrap();

        // Simulate an entry that lost track of its archive replica
        let mut entry = t.vault.entry("f1").unwrap().unwrap();
        entry.replicas.retain(|r| r.kind != ReplicaKind::Archive);
        t.vault.persist(&entry).unwrap();
        t.archive.delete("f1").await.unwrap();

        assert_eq!(t.vault.retrieve_with_healing("f1").await.unwrap(), data);
        let entry = t.vault.entry("f1").unwrap().unwrap();
        assert_eq!(entry.replicas.len(), 3);
        assert!(t.archive.get("f1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_retrieve_skips_size_capped_backends() {
        let sink = Arc::new(MemorySink::new());
        let t = TestVault::with_volatile_limit(16, sink.clone());
        let data = payload(1024);
        let entry = t
            .vault
            .store_with_redundancy("f1", "a", data.clone(), StoreOptions::default())
            .await
            .unwrap();
        assert_eq!(
            entry.replica_kinds(),
            vec![ReplicaKind::Local, ReplicaKind::Archive]
        );
        sink.drain();

        for _ in 0..2 {
            assert_eq!(t.vault.retrieve_with_healing("f1").await.unwrap(), data);
        }
        assert!(sink.events().is_empty());
        assert!(t.volatile.get("f1").await.unwrap().is_none());
        assert_eq!(t.vault.entry("f1").unwrap(), Some(entry));
    }

    #[tokio::test]
    async fn test_heal_is_idempotent_on_healthy_object() {
        let t = TestVault::new();
        t.vault
            .store_with_redundancy("f1", "a", payload(64), StoreOptions::default())
            .await
            .unwrap();
        let before = t.vault.entry("f1").unwrap().unwrap();

        assert!(t.vault.heal("f1").await.unwrap().is_empty());
        assert!(t.vault.heal("f1").await.unwrap().is_empty());

        let after = t.vault.entry("f1").unwrap().unwrap();
        assert_eq!(after.replicas, before.replicas);
    }

    #[tokio::test]
    async fn test_heal_repairs_corrupted_and_missing() {
        let t = TestVault::new();
        let data = payload(4096);
        t.vault
            .store_with_redundancy("f1", "a", data.clone(), StoreOptions::default())
            .await
            .unwrap();

        flip_byte(t.volatile.as_ref(), "f1", 100).await;
        t.archive.delete("f1").await.unwrap();

        let healed = t.vault.heal("f1").await.unwrap();
        assert_eq!(healed, vec![ReplicaKind::Volatile, ReplicaKind::Archive]);
        assert_eq!(t.vault.verify_replica_integrity("f1").await.unwrap().healthy_count(), 3);
        assert_eq!(t.vault.read_without_healing("f1").await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_heal_to_raises_target() {
        let t = TestVault::new();
        let options = StoreOptions {
            replica_count: 1,
            ..StoreOptions::default()
        };
        t.vault
            .store_with_redundancy("f1", "a", payload(64), options)
            .await
            .unwrap();

        let healed = t.vault.heal_to("f1", Some(3)).await.unwrap();
        assert_eq!(healed, vec![ReplicaKind::Local, ReplicaKind::Archive]);
        let entry = t.vault.entry("f1").unwrap().unwrap();
        assert_eq!(entry.replica_target, 3);
        assert_eq!(entry.health, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_heal_without_source_fails() {
        let t = TestVault::new();
        t.vault
            .store_with_redundancy("f1", "a", payload(64), StoreOptions::default())
            .await
            .unwrap();
        for backend in t.backends() {
            backend.delete("f1").await.unwrap();
        }
        let err = t.vault.heal("f1").await.unwrap_err();
        assert!(matches!(err, Error::AllBackendsFailed(_)));
    }

    #[tokio::test]
    async fn test_read_without_healing_has_no_side_effects() {
        let t = TestVault::new();
        let data = payload(128);
        t.vault
            .store_with_redundancy("f1", "a", data.clone(), StoreOptions::default())
            .await
            .unwrap();
        flip_byte(t.volatile.as_ref(), "f1", 0).await;
        let before = t.vault.entry("f1").unwrap();

        assert_eq!(t.vault.read_without_healing("f1").await.unwrap(), data);
        assert_eq!(t.vault.entry("f1").unwrap(), before);
        // Corrupted replica is still corrupted
        assert_eq!(
            t.vault.verify_replica_integrity("f1").await.unwrap().replicas[0].status,
            ReplicaStatus::Corrupted
        );
    }

    #[tokio::test]
    async fn test_overwrite_keeps_created_at_and_drops_stale_replicas() {
        let t = TestVault::new();
        t.vault
            .store_with_redundancy("f1", "a", payload(64), StoreOptions::default())
            .await
            .unwrap();
        let first = t.vault.entry("f1").unwrap().unwrap();

        t.clock.advance(1000);
        let options = StoreOptions {
            replica_count: 1,
            ..StoreOptions::default()
        };
        let second = t
            .vault
            .store_with_redundancy("f1", "a", payload(32), options)
            .await
            .unwrap();

        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.updated_at, first.updated_at + 1000);
        assert!(t.archive.get("f1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_everything() {
        let t = TestVault::new();
        t.vault
            .store_with_redundancy("f1", "a", payload(64), StoreOptions::default())
            .await
            .unwrap();

        t.vault.delete("f1").await.unwrap();
        assert!(t.vault.entry("f1").unwrap().is_none());
        for backend in t.backends() {
            assert!(backend.get("f1").await.unwrap().is_none());
        }
        assert!(matches!(
            t.vault.retrieve_with_healing("f1").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(t.vault.delete("f1").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unknown_object() {
        let t = TestVault::new();
        assert!(matches!(
            t.vault.verify_replica_integrity("nope").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(t.vault.heal("nope").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_uncompressed_unencrypted_round_trip() {
        let t = TestVault::new();
        let data = payload(5000);
        let options = StoreOptions {
            compress: false,
            encrypt: false,
            replica_count: 2,
        };
        let entry = t
            .vault
            .store_with_redundancy("f1", "a", data.clone(), options)
            .await
            .unwrap();
        assert!(entry.replicas.iter().all(|r| !r.encrypted && !r.compressed));
        assert_eq!(entry.replicas[0].checksum, checksum(&data));
        assert_eq!(t.vault.retrieve_with_healing("f1").await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_events_are_emitted() {
        let sink = Arc::new(MemorySink::new());
        let t = TestVault::with_sink(sink.clone());
        t.vault
            .store_with_redundancy("f1", "a", payload(64), StoreOptions::default())
            .await
            .unwrap();
        flip_byte(t.volatile.as_ref(), "f1", 0).await;
        t.vault.heal("f1").await.unwrap();

        let events = sink.events();
        let written = events
            .iter()
            .filter(|e| matches!(e, VaultEvent::ReplicaWritten { .. }))
            .count();
        assert_eq!(written, 4);
        assert!(events.iter().any(|e| matches!(
            e,
            VaultEvent::ReplicaCorrupted { kind: ReplicaKind::Volatile, .. }
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            VaultEvent::ReplicaHealed { kind: ReplicaKind::Volatile, .. }
        )));
    }
}
