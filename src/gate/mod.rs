//! Verification gate
//!
//! Checksums every boundary an object crosses: admission before a write, a
//! re-read after the write, and a comparison on download. Objects that fail
//! post-write verification are quarantined and stay unreadable until an
//! operator releases them. Every check leaves an [`IntegrityReport`] in a
//! bounded log.

mod upload;

pub use upload::{
    content_type_for, format_bytes, validate_for_upload, UploadPolicy, UploadValidation,
    DEFAULT_CONTENT_TYPE,
};

use crate::checksum::{Checksum, ChecksumEngine};
use crate::clock::Clock;
use crate::config::IntegrityConfig;
use crate::diff::{BinaryDiffAnalyzer, DiffResult, PatternType};
use crate::error::{Error, Result};
use crate::events::{EventSink, VaultEvent};
use crate::metadata::{MetadataStore, Table, Tree};
use crate::vault::{IntegrityVault, ReplicaCheck, ReplicaStatus};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Verified,
    CorruptionDetected,
    Quarantined,
}

/// One verification outcome; never modified after it is recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub id: String,
    pub object_id: String,
    pub name: String,
    pub expected_checksum: Checksum,
    /// `None` when no readable bytes were available
    pub computed_checksum: Option<Checksum>,
    pub expected_size: u64,
    pub actual_size: u64,
    pub size_match: bool,
    pub checksum_match: bool,
    pub corruption_detected: bool,
    pub diff: Option<DiffResult>,
    pub replicas: Vec<ReplicaCheck>,
    pub status: ReportStatus,
    pub error_details: Option<String>,
    pub timestamp: u64,
}

/// Manual hold on an object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub object_id: String,
    pub name: String,
    pub reason: String,
    pub original_checksum: Checksum,
    pub computed_checksum: Option<Checksum>,
    pub quarantined_at: u64,
    /// At least one replica was intact when the hold was placed
    pub recoverable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorruptionStatistics {
    pub total_reports: usize,
    pub corrupted: usize,
    /// Percentage of reports that detected corruption
    pub corruption_rate: f64,
    /// Pattern types seen in corrupted reports, most frequent first
    pub common_patterns: Vec<PatternType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VerificationStatistics {
    pub verified: usize,
    pub quarantined: usize,
    pub total: usize,
}

/// Values the gate compares; either side may come from a read
struct Comparison<'a> {
    object_id: &'a str,
    name: &'a str,
    expected: &'a Checksum,
    expected_size: u64,
    computed: Option<Checksum>,
    actual_size: u64,
}

pub struct VerificationGate {
    quarantine: Table<QuarantineRecord>,
    reports: Table<IntegrityReport>,
    /// Serialises quarantine updates and report appends
    report_seq: Mutex<u64>,
    quarantine_lock: Mutex<()>,
    max_reports: usize,
    policy: UploadPolicy,
    analyzer: BinaryDiffAnalyzer,
    engine: ChecksumEngine,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl VerificationGate {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        config: &IntegrityConfig,
        engine: ChecksumEngine,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let reports: Table<IntegrityReport> = Table::new(metadata.clone(), Tree::Reports);
        // Report keys are zero-padded sequence numbers; continue after the last one
        let next = reports
            .entries()?
            .last()
            .and_then(|(key, _)| key.parse::<u64>().ok())
            .map(|n| n + 1)
            .unwrap_or(0);

        Ok(Self {
            quarantine: Table::new(metadata, Tree::Quarantine),
            reports,
            report_seq: Mutex::new(next),
            quarantine_lock: Mutex::new(()),
            max_reports: config.max_reports.max(1),
            policy: UploadPolicy {
                max_size: config.max_upload_size,
                allowed_types: config.allowed_types.clone(),
            },
            analyzer: BinaryDiffAnalyzer::new(config.diff),
            engine,
            clock,
            events,
        })
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    /// Admission check against the configured policy
    pub fn validate_for_upload(&self, name: &str, data: &[u8]) -> UploadValidation {
        self.validate_with_policy(name, data, &self.policy)
    }

    pub fn validate_with_policy(&self, name: &str, data: &[u8], policy: &UploadPolicy) -> UploadValidation {
        let result = validate_for_upload(&self.engine, name, data, policy);
        if let Some(reason) = &result.error {
            debug!("Rejected upload of {}: {}", name, reason);
        }
        result
    }

    /// Re-read a just-written object and compare it with what the caller
    /// meant to store. A mismatch quarantines the object.
    pub async fn perform_post_write_verification(
        &self,
        vault: &IntegrityVault,
        object_id: &str,
        name: &str,
        expected: &Checksum,
        expected_size: u64,
    ) -> Result<IntegrityReport> {
        let verification = vault.verify_replica_integrity(object_id).await?;

        let (computed, actual_size, read_error) = match vault.read_without_healing(object_id).await {
            Ok(data) => {
                let size = data.len() as u64;
                (Some(self.engine.checksum_offloaded(data).await?), size, None)
            }
            Err(e) => (None, 0, Some(e.to_string())),
        };

        let comparison = Comparison {
            object_id,
            name,
            expected,
            expected_size,
            computed,
            actual_size,
        };
        let mut report = self.build_report(comparison, verification.replicas, None);

        if report.corruption_detected {
            if let Some(read_error) = read_error {
                let details = report.error_details.take().unwrap_or_default();
                report.error_details = Some(format!("{}; {}", details, read_error));
            }
            let reason = report
                .error_details
                .clone()
                .unwrap_or_else(|| "post-write verification failed".to_string());
            self.quarantine(QuarantineRecord {
                object_id: object_id.to_string(),
                name: name.to_string(),
                reason,
                original_checksum: expected.clone(),
                computed_checksum: report.computed_checksum.clone(),
                quarantined_at: report.timestamp,
                recoverable: verification.healthy,
            })?;
            report.status = ReportStatus::Quarantined;
        } else {
            debug!("Post-write verification of {} passed", object_id);
        }

        self.record_report(report)
    }

    /// Check every replica of a stored object and describe any damage,
    /// including a binary diff of the first corrupted replica against the
    /// intact bytes
    pub async fn inspect(&self, vault: &IntegrityVault, object_id: &str) -> Result<IntegrityReport> {
        let entry = vault
            .entry(object_id)?
            .ok_or_else(|| Error::NotFound(object_id.to_string()))?;
        let verification = vault.verify_replica_integrity(object_id).await?;

        let intact = vault.read_without_healing(object_id).await.ok();
        let (computed, actual_size) = match &intact {
            Some(data) => (
                Some(self.engine.checksum_offloaded(data.clone()).await?),
                data.len() as u64,
            ),
            None => (None, 0),
        };

        let mut diff = None;
        let corrupted = verification
            .replicas
            .iter()
            .find(|r| r.status == ReplicaStatus::Corrupted)
            .map(|r| r.kind);
        if let (Some(kind), Some(original)) = (corrupted, &intact) {
            match vault.read_replica_raw(object_id, kind).await {
                Ok(damaged) => {
                    diff = Some(self.analyzer.diff_offloaded(original.clone(), damaged).await?);
                }
                Err(e) => debug!("Cannot decode {} replica of {} for diff: {}", kind, object_id, e),
            }
        }

        let comparison = Comparison {
            object_id,
            name: &entry.display_name,
            expected: &entry.primary_checksum,
            expected_size: entry.original_size,
            computed,
            actual_size,
        };
        let all_healthy = verification
            .replicas
            .iter()
            .all(|r| r.status == ReplicaStatus::Healthy);
        let mut report = self.build_report(comparison, verification.replicas, diff);

        if !all_healthy && !report.corruption_detected {
            let damaged: Vec<String> = report
                .replicas
                .iter()
                .filter(|r| r.status != ReplicaStatus::Healthy)
                .map(|r| format!("{} {:?}", r.kind, r.status).to_lowercase())
                .collect();
            report.corruption_detected = true;
            report.status = ReportStatus::CorruptionDetected;
            report.error_details = Some(format!("Damaged replicas: {}", damaged.join(", ")));
        }
        if self.is_quarantined(object_id)? {
            report.status = ReportStatus::Quarantined;
        }

        self.record_report(report)
    }

    /// Compare a downloaded buffer with the bytes it should equal
    pub async fn verify_download_integrity(
        &self,
        object_id: &str,
        name: &str,
        original: Bytes,
        downloaded: Bytes,
        expected: &Checksum,
    ) -> Result<IntegrityReport> {
        let original_checksum = self.engine.checksum_offloaded(original.clone()).await?;
        let downloaded_checksum = self.engine.checksum_offloaded(downloaded.clone()).await?;

        let size_match = original.len() == downloaded.len();
        let checksum_match = original_checksum == downloaded_checksum
            && original_checksum.matches(expected.as_str());

        let diff = if size_match && checksum_match {
            None
        } else {
            Some(
                self.analyzer
                    .diff_offloaded(original.clone(), downloaded.clone())
                    .await?,
            )
        };

        let comparison = Comparison {
            object_id,
            name,
            expected,
            expected_size: original.len() as u64,
            computed: Some(downloaded_checksum),
            actual_size: downloaded.len() as u64,
        };
        let mut report = self.build_report(comparison, Vec::new(), diff);
        if !checksum_match && !report.corruption_detected {
            // Downloaded bytes match the expectation but the original does not
            report.corruption_detected = true;
            report.status = ReportStatus::CorruptionDetected;
            report.error_details = Some(format!(
                "Checksum mismatch: expected {}, original is {}",
                expected, original_checksum
            ));
        }

        if report.corruption_detected {
            warn!(
                "Download of {} failed integrity check: {}",
                object_id,
                report.error_details.as_deref().unwrap_or("")
            );
        }
        self.record_report(report)
    }

    fn build_report(
        &self,
        c: Comparison<'_>,
        replicas: Vec<ReplicaCheck>,
        diff: Option<DiffResult>,
    ) -> IntegrityReport {
        let size_match = c.computed.is_some() && c.actual_size == c.expected_size;
        let checksum_match = c
            .computed
            .as_ref()
            .map(|sum| sum.matches(c.expected.as_str()))
            .unwrap_or(false);
        let corruption_detected = !size_match || !checksum_match;

        let mut error_details = if c.computed.is_none() {
            Some("No readable copy of the object".to_string())
        } else if !size_match {
            Some(format!(
                "Size mismatch: expected {} bytes, got {} bytes",
                c.expected_size, c.actual_size
            ))
        } else if !checksum_match {
            Some(format!(
                "Checksum mismatch: expected {}, got {}",
                c.expected,
                c.computed.as_ref().map(|s| s.as_str()).unwrap_or("")
            ))
        } else {
            None
        };

        if let (Some(details), Some(diff)) = (error_details.as_mut(), diff.as_ref()) {
            if diff.differing_bytes > 0 {
                details.push_str(&format!(
                    ". Binary diff: {} bytes differ ({:.2}%)",
                    diff.differing_bytes, diff.differing_pct
                ));
            }
        }

        IntegrityReport {
            id: String::new(),
            object_id: c.object_id.to_string(),
            name: c.name.to_string(),
            expected_checksum: c.expected.clone(),
            computed_checksum: c.computed,
            expected_size: c.expected_size,
            actual_size: c.actual_size,
            size_match,
            checksum_match,
            corruption_detected,
            diff,
            replicas,
            status: if corruption_detected {
                ReportStatus::CorruptionDetected
            } else {
                ReportStatus::Verified
            },
            error_details,
            timestamp: self.clock.now_millis(),
        }
    }

    /// Append a report, assigning its id and evicting the oldest beyond the cap
    pub fn record_report(&self, mut report: IntegrityReport) -> Result<IntegrityReport> {
        let mut seq = self.report_seq.lock();
        let key = format!("{:020}", *seq);
        report.id = key.clone();
        self.reports.put(&key, &report)?;
        *seq += 1;

        let keys: Vec<String> = self.reports.entries()?.into_iter().map(|(k, _)| k).collect();
        if keys.len() > self.max_reports {
            for old in &keys[..keys.len() - self.max_reports] {
                self.reports.remove(old)?;
            }
        }
        self.reports.flush()?;
        Ok(report)
    }

    /// Report log, oldest first
    pub fn reports(&self) -> Result<Vec<IntegrityReport>> {
        self.reports.values()
    }

    pub fn reports_for(&self, object_id: &str) -> Result<Vec<IntegrityReport>> {
        Ok(self
            .reports()?
            .into_iter()
            .filter(|r| r.object_id == object_id)
            .collect())
    }

    pub fn clear_reports(&self) -> Result<usize> {
        let _seq = self.report_seq.lock();
        let removed = self.reports.clear()?;
        self.reports.flush()?;
        Ok(removed)
    }

    fn quarantine(&self, record: QuarantineRecord) -> Result<()> {
        let _guard = self.quarantine_lock.lock();
        error!(
            "Quarantining {} ({}): {}",
            record.object_id, record.name, record.reason
        );
        self.quarantine.put(&record.object_id, &record)?;
        self.quarantine.flush()?;
        self.events.emit(VaultEvent::Quarantined {
            object_id: record.object_id.clone(),
            reason: record.reason,
        });
        Ok(())
    }

    pub fn is_quarantined(&self, object_id: &str) -> Result<bool> {
        self.quarantine.contains(object_id)
    }

    /// `Quarantined` for held objects; every read path calls this first
    pub fn ensure_readable(&self, object_id: &str) -> Result<()> {
        if self.is_quarantined(object_id)? {
            return Err(Error::Quarantined(object_id.to_string()));
        }
        Ok(())
    }

    pub fn quarantine_record(&self, object_id: &str) -> Result<Option<QuarantineRecord>> {
        self.quarantine.get(object_id)
    }

    pub fn list_quarantined(&self) -> Result<Vec<QuarantineRecord>> {
        self.quarantine.values()
    }

    /// Release one object; returns whether it was held
    pub fn remove_from_quarantine(&self, object_id: &str) -> Result<bool> {
        let _guard = self.quarantine_lock.lock();
        let removed = self.quarantine.remove(object_id)?;
        if removed {
            self.quarantine.flush()?;
            info!("Released {} from quarantine", object_id);
            self.events.emit(VaultEvent::QuarantineReleased {
                object_id: object_id.to_string(),
            });
        }
        Ok(removed)
    }

    /// Release every held object
    pub fn clear_quarantine(&self) -> Result<usize> {
        let _guard = self.quarantine_lock.lock();
        let held = self.quarantine.values()?;
        let removed = self.quarantine.clear()?;
        self.quarantine.flush()?;
        for record in held {
            self.events.emit(VaultEvent::QuarantineReleased {
                object_id: record.object_id,
            });
        }
        info!("Cleared {} quarantined objects", removed);
        Ok(removed)
    }

    pub fn corruption_statistics(&self) -> Result<CorruptionStatistics> {
        let reports = self.reports()?;
        let corrupted: Vec<&IntegrityReport> =
            reports.iter().filter(|r| r.corruption_detected).collect();

        let mut counts: HashMap<PatternType, usize> = HashMap::new();
        for pattern in corrupted
            .iter()
            .filter_map(|r| r.diff.as_ref())
            .flat_map(|d| d.patterns.iter())
        {
            *counts.entry(pattern.pattern_type).or_insert(0) += 1;
        }
        let mut ranked: Vec<(PatternType, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let corruption_rate = if reports.is_empty() {
            0.0
        } else {
            corrupted.len() as f64 / reports.len() as f64 * 100.0
        };

        Ok(CorruptionStatistics {
            total_reports: reports.len(),
            corrupted: corrupted.len(),
            corruption_rate,
            common_patterns: ranked.into_iter().map(|(p, _)| p).collect(),
        })
    }

    pub fn verification_statistics(&self) -> Result<VerificationStatistics> {
        let reports = self.reports()?;
        Ok(VerificationStatistics {
            verified: reports
                .iter()
                .filter(|r| r.status == ReportStatus::Verified)
                .count(),
            quarantined: self.quarantine.values()?.len(),
            total: reports.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::checksum;
    use crate::clock::ManualClock;
    use crate::events::TracingSink;
    use crate::metadata::MemoryMetadataStore;
    use crate::testing::{flip_byte, TestVault, TEST_EPOCH};
    use crate::vault::StoreOptions;

    fn gate_with(metadata: Arc<dyn MetadataStore>, max_reports: usize) -> VerificationGate {
        let config = IntegrityConfig {
            max_reports,
            ..IntegrityConfig::default()
        };
        VerificationGate::new(
            metadata,
            &config,
            ChecksumEngine::default(),
            Arc::new(ManualClock::new(TEST_EPOCH)),
            Arc::new(TracingSink),
        )
        .unwrap()
    }

    fn gate() -> VerificationGate {
        gate_with(Arc::new(MemoryMetadataStore::new()), 100)
    }

    async fn stored(t: &TestVault, id: &str, data: &[u8]) -> Checksum {
        t.vault
            .store_with_redundancy(id, "a.txt", Bytes::copy_from_slice(data), StoreOptions::default())
            .await
            .unwrap()
            .primary_checksum
    }

    #[tokio::test]
    async fn test_post_write_verification_passes() {
        let t = TestVault::new();
        let gate = gate();
        let sum = stored(&t, "f1", b"hello world").await;

        let report = gate
            .perform_post_write_verification(&t.vault, "f1", "a.txt", &sum, 11)
            .await
            .unwrap();
        assert_eq!(report.status, ReportStatus::Verified);
        assert!(report.checksum_match && report.size_match);
        assert!(!gate.is_quarantined("f1").unwrap());
        gate.ensure_readable("f1").unwrap();
    }

    #[tokio::test]
    async fn test_mismatch_quarantines_until_released() {
        let t = TestVault::new();
        let gate = gate();
        stored(&t, "f1", b"hello world").await;
        let wrong = checksum(b"something else");

        let report = gate
            .perform_post_write_verification(&t.vault, "f1", "a.txt", &wrong, 11)
            .await
            .unwrap();
        assert_eq!(report.status, ReportStatus::Quarantined);
        assert!(report.corruption_detected);
        assert!(report.error_details.unwrap().starts_with("Checksum mismatch"));

        assert!(matches!(gate.ensure_readable("f1"), Err(Error::Quarantined(_))));
        let record = gate.quarantine_record("f1").unwrap().unwrap();
        assert!(record.recoverable);
        assert_eq!(record.original_checksum, wrong);

        assert!(gate.remove_from_quarantine("f1").unwrap());
        assert!(!gate.remove_from_quarantine("f1").unwrap());
        gate.ensure_readable("f1").unwrap();
    }

    #[tokio::test]
    async fn test_unreadable_write_is_unrecoverable() {
        let t = TestVault::new();
        let gate = gate();
        let sum = stored(&t, "f1", b"payload").await;
        for backend in t.backends() {
            flip_byte(backend.as_ref(), "f1", 0).await;
        }

        let report = gate
            .perform_post_write_verification(&t.vault, "f1", "a.txt", &sum, 7)
            .await
            .unwrap();
        assert_eq!(report.status, ReportStatus::Quarantined);
        assert!(report.computed_checksum.is_none());
        assert!(!gate.quarantine_record("f1").unwrap().unwrap().recoverable);
    }

    #[tokio::test]
    async fn test_inspect_diffs_corrupted_replica() {
        let t = TestVault::new();
        let gate = gate();
        let data: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
        let options = StoreOptions {
            compress: false,
            encrypt: false,
            replica_count: 3,
        };
        t.vault
            .store_with_redundancy("f1", "a.bin", Bytes::from(data), options)
            .await
            .unwrap();
        flip_byte(t.local.as_ref(), "f1", 500).await;

        let report = gate.inspect(&t.vault, "f1").await.unwrap();
        assert_eq!(report.status, ReportStatus::CorruptionDetected);
        assert!(report.checksum_match);
        let diff = report.diff.unwrap();
        assert_eq!(diff.differing_bytes, 1);
        assert_eq!(diff.first_diff_offset, Some(500));
        assert_eq!(diff.patterns[0].pattern_type, PatternType::Corruption);
    }

    #[tokio::test]
    async fn test_inspect_healthy_object() {
        let t = TestVault::new();
        let gate = gate();
        stored(&t, "f1", b"fine").await;
        let report = gate.inspect(&t.vault, "f1").await.unwrap();
        assert_eq!(report.status, ReportStatus::Verified);
        assert!(report.diff.is_none());
        assert!(matches!(gate.inspect(&t.vault, "nope").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_download_truncation_report() {
        let gate = gate();
        let original = Bytes::from(vec![7u8; 1000]);
        let downloaded = original.slice(..960);
        let expected = checksum(&original);

        let report = gate
            .verify_download_integrity("f1", "a.bin", original, downloaded, &expected)
            .await
            .unwrap();
        assert!(report.corruption_detected);
        assert!(!report.size_match);
        let details = report.error_details.unwrap();
        assert!(details.starts_with("Size mismatch: expected 1000 bytes, got 960 bytes"));
        assert!(details.contains("40 bytes differ (4.00%)"));
        // The missing tail is absent on the downloaded side
        assert_eq!(
            report.diff.unwrap().patterns[0].pattern_type,
            PatternType::Deletion
        );
    }

    #[tokio::test]
    async fn test_report_log_is_capped() {
        let gate = gate_with(Arc::new(MemoryMetadataStore::new()), 3);
        let data = Bytes::from_static(b"abc");
        let sum = checksum(&data);
        for _ in 0..5 {
            gate.verify_download_integrity("f1", "a", data.clone(), data.clone(), &sum)
                .await
                .unwrap();
        }
        let reports = gate.reports().unwrap();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].id, format!("{:020}", 2));
        assert_eq!(gate.clear_reports().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_report_ids_continue_after_reopen() {
        let metadata: Arc<dyn MetadataStore> = Arc::new(MemoryMetadataStore::new());
        let data = Bytes::from_static(b"abc");
        let sum = checksum(&data);

        let first = gate_with(metadata.clone(), 10)
            .verify_download_integrity("f1", "a", data.clone(), data.clone(), &sum)
            .await
            .unwrap();
        let second = gate_with(metadata, 10)
            .verify_download_integrity("f1", "a", data.clone(), data, &sum)
            .await
            .unwrap();
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn test_statistics() {
        let gate = gate();
        let good = Bytes::from(vec![1u8; 100]);
        let mut bad = good.to_vec();
        bad[10] = 0;
        bad[80] = 0;
        let sum = checksum(&good);

        gate.verify_download_integrity("a", "a", good.clone(), good.clone(), &sum)
            .await
            .unwrap();
        gate.verify_download_integrity("b", "b", good.clone(), Bytes::from(bad), &sum)
            .await
            .unwrap();

        let stats = gate.corruption_statistics().unwrap();
        assert_eq!(stats.total_reports, 2);
        assert_eq!(stats.corrupted, 1);
        assert_eq!(stats.corruption_rate, 50.0);
        assert_eq!(stats.common_patterns, vec![PatternType::Corruption]);

        let verification = gate.verification_statistics().unwrap();
        assert_eq!(verification.verified, 1);
        assert_eq!(verification.total, 2);
        assert_eq!(verification.quarantined, 0);
    }

    #[tokio::test]
    async fn test_clear_quarantine() {
        let t = TestVault::new();
        let gate = gate();
        let wrong = checksum(b"nope");
        for id in ["f1", "f2"] {
            stored(&t, id, b"x").await;
            gate.perform_post_write_verification(&t.vault, id, "x", &wrong, 1)
                .await
                .unwrap();
        }
        assert_eq!(gate.list_quarantined().unwrap().len(), 2);
        assert_eq!(gate.clear_quarantine().unwrap(), 2);
        assert!(gate.list_quarantined().unwrap().is_empty());
    }

    #[test]
    fn test_validate_uses_configured_policy() {
        let config = IntegrityConfig {
            max_upload_size: Some(2),
            ..IntegrityConfig::default()
        };
        let gate = VerificationGate::new(
            Arc::new(MemoryMetadataStore::new()),
            &config,
            ChecksumEngine::default(),
            Arc::new(ManualClock::new(0)),
            Arc::new(TracingSink),
        )
        .unwrap();
        assert!(!gate.validate_for_upload("a.txt", b"abc").valid);
        assert!(gate.validate_for_upload("a.txt", b"ab").valid);
    }
}
