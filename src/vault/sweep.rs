//! Integrity sweep over every stored object
//!
//! Verifies all replicas of all objects with bounded concurrency, reports
//! every damaged replica as an issue and optionally heals objects that still
//! have an intact source.

use super::{IntegrityVault, ReplicaStatus, ReplicaVerification};
use crate::replica::ReplicaKind;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn};

/// Progress of a running sweep
#[derive(Debug, Clone)]
pub struct SweepProgress {
    pub total: usize,
    pub processed: usize,
    /// Objects with every replica intact
    pub verified: usize,
    /// Objects with at least one damaged replica
    pub failed: usize,
    pub phase: SweepPhase,
}

impl SweepProgress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            processed: 0,
            verified: 0,
            failed: 0,
            phase: SweepPhase::Starting,
        }
    }

    /// Progress as a fraction (0.0 to 1.0)
    pub fn progress_fraction(&self) -> f32 {
        if self.total == 0 {
            return 1.0;
        }
        self.processed as f32 / self.total as f32
    }

    pub fn progress_percent(&self) -> u8 {
        (self.progress_fraction() * 100.0) as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepPhase {
    Starting,
    Processing,
    /// Finished with every object recoverable
    Completed,
    /// Finished with at least one object that has no intact replica
    Failed,
}

pub type ProgressCallback = Box<dyn Fn(SweepProgress) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepOptions {
    /// Objects verified at once
    pub concurrency: usize,
    /// Repair damaged replicas as they are found
    pub auto_heal: bool,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            auto_heal: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueKind {
    Corrupted,
    Missing,
    /// The object's index record could not be checked at all
    Unreadable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Severity of one damaged replica given how many intact ones remain
    pub fn assess(issue: IssueKind, healthy_replicas: usize) -> Self {
        match (healthy_replicas, issue) {
            (0, _) | (_, IssueKind::Unreadable) => Severity::Critical,
            (1, _) => Severity::High,
            (_, IssueKind::Corrupted) => Severity::Medium,
            (_, IssueKind::Missing) => Severity::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityIssue {
    pub object_id: String,
    pub name: String,
    /// Damaged replica, `None` when the whole object could not be checked
    pub kind: Option<ReplicaKind>,
    pub issue: IssueKind,
    pub severity: Severity,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub total: usize,
    pub verified: usize,
    pub corrupted: usize,
    /// Objects left without any intact replica
    pub unrecoverable: usize,
    /// Replicas rewritten by auto-heal
    pub healed: usize,
    pub issues: Vec<IntegrityIssue>,
    pub duration_ms: u64,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Outcome for one object
struct ObjectSweep {
    clean: bool,
    recoverable: bool,
    healed: usize,
    issues: Vec<IntegrityIssue>,
}

impl IntegrityVault {
    /// Verify every object, optionally healing as it goes
    pub async fn sweep(
        &self,
        options: SweepOptions,
        progress_callback: Option<ProgressCallback>,
    ) -> crate::error::Result<SweepReport> {
        let started = Instant::now();
        let entries = self.entries()?;
        let total = entries.len();
        info!("Starting integrity sweep of {} objects", total);

        let mut progress = SweepProgress::new(total);
        progress.phase = SweepPhase::Processing;
        if let Some(ref cb) = progress_callback {
            cb(progress.clone());
        }

        let mut report = SweepReport {
            total,
            ..SweepReport::default()
        };

        let mut results = stream::iter(entries)
            .map(|entry| async move {
                self.sweep_object(&entry.object_id, &entry.display_name, options.auto_heal)
                    .await
            })
            .buffer_unordered(options.concurrency.max(1));

        while let Some(outcome) = results.next().await {
            if outcome.clean {
                report.verified += 1;
                progress.verified += 1;
            } else {
                report.corrupted += 1;
                progress.failed += 1;
            }
            if !outcome.recoverable {
                report.unrecoverable += 1;
            }
            report.healed += outcome.healed;
            report.issues.extend(outcome.issues);
            progress.processed += 1;

            if let Some(ref cb) = progress_callback {
                cb(progress.clone());
            }
        }

        progress.phase = if report.unrecoverable == 0 {
            SweepPhase::Completed
        } else {
            SweepPhase::Failed
        };
        if let Some(ref cb) = progress_callback {
            cb(progress);
        }

        report
            .issues
            .sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.object_id.cmp(&b.object_id)));
        report.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            "Sweep completed: {}/{} objects intact, {} damaged, {} unrecoverable, {} replicas healed",
            report.verified, total, report.corrupted, report.unrecoverable, report.healed
        );
        Ok(report)
    }

    async fn sweep_object(&self, object_id: &str, name: &str, auto_heal: bool) -> ObjectSweep {
        let verification = match self.verify_replica_integrity(object_id).await {
            Ok(v) => v,
            Err(e) => {
                warn!("Could not verify {} during sweep: {}", object_id, e);
                return ObjectSweep {
                    clean: false,
                    recoverable: false,
                    healed: 0,
                    issues: vec![IntegrityIssue {
                        object_id: object_id.to_string(),
                        name: name.to_string(),
                        kind: None,
                        issue: IssueKind::Unreadable,
                        severity: Severity::Critical,
                        detail: e.to_string(),
                    }],
                };
            }
        };

        let issues = collect_issues(&verification, name);
        let mut outcome = ObjectSweep {
            clean: issues.is_empty(),
            recoverable: verification.healthy,
            healed: 0,
            issues,
        };

        if auto_heal && !outcome.clean && verification.healthy {
            match self.heal(object_id).await {
                Ok(healed) => outcome.healed = healed.len(),
                Err(e) => warn!("Auto-heal of {} failed: {}", object_id, e),
            }
        }

        outcome
    }
}

fn collect_issues(verification: &ReplicaVerification, name: &str) -> Vec<IntegrityIssue> {
    let healthy = verification.healthy_count();
    verification
        .replicas
        .iter()
        .filter_map(|check| {
            let issue = match check.status {
                ReplicaStatus::Healthy => return None,
                ReplicaStatus::Corrupted => IssueKind::Corrupted,
                ReplicaStatus::Missing => IssueKind::Missing,
            };
            Some(IntegrityIssue {
                object_id: verification.object_id.clone(),
                name: name.to_string(),
                kind: Some(check.kind),
                issue,
                severity: Severity::assess(issue, healthy),
                detail: format!("{} replica is {:?}", check.kind, check.status).to_lowercase(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::ReplicaBackend;
    use crate::testing::{flip_byte, TestVault};
    use crate::vault::StoreOptions;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn populate(t: &TestVault, count: usize) {
        for i in 0..count {
            t.vault
                .store_with_redundancy(
                    &format!("obj-{}", i),
                    &format!("file{}.bin", i),
                    Bytes::from(vec![i as u8; 500]),
                    StoreOptions::default(),
                )
                .await
                .unwrap();
        }
    }

    #[test]
    fn test_severity_assessment() {
        assert_eq!(Severity::assess(IssueKind::Missing, 0), Severity::Critical);
        assert_eq!(Severity::assess(IssueKind::Corrupted, 1), Severity::High);
        assert_eq!(Severity::assess(IssueKind::Corrupted, 2), Severity::Medium);
        assert_eq!(Severity::assess(IssueKind::Missing, 2), Severity::Low);
        assert_eq!(Severity::assess(IssueKind::Unreadable, 3), Severity::Critical);
    }

    #[test]
    fn test_progress_fraction() {
        let mut progress = SweepProgress::new(4);
        assert_eq!(progress.progress_percent(), 0);
        progress.processed = 2;
        assert_eq!(progress.progress_fraction(), 0.5);
        assert_eq!(SweepProgress::new(0).progress_fraction(), 1.0);
    }

    #[tokio::test]
    async fn test_clean_sweep() {
        let t = TestVault::new();
        populate(&t, 5).await;

        let report = t.vault.sweep(SweepOptions::default(), None).await.unwrap();
        assert_eq!(report.total, 5);
        assert_eq!(report.verified, 5);
        assert!(report.is_clean());
        assert_eq!(report.healed, 0);
    }

    #[tokio::test]
    async fn test_sweep_reports_and_heals() {
        let t = TestVault::new();
        populate(&t, 3).await;
        flip_byte(t.volatile.as_ref(), "obj-1", 0).await;
        t.archive.delete("obj-2").await.unwrap();

        let report = t.vault.sweep(SweepOptions::default(), None).await.unwrap();
        assert_eq!(report.verified, 1);
        assert_eq!(report.corrupted, 2);
        assert_eq!(report.unrecoverable, 0);
        assert_eq!(report.healed, 2);
        // Medium (corrupted) sorts before Low (missing)
        assert_eq!(report.issues[0].issue, IssueKind::Corrupted);
        assert_eq!(report.issues[0].severity, Severity::Medium);
        assert_eq!(report.issues[1].kind, Some(ReplicaKind::Archive));
        assert_eq!(report.issues[1].severity, Severity::Low);

        let again = t.vault.sweep(SweepOptions::default(), None).await.unwrap();
        assert!(again.is_clean());
    }

    #[tokio::test]
    async fn test_sweep_without_heal_leaves_damage() {
        let t = TestVault::new();
        populate(&t, 2).await;
        flip_byte(t.local.as_ref(), "obj-0", 1).await;

        let options = SweepOptions {
            concurrency: 1,
            auto_heal: false,
        };
        let first = t.vault.sweep(options, None).await.unwrap();
        let second = t.vault.sweep(options, None).await.unwrap();
        assert_eq!(first.issues, second.issues);
        assert_eq!(second.healed, 0);
    }

    #[tokio::test]
    async fn test_unrecoverable_object() {
        let t = TestVault::new();
        populate(&t, 1).await;
        for backend in t.backends() {
            backend.delete("obj-0").await.unwrap();
        }

        let phases = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let callback: ProgressCallback = {
            let phases = phases.clone();
            let calls = calls.clone();
            Box::new(move |p: SweepProgress| {
                calls.fetch_add(1, Ordering::SeqCst);
                phases.lock().push(p.phase);
            })
        };

        let report = t.vault.sweep(SweepOptions::default(), Some(callback)).await.unwrap();
        assert_eq!(report.unrecoverable, 1);
        assert!(report.issues.iter().all(|i| i.severity == Severity::Critical));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(phases.lock().last(), Some(&SweepPhase::Failed));
    }
}
