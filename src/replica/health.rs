//! Per-backend health tracking
//!
//! Every backend operation outcome is recorded here. Status is derived from
//! the run of consecutive failures and is informational: writes are still
//! attempted against an unavailable backend so it can recover.

use super::ReplicaKind;
use dashmap::DashMap;
use serde::Serialize;

/// Consecutive failures after which a backend is reported unavailable
pub const UNAVAILABLE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    Healthy,
    Degraded,
    Unavailable,
}

/// Counters for one backend
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackendHealth {
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl BackendHealth {
    pub fn status(&self) -> BackendStatus {
        match self.consecutive_failures {
            0 => BackendStatus::Healthy,
            n if n < UNAVAILABLE_THRESHOLD => BackendStatus::Degraded,
            _ => BackendStatus::Unavailable,
        }
    }
}

#[derive(Debug, Default)]
pub struct HealthTracker {
    backends: DashMap<ReplicaKind, BackendHealth>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, kind: ReplicaKind) {
        let mut health = self.backends.entry(kind).or_default();
        health.successes += 1;
        health.consecutive_failures = 0;
    }

    pub fn record_failure(&self, kind: ReplicaKind, error: &str) {
        let mut health = self.backends.entry(kind).or_default();
        health.failures += 1;
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        health.last_error = Some(error.to_string());
    }

    /// Backends never seen are assumed healthy
    pub fn backend_status(&self, kind: ReplicaKind) -> BackendStatus {
        self.backends
            .get(&kind)
            .map(|h| h.status())
            .unwrap_or(BackendStatus::Healthy)
    }

    pub fn backend_health(&self, kind: ReplicaKind) -> BackendHealth {
        self.backends
            .get(&kind)
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    /// Count of `kinds` currently reported healthy
    pub fn healthy_count(&self, kinds: &[ReplicaKind]) -> usize {
        kinds
            .iter()
            .filter(|k| self.backend_status(**k) == BackendStatus::Healthy)
            .count()
    }
}
