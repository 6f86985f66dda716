//! Structured engine events
//!
//! Storage boundaries emit a [`VaultEvent`] to the sink supplied by the
//! caller. The default sink forwards to `tracing`; [`MemorySink`] buffers
//! events for feeds and tests.

use crate::replica::ReplicaKind;
use crate::vault::HealthStatus;
use parking_lot::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum VaultEvent {
    ReplicaWritten {
        object_id: String,
        kind: ReplicaKind,
        size: u64,
    },
    BackendFailed {
        object_id: String,
        kind: ReplicaKind,
        operation: &'static str,
        reason: String,
    },
    ReplicaCorrupted {
        object_id: String,
        kind: ReplicaKind,
    },
    ReplicaHealed {
        object_id: String,
        kind: ReplicaKind,
    },
    HealthChanged {
        object_id: String,
        health: HealthStatus,
    },
    ObjectDeleted {
        object_id: String,
    },
    Quarantined {
        object_id: String,
        reason: String,
    },
    QuarantineReleased {
        object_id: String,
    },
    BackupCompleted {
        schedule_id: String,
        manifest_id: String,
        file_count: u64,
    },
    BackupFailed {
        schedule_id: String,
        reason: String,
    },
    ManifestsPruned {
        removed: usize,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: VaultEvent);
}

/// Forwards events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: VaultEvent) {
        match event {
            VaultEvent::ReplicaWritten { object_id, kind, size } => {
                info!(%object_id, %kind, size, "replica written");
            }
            VaultEvent::BackendFailed { object_id, kind, operation, reason } => {
                warn!(%object_id, %kind, operation, %reason, "backend operation failed");
            }
            VaultEvent::ReplicaCorrupted { object_id, kind } => {
                warn!(%object_id, %kind, "replica failed verification");
            }
            VaultEvent::ReplicaHealed { object_id, kind } => {
                info!(%object_id, %kind, "replica healed");
            }
            VaultEvent::HealthChanged { object_id, health } => {
                info!(%object_id, ?health, "health changed");
            }
            VaultEvent::ObjectDeleted { object_id } => {
                info!(%object_id, "object deleted");
            }
            VaultEvent::Quarantined { object_id, reason } => {
                error!(%object_id, %reason, "object quarantined");
            }
            VaultEvent::QuarantineReleased { object_id } => {
                info!(%object_id, "quarantine released");
            }
            VaultEvent::BackupCompleted { schedule_id, manifest_id, file_count } => {
                info!(%schedule_id, %manifest_id, file_count, "backup completed");
            }
            VaultEvent::BackupFailed { schedule_id, reason } => {
                error!(%schedule_id, %reason, "backup failed");
            }
            VaultEvent::ManifestsPruned { removed } => {
                info!(removed, "old manifests pruned");
            }
        }
    }
}

/// Buffers events in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<VaultEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far
    pub fn events(&self) -> Vec<VaultEvent> {
        self.events.lock().clone()
    }

    /// Remove and return buffered events
    pub fn drain(&self) -> Vec<VaultEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: VaultEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_buffers_and_drains() {
        let sink = MemorySink::new();
        sink.emit(VaultEvent::ObjectDeleted {
            object_id: "f1".to_string(),
        });
        sink.emit(VaultEvent::ManifestsPruned { removed: 2 });

        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.drain().len(), 2);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_tracing_sink_accepts_all_events() {
        TracingSink.emit(VaultEvent::ReplicaHealed {
            object_id: "f1".to_string(),
            kind: ReplicaKind::Archive,
        });
        TracingSink.emit(VaultEvent::HealthChanged {
            object_id: "f1".to_string(),
            health: HealthStatus::Degraded,
        });
    }
}
