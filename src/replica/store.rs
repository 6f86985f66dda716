//! Replica store: routes replica I/O to the backend of a given kind

use super::backend::ReplicaBackend;
use super::health::HealthTracker;
use super::pipeline::Processed;
use super::retry::RetryPolicy;
use super::{ReplicaKind, ReplicaLocation};
use crate::clock::Clock;
use crate::error::{Error, Result};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// The configured backends, in priority order
pub struct ReplicaStore {
    backends: Vec<Arc<dyn ReplicaBackend>>,
    health: HealthTracker,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl ReplicaStore {
    /// Backends are kept in the given order; a later backend of an already
    /// registered kind is rejected
    pub fn new(
        backends: Vec<Arc<dyn ReplicaBackend>>,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        for (i, backend) in backends.iter().enumerate() {
            if backends[..i].iter().any(|b| b.kind() == backend.kind()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate {} backend",
                    backend.kind()
                )));
            }
        }

        Ok(Self {
            backends,
            health: HealthTracker::new(),
            retry,
            clock,
        })
    }

    /// Backend kinds in priority order
    pub fn kinds(&self) -> Vec<ReplicaKind> {
        self.backends.iter().map(|b| b.kind()).collect()
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    /// Whether the `kind` backend takes a processed payload of `size` bytes
    pub fn accepts(&self, kind: ReplicaKind, size: u64) -> bool {
        self.backends
            .iter()
            .find(|b| b.kind() == kind)
            .and_then(|b| b.max_object_size())
            .map_or(true, |max| size <= max)
    }

    fn backend(&self, kind: ReplicaKind) -> Result<&Arc<dyn ReplicaBackend>> {
        self.backends
            .iter()
            .find(|b| b.kind() == kind)
            .ok_or_else(|| Error::BackendUnavailable {
                kind,
                reason: "backend not configured".to_string(),
            })
    }

    /// Write processed bytes to one backend
    pub async fn write(
        &self,
        object_id: &str,
        processed: &Processed,
        kind: ReplicaKind,
    ) -> Result<ReplicaLocation> {
        let backend = self.backend(kind)?;
        let size = processed.data.len() as u64;

        if !self.accepts(kind, size) {
            let max = backend.max_object_size().unwrap_or(u64::MAX);
            debug!(
                "Skipping {} replica of {}: {} bytes exceeds limit of {}",
                kind, object_id, size, max
            );
            return Err(Error::BackendUnavailable {
                kind,
                reason: format!("object of {} bytes exceeds backend limit of {}", size, max),
            });
        }

        let backend_ref: &dyn ReplicaBackend = backend.as_ref();
        let data = &processed.data;
        let result = self
            .retry
            .run(&format!("{} write of {}", kind, object_id), move || {
                backend_ref.put(object_id, data.clone())
            })
            .await;

        match result {
            Ok(()) => {
                self.health.record_success(kind);
                Ok(ReplicaLocation {
                    kind,
                    path: backend.location(object_id),
                    checksum: processed.checksum.clone(),
                    size,
                    encrypted: processed.encrypted,
                    compressed: processed.compressed,
                    created_at: self.clock.now_millis(),
                })
            }
            Err(e) => {
                self.health.record_failure(kind, &e.to_string());
                warn!("Failed to write {} replica of {}: {}", kind, object_id, e);
                Err(into_backend_error(kind, e))
            }
        }
    }

    /// Read the stored bytes of one replica
    pub async fn read(&self, object_id: &str, kind: ReplicaKind) -> Result<Bytes> {
        let backend = self.backend(kind)?;
        let backend_ref: &dyn ReplicaBackend = backend.as_ref();

        let result = self
            .retry
            .run(&format!("{} read of {}", kind, object_id), move || {
                backend_ref.get(object_id)
            })
            .await;

        match result {
            Ok(Some(data)) => {
                self.health.record_success(kind);
                Ok(data)
            }
            Ok(None) => {
                // The backend answered; a missing replica says nothing about its health
                self.health.record_success(kind);
                Err(Error::ReplicaNotFound {
                    object_id: object_id.to_string(),
                    kind,
                })
            }
            Err(e) => {
                self.health.record_failure(kind, &e.to_string());
                warn!("Failed to read {} replica of {}: {}", kind, object_id, e);
                Err(into_backend_error(kind, e))
            }
        }
    }

    /// Remove one replica
    pub async fn delete(&self, object_id: &str, kind: ReplicaKind) -> Result<()> {
        let backend = self.backend(kind)?;
        let backend_ref: &dyn ReplicaBackend = backend.as_ref();

        let result = self
            .retry
            .run(&format!("{} delete of {}", kind, object_id), move || {
                backend_ref.delete(object_id)
            })
            .await;

        match result {
            Ok(()) => {
                self.health.record_success(kind);
                Ok(())
            }
            Err(e) => {
                self.health.record_failure(kind, &e.to_string());
                warn!("Failed to delete {} replica of {}: {}", kind, object_id, e);
                Err(into_backend_error(kind, e))
            }
        }
    }
}

fn into_backend_error(kind: ReplicaKind, e: Error) -> Error {
    match e {
        Error::BackendUnavailable { .. } => e,
        other => Error::BackendUnavailable {
            kind,
            reason: other.to_string(),
        },
    }
}
