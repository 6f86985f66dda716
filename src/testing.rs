//! Shared fixtures for unit tests

use crate::checksum::ChecksumEngine;
use crate::clock::ManualClock;
use crate::crypto::{VaultKey, XorCipher};
use crate::error::{Error, Result};
use crate::events::{EventSink, TracingSink};
use crate::metadata::MemoryMetadataStore;
use crate::replica::{
    ArchiveBackend, DiskBackend, MemoryBackend, Pipeline, ReplicaBackend, ReplicaKind,
    ReplicaStore, RetryPolicy,
};
use crate::vault::IntegrityVault;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tempfile::TempDir;

/// Start time of every test clock (2023-11-14T22:13:20Z)
pub const TEST_EPOCH: u64 = 1_700_000_000_000;

/// Backend whose every operation fails
#[derive(Debug)]
pub struct FailingBackend {
    kind: ReplicaKind,
}

impl FailingBackend {
    pub fn new(kind: ReplicaKind) -> Self {
        Self { kind }
    }

    fn fail(&self) -> Error {
        Error::BackendUnavailable {
            kind: self.kind,
            reason: "simulated outage".to_string(),
        }
    }
}

#[async_trait]
impl ReplicaBackend for FailingBackend {
    fn kind(&self) -> ReplicaKind {
        self.kind
    }

    fn location(&self, object_id: &str) -> String {
        format!("failing://{}", object_id)
    }

    async fn put(&self, _object_id: &str, _data: Bytes) -> Result<()> {
        Err(self.fail())
    }

    async fn get(&self, _object_id: &str) -> Result<Option<Bytes>> {
        Err(self.fail())
    }

    async fn delete(&self, _object_id: &str) -> Result<()> {
        Err(self.fail())
    }
}

/// Backend that silently damages what it stores
#[derive(Debug)]
pub struct CorruptingBackend {
    inner: MemoryBackend,
    kind: ReplicaKind,
}

impl CorruptingBackend {
    pub fn new(kind: ReplicaKind) -> Self {
        Self {
            inner: MemoryBackend::new(),
            kind,
        }
    }
}

#[async_trait]
impl ReplicaBackend for CorruptingBackend {
    fn kind(&self) -> ReplicaKind {
        self.kind
    }

    fn location(&self, object_id: &str) -> String {
        format!("corrupting://{}", object_id)
    }

    async fn put(&self, object_id: &str, data: Bytes) -> Result<()> {
        let mut damaged = data.to_vec();
        match damaged.first_mut() {
            Some(b) => *b ^= 0xff,
            None => damaged.push(0),
        }
        self.inner.put(object_id, Bytes::from(damaged)).await
    }

    async fn get(&self, object_id: &str) -> Result<Option<Bytes>> {
        self.inner.get(object_id).await
    }

    async fn delete(&self, object_id: &str) -> Result<()> {
        self.inner.delete(object_id).await
    }
}

/// Flip one byte of a stored replica in place
pub async fn flip_byte(backend: &dyn ReplicaBackend, object_id: &str, offset: usize) {
    let data = backend
        .get(object_id)
        .await
        .unwrap()
        .expect("replica present");
    let mut damaged = data.to_vec();
    let at = offset % damaged.len();
    damaged[at] ^= 0xff;
    backend.put(object_id, Bytes::from(damaged)).await.unwrap();
}

pub fn test_pipeline() -> Pipeline {
    Pipeline::new(
        Arc::new(XorCipher::new(VaultKey::generate())),
        64,
        ChecksumEngine::new(4096),
    )
}

/// Vault over memory, disk and archive backends with a manual clock
pub struct TestVault {
    pub vault: IntegrityVault,
    pub volatile: Arc<dyn ReplicaBackend>,
    pub local: Arc<dyn ReplicaBackend>,
    pub archive: Arc<dyn ReplicaBackend>,
    pub clock: Arc<ManualClock>,
    pub metadata: Arc<MemoryMetadataStore>,
    _dir: TempDir,
}

impl TestVault {
    pub fn new() -> Self {
        Self::build(false, false, None, Arc::new(TracingSink))
    }

    pub fn with_failing_local() -> Self {
        Self::build(true, false, None, Arc::new(TracingSink))
    }

    pub fn all_failing() -> Self {
        Self::build(true, true, None, Arc::new(TracingSink))
    }

    pub fn with_sink(sink: Arc<dyn EventSink>) -> Self {
        Self::build(false, false, None, sink)
    }

    /// Volatile backend refuses processed payloads above `max` bytes
    pub fn with_volatile_limit(max: u64, sink: Arc<dyn EventSink>) -> Self {
        Self::build(false, false, Some(max), sink)
    }

    fn build(
        fail_local: bool,
        fail_rest: bool,
        volatile_limit: Option<u64>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();

        let volatile: Arc<dyn ReplicaBackend> = if fail_rest {
            Arc::new(FailingBackend::new(ReplicaKind::Volatile))
        } else {
            Arc::new(MemoryBackend::new().with_max_object_size(volatile_limit))
        };
        let local: Arc<dyn ReplicaBackend> = if fail_local {
            Arc::new(FailingBackend::new(ReplicaKind::Local))
        } else {
            Arc::new(DiskBackend::open(dir.path().join("replicas")).unwrap())
        };
        let archive: Arc<dyn ReplicaBackend> = if fail_rest {
            Arc::new(FailingBackend::new(ReplicaKind::Archive))
        } else {
            Arc::new(ArchiveBackend::temporary().unwrap())
        };

        let clock = Arc::new(ManualClock::new(TEST_EPOCH));
        let store = ReplicaStore::new(
            vec![volatile.clone(), local.clone(), archive.clone()],
            RetryPolicy::none(),
            clock.clone(),
        )
        .unwrap();
        let metadata = Arc::new(MemoryMetadataStore::new());
        let vault = IntegrityVault::new(
            Arc::new(store),
            test_pipeline(),
            metadata.clone(),
            clock.clone(),
            events,
        );

        Self {
            vault,
            volatile,
            local,
            archive,
            clock,
            metadata,
            _dir: dir,
        }
    }

    pub fn backends(&self) -> Vec<Arc<dyn ReplicaBackend>> {
        vec![self.volatile.clone(), self.local.clone(), self.archive.clone()]
    }
}
