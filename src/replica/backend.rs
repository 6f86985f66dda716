//! Replica storage backends
//!
//! A backend stores opaque processed bytes by object id. Three media are
//! provided: process memory, the local filesystem and an embedded sled
//! database standing in for remote archival storage.

use super::ReplicaKind;
use crate::checksum::checksum;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::path::{Path, PathBuf};

/// Storage medium for one replica of every object
#[async_trait]
pub trait ReplicaBackend: Send + Sync {
    fn kind(&self) -> ReplicaKind;

    /// Human-readable location of an object's replica
    fn location(&self, object_id: &str) -> String;

    async fn put(&self, object_id: &str, data: Bytes) -> Result<()>;

    /// `Ok(None)` when the backend holds no replica for the object
    async fn get(&self, object_id: &str) -> Result<Option<Bytes>>;

    /// Deleting an absent replica is not an error
    async fn delete(&self, object_id: &str) -> Result<()>;

    /// Largest processed payload this backend accepts
    fn max_object_size(&self) -> Option<u64> {
        None
    }
}

/// In-process map; contents live as long as the backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: DashMap<String, Bytes>,
    max_object_size: Option<u64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_object_size(mut self, max: Option<u64>) -> Self {
        self.max_object_size = max;
        self
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ReplicaBackend for MemoryBackend {
    fn kind(&self) -> ReplicaKind {
        ReplicaKind::Volatile
    }

    fn location(&self, object_id: &str) -> String {
        format!("memory://{}", object_id)
    }

    async fn put(&self, object_id: &str, data: Bytes) -> Result<()> {
        self.objects.insert(object_id.to_string(), data);
        Ok(())
    }

    async fn get(&self, object_id: &str) -> Result<Option<Bytes>> {
        Ok(self.objects.get(object_id).map(|v| v.clone()))
    }

    async fn delete(&self, object_id: &str) -> Result<()> {
        self.objects.remove(object_id);
        Ok(())
    }

    fn max_object_size(&self) -> Option<u64> {
        self.max_object_size
    }
}

/// One file per object under a root directory
#[derive(Debug)]
pub struct DiskBackend {
    root: PathBuf,
    max_object_size: Option<u64>,
}

impl DiskBackend {
    /// Create the backend, creating `root` if needed
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            max_object_size: None,
        })
    }

    pub fn with_max_object_size(mut self, max: Option<u64>) -> Self {
        self.max_object_size = max;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Files are named by the SHA-256 of the id, a fixed-length safe name
    pub fn object_path(&self, object_id: &str) -> PathBuf {
        self.root
            .join(format!("{}.replica", checksum(object_id.as_bytes())))
    }

    fn unavailable(&self, e: std::io::Error) -> Error {
        Error::BackendUnavailable {
            kind: ReplicaKind::Local,
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl ReplicaBackend for DiskBackend {
    fn kind(&self) -> ReplicaKind {
        ReplicaKind::Local
    }

    fn location(&self, object_id: &str) -> String {
        format!("file://{}", self.object_path(object_id).display())
    }

    async fn put(&self, object_id: &str, data: Bytes) -> Result<()> {
        let path = self.object_path(object_id);
        let tmp = path.with_extension("replica.tmp");

        // Write then rename so readers never see a partial replica
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| self.unavailable(e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| self.unavailable(e))?;
        Ok(())
    }

    async fn get(&self, object_id: &str) -> Result<Option<Bytes>> {
        match tokio::fs::read(self.object_path(object_id)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.unavailable(e)),
        }
    }

    async fn delete(&self, object_id: &str) -> Result<()> {
        match tokio::fs::remove_file(self.object_path(object_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.unavailable(e)),
        }
    }

    fn max_object_size(&self) -> Option<u64> {
        self.max_object_size
    }
}

/// Replicas kept in a sled tree
pub struct ArchiveBackend {
    db: sled::Db,
    tree: sled::Tree,
    max_object_size: Option<u64>,
}

impl ArchiveBackend {
    const TREE_NAME: &'static str = "replicas";

    /// Open (or create) the archive database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(sled::open(path)?)
    }

    /// Throwaway archive removed on drop
    pub fn temporary() -> Result<Self> {
        Self::new(sled::Config::new().temporary(true).open()?)
    }

    pub fn new(db: sled::Db) -> Result<Self> {
        let tree = db.open_tree(Self::TREE_NAME)?;
        Ok(Self {
            db,
            tree,
            max_object_size: None,
        })
    }

    pub fn with_max_object_size(mut self, max: Option<u64>) -> Self {
        self.max_object_size = max;
        self
    }

    fn unavailable(e: sled::Error) -> Error {
        Error::BackendUnavailable {
            kind: ReplicaKind::Archive,
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl ReplicaBackend for ArchiveBackend {
    fn kind(&self) -> ReplicaKind {
        ReplicaKind::Archive
    }

    fn location(&self, object_id: &str) -> String {
        format!("archive://{}/{}", Self::TREE_NAME, object_id)
    }

    async fn put(&self, object_id: &str, data: Bytes) -> Result<()> {
        self.tree
            .insert(object_id.as_bytes(), data.as_ref())
            .map_err(Self::unavailable)?;
        self.db.flush_async().await.map_err(Self::unavailable)?;
        Ok(())
    }

    async fn get(&self, object_id: &str) -> Result<Option<Bytes>> {
        Ok(self
            .tree
            .get(object_id.as_bytes())
            .map_err(Self::unavailable)?
            .map(|v| Bytes::copy_from_slice(&v)))
    }

    async fn delete(&self, object_id: &str) -> Result<()> {
        self.tree
            .remove(object_id.as_bytes())
            .map_err(Self::unavailable)?;
        Ok(())
    }

    fn max_object_size(&self) -> Option<u64> {
        self.max_object_size
    }
}
