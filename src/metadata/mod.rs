//! Metadata storage module
//!
//! Indexes (vault entries, quarantine, reports, schedules, manifests and the
//! vault key) live behind the [`MetadataStore`] trait so that engines can be
//! backed by sled on disk or by memory in tests. [`Table`] adds typed access
//! on top of the raw byte interface.

pub mod codec;
mod store;

pub use store::{MemoryMetadataStore, SledMetadataStore};

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

/// Logical trees of the metadata store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tree {
    Entries,
    Quarantine,
    Reports,
    Schedules,
    Manifests,
    Keystore,
}

impl Tree {
    pub const ALL: [Tree; 6] = [
        Tree::Entries,
        Tree::Quarantine,
        Tree::Reports,
        Tree::Schedules,
        Tree::Manifests,
        Tree::Keystore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tree::Entries => "entries",
            Tree::Quarantine => "quarantine",
            Tree::Reports => "reports",
            Tree::Schedules => "schedules",
            Tree::Manifests => "manifests",
            Tree::Keystore => "keystore",
        }
    }
}

/// Key-value store for engine metadata
///
/// Scans return entries in ascending key order.
pub trait MetadataStore: Send + Sync {
    fn get(&self, tree: Tree, key: &str) -> Result<Option<Vec<u8>>>;

    fn put(&self, tree: Tree, key: &str, value: Vec<u8>) -> Result<()>;

    /// Returns whether the key existed
    fn remove(&self, tree: Tree, key: &str) -> Result<bool>;

    fn scan(&self, tree: Tree) -> Result<Vec<(String, Vec<u8>)>>;

    /// Remove every key of a tree, returning how many were removed
    fn clear(&self, tree: Tree) -> Result<usize>;

    fn flush(&self) -> Result<()>;
}

/// Typed view over one tree
pub struct Table<T> {
    store: Arc<dyn MetadataStore>,
    tree: Tree,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Table<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            tree: self.tree,
            _marker: PhantomData,
        }
    }
}

impl<T: Serialize + DeserializeOwned> Table<T> {
    pub fn new(store: Arc<dyn MetadataStore>, tree: Tree) -> Self {
        Self {
            store,
            tree,
            _marker: PhantomData,
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(self.tree, key)? {
            Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put(&self, key: &str, value: &T) -> Result<()> {
        self.store.put(self.tree, key, codec::encode(value)?)
    }

    pub fn remove(&self, key: &str) -> Result<bool> {
        self.store.remove(self.tree, key)
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.store.get(self.tree, key)?.is_some())
    }

    /// All records in key order
    pub fn entries(&self) -> Result<Vec<(String, T)>> {
        self.store
            .scan(self.tree)?
            .into_iter()
            .map(|(k, v)| Ok((k, codec::decode(&v)?)))
            .collect()
    }

    pub fn values(&self) -> Result<Vec<T>> {
        Ok(self.entries()?.into_iter().map(|(_, v)| v).collect())
    }

    pub fn clear(&self) -> Result<usize> {
        self.store.clear(self.tree)
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }
}
