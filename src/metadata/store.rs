//! Metadata store implementations
//!
//! `SledMetadataStore` keeps one sled tree per [`Tree`]; the in-memory store
//! mirrors the same layout with ordered maps for tests and ephemeral engines.

use super::{MetadataStore, Tree};
use crate::error::Result;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Persistent store backed by sled
pub struct SledMetadataStore {
    db: sled::Db,
    trees: HashMap<Tree, sled::Tree>,
}

impl SledMetadataStore {
    /// Open (or create) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Self::new(db)
    }

    /// Open a throwaway database that is removed on drop
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::new(db)
    }

    /// Wrap an already opened database
    pub fn new(db: sled::Db) -> Result<Self> {
        let mut trees = HashMap::new();
        for tree in Tree::ALL {
            trees.insert(tree, db.open_tree(tree.as_str())?);
        }
        Ok(Self { db, trees })
    }

    /// The underlying database, shared with the archive backend
    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    fn tree(&self, tree: Tree) -> &sled::Tree {
        // Every variant is opened in `new`
        &self.trees[&tree]
    }
}

impl MetadataStore for SledMetadataStore {
    fn get(&self, tree: Tree, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.tree(tree).get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    fn put(&self, tree: Tree, key: &str, value: Vec<u8>) -> Result<()> {
        self.tree(tree).insert(key.as_bytes(), value)?;
        Ok(())
    }

    fn remove(&self, tree: Tree, key: &str) -> Result<bool> {
        Ok(self.tree(tree).remove(key.as_bytes())?.is_some())
    }

    fn scan(&self, tree: Tree) -> Result<Vec<(String, Vec<u8>)>> {
        let mut out = Vec::new();
        for item in self.tree(tree).iter() {
            let (key, value) = item?;
            out.push((String::from_utf8_lossy(&key).into_owned(), value.to_vec()));
        }
        Ok(out)
    }

    fn clear(&self, tree: Tree) -> Result<usize> {
        let tree = self.tree(tree);
        let count = tree.len();
        tree.clear()?;
        Ok(count)
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

/// Volatile store for tests and ephemeral engines
#[derive(Default)]
pub struct MemoryMetadataStore {
    trees: RwLock<HashMap<Tree, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn get(&self, tree: Tree, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .trees
            .read()
            .get(&tree)
            .and_then(|t| t.get(key).cloned()))
    }

    fn put(&self, tree: Tree, key: &str, value: Vec<u8>) -> Result<()> {
        self.trees
            .write()
            .entry(tree)
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, tree: Tree, key: &str) -> Result<bool> {
        Ok(self
            .trees
            .write()
            .get_mut(&tree)
            .map(|t| t.remove(key).is_some())
            .unwrap_or(false))
    }

    fn scan(&self, tree: Tree) -> Result<Vec<(String, Vec<u8>)>> {
        Ok(self
            .trees
            .read()
            .get(&tree)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn clear(&self, tree: Tree) -> Result<usize> {
        Ok(self
            .trees
            .write()
            .remove(&tree)
            .map(|t| t.len())
            .unwrap_or(0))
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
