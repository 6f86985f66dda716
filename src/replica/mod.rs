//! Replica storage
//!
//! Each object is stored as one processed (optionally compressed and
//! encrypted) buffer per backend. Backends are pluggable; the store tracks
//! their health and retries transient failures.

mod backend;
mod health;
mod pipeline;
mod retry;
mod store;

pub use backend::{ArchiveBackend, DiskBackend, MemoryBackend, ReplicaBackend};
pub use health::{BackendHealth, BackendStatus, HealthTracker};
pub use pipeline::{Pipeline, Processed};
pub use retry::{ExponentialBackoff, RetryPolicy};
pub use store::ReplicaStore;

use crate::checksum::Checksum;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Storage medium of a replica
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaKind {
    /// Fast, process-lifetime memory
    Volatile,
    /// Durable local filesystem
    Local,
    /// Durable embedded database standing in for remote archival storage
    Archive,
}

impl ReplicaKind {
    pub const ALL: [ReplicaKind; 3] = [ReplicaKind::Volatile, ReplicaKind::Local, ReplicaKind::Archive];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicaKind::Volatile => "volatile",
            ReplicaKind::Local => "local",
            ReplicaKind::Archive => "archive",
        }
    }
}

impl fmt::Display for ReplicaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplicaKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReplicaKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::ValidationFailed(format!("unknown replica kind '{}'", s)))
    }
}

/// Where one replica of an object lives
///
/// Immutable once written; healing replaces it with a new location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaLocation {
    pub kind: ReplicaKind,
    pub path: String,
    /// Checksum of the processed bytes held by the backend
    pub checksum: Checksum,
    /// Size of the processed bytes
    pub size: u64,
    pub encrypted: bool,
    pub compressed: bool,
    pub created_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse_and_display() {
        for kind in ReplicaKind::ALL {
            assert_eq!(kind.to_string().parse::<ReplicaKind>().unwrap(), kind);
        }
        assert_eq!("ARCHIVE".parse::<ReplicaKind>().unwrap(), ReplicaKind::Archive);
        assert!("tape".parse::<ReplicaKind>().is_err());
    }

    #[test]
    fn test_kind_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&ReplicaKind::Local).unwrap(), "\"local\"");
    }
}
