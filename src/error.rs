//! Error types for replivault
//!
//! A single error enum covers the whole engine. Per-backend failures
//! (`BackendUnavailable`, `ReplicaNotFound`) are normally swallowed at the
//! vault boundary and turned into a degraded health status; the remaining
//! variants reach the caller.

use crate::replica::ReplicaKind;
use std::fmt;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Where a checksum comparison failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumScope {
    /// A single chunk during reassembly
    Chunk(u64),
    /// The processed bytes held by one replica
    Replica(ReplicaKind),
    /// The whole, unprocessed object
    Object,
}

impl fmt::Display for ChecksumScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumScope::Chunk(index) => write!(f, "chunk {}", index),
            ChecksumScope::Replica(kind) => write!(f, "{} replica", kind),
            ChecksumScope::Object => write!(f, "object"),
        }
    }
}

/// Errors produced by the integrity engine
#[derive(Debug, Error)]
pub enum Error {
    /// Input rejected before any storage write
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// A chunk index is absent from an otherwise contiguous sequence
    #[error("Missing chunk at index {0}")]
    MissingChunk(u64),

    /// The same chunk index was supplied twice
    #[error("Duplicate chunk at index {0}")]
    DuplicateChunk(u64),

    #[error("Checksum mismatch for {scope}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        scope: ChecksumScope,
        expected: String,
        actual: String,
    },

    /// A single backend could not serve a read or write
    #[error("{kind} backend unavailable: {reason}")]
    BackendUnavailable { kind: ReplicaKind, reason: String },

    #[error("Replica of {object_id} not found on {kind} backend")]
    ReplicaNotFound { object_id: String, kind: ReplicaKind },

    /// No replica could be written (or read) for the object
    #[error("All backends failed for object {0}")]
    AllBackendsFailed(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    /// Reads are blocked until an operator releases the object
    #[error("Object {0} is quarantined")]
    Quarantined(String),

    #[error("Backup schedule not found: {0}")]
    ScheduleNotFound(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for errors that mean "this object (or replica) does not exist"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::ReplicaNotFound { .. })
    }

    /// True for errors confined to a single backend
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            Error::BackendUnavailable { .. } | Error::ReplicaNotFound { .. }
        )
    }
}
