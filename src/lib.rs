//! replivault - Redundant object storage with self-healing replicas
//!
//! Objects are checksummed, optionally compressed and encrypted, and written
//! to several independent backends. Reads repair damaged replicas from an
//! intact one, a verification gate quarantines objects that fail post-write
//! checks, and a scheduler records periodic backup manifests.

pub mod checksum;
pub mod chunk;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod diff;
pub mod engine;
pub mod error;
pub mod events;
pub mod gate;
pub mod metadata;
pub mod replica;
pub mod scheduler;
pub mod vault;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use engine::{Engine, EngineBuilder, PutOptions};
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::checksum::Checksum;
    pub use crate::config::Config;
    pub use crate::engine::{Engine, PutOptions};
    pub use crate::error::{Error, Result};
    pub use crate::gate::{IntegrityReport, ReportStatus};
    pub use crate::replica::ReplicaKind;
    pub use crate::vault::{HealthStatus, VaultEntry};
}
