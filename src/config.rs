//! Configuration management for replivault

use crate::diff::DiffConfig;
use crate::error::{Error, Result};
use crate::replica::ReplicaKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default chunk size for uploads: 2MB
pub const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// Default checksum window: 1MB
pub const DEFAULT_CHECKSUM_WINDOW: usize = 1024 * 1024;

/// Default number of replicas per object
pub const DEFAULT_REPLICA_COUNT: usize = 3;

/// Default number of integrity reports retained
pub const DEFAULT_MAX_REPORTS: usize = 100;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the data directory (metadata database and durable replicas)
    pub data_dir: PathBuf,

    /// Replica backends, in read priority order
    pub backends: Vec<BackendConfig>,

    /// Replication and processing defaults
    pub storage: StorageConfig,

    /// Chunk configuration
    pub chunk: ChunkConfig,

    /// Verification gate and sweep configuration
    pub integrity: IntegrityConfig,

    /// Backup scheduler configuration
    pub scheduler: SchedulerConfig,
}

/// One replica backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendConfig {
    /// Backend kind
    pub kind: ReplicaKind,

    /// Storage location; relative paths resolve against `data_dir`.
    /// Ignored for volatile backends.
    pub path: Option<PathBuf>,

    /// Objects larger than this (processed bytes) are not written here
    pub max_object_size: Option<u64>,
}

/// Replication and processing defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Replicas written per object unless the caller overrides it
    pub default_replica_count: usize,

    /// Compress replicas by default
    pub compression_enabled: bool,

    /// Minimum size to compress (bytes)
    pub compression_threshold: usize,

    /// Encrypt replicas by default
    pub encryption_enabled: bool,

    /// Retry attempts for failed backend operations
    pub retry_attempts: u32,

    /// Base delay for exponential backoff (ms)
    pub retry_base_delay_ms: u64,
}

/// Chunk configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Target chunk size in bytes
    pub chunk_size: usize,

    /// Window fed to the hasher at a time
    pub checksum_window: usize,
}

/// Verification gate and sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityConfig {
    /// Uploads larger than this are rejected
    pub max_upload_size: Option<u64>,

    /// Allowed MIME types; `None` admits everything
    pub allowed_types: Option<Vec<String>>,

    /// Integrity reports retained before the oldest is evicted
    pub max_reports: usize,

    /// Objects verified concurrently during a sweep
    pub sweep_concurrency: usize,

    /// Heal failed replicas found during a sweep
    pub auto_heal: bool,

    /// Binary diff tunables
    pub diff: DiffConfig,
}

/// Backup scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Daemon tick interval in seconds
    pub tick_interval_secs: u64,

    /// Seed the default hourly and daily schedules when none exist
    pub seed_defaults: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("replivault");

        Config {
            data_dir,
            backends: vec![
                BackendConfig {
                    kind: ReplicaKind::Volatile,
                    path: None,
                    max_object_size: Some(5 * 1024 * 1024),
                },
                BackendConfig {
                    kind: ReplicaKind::Local,
                    path: Some(PathBuf::from("replicas")),
                    max_object_size: None,
                },
                BackendConfig {
                    kind: ReplicaKind::Archive,
                    path: Some(PathBuf::from("archive")),
                    max_object_size: None,
                },
            ],
            storage: StorageConfig::default(),
            chunk: ChunkConfig::default(),
            integrity: IntegrityConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            default_replica_count: DEFAULT_REPLICA_COUNT,
            compression_enabled: true,
            compression_threshold: 1024, // Only compress if > 1KB
            encryption_enabled: true,
            retry_attempts: 3,
            retry_base_delay_ms: 100,
        }
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        ChunkConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            checksum_window: DEFAULT_CHECKSUM_WINDOW,
        }
    }
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        IntegrityConfig {
            max_upload_size: None,
            allowed_types: None,
            max_reports: DEFAULT_MAX_REPORTS,
            sweep_concurrency: 4,
            auto_heal: true,
            diff: DiffConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            tick_interval_secs: 60,
            seed_defaults: true,
        }
    }
}

/// On-disk config formats, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Yaml,
}

impl Format {
    fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Format::Yaml,
            _ => Format::Json,
        }
    }
}

impl Config {
    /// Load configuration from a file, with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file: {}", e))
        })?;

        let mut config: Config = match Format::for_path(path) {
            Format::Json => serde_json::from_str(&content).map_err(|e| {
                Error::Config(format!("Failed to parse config file: {}", e))
            })?,
            Format::Yaml => serde_yaml::from_str(&content).map_err(|e| {
                Error::Config(format!("Failed to parse config file: {}", e))
            })?,
        };

        // Override with environment variables if set
        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("REPLIVAULT_DATA_DIR") {
            let dir = dir.trim();
            if !dir.is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }

        if let Ok(chunk_size) = std::env::var("REPLIVAULT_CHUNK_SIZE") {
            if let Ok(size) = chunk_size.trim().parse::<usize>() {
                self.chunk.chunk_size = size;
            }
        }

        if let Ok(count) = std::env::var("REPLIVAULT_REPLICA_COUNT") {
            if let Ok(count) = count.trim().parse::<usize>() {
                self.storage.default_replica_count = count;
            }
        }

        if let Ok(max) = std::env::var("REPLIVAULT_MAX_UPLOAD_SIZE") {
            if let Ok(max) = max.trim().parse::<u64>() {
                self.integrity.max_upload_size = Some(max);
            }
        }
    }

    /// Default configuration with environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = match Format::for_path(path) {
            Format::Json => serde_json::to_string_pretty(self).map_err(|e| {
                Error::Config(format!("Failed to serialize config: {}", e))
            })?,
            Format::Yaml => serde_yaml::to_string(self).map_err(|e| {
                Error::Config(format!("Failed to serialize config: {}", e))
            })?,
        };

        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!("Failed to write config file: {}", e))
        })?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one backend is required".to_string(),
            ));
        }

        for (i, backend) in self.backends.iter().enumerate() {
            if self.backends[..i].iter().any(|b| b.kind == backend.kind) {
                return Err(Error::InvalidConfig(format!(
                    "Backend kind '{}' is configured more than once",
                    backend.kind
                )));
            }
            if backend.kind != ReplicaKind::Volatile && backend.path.is_none() {
                return Err(Error::InvalidConfig(format!(
                    "Backend '{}' requires a path",
                    backend.kind
                )));
            }
        }

        if self.chunk.chunk_size == 0 {
            return Err(Error::InvalidConfig(
                "Chunk size must be greater than 0".to_string(),
            ));
        }

        if self.chunk.checksum_window == 0 {
            return Err(Error::InvalidConfig(
                "Checksum window must be greater than 0".to_string(),
            ));
        }

        if self.integrity.max_reports == 0 {
            return Err(Error::InvalidConfig(
                "max_reports must be greater than 0".to_string(),
            ));
        }

        if self.integrity.sweep_concurrency == 0 {
            return Err(Error::InvalidConfig(
                "sweep_concurrency must be greater than 0".to_string(),
            ));
        }

        if self.scheduler.tick_interval_secs == 0 {
            return Err(Error::InvalidConfig(
                "Scheduler tick interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Path of the metadata database
    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir.join("metadata")
    }

    /// Resolve a backend's storage path against the data directory
    pub fn backend_path(&self, backend: &BackendConfig) -> Option<PathBuf> {
        backend.path.as_ref().map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                self.data_dir.join(p)
            }
        })
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        for backend in &self.backends {
            if backend.kind == ReplicaKind::Local {
                if let Some(path) = self.backend_path(backend) {
                    std::fs::create_dir_all(path)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.backends.len(), 3);
        assert_eq!(config.storage.default_replica_count, 3);
        assert_eq!(config.integrity.max_reports, 100);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.chunk.chunk_size = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = Config::default();
        config.backends.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        let dup = config.backends[1].clone();
        config.backends.push(dup);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.backends[1].path = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_json_and_yaml() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().join("data");
        config.integrity.allowed_types = Some(vec!["text/plain".to_string()]);

        for name in ["config.json", "config.yaml"] {
            let path = dir.path().join(name);
            config.save(&path).unwrap();
            let loaded = Config::load(&path).unwrap();
            assert_eq!(loaded.backends, config.backends);
            assert_eq!(loaded.integrity.allowed_types, config.integrity.allowed_types);
            assert_eq!(loaded.chunk.chunk_size, config.chunk.chunk_size);
        }
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/replivault.json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_backend_path_resolution() {
        let mut config = Config::default();
        config.data_dir = PathBuf::from("/srv/vault");
        let local = config.backends[1].clone();
        assert_eq!(
            config.backend_path(&local),
            Some(PathBuf::from("/srv/vault/replicas"))
        );
        assert_eq!(config.backend_path(&config.backends[0]), None);
    }

    #[test]
    fn test_ensure_directories() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().join("vault");
        config.ensure_directories().unwrap();
        assert!(dir.path().join("vault/replicas").is_dir());
    }
}
