//! Configuration
//!
//! Loaded from a JSON file; every field is optional and falls back to its default.

use crate::backend::{FileBackend, KeyValueBackend, MemoryBackend, SyncPolicy, UnavailableBackend};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Which durable backend to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Process-lifetime hash map
    Memory,
    /// Append-only log file at `file_path`
    File,
    /// Storage disabled; every store operation degrades to a no-op
    Unavailable,
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Prefix for every key written through the store
    pub namespace: String,

    pub backend: BackendKind,

    /// Log file for the file backend
    pub file_path: PathBuf,

    pub sync_policy: SyncPolicy,

    /// Byte quota for live data (None = unbounded)
    pub quota_bytes: Option<usize>,

    /// Quiet period of the search debouncer, in milliseconds
    pub debounce_ms: u64,

    /// Interval of the progress throttler, in milliseconds
    pub throttle_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            namespace: "perfkit:".to_string(),
            backend: BackendKind::Memory,
            file_path: PathBuf::from("perfkit.log"),
            sync_policy: SyncPolicy::default(),
            quota_bytes: None,
            debounce_ms: 300,
            throttle_ms: 1000,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The file could not be read
    Io(String),

    /// The content is not a valid configuration
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "Cannot read config: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Parse a JSON document
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Read and parse a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    /// Open the configured backend
    pub fn open_backend(&self) -> anyhow::Result<Box<dyn KeyValueBackend>> {
        let backend: Box<dyn KeyValueBackend> = match self.backend {
            BackendKind::Memory => match self.quota_bytes {
                Some(quota) => Box::new(MemoryBackend::with_quota(quota)),
                None => Box::new(MemoryBackend::new()),
            },
            BackendKind::File => Box::new(
                FileBackend::open_with_quota(&self.file_path, self.sync_policy, self.quota_bytes)
                    .map_err(|e| {
                        anyhow::anyhow!("Failed to open {}: {}", self.file_path.display(), e)
                    })?,
            ),
            BackendKind::Unavailable => Box::new(UnavailableBackend::new("disabled by configuration")),
        };

        info!("Using {:?} backend with namespace '{}'", self.backend, self.namespace);
        Ok(backend)
    }
}
