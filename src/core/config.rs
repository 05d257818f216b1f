//! Global configuration management
//!
//! Reads settings from `config.toml` in the config directory: which
//! repositories, subdirectories and document kinds are tracked, fetch retry
//! and parallelism settings, and the artifact codec.
//!
//! Every value is optional; accessors fall back to [`crate::config::defaults`].

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::defaults;
use crate::core::codec::CodecKind;
use crate::core::key::{DocumentKind, Key};
use crate::error::ConfigError;
use crate::infra::dirs::HistoryDirs;

/// Global configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Tracked document streams
    #[serde(default)]
    pub tracking: TrackingConfig,

    /// Fetch behavior
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Artifact storage
    #[serde(default)]
    pub store: StoreConfig,
}

/// Tracked repositories, subdirectories and kinds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Repository locations (`host/path`)
    pub repositories: Option<Vec<String>>,

    /// Platform subdirectories
    pub subdirs: Option<Vec<String>>,

    /// Document kinds
    pub kinds: Option<Vec<DocumentKind>>,
}

/// Fetch settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Attempts per document before giving up
    pub max_retries: Option<u32>,

    /// Initial backoff delay in milliseconds
    pub base_delay_ms: Option<u64>,

    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,

    /// Keys ingested concurrently
    pub parallel: Option<usize>,
}

/// Storage settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Artifact codec
    pub compression: Option<CodecKind>,
}

/// Narrows the tracked keys; an empty list matches everything
#[derive(Debug, Clone, Default)]
pub struct KeyFilter {
    /// Repositories to keep
    pub repositories: Vec<String>,
    /// Subdirectories to keep
    pub subdirs: Vec<String>,
    /// Kinds to keep
    pub kinds: Vec<DocumentKind>,
}

impl KeyFilter {
    /// Whether `key` passes the filter
    pub fn matches(&self, key: &Key) -> bool {
        let repo_ok = self.repositories.is_empty()
            || self.repositories.iter().any(|r| {
                let r = r.strip_prefix("https://").unwrap_or(r).trim_end_matches('/');
                r == key.repository
            });
        let subdir_ok = self.subdirs.is_empty() || self.subdirs.contains(&key.subdirectory);
        let kind_ok = self.kinds.is_empty() || self.kinds.contains(&key.kind);
        repo_ok && subdir_ok && kind_ok
    }
}

impl GlobalConfig {
    /// Load configuration from the config directory
    pub fn load(dirs: &HistoryDirs) -> Result<Self, ConfigError> {
        Self::load_from_path(&dirs.config_path())
    }

    /// Load configuration from a specific path
    ///
    /// A missing file yields the default configuration.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }

    /// Save configuration to a specific path, creating parent directories
    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: parent.display().to_string(),
                error: e.to_string(),
            })?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::WriteError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        fs::write(path, content).map_err(|e| ConfigError::WriteError {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }

    /// Configuration with every value filled in
    #[must_use]
    pub fn effective(&self) -> Self {
        Self {
            tracking: TrackingConfig {
                repositories: Some(self.repositories()),
                subdirs: Some(self.subdirs()),
                kinds: Some(self.kinds()),
            },
            fetch: FetchConfig {
                max_retries: Some(self.max_retries()),
                base_delay_ms: Some(self.base_delay_ms()),
                timeout_secs: Some(self.timeout_secs()),
                parallel: Some(self.parallel()),
            },
            store: StoreConfig {
                compression: Some(self.compression()),
            },
        }
    }

    /// Tracked repositories
    #[must_use]
    pub fn repositories(&self) -> Vec<String> {
        self.tracking.repositories.clone().unwrap_or_else(|| {
            defaults::DEFAULT_REPOSITORIES
                .iter()
                .map(ToString::to_string)
                .collect()
        })
    }

    /// Tracked subdirectories
    #[must_use]
    pub fn subdirs(&self) -> Vec<String> {
        self.tracking.subdirs.clone().unwrap_or_else(|| {
            defaults::DEFAULT_SUBDIRS
                .iter()
                .map(ToString::to_string)
                .collect()
        })
    }

    /// Tracked kinds
    #[must_use]
    pub fn kinds(&self) -> Vec<DocumentKind> {
        self.tracking
            .kinds
            .clone()
            .unwrap_or_else(|| DocumentKind::ALL.to_vec())
    }

    /// Every tracked key: repositories x subdirs x kinds
    pub fn keys(&self) -> Result<Vec<Key>, ConfigError> {
        let mut keys = Vec::new();
        for repository in self.repositories() {
            for subdir in self.subdirs() {
                for kind in self.kinds() {
                    keys.push(Key::new(repository.as_str(), subdir.as_str(), kind)?);
                }
            }
        }
        Ok(keys)
    }

    /// Fetch attempts per document
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.fetch.max_retries.unwrap_or(defaults::MAX_FETCH_RETRIES)
    }

    /// Initial backoff delay
    #[must_use]
    pub fn base_delay_ms(&self) -> u64 {
        self.fetch
            .base_delay_ms
            .unwrap_or(defaults::RETRY_BASE_DELAY_MS)
    }

    /// Request timeout
    #[must_use]
    pub fn timeout_secs(&self) -> u64 {
        self.fetch.timeout_secs.unwrap_or(defaults::FETCH_TIMEOUT_SECS)
    }

    /// Keys ingested concurrently, bounded by the CPU count by default
    #[must_use]
    pub fn parallel(&self) -> usize {
        self.fetch
            .parallel
            .unwrap_or_else(|| num_cpus::get().clamp(1, defaults::DEFAULT_PARALLEL_FETCHES))
    }

    /// Artifact codec
    #[must_use]
    pub fn compression(&self) -> CodecKind {
        self.store.compression.unwrap_or_default()
    }
}
