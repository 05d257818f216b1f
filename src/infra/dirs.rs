//! Platform-specific directory management
//!
//! Environment variables can override default directories:
//! - `REPODATA_HISTORY_DATA_DIR` - artifacts and ledgers
//! - `REPODATA_HISTORY_CACHE_DIR` - HTTP response cache
//! - `REPODATA_HISTORY_CONFIG_DIR` - `config.toml`

use std::env;
use std::path::PathBuf;

/// Environment variable names for directory overrides
pub const ENV_DATA_DIR: &str = "REPODATA_HISTORY_DATA_DIR";
pub const ENV_CACHE_DIR: &str = "REPODATA_HISTORY_CACHE_DIR";
pub const ENV_CONFIG_DIR: &str = "REPODATA_HISTORY_CONFIG_DIR";

/// Application name used in directory paths
const APP_NAME: &str = "repodata-history";

/// Subdirectory names
const ARTIFACTS_SUBDIR: &str = "artifacts";
const INDEX_SUBDIR: &str = "index";
const HTTP_CACHE_SUBDIR: &str = "http";

/// Directory layout for stored history
#[derive(Debug, Clone)]
pub struct HistoryDirs {
    data_dir: PathBuf,
    cache_dir: PathBuf,
    config_dir: PathBuf,
}

impl HistoryDirs {
    /// Resolve directories from the environment, then platform defaults
    #[must_use]
    pub fn new() -> Self {
        Self {
            data_dir: resolve(ENV_DATA_DIR, dirs::data_dir, &[".local", "share"]),
            cache_dir: resolve(ENV_CACHE_DIR, dirs::cache_dir, &[".cache"]),
            config_dir: resolve(ENV_CONFIG_DIR, dirs::config_dir, &[".config"]),
        }
    }

    /// Use explicit directories
    #[must_use]
    pub fn with_dirs(data_dir: PathBuf, cache_dir: PathBuf, config_dir: PathBuf) -> Self {
        Self {
            data_dir,
            cache_dir,
            config_dir,
        }
    }

    /// Persistent data directory
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }

    /// Cache directory, safe to delete
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone()
    }

    /// Config directory
    #[must_use]
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone()
    }

    /// Root of the artifact store
    #[must_use]
    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join(ARTIFACTS_SUBDIR)
    }

    /// Root of the per-key ledgers
    #[must_use]
    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join(INDEX_SUBDIR)
    }

    /// HTTP response cache
    #[must_use]
    pub fn http_cache_dir(&self) -> PathBuf {
        self.cache_dir.join(HTTP_CACHE_SUBDIR)
    }

    /// Path of `config.toml`
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }
}

impl Default for HistoryDirs {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve(var: &str, platform: fn() -> Option<PathBuf>, home_fallback: &[&str]) -> PathBuf {
    if let Ok(path) = env::var(var) {
        return PathBuf::from(path);
    }

    platform().map(|p| p.join(APP_NAME)).unwrap_or_else(|| {
        let base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home_fallback
            .iter()
            .fold(base, |path, part| path.join(part))
            .join(APP_NAME)
    })
}
