//! On-disk HTTP response cache
//!
//! Stores the last successful response per URL together with its
//! validators and freshness lifetime, so the fetcher can answer from disk
//! while a response is fresh and revalidate it with a conditional GET once
//! it is stale.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::core::revision::compute_checksum;
use crate::error::FetchError;

/// Parsed `Cache-Control` directives relevant to a client cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheControl {
    /// `max-age` in seconds
    pub max_age: Option<u64>,
    /// `no-store`: never write the response to the cache
    pub no_store: bool,
    /// `no-cache`: always revalidate before use
    pub no_cache: bool,
}

impl CacheControl {
    /// Parse a `Cache-Control` header value
    pub fn parse(value: &str) -> Self {
        let mut out = Self::default();
        for directive in value.split(',').map(str::trim) {
            let lower = directive.to_ascii_lowercase();
            if lower == "no-store" {
                out.no_store = true;
            } else if lower == "no-cache" {
                out.no_cache = true;
            } else if let Some(age) = lower.strip_prefix("max-age=") {
                out.max_age = age.trim_matches('"').parse().ok();
            }
        }
        out
    }

    /// Seconds a stored response may be used without revalidation
    pub fn freshness_lifetime(&self) -> u64 {
        if self.no_cache {
            0
        } else {
            self.max_age.unwrap_or(0)
        }
    }
}

/// Metadata stored next to a cached body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// Request URL
    pub url: String,
    /// `ETag` header
    pub etag: Option<String>,
    /// `Last-Modified` header
    pub last_modified: Option<String>,
    /// When the response was stored or last revalidated
    pub stored_at: DateTime<Utc>,
    /// Freshness lifetime in seconds
    pub fresh_for: u64,
}

impl CachedResponse {
    /// Whether the response can be used without contacting the server
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let lifetime = i64::try_from(self.fresh_for).unwrap_or(i64::MAX);
        now.signed_duration_since(self.stored_at) < Duration::seconds(lifetime)
    }

    /// Strongest validator available
    pub fn validator(&self) -> Option<String> {
        self.etag.clone().or_else(|| self.last_modified.clone())
    }
}

/// Directory-backed response cache
#[derive(Debug, Clone)]
pub struct HttpCache {
    dir: PathBuf,
}

impl HttpCache {
    /// Create a cache in `dir`
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Cache directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn paths(&self, url: &str) -> (PathBuf, PathBuf) {
        let stem = compute_checksum(url.as_bytes());
        (
            self.dir.join(format!("{stem}.meta.json")),
            self.dir.join(format!("{stem}.body")),
        )
    }

    /// Load a cached response and its body
    pub fn load(&self, url: &str) -> Result<Option<(CachedResponse, Vec<u8>)>, FetchError> {
        let (meta_path, body_path) = self.paths(url);
        if !meta_path.exists() || !body_path.exists() {
            return Ok(None);
        }
        let meta = std::fs::read_to_string(&meta_path).map_err(|e| cache_err(&meta_path, &e))?;
        let meta: CachedResponse = match serde_json::from_str(&meta) {
            Ok(meta) => meta,
            Err(e) => {
                // An unreadable entry is a miss, not a failure
                tracing::warn!("Ignoring corrupt cache entry {}: {e}", meta_path.display());
                return Ok(None);
            }
        };
        if meta.url != url {
            return Ok(None);
        }
        let body = std::fs::read(&body_path).map_err(|e| cache_err(&body_path, &e))?;
        Ok(Some((meta, body)))
    }

    /// Store a response body and its metadata
    pub fn store(&self, meta: &CachedResponse, body: &[u8]) -> Result<(), FetchError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| cache_err(&self.dir, &e))?;
        let (meta_path, body_path) = self.paths(&meta.url);
        write_atomic(&body_path, body)?;
        self.store_meta(meta, &meta_path)
    }

    /// Update metadata after a successful revalidation
    pub fn refresh(&self, meta: &CachedResponse) -> Result<(), FetchError> {
        let (meta_path, _) = self.paths(&meta.url);
        self.store_meta(meta, &meta_path)
    }

    fn store_meta(&self, meta: &CachedResponse, meta_path: &Path) -> Result<(), FetchError> {
        let content =
            serde_json::to_vec_pretty(meta).map_err(|e| cache_err(meta_path, &e))?;
        write_atomic(meta_path, &content)
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), FetchError> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data).map_err(|e| cache_err(&tmp, &e))?;
    std::fs::rename(&tmp, path).map_err(|e| cache_err(path, &e))
}

fn cache_err(path: &Path, e: &dyn std::fmt::Display) -> FetchError {
    FetchError::Cache {
        path: path.to_path_buf(),
        error: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta(url: &str, fresh_for: u64) -> CachedResponse {
        CachedResponse {
            url: url.to_string(),
            etag: Some("\"v1\"".to_string()),
            last_modified: Some("Wed, 21 Oct 2015 07:28:00 GMT".to_string()),
            stored_at: Utc::now(),
            fresh_for,
        }
    }

    #[test]
    fn test_parse_cache_control() {
        let cc = CacheControl::parse("public, max-age=30");
        assert_eq!(cc.max_age, Some(30));
        assert_eq!(cc.freshness_lifetime(), 30);

        let cc = CacheControl::parse("no-cache, max-age=600");
        assert!(cc.no_cache);
        assert_eq!(cc.freshness_lifetime(), 0);

        assert!(CacheControl::parse("No-Store").no_store);
        assert_eq!(CacheControl::parse("max-age=oops").max_age, None);
    }

    #[test]
    fn test_freshness() {
        let mut m = meta("https://example.com/a", 60);
        assert!(m.is_fresh(Utc::now()));
        m.stored_at = Utc::now() - Duration::seconds(120);
        assert!(!m.is_fresh(Utc::now()));
        m.fresh_for = 0;
        m.stored_at = Utc::now();
        assert!(!m.is_fresh(Utc::now() + Duration::milliseconds(1)));
    }

    #[test]
    fn test_validator_prefers_etag() {
        let mut m = meta("https://example.com/a", 0);
        assert_eq!(m.validator().as_deref(), Some("\"v1\""));
        m.etag = None;
        assert_eq!(
            m.validator().as_deref(),
            Some("Wed, 21 Oct 2015 07:28:00 GMT")
        );
    }

    #[test]
    fn test_store_load_refresh() {
        let temp = TempDir::new().unwrap();
        let cache = HttpCache::new(temp.path().join("http"));
        let url = "https://conda.anaconda.org/conda-forge/noarch/repodata.json";
        assert!(cache.load(url).unwrap().is_none());

        let mut m = meta(url, 0);
        cache.store(&m, b"{\"packages\":{}}").unwrap();
        let (loaded, body) = cache.load(url).unwrap().unwrap();
        assert_eq!(loaded, m);
        assert_eq!(body, b"{\"packages\":{}}");

        m.fresh_for = 300;
        cache.refresh(&m).unwrap();
        assert_eq!(cache.load(url).unwrap().unwrap().0.fresh_for, 300);
    }

    #[test]
    fn test_corrupt_meta_is_a_miss() {
        let temp = TempDir::new().unwrap();
        let cache = HttpCache::new(temp.path().to_path_buf());
        let url = "https://example.com/repodata.json";
        cache.store(&meta(url, 0), b"{}").unwrap();

        let (meta_path, _) = cache.paths(url);
        std::fs::write(meta_path, "garbage").unwrap();
        assert!(cache.load(url).unwrap().is_none());
    }
}
