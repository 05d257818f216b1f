//! Document fetching
//!
//! [`Fetcher`] is the transport boundary used by the ingestor.
//! [`HttpFetcher`] implements it over reqwest with a local response cache:
//! fresh responses are served from disk, stale ones are revalidated with a
//! conditional GET, and transient failures are retried with exponential
//! backoff.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use chrono::Utc;
use reqwest::header::{
    HeaderMap, HeaderValue, CACHE_CONTROL, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};
use reqwest::StatusCode;

use crate::config::defaults;
use crate::error::FetchError;
use crate::infra::http_cache::{CacheControl, CachedResponse, HttpCache};

/// A retrieved document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDocument {
    /// Response body
    pub bytes: Vec<u8>,
    /// ETag or Last-Modified of the response
    pub validator: Option<String>,
    /// Whether the body came from the local cache rather than the network
    pub served_from_cache: bool,
}

/// Retrieves documents by URL
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url`
    async fn get(&self, url: &str) -> Result<FetchedDocument, FetchError>;
}

/// Outcome of a single successful round trip
enum Response {
    NotModified {
        cache_control: CacheControl,
    },
    Body {
        bytes: Vec<u8>,
        etag: Option<String>,
        last_modified: Option<String>,
        cache_control: CacheControl,
    },
}

/// HTTP fetcher with conditional revalidation
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    cache: HttpCache,
    max_retries: u32,
    base_delay_ms: u64,
}

impl HttpFetcher {
    /// Create a fetcher caching responses in `cache`
    pub fn new(cache: HttpCache) -> Self {
        Self::with_config(
            cache,
            defaults::MAX_FETCH_RETRIES,
            defaults::RETRY_BASE_DELAY_MS,
            defaults::FETCH_TIMEOUT_SECS,
        )
    }

    /// Create a fetcher with custom retry and timeout settings
    pub fn with_config(
        cache: HttpCache,
        max_retries: u32,
        base_delay_ms: u64,
        timeout_secs: u64,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .connect_timeout(Duration::from_secs(30))
                .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            cache,
            max_retries: max_retries.max(1),
            base_delay_ms,
        }
    }

    /// Get max retries
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Send a request, retrying transient failures
    async fn request(&self, url: &str, conditional: &HeaderMap) -> Result<Response, FetchError> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.base_delay_ms))
            .with_max_interval(Duration::from_secs(30))
            .with_max_elapsed_time(None)
            .build();
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;

        backoff::future::retry(policy, move || async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            match self.request_once(url, conditional).await {
                Ok(response) => Ok(response),
                Err((error, transient)) if transient && attempt < self.max_retries => {
                    tracing::debug!("Attempt {attempt} for {url} failed, retrying: {error}");
                    Err(backoff::Error::transient(error))
                }
                Err((error, _)) => Err(backoff::Error::permanent(error)),
            }
        })
        .await
    }

    /// Single round trip; errors carry whether they are worth retrying
    async fn request_once(
        &self,
        url: &str,
        conditional: &HeaderMap,
    ) -> Result<Response, (FetchError, bool)> {
        let network = |e: reqwest::Error| {
            (
                FetchError::Network {
                    url: url.to_string(),
                    error: e.to_string(),
                },
                true,
            )
        };

        let response = self
            .client
            .get(url)
            .headers(conditional.clone())
            .send()
            .await
            .map_err(network)?;

        let status = response.status();
        let headers = response.headers();
        let cache_control = header_str(headers, CACHE_CONTROL.as_str())
            .map(|v| CacheControl::parse(&v))
            .unwrap_or_default();

        if status == StatusCode::NOT_MODIFIED {
            return Ok(Response::NotModified { cache_control });
        }
        if !status.is_success() {
            let transient =
                status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
            return Err((
                FetchError::HttpStatus {
                    url: url.to_string(),
                    code: status.as_u16(),
                },
                transient,
            ));
        }

        let etag = header_str(headers, ETAG.as_str());
        let last_modified = header_str(headers, LAST_MODIFIED.as_str());
        let bytes = response.bytes().await.map_err(network)?.to_vec();

        Ok(Response::Body {
            bytes,
            etag,
            last_modified,
            cache_control,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        let cached = self.cache.load(url)?;

        if let Some((meta, body)) = &cached {
            if meta.is_fresh(Utc::now()) {
                tracing::debug!("Serving fresh cached response for {url}");
                return Ok(FetchedDocument {
                    bytes: body.clone(),
                    validator: meta.validator(),
                    served_from_cache: true,
                });
            }
        }

        let mut conditional = HeaderMap::new();
        if let Some((meta, _)) = &cached {
            if let Some(etag) = meta.etag.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
                conditional.insert(IF_NONE_MATCH, etag);
            }
            if let Some(modified) = meta
                .last_modified
                .as_deref()
                .and_then(|v| HeaderValue::from_str(v).ok())
            {
                conditional.insert(IF_MODIFIED_SINCE, modified);
            }
        }

        match (self.request(url, &conditional).await?, cached) {
            (Response::NotModified { cache_control }, Some((mut meta, body))) => {
                tracing::debug!("{url} not modified");
                meta.stored_at = Utc::now();
                meta.fresh_for = cache_control.freshness_lifetime();
                self.cache.refresh(&meta)?;
                Ok(FetchedDocument {
                    bytes: body,
                    validator: meta.validator(),
                    served_from_cache: true,
                })
            }
            (Response::NotModified { .. }, None) => Err(FetchError::HttpStatus {
                url: url.to_string(),
                code: StatusCode::NOT_MODIFIED.as_u16(),
            }),
            (
                Response::Body {
                    bytes,
                    etag,
                    last_modified,
                    cache_control,
                },
                _,
            ) => {
                let meta = CachedResponse {
                    url: url.to_string(),
                    etag,
                    last_modified,
                    stored_at: Utc::now(),
                    fresh_for: cache_control.freshness_lifetime(),
                };
                if cache_control.no_store {
                    tracing::debug!("{url} is no-store, not caching");
                } else {
                    self.cache.store(&meta, &bytes)?;
                }
                Ok(FetchedDocument {
                    bytes,
                    validator: meta.validator(),
                    served_from_cache: false,
                })
            }
        }
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
