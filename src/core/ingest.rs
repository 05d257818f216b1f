//! Snapshot ingestion
//!
//! Polls the fetcher for a key and, when the content differs from the
//! current head, stores it as a new revision and extends the patch chain.
//!
//! Work on a single key is serialized through [`KeyLocks`]. Everything
//! after the fetch returns is synchronous, so dropping an in-flight
//! [`SnapshotIngestor::ingest`] future never leaves a half-recorded
//! revision behind. A revision the index refuses is rolled back out of
//! the store, so the previous head stays where the ledger expects it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, Semaphore};

use crate::core::chain::PatchChainBuilder;
use crate::core::index::RevisionIndex;
use crate::core::key::Key;
use crate::core::revision::{compute_checksum, PatchLink, Revision};
use crate::core::store::ArtifactStore;
use crate::error::{ChainError, IngestError, StoreError};
use crate::infra::fetcher::Fetcher;

/// Outcome of one ingest call
#[derive(Debug, Clone, Serialize)]
pub struct IngestResult {
    /// Key that was ingested
    pub key: Key,
    /// Whether a new revision was recorded
    pub is_new: bool,
    /// The new revision, or the unchanged head
    pub revision: Option<Revision>,
    /// Link created for the new revision
    pub linked: Option<PatchLink>,
    /// Why the new revision could not be linked
    pub link_error: Option<String>,
    /// Whether the fetcher answered from its cache
    pub served_from_cache: bool,
}

/// Per-key async mutexes
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<Key, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &Key) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            locks.entry(key.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Fetches snapshots and records them
#[derive(Clone)]
pub struct SnapshotIngestor {
    fetcher: Arc<dyn Fetcher>,
    store: Arc<ArtifactStore>,
    index: Arc<dyn RevisionIndex>,
    chain: PatchChainBuilder,
    locks: Arc<KeyLocks>,
}

impl SnapshotIngestor {
    /// Create an ingestor
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        store: Arc<ArtifactStore>,
        index: Arc<dyn RevisionIndex>,
        chain: PatchChainBuilder,
    ) -> Self {
        Self {
            fetcher,
            store,
            index,
            chain,
            locks: Arc::new(KeyLocks::new()),
        }
    }

    /// Ingest the document published at the key's URL
    pub async fn ingest(&self, key: &Key) -> Result<IngestResult, IngestError> {
        self.ingest_url(key, &key.url()).await
    }

    /// Ingest the document at `url` as a new revision of `key`
    pub async fn ingest_url(&self, key: &Key, url: &str) -> Result<IngestResult, IngestError> {
        let _guard = self.locks.lock(key).await;

        let fetched = self.fetcher.get(url).await?;
        let head = self.index.head(key)?;
        let content_hash = compute_checksum(&fetched.bytes);

        if let Some(head) = head.filter(|h| h.content_hash == content_hash) {
            tracing::debug!("{key} unchanged at revision {}", head.sequence);
            return Ok(IngestResult {
                key: key.clone(),
                is_new: false,
                revision: Some(head),
                linked: None,
                link_error: None,
                served_from_cache: fetched.served_from_cache,
            });
        }

        // No await points from here on
        let sequence = self
            .index
            .entry(key)?
            .map_or(0, |entry| entry.next_sequence());
        let stored = self
            .store
            .write(key, sequence, &fetched.bytes)
            .map_err(|e| match e {
                StoreError::InvalidDocument { error, .. } => IngestError::InvalidDocument {
                    url: url.to_string(),
                    error,
                },
                other => IngestError::Store(other),
            })?;

        let mut revision = stored.revision.clone();
        revision.validator = fetched.validator;
        if let Err(e) = self
            .index
            .append_rotated(key, revision.clone(), stored.archived.clone())
        {
            match self.store.rollback(&stored) {
                Ok(()) => tracing::warn!("Revision {sequence} of {key} not recorded: {e}"),
                Err(undo) => tracing::error!(
                    "Revision {sequence} of {key} not recorded ({e}) and could not be rolled back: {undo}"
                ),
            }
            return Err(e.into());
        }
        tracing::info!("Recorded revision {sequence} of {key}");

        let (linked, link_error) = if sequence == 0 {
            (None, None)
        } else {
            match self.chain.extend(key) {
                Ok(link) => (Some(link), None),
                Err(e @ ChainError::PatchIntegrity { .. }) => {
                    tracing::warn!("Revision {sequence} of {key} left unlinked: {e}");
                    (None, Some(e.to_string()))
                }
                Err(e) => {
                    tracing::warn!("Failed to link revision {sequence} of {key}: {e}");
                    (None, Some(e.to_string()))
                }
            }
        };

        Ok(IngestResult {
            key: key.clone(),
            is_new: true,
            revision: Some(revision),
            linked,
            link_error,
            served_from_cache: fetched.served_from_cache,
        })
    }

    /// Ingest many keys with at most `parallel` in flight
    ///
    /// Results are returned in the order of `keys`.
    pub async fn ingest_all(
        &self,
        keys: Vec<Key>,
        parallel: usize,
    ) -> Vec<Result<IngestResult, IngestError>> {
        let semaphore = Arc::new(Semaphore::new(parallel.max(1)));

        let handles: Vec<_> = keys
            .into_iter()
            .map(|key| {
                let sem = semaphore.clone();
                let ingestor = self.clone();
                let name = key.to_string();

                let handle = tokio::spawn(async move {
                    let _permit = sem.acquire_owned().await.map_err(|e| IngestError::Task {
                        key: key.to_string(),
                        error: e.to_string(),
                    })?;
                    let result = ingestor.ingest(&key).await;
                    if let Err(e) = &result {
                        tracing::warn!("Failed to ingest {key}: {e}");
                    }
                    result
                });
                async move {
                    handle.await.unwrap_or_else(|e| {
                        Err(IngestError::Task {
                            key: name,
                            error: e.to_string(),
                        })
                    })
                }
            })
            .collect();

        join_all(handles).await
    }
}

impl std::fmt::Debug for SnapshotIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotIngestor")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
