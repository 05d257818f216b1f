//! Common test utilities and helpers
//!
//! This module provides shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tempfile::TempDir;

use repodata_history::core::chain::PatchChainBuilder;
use repodata_history::core::codec::GzipCodec;
use repodata_history::core::diff::{DiffEngine, JsonPatchEngine, PatchOps};
use repodata_history::core::index::{FileIndex, IndexEntry, MemoryIndex, RevisionIndex};
use repodata_history::core::ingest::SnapshotIngestor;
use repodata_history::core::key::{DocumentKind, Key};
use repodata_history::core::revision::{PatchLink, Revision};
use repodata_history::core::store::ArtifactStore;
use repodata_history::error::{FetchError, IndexError};
use repodata_history::infra::fetcher::{FetchedDocument, Fetcher};

/// Scripted response for one fetch
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Body fetched from the network
    Fresh(Value),
    /// Body answered from the fetcher's cache
    Cached(Value),
    /// Raw bytes, not necessarily JSON
    Raw(Vec<u8>),
    /// HTTP failure
    Status(u16),
}

/// Fetcher replaying scripted responses per URL
///
/// Each URL consumes its queue in order and repeats the last response once
/// the queue is down to one entry.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    /// Create a fetcher with no scripts
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue responses for `url`
    pub fn script(&self, url: &str, responses: Vec<Scripted>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .extend(responses);
    }

    /// Number of `get` calls made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn get(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut scripts = self.scripts.lock().unwrap();
            let queue = scripts.get_mut(url).ok_or_else(|| FetchError::HttpStatus {
                url: url.to_string(),
                code: 404,
            })?;
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        };

        let (bytes, served_from_cache) = match next {
            Some(Scripted::Fresh(doc)) => (serde_json::to_vec(&doc).unwrap(), false),
            Some(Scripted::Cached(doc)) => (serde_json::to_vec(&doc).unwrap(), true),
            Some(Scripted::Raw(bytes)) => (bytes, false),
            Some(Scripted::Status(code)) => {
                return Err(FetchError::HttpStatus {
                    url: url.to_string(),
                    code,
                })
            }
            None => {
                return Err(FetchError::Network {
                    url: url.to_string(),
                    error: "script exhausted".to_string(),
                })
            }
        };

        Ok(FetchedDocument {
            bytes,
            validator: None,
            served_from_cache,
        })
    }
}

/// Diff engine whose patches never invert correctly
pub struct BrokenEngine;

impl DiffEngine for BrokenEngine {
    fn diff(&self, _from: &Value, _to: &Value) -> PatchOps {
        json_patch::Patch(Vec::new())
    }

    fn apply(&self, doc: &Value, _ops: &PatchOps) -> Result<Value, String> {
        Ok(doc.clone())
    }
}

/// Index whose appends can be switched to fail, as a full disk would
pub struct FlakyIndex {
    inner: Arc<dyn RevisionIndex>,
    fail_appends: AtomicBool,
}

impl FlakyIndex {
    /// Wrap `inner`; appends succeed until told otherwise
    pub fn new(inner: Arc<dyn RevisionIndex>) -> Self {
        Self {
            inner,
            fail_appends: AtomicBool::new(false),
        }
    }

    /// Make every following append fail (or succeed again)
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }
}

impl RevisionIndex for FlakyIndex {
    fn append_rotated(
        &self,
        key: &Key,
        revision: Revision,
        archived_head: Option<PathBuf>,
    ) -> Result<(), IndexError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(IndexError::Persist {
                path: PathBuf::from("ledger.json"),
                error: "No space left on device".to_string(),
            });
        }
        self.inner.append_rotated(key, revision, archived_head)
    }

    fn link_patch(&self, key: &Key, link: PatchLink) -> Result<(), IndexError> {
        self.inner.link_patch(key, link)
    }

    fn entry(&self, key: &Key) -> Result<Option<IndexEntry>, IndexError> {
        self.inner.entry(key)
    }

    fn all_keys(&self) -> Result<BTreeSet<Key>, IndexError> {
        self.inner.all_keys()
    }
}

/// Store, index and ingestor wired together in a temp directory
pub struct TestHistory {
    pub dir: TempDir,
    pub store: Arc<ArtifactStore>,
    pub index: Arc<dyn RevisionIndex>,
    pub fetcher: Arc<ScriptedFetcher>,
}

impl TestHistory {
    /// History backed by an in-memory index
    pub fn in_memory() -> Self {
        Self::with_index(|_| Arc::new(MemoryIndex::new()) as Arc<dyn RevisionIndex>)
    }

    /// History backed by on-disk ledgers
    pub fn on_disk() -> Self {
        Self::with_index(|dir| Arc::new(FileIndex::open(dir.join("index"))) as Arc<dyn RevisionIndex>)
    }

    /// History backed by the index `make` builds inside the temp directory
    pub fn with_index(make: impl FnOnce(&Path) -> Arc<dyn RevisionIndex>) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let store = Arc::new(ArtifactStore::new(
            dir.path().join("artifacts"),
            Arc::new(GzipCodec::default()),
        ));
        let index = make(dir.path());
        Self {
            dir,
            store,
            index,
            fetcher: Arc::new(ScriptedFetcher::new()),
        }
    }

    /// Data directory
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Chain builder using `engine`
    pub fn chain_with(&self, engine: Arc<dyn DiffEngine>) -> PatchChainBuilder {
        PatchChainBuilder::new(self.store.clone(), self.index.clone(), engine)
    }

    /// Chain builder using the JSON patch engine
    pub fn chain(&self) -> PatchChainBuilder {
        self.chain_with(Arc::new(JsonPatchEngine))
    }

    /// Ingestor using the scripted fetcher and `engine`
    pub fn ingestor_with(&self, engine: Arc<dyn DiffEngine>) -> SnapshotIngestor {
        SnapshotIngestor::new(
            self.fetcher.clone(),
            self.store.clone(),
            self.index.clone(),
            self.chain_with(engine),
        )
    }

    /// Ingestor using the JSON patch engine
    pub fn ingestor(&self) -> SnapshotIngestor {
        self.ingestor_with(Arc::new(JsonPatchEngine))
    }
}

/// Key used by most tests
pub fn test_key() -> Key {
    Key::new(
        "conda.anaconda.org/conda-forge",
        "linux-64",
        DocumentKind::Repodata,
    )
    .unwrap()
}

/// Minimal repodata document with the given package map
pub fn repodata(packages: Value) -> Value {
    json!({
        "info": {"subdir": "linux-64"},
        "packages": packages,
        "repodata_version": 1
    })
}

/// Repodata with `n` distinct packages
pub fn full_repodata(n: usize) -> Value {
    let packages: Map<String, Value> = (0..n)
        .map(|i| {
            (
                format!("pkg{i}-1.{i}-0.tar.bz2"),
                json!({
                    "name": format!("pkg{i}"),
                    "version": format!("1.{i}"),
                    "build_number": 0,
                    "depends": [format!("python >=3.{}", i % 12)],
                }),
            )
        })
        .collect();
    repodata(Value::Object(packages))
}

/// Synthetic history: start from `initial` and remove packages step by step
///
/// `removals[i]` lists indices into the remaining package names; an empty
/// step repeats the previous document unchanged.
pub fn synthetic_history(initial: Value, removals: &[Vec<usize>]) -> Vec<Value> {
    let mut docs = vec![initial.clone()];
    let mut current = initial;
    for step in removals {
        if let Some(packages) = current["packages"].as_object_mut() {
            for &i in step {
                let names: Vec<String> = packages.keys().cloned().collect();
                if names.is_empty() {
                    break;
                }
                packages.remove(&names[i % names.len()]);
            }
        }
        docs.push(current.clone());
    }
    docs
}
