//! Reverse patch chains
//!
//! The head of a key is always stored as a plain document. Older revisions
//! are reached by walking links backwards from the head: the link leaving
//! revision `n` turns its document into the document of `n - 1`.
//!
//! Links are verified before they are persisted: applying the new link to
//! the newer document must reproduce the older document's hash exactly.
//! A link that fails verification is dropped and the chain stays as it was.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::core::diff::DiffEngine;
use crate::core::index::{IndexEntry, RevisionIndex};
use crate::core::key::Key;
use crate::core::revision::{document_hash, PatchLink};
use crate::core::store::ArtifactStore;
use crate::error::ChainError;

/// Result of checking a key's chain
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChainReport {
    /// Number of revisions recorded
    pub revisions: usize,
    /// Number of links present
    pub links: usize,
    /// Revisions lacking a link to their predecessor
    pub missing_links: Vec<u64>,
    /// Revisions that could be rebuilt and matched their hash
    pub verified: Vec<u64>,
    /// Revisions that failed to rebuild, with the reason
    pub failed: Vec<(u64, String)>,
}

impl ChainReport {
    /// Whether every revision is reachable and verified
    pub fn is_complete(&self) -> bool {
        self.missing_links.is_empty() && self.failed.is_empty()
    }
}

/// Builds and replays patch chains
#[derive(Clone)]
pub struct PatchChainBuilder {
    store: Arc<ArtifactStore>,
    index: Arc<dyn RevisionIndex>,
    engine: Arc<dyn DiffEngine>,
}

impl PatchChainBuilder {
    /// Create a builder over a store, an index and a diff engine
    pub fn new(
        store: Arc<ArtifactStore>,
        index: Arc<dyn RevisionIndex>,
        engine: Arc<dyn DiffEngine>,
    ) -> Self {
        Self {
            store,
            index,
            engine,
        }
    }

    /// Link the newest revision of `key` to its predecessor
    pub fn extend(&self, key: &Key) -> Result<PatchLink, ChainError> {
        let entry = self.entry(key)?;
        let Some(head) = entry.head_sequence().filter(|&h| h > 0) else {
            return Err(ChainError::NothingToLink {
                key: key.to_string(),
            });
        };
        self.link_pair_in(&entry, head)
    }

    /// Link revision `from` to `from - 1`
    pub fn link_pair(&self, key: &Key, from: u64) -> Result<PatchLink, ChainError> {
        let entry = self.entry(key)?;
        self.link_pair_in(&entry, from)
    }

    /// Link every consecutive pair that has no link yet
    ///
    /// Pairs are attempted newest first and reported by their `from`
    /// sequence. A failed pair does not stop the remaining ones.
    pub fn backfill(
        &self,
        key: &Key,
    ) -> Result<Vec<(u64, Result<PatchLink, ChainError>)>, ChainError> {
        let entry = self.entry(key)?;
        let mut missing = entry.missing_links();
        missing.reverse();
        Ok(missing
            .into_iter()
            .map(|from| (from, self.link_pair_in(&entry, from)))
            .collect())
    }

    fn link_pair_in(&self, entry: &IndexEntry, from: u64) -> Result<PatchLink, ChainError> {
        let key = &entry.key;
        if from == 0 || entry.revision(from).is_none() {
            return Err(ChainError::UnknownRevision {
                key: key.to_string(),
                sequence: from,
            });
        }
        if entry.link_from(from).is_some() {
            return Err(ChainError::AlreadyLinked {
                key: key.to_string(),
                from,
            });
        }
        let to = from - 1;
        let expected = entry
            .revision(to)
            .map(|r| r.document_hash.clone())
            .ok_or_else(|| ChainError::UnknownRevision {
                key: key.to_string(),
                sequence: to,
            })?;

        let newer = self.load_document(entry, from)?;
        let older = self.load_document(entry, to)?;

        let ops = self.engine.diff(&newer, &older);
        let rebuilt = self
            .engine
            .apply(&newer, &ops)
            .map_err(|error| ChainError::Apply {
                key: key.to_string(),
                from,
                to,
                error,
            })?;
        let actual = document_hash(&rebuilt);
        if actual != expected {
            tracing::warn!(
                "Discarding patch {from} -> {to} for '{key}': rebuilt hash {actual} != {expected}"
            );
            return Err(ChainError::PatchIntegrity {
                key: key.to_string(),
                from,
                to,
                expected,
                actual,
            });
        }

        let link = PatchLink {
            from_sequence: from,
            to_sequence: to,
            ops,
            content_hash: expected,
        };
        self.index.link_patch(key, link.clone())?;
        tracing::debug!(
            "Linked '{key}' {from} -> {to} ({} ops)",
            link.ops.0.len()
        );
        Ok(link)
    }

    /// Rebuild the document of revision `target`
    ///
    /// Starts from the head and applies links `head -> head-1 -> ... ->
    /// target`, checking every intermediate document against its link.
    pub fn reconstruct(&self, key: &Key, target: u64) -> Result<Value, ChainError> {
        let unknown = || ChainError::UnknownRevision {
            key: key.to_string(),
            sequence: target,
        };
        let entry = self.index.entry(key)?.ok_or_else(unknown)?;
        let head = entry.head_sequence().ok_or_else(unknown)?;
        if target > head {
            return Err(unknown());
        }

        let mut doc = self.load_document(&entry, head)?;
        let mut current = head;
        while current != target {
            let link = entry
                .link_from(current)
                .ok_or_else(|| ChainError::BrokenChain {
                    key: key.to_string(),
                    from: current,
                })?;
            doc = self
                .engine
                .apply(&doc, &link.ops)
                .map_err(|error| ChainError::Apply {
                    key: key.to_string(),
                    from: link.from_sequence,
                    to: link.to_sequence,
                    error,
                })?;
            let actual = document_hash(&doc);
            if actual != link.content_hash {
                return Err(ChainError::PatchIntegrity {
                    key: key.to_string(),
                    from: link.from_sequence,
                    to: link.to_sequence,
                    expected: link.content_hash.clone(),
                    actual,
                });
            }
            current = link.to_sequence;
        }
        Ok(doc)
    }

    /// Check chain completeness and rebuild every revision
    pub fn verify(&self, key: &Key) -> Result<ChainReport, ChainError> {
        let entry = self.entry(key)?;
        let mut report = ChainReport {
            revisions: entry.revisions.len(),
            links: entry.patch_chain.len(),
            missing_links: entry.missing_links(),
            ..ChainReport::default()
        };

        for revision in entry.revisions.iter().rev() {
            match self.reconstruct(key, revision.sequence) {
                Ok(doc) if document_hash(&doc) == revision.document_hash => {
                    report.verified.push(revision.sequence);
                }
                Ok(doc) => report.failed.push((
                    revision.sequence,
                    format!(
                        "hash {} does not match recorded {}",
                        document_hash(&doc),
                        revision.document_hash
                    ),
                )),
                Err(e) => report.failed.push((revision.sequence, e.to_string())),
            }
        }
        Ok(report)
    }

    fn entry(&self, key: &Key) -> Result<IndexEntry, ChainError> {
        self.index
            .entry(key)?
            .ok_or_else(|| ChainError::NothingToLink {
                key: key.to_string(),
            })
    }

    fn load_document(&self, entry: &IndexEntry, sequence: u64) -> Result<Value, ChainError> {
        let revision = entry
            .revision(sequence)
            .ok_or_else(|| ChainError::UnknownRevision {
                key: entry.key.to_string(),
                sequence,
            })?;
        Ok(self.store.read_document(
            &entry.key,
            revision,
            entry.is_head(sequence),
            entry.archived_path(sequence),
        )?)
    }
}

impl std::fmt::Debug for PatchChainBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchChainBuilder")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
