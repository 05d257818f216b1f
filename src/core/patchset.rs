//! Patch set interchange files
//!
//! A patch set identifies documents by hash rather than by sequence, so it
//! can be shipped next to a published document and replayed by a client
//! that only holds the latest copy:
//!
//! ```json
//! {
//!   "url": "https://conda.anaconda.org/conda-forge/noarch/repodata.json",
//!   "latest": "<hash of the newest document>",
//!   "patches": [{ "from": "<hash>", "to": "<hash>", "patch": [...] }]
//! }
//! ```
//!
//! Applying `patch` to the document hashed `from` yields the document
//! hashed `to`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::diff::{DiffEngine, PatchOps};
use crate::core::index::IndexEntry;
use crate::core::revision::document_hash;
use crate::error::PatchSetError;

/// One patch between two hashed documents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchEntry {
    /// Hash of the document the patch produces
    pub to: String,
    /// Hash of the document the patch applies to
    pub from: String,
    /// Operations, absent for a bare marker entry
    pub patch: Option<PatchOps>,
}

/// Hash-addressed patch collection for one document URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchSet {
    /// URL of the document
    pub url: String,
    /// Hash of the newest document
    pub latest: String,
    /// Patches, newest first
    pub patches: Vec<PatchEntry>,
}

impl PatchSet {
    /// Create an empty patch set
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            latest: String::new(),
            patches: Vec::new(),
        }
    }

    /// Export the recorded chain of a key
    ///
    /// Revisions whose link is missing are left out, so the result only
    /// reaches back to the first gap.
    pub fn from_entry(url: impl Into<String>, entry: &IndexEntry) -> Self {
        let mut set = Self::new(url);
        let Some(head) = entry.head() else {
            return set;
        };
        set.latest = head.document_hash.clone();

        let mut from = head.sequence;
        while let Some(link) = entry.link_from(from) {
            let Some(revision) = entry.revision(from) else {
                break;
            };
            set.patches.push(PatchEntry {
                to: link.content_hash.clone(),
                from: revision.document_hash.clone(),
                patch: Some(link.ops.clone()),
            });
            from = link.to_sequence;
        }
        set
    }

    /// Append the patch turning `left` into `right`
    pub fn append_pair(&mut self, left: &Value, right: &Value, engine: &dyn DiffEngine) {
        let from = document_hash(left);
        if self.latest.is_empty() {
            self.latest = from.clone();
        }
        self.patches.push(PatchEntry {
            to: document_hash(right),
            from,
            patch: Some(engine.diff(left, right)),
        });
    }

    /// Rebuild the document hashed `target` starting from the latest one
    pub fn replay(
        &self,
        latest: &Value,
        target: &str,
        engine: &dyn DiffEngine,
    ) -> Result<Value, PatchSetError> {
        let actual = document_hash(latest);
        if actual != self.latest {
            return Err(PatchSetError::NotLatest {
                expected: self.latest.clone(),
                actual,
            });
        }

        let mut doc = latest.clone();
        let mut hash = actual;
        for _ in 0..=self.patches.len() {
            if hash == target {
                return Ok(doc);
            }
            let (entry, ops) = self
                .patches
                .iter()
                .find_map(|p| {
                    p.patch
                        .as_ref()
                        .filter(|_| p.from == hash)
                        .map(|ops| (p, ops))
                })
                .ok_or_else(|| PatchSetError::Unreachable { hash: hash.clone() })?;

            doc = engine.apply(&doc, ops).map_err(|error| PatchSetError::Apply {
                from: hash.clone(),
                error,
            })?;
            hash = document_hash(&doc);
            if hash != entry.to {
                return Err(PatchSetError::Apply {
                    from: entry.from.clone(),
                    error: format!("produced {hash}, expected {}", entry.to),
                });
            }
        }
        Err(PatchSetError::Unreachable { hash })
    }

    /// Load a patch set file
    pub fn load(path: &Path) -> Result<Self, PatchSetError> {
        let content = std::fs::read_to_string(path).map_err(|e| PatchSetError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| PatchSetError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Save as pretty JSON
    pub fn save(&self, path: &Path) -> Result<(), PatchSetError> {
        let content = serde_json::to_string_pretty(self).map_err(|e| PatchSetError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PatchSetError::Io {
                path: parent.to_path_buf(),
                error: e.to_string(),
            })?;
        }
        std::fs::write(path, content).map_err(|e| PatchSetError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::diff::JsonPatchEngine;
    use serde_json::json;
    use tempfile::TempDir;

    fn history() -> Vec<Value> {
        vec![
            json!({"packages": {"a-1.0": {"version": "1.0"}}}),
            json!({"packages": {"a-1.0": {"version": "1.0"}, "b-2.0": {"version": "2.0"}}}),
            json!({"packages": {"b-2.0": {"version": "2.0"}, "c-0.1": {"version": "0.1"}}}),
        ]
    }

    #[test]
    fn test_append_pair_sets_latest_once() {
        let docs = history();
        let mut set = PatchSet::new("./repodata.json");
        set.append_pair(&docs[2], &docs[1], &JsonPatchEngine);
        set.append_pair(&docs[1], &docs[0], &JsonPatchEngine);

        assert_eq!(set.latest, document_hash(&docs[2]));
        assert_eq!(set.patches.len(), 2);
        assert_eq!(set.patches[0].to, set.patches[1].from);
    }

    #[test]
    fn test_replay_walks_to_target() {
        let docs = history();
        let mut set = PatchSet::new("./repodata.json");
        set.append_pair(&docs[2], &docs[1], &JsonPatchEngine);
        set.append_pair(&docs[1], &docs[0], &JsonPatchEngine);

        let oldest = set
            .replay(&docs[2], &document_hash(&docs[0]), &JsonPatchEngine)
            .unwrap();
        assert_eq!(oldest, docs[0]);

        let latest = set
            .replay(&docs[2], &document_hash(&docs[2]), &JsonPatchEngine)
            .unwrap();
        assert_eq!(latest, docs[2]);
    }

    #[test]
    fn test_replay_rejects_wrong_start() {
        let docs = history();
        let mut set = PatchSet::new("./repodata.json");
        set.append_pair(&docs[2], &docs[1], &JsonPatchEngine);

        let err = set
            .replay(&docs[1], &document_hash(&docs[0]), &JsonPatchEngine)
            .unwrap_err();
        assert!(matches!(err, PatchSetError::NotLatest { .. }));
    }

    #[test]
    fn test_replay_unknown_target() {
        let docs = history();
        let mut set = PatchSet::new("./repodata.json");
        set.append_pair(&docs[2], &docs[1], &JsonPatchEngine);

        let err = set
            .replay(&docs[2], "not-a-hash", &JsonPatchEngine)
            .unwrap_err();
        assert!(matches!(err, PatchSetError::Unreachable { .. }));
    }

    #[test]
    fn test_save_and_load() {
        let docs = history();
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out").join("patches.json");

        let mut set = PatchSet::new("./repodata.json");
        set.append_pair(&docs[1], &docs[0], &JsonPatchEngine);
        set.save(&path).unwrap();

        let loaded = PatchSet::load(&path).unwrap();
        assert_eq!(loaded.latest, set.latest);
        assert_eq!(loaded.patches.len(), 1);
        assert!(loaded.patches[0].patch.is_some());
    }

    #[test]
    fn test_load_accepts_marker_entries() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("patches.json");
        std::fs::write(
            &path,
            r#"{"url":"./repodata.json","latest":"abc","patches":[{"to":"abc","from":"","patch":null}]}"#,
        )
        .unwrap();

        let set = PatchSet::load(&path).unwrap();
        assert!(set.patches[0].patch.is_none());
    }

    #[test]
    fn test_load_invalid_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("patches.json");
        std::fs::write(&path, "[]").unwrap();
        assert!(matches!(
            PatchSet::load(&path),
            Err(PatchSetError::Parse { .. })
        ));
    }
}
