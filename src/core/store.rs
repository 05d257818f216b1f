//! On-disk artifact store
//!
//! Each key has one canonical artifact path that always holds the current
//! head. Before a new head is written, the file occupying the canonical
//! path is renamed to `<stem>-<NNN>.<ext>`, using the smallest `NNN` not
//! yet taken. Artifacts are never overwritten or deleted.
//!
//! The extension names the codec an artifact was written with, so a store
//! opened with a different codec still reads, rotates and lists older
//! artifacts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::core::codec::{Codec, CodecKind};
use crate::core::key::Key;
use crate::core::revision::{compute_checksum, document_hash, Revision};
use crate::error::StoreError;

/// Suffix for in-flight writes next to the canonical path
const PARTIAL_SUFFIX: &str = "partial";

type RenameFn<'a> = &'a dyn Fn(&Path, &Path) -> std::io::Result<()>;

/// Result of writing a new head artifact
#[derive(Debug, Clone)]
pub struct StoredWrite {
    /// Revision describing the new head
    pub revision: Revision,
    /// Where the previous head artifact was moved to, if there was one
    pub archived: Option<PathBuf>,
    rotated: Vec<(PathBuf, PathBuf)>,
}

/// Artifact store rooted at a directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    codec: Arc<dyn Codec>,
}

impl ArtifactStore {
    /// Create a store rooted at `root`
    pub fn new(root: PathBuf, codec: Arc<dyn Codec>) -> Self {
        Self { root, codec }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Codec used for new artifacts
    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    fn key_dir(&self, key: &Key) -> PathBuf {
        self.root.join(key.relative_dir())
    }

    /// Canonical path of a key's head artifact
    pub fn path_for(&self, key: &Key) -> PathBuf {
        self.key_dir(key)
            .join(format!("{}.{}", key.kind.stem(), self.codec.extension()))
    }

    /// Disambiguated path with index `n`
    pub fn archive_path_for(&self, key: &Key, n: u32) -> PathBuf {
        self.archive_path_with(key, n, self.codec.extension())
    }

    fn archive_path_with(&self, key: &Key, n: u32, extension: &str) -> PathBuf {
        self.key_dir(key)
            .join(format!("{}-{n:03}.{extension}", key.kind.stem()))
    }

    /// Extensions an artifact of this store may carry, the current codec's first
    fn extensions(&self) -> Vec<&'static str> {
        let mut extensions = vec![self.codec.extension()];
        extensions.extend(
            CodecKind::ALL
                .into_iter()
                .map(CodecKind::extension)
                .filter(|ext| *ext != self.codec.extension()),
        );
        extensions
    }

    /// Smallest archive index not taken under any extension
    fn next_archive_index(&self, key: &Key) -> u32 {
        let extensions = self.extensions();
        let mut n = 0;
        while extensions
            .iter()
            .any(|ext| self.archive_path_with(key, n, ext).exists())
        {
            n += 1;
        }
        n
    }

    /// Smallest unused disambiguated path, probing upward from `-000`
    pub fn next_archive_path(&self, key: &Key) -> PathBuf {
        self.archive_path_for(key, self.next_archive_index(key))
    }

    /// Persist a new head for `key`
    ///
    /// `bytes` must parse as a JSON document; anything else is rejected before
    /// the disk is touched. The new content is fully written to a sibling
    /// file before the previous head is rotated away, and a failed rename
    /// puts the previous head back, so an IO failure leaves the canonical
    /// path as it was.
    pub fn write(&self, key: &Key, sequence: u64, bytes: &[u8]) -> Result<StoredWrite, StoreError> {
        self.write_via(key, sequence, bytes, &|from: &Path, to: &Path| {
            std::fs::rename(from, to)
        })
    }

    fn write_via(
        &self,
        key: &Key,
        sequence: u64,
        bytes: &[u8],
        rename: RenameFn<'_>,
    ) -> Result<StoredWrite, StoreError> {
        let canonical = self.path_for(key);
        let doc: Value =
            serde_json::from_slice(bytes).map_err(|e| StoreError::InvalidDocument {
                path: canonical.clone(),
                error: e.to_string(),
            })?;

        if let Some(parent) = canonical.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io {
                path: parent.to_path_buf(),
                error: e.to_string(),
            })?;
        }

        let encoded = self.codec.encode(bytes).map_err(|e| StoreError::Codec {
            path: canonical.clone(),
            error: e.to_string(),
        })?;

        let partial = partial_path(&canonical);
        std::fs::write(&partial, &encoded).map_err(|e| StoreError::Io {
            path: partial.clone(),
            error: e.to_string(),
        })?;

        // Rotate whatever head file exists, including one left by another codec
        let mut rotated: Vec<(PathBuf, PathBuf)> = Vec::new();
        for ext in self.extensions() {
            let current = self
                .key_dir(key)
                .join(format!("{}.{ext}", key.kind.stem()));
            if !current.exists() {
                continue;
            }
            let target = self.archive_path_with(key, self.next_archive_index(key), ext);
            if let Err(e) = rename(&current, &target) {
                restore(&rotated, rename);
                let _ = std::fs::remove_file(&partial);
                return Err(StoreError::Io {
                    path: current,
                    error: e.to_string(),
                });
            }
            tracing::debug!("Rotated {} -> {}", current.display(), target.display());
            rotated.push((current, target));
        }
        if rotated.len() > 1 {
            tracing::warn!(
                "Found {} head artifacts for '{key}'; all were archived",
                rotated.len()
            );
        }

        if let Err(e) = rename(&partial, &canonical) {
            restore(&rotated, rename);
            let _ = std::fs::remove_file(&partial);
            return Err(StoreError::Io {
                path: canonical,
                error: e.to_string(),
            });
        }

        let revision = Revision {
            sequence,
            content_hash: compute_checksum(bytes),
            document_hash: document_hash(&doc),
            retrieved_at: Utc::now(),
            size_bytes: bytes.len() as u64,
            storage_path: canonical,
            validator: None,
        };

        Ok(StoredWrite {
            revision,
            archived: rotated.first().map(|(_, to)| to.clone()),
            rotated,
        })
    }

    /// Undo a write whose revision could not be recorded
    ///
    /// Removes the new head and moves the rotated artifacts back to the
    /// canonical path.
    pub fn rollback(&self, write: &StoredWrite) -> Result<(), StoreError> {
        let head = &write.revision.storage_path;
        match std::fs::remove_file(head) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(StoreError::Io {
                    path: head.clone(),
                    error: e.to_string(),
                })
            }
        }
        for (from, to) in write.rotated.iter().rev() {
            std::fs::rename(to, from).map_err(|e| StoreError::Io {
                path: to.clone(),
                error: e.to_string(),
            })?;
        }
        tracing::debug!(
            "Rolled back revision {} at {}",
            write.revision.sequence,
            head.display()
        );
        Ok(())
    }

    /// Read the raw document bytes of a revision
    ///
    /// `is_head` selects the canonical file the revision was written as;
    /// otherwise `archived` (recorded when the revision was rotated away) or
    /// the revision's own `storage_path` is used.
    pub fn read(
        &self,
        key: &Key,
        revision: &Revision,
        is_head: bool,
        archived: Option<&Path>,
    ) -> Result<Vec<u8>, StoreError> {
        let path = if is_head {
            revision
                .storage_path
                .file_name()
                .map_or_else(|| self.path_for(key), |name| self.key_dir(key).join(name))
        } else {
            archived.map_or_else(|| revision.storage_path.clone(), Path::to_path_buf)
        };
        self.read_path(&path)
    }

    /// Read and decode an artifact at an arbitrary path
    ///
    /// The codec is picked from the file's extension, falling back to the
    /// store's own.
    pub fn read_path(&self, path: &Path) -> Result<Vec<u8>, StoreError> {
        let encoded = std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                StoreError::Io {
                    path: path.to_path_buf(),
                    error: e.to_string(),
                }
            }
        })?;
        self.codec_for(path)
            .decode(&encoded)
            .map_err(|e| StoreError::Codec {
                path: path.to_path_buf(),
                error: e.to_string(),
            })
    }

    fn codec_for(&self, path: &Path) -> Arc<dyn Codec> {
        match CodecKind::for_path(path) {
            Some(kind) if kind.extension() != self.codec.extension() => kind.build(),
            _ => self.codec.clone(),
        }
    }

    /// Read and parse the document of a revision
    pub fn read_document(
        &self,
        key: &Key,
        revision: &Revision,
        is_head: bool,
        archived: Option<&Path>,
    ) -> Result<Value, StoreError> {
        let bytes = self.read(key, revision, is_head, archived)?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::InvalidDocument {
            path: revision.storage_path.clone(),
            error: e.to_string(),
        })
    }

    /// All artifact files present for `key`, canonical first then archives
    /// in index order
    pub fn list_artifacts(&self, key: &Key) -> Vec<PathBuf> {
        let dir = self.key_dir(key);
        let extensions = self.extensions();
        let prefix = format!("{}-", key.kind.stem());

        let mut archives: Vec<PathBuf> = walkdir::WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                let name = entry.file_name().to_string_lossy();
                name.strip_prefix(&prefix)
                    .and_then(|rest| rest.split_once('.'))
                    .is_some_and(|(n, ext)| {
                        n.len() >= 3
                            && n.chars().all(|c| c.is_ascii_digit())
                            && extensions.contains(&ext)
                    })
            })
            .map(walkdir::DirEntry::into_path)
            .collect();
        archives.sort();

        let mut out: Vec<PathBuf> = extensions
            .iter()
            .map(|ext| dir.join(format!("{}.{ext}", key.kind.stem())))
            .filter(|path| path.exists())
            .collect();
        out.extend(archives);
        out
    }
}

/// Move rotated artifacts back, newest rotation first
fn restore(rotated: &[(PathBuf, PathBuf)], rename: RenameFn<'_>) {
    for (from, to) in rotated.iter().rev() {
        if let Err(e) = rename(to, from) {
            tracing::error!(
                "Failed to restore {} from {}: {e}",
                from.display(),
                to.display()
            );
        }
    }
}

fn partial_path(canonical: &Path) -> PathBuf {
    let mut name = canonical
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    canonical.with_file_name(name)
}
