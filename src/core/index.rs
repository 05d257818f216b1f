//! Revision index
//!
//! The ledger of revisions, archive locations and patch links per key. It is
//! the single source of truth for ordering. Every mutation is append-only
//! and is validated against the entry's invariants before it is published:
//!
//! - revisions are contiguous from 0, so the head is always the last one
//! - at most one link leaves any revision, and it points at its predecessor
//! - the chain is kept ordered by `from_sequence`

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::core::key::Key;
use crate::core::revision::{PatchLink, Revision};
use crate::error::IndexError;

/// File name suffix for per-key ledgers
const LEDGER_EXTENSION: &str = "ledger.json";

/// Ledger entry for one key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Key this entry describes
    pub key: Key,
    /// Revisions ordered by sequence
    pub revisions: Vec<Revision>,
    /// Patch links ordered by `from_sequence`
    #[serde(default)]
    pub patch_chain: Vec<PatchLink>,
    /// Disambiguated paths of superseded revisions
    #[serde(default)]
    pub archives: BTreeMap<u64, PathBuf>,
}

impl IndexEntry {
    /// Create an empty entry
    pub fn new(key: Key) -> Self {
        Self {
            key,
            revisions: Vec::new(),
            patch_chain: Vec::new(),
            archives: BTreeMap::new(),
        }
    }

    /// Current head
    pub fn head(&self) -> Option<&Revision> {
        self.revisions.last()
    }

    /// Sequence of the head, if any
    pub fn head_sequence(&self) -> Option<u64> {
        self.head().map(|r| r.sequence)
    }

    /// Revision with the given sequence
    pub fn revision(&self, sequence: u64) -> Option<&Revision> {
        usize::try_from(sequence)
            .ok()
            .and_then(|i| self.revisions.get(i))
            .filter(|r| r.sequence == sequence)
    }

    /// Link leaving `from`
    pub fn link_from(&self, from: u64) -> Option<&PatchLink> {
        self.patch_chain
            .binary_search_by_key(&from, |l| l.from_sequence)
            .ok()
            .map(|i| &self.patch_chain[i])
    }

    /// Archive location of a superseded revision
    pub fn archived_path(&self, sequence: u64) -> Option<&Path> {
        self.archives.get(&sequence).map(PathBuf::as_path)
    }

    /// Whether `sequence` is the head
    pub fn is_head(&self, sequence: u64) -> bool {
        self.head_sequence() == Some(sequence)
    }

    /// Revisions (by `from` sequence) that have no link to their predecessor
    pub fn missing_links(&self) -> Vec<u64> {
        self.revisions
            .iter()
            .skip(1)
            .map(|r| r.sequence)
            .filter(|&seq| self.link_from(seq).is_none())
            .collect()
    }

    /// Next sequence number to assign
    pub fn next_sequence(&self) -> u64 {
        self.head_sequence().map_or(0, |s| s + 1)
    }

    fn append(
        &mut self,
        revision: Revision,
        archived_head: Option<PathBuf>,
    ) -> Result<(), IndexError> {
        let expected = self.next_sequence();
        if revision.sequence != expected {
            return Err(IndexError::OutOfOrder {
                key: self.key.to_string(),
                expected,
                got: revision.sequence,
            });
        }
        match (self.head_sequence(), archived_head) {
            (Some(head), Some(path)) => {
                if self.archives.contains_key(&head) {
                    return Err(IndexError::DuplicateArchive {
                        key: self.key.to_string(),
                        sequence: head,
                    });
                }
                self.archives.insert(head, path);
            }
            // A file rotated away before this key had any ledger history
            (None, Some(path)) => {
                tracing::debug!(
                    "Untracked artifact for '{}' preserved at {}",
                    self.key,
                    path.display()
                );
            }
            (_, None) => {}
        }
        self.revisions.push(revision);
        Ok(())
    }

    fn link_patch(&mut self, link: PatchLink) -> Result<(), IndexError> {
        let key = self.key.to_string();
        if link.to_sequence + 1 != link.from_sequence {
            return Err(IndexError::NotConsecutive {
                key,
                from: link.from_sequence,
                to: link.to_sequence,
            });
        }
        if self.revision(link.from_sequence).is_none() {
            return Err(IndexError::UnknownRevision {
                key,
                sequence: link.from_sequence,
            });
        }
        match self
            .patch_chain
            .binary_search_by_key(&link.from_sequence, |l| l.from_sequence)
        {
            Ok(_) => Err(IndexError::DuplicateLink {
                key,
                from: link.from_sequence,
            }),
            Err(pos) => {
                self.patch_chain.insert(pos, link);
                Ok(())
            }
        }
    }
}

/// Metadata ledger mapping keys to revisions and patch chains
pub trait RevisionIndex: Send + Sync {
    /// Register a new head revision, recording in the same step where the
    /// previous head's artifact was rotated to
    fn append_rotated(
        &self,
        key: &Key,
        revision: Revision,
        archived_head: Option<PathBuf>,
    ) -> Result<(), IndexError>;

    /// Add a patch link
    fn link_patch(&self, key: &Key, link: PatchLink) -> Result<(), IndexError>;

    /// Full entry for a key
    fn entry(&self, key: &Key) -> Result<Option<IndexEntry>, IndexError>;

    /// All keys with at least one revision
    fn all_keys(&self) -> Result<BTreeSet<Key>, IndexError>;

    /// Register a new head revision
    fn append(&self, key: &Key, revision: Revision) -> Result<(), IndexError> {
        self.append_rotated(key, revision, None)
    }

    /// Current head
    fn head(&self, key: &Key) -> Result<Option<Revision>, IndexError> {
        Ok(self.entry(key)?.and_then(|e| e.head().cloned()))
    }

    /// All revisions in order
    fn revisions(&self, key: &Key) -> Result<Vec<Revision>, IndexError> {
        Ok(self.entry(key)?.map(|e| e.revisions).unwrap_or_default())
    }

    /// Patch chain in `from_sequence` order
    fn chain(&self, key: &Key) -> Result<Vec<PatchLink>, IndexError> {
        Ok(self.entry(key)?.map(|e| e.patch_chain).unwrap_or_default())
    }
}

/// In-memory ledger
#[derive(Debug, Default)]
pub struct MemoryIndex {
    entries: RwLock<BTreeMap<Key, IndexEntry>>,
}

impl MemoryIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    fn mutate(
        &self,
        key: &Key,
        f: impl FnOnce(&mut IndexEntry) -> Result<(), IndexError>,
    ) -> Result<(), IndexError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let mut entry = entries
            .get(key)
            .cloned()
            .unwrap_or_else(|| IndexEntry::new(key.clone()));
        f(&mut entry)?;
        entries.insert(key.clone(), entry);
        Ok(())
    }
}

impl RevisionIndex for MemoryIndex {
    fn append_rotated(
        &self,
        key: &Key,
        revision: Revision,
        archived_head: Option<PathBuf>,
    ) -> Result<(), IndexError> {
        self.mutate(key, |e| e.append(revision, archived_head))
    }

    fn link_patch(&self, key: &Key, link: PatchLink) -> Result<(), IndexError> {
        self.mutate(key, |e| e.link_patch(link))
    }

    fn entry(&self, key: &Key) -> Result<Option<IndexEntry>, IndexError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn all_keys(&self) -> Result<BTreeSet<Key>, IndexError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .iter()
            .filter(|(_, e)| !e.revisions.is_empty())
            .map(|(k, _)| k.clone())
            .collect())
    }
}

/// Ledger persisted as one JSON file per key
///
/// Files live at `<root>/<key dir>/<stem>.ledger.json` and are replaced
/// atomically (write to a sibling, then rename). Entries are loaded lazily
/// and cached.
#[derive(Debug)]
pub struct FileIndex {
    root: PathBuf,
    cache: RwLock<HashMap<Key, IndexEntry>>,
}

impl FileIndex {
    /// Open (or create) an index rooted at `root`
    pub fn open(root: PathBuf) -> Self {
        Self {
            root,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ledger file for a key
    pub fn ledger_path(&self, key: &Key) -> PathBuf {
        self.root
            .join(key.relative_dir())
            .join(format!("{}.{LEDGER_EXTENSION}", key.kind.stem()))
    }

    fn load(&self, key: &Key) -> Result<Option<IndexEntry>, IndexError> {
        if let Some(entry) = self
            .cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
        {
            return Ok(Some(entry.clone()));
        }

        let path = self.ledger_path(key);
        let Some(entry) = read_ledger(&path)? else {
            return Ok(None);
        };
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone(), entry.clone());
        Ok(Some(entry))
    }

    fn mutate(
        &self,
        key: &Key,
        f: impl FnOnce(&mut IndexEntry) -> Result<(), IndexError>,
    ) -> Result<(), IndexError> {
        let path = self.ledger_path(key);
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        let mut entry = match cache.get(key) {
            Some(entry) => entry.clone(),
            None => read_ledger(&path)?.unwrap_or_else(|| IndexEntry::new(key.clone())),
        };
        f(&mut entry)?;

        write_ledger(&path, &entry)?;
        cache.insert(key.clone(), entry);
        Ok(())
    }
}

impl RevisionIndex for FileIndex {
    fn append_rotated(
        &self,
        key: &Key,
        revision: Revision,
        archived_head: Option<PathBuf>,
    ) -> Result<(), IndexError> {
        self.mutate(key, |e| e.append(revision, archived_head))
    }

    fn link_patch(&self, key: &Key, link: PatchLink) -> Result<(), IndexError> {
        self.mutate(key, |e| e.link_patch(link))
    }

    fn entry(&self, key: &Key) -> Result<Option<IndexEntry>, IndexError> {
        self.load(key)
    }

    fn all_keys(&self) -> Result<BTreeSet<Key>, IndexError> {
        let mut keys = BTreeSet::new();
        if !self.root.exists() {
            return Ok(keys);
        }

        let suffix = format!(".{LEDGER_EXTENSION}");
        for entry in walkdir::WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.file_name().to_string_lossy().ends_with(&suffix))
        {
            if let Some(ledger) = read_ledger(entry.path())? {
                if !ledger.revisions.is_empty() {
                    keys.insert(ledger.key);
                }
            }
        }
        Ok(keys)
    }
}

fn read_ledger(path: &Path) -> Result<Option<IndexEntry>, IndexError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(IndexError::Corrupt {
                path: path.to_path_buf(),
                error: e.to_string(),
            })
        }
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| IndexError::Corrupt {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
}

fn write_ledger(path: &Path, entry: &IndexEntry) -> Result<(), IndexError> {
    let persist_err = |e: &dyn std::fmt::Display| IndexError::Persist {
        path: path.to_path_buf(),
        error: e.to_string(),
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| persist_err(&e))?;
    }
    let content = serde_json::to_string_pretty(entry).map_err(|e| persist_err(&e))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content).map_err(|e| persist_err(&e))?;
    std::fs::rename(&tmp, path).map_err(|e| persist_err(&e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::key::DocumentKind;
    use chrono::Utc;
    use tempfile::TempDir;

    fn key() -> Key {
        Key::new("conda.anaconda.org/conda-forge", "noarch", DocumentKind::Repodata).unwrap()
    }

    fn revision(sequence: u64) -> Revision {
        Revision {
            sequence,
            content_hash: format!("{sequence:064x}"),
            document_hash: format!("{sequence:064x}"),
            retrieved_at: Utc::now(),
            size_bytes: 2,
            storage_path: PathBuf::from("noarch/repodata.json.gz"),
            validator: None,
        }
    }

    fn link(from: u64) -> PatchLink {
        PatchLink {
            from_sequence: from,
            to_sequence: from - 1,
            ops: json_patch::Patch(Vec::new()),
            content_hash: format!("{:064x}", from - 1),
        }
    }

    fn exercise(index: &dyn RevisionIndex) {
        let key = key();
        assert!(index.head(&key).unwrap().is_none());

        index.append(&key, revision(0)).unwrap();
        index
            .append_rotated(
                &key,
                revision(1),
                Some(PathBuf::from("noarch/repodata-000.json.gz")),
            )
            .unwrap();
        index.link_patch(&key, link(1)).unwrap();

        assert_eq!(index.head(&key).unwrap().unwrap().sequence, 1);
        assert_eq!(index.revisions(&key).unwrap().len(), 2);
        assert_eq!(index.chain(&key).unwrap().len(), 1);
        assert_eq!(index.all_keys().unwrap().into_iter().collect::<Vec<_>>(), vec![key]);
    }

    #[test]
    fn test_memory_index_roundtrip() {
        exercise(&MemoryIndex::new());
    }

    #[test]
    fn test_file_index_roundtrip_and_reopen() {
        let temp = TempDir::new().unwrap();
        let index = FileIndex::open(temp.path().to_path_buf());
        exercise(&index);

        let reopened = FileIndex::open(temp.path().to_path_buf());
        let entry = reopened.entry(&key()).unwrap().unwrap();
        assert_eq!(entry.head_sequence(), Some(1));
        assert_eq!(
            entry.archived_path(0),
            Some(Path::new("noarch/repodata-000.json.gz"))
        );
        assert!(entry.link_from(1).is_some());
        assert!(reopened.ledger_path(&key()).exists());
    }

    #[test]
    fn test_append_rejects_gaps_and_duplicates() {
        let index = MemoryIndex::new();
        let key = key();
        assert!(matches!(
            index.append(&key, revision(1)),
            Err(IndexError::OutOfOrder { expected: 0, got: 1, .. })
        ));
        index.append(&key, revision(0)).unwrap();
        assert!(matches!(
            index.append(&key, revision(0)),
            Err(IndexError::OutOfOrder { expected: 1, got: 0, .. })
        ));
        assert_eq!(index.revisions(&key).unwrap().len(), 1);
    }

    #[test]
    fn test_link_patch_validation() {
        let index = MemoryIndex::new();
        let key = key();
        index.append(&key, revision(0)).unwrap();

        // from revision not recorded yet
        assert!(matches!(
            index.link_patch(&key, link(1)),
            Err(IndexError::UnknownRevision { sequence: 1, .. })
        ));

        index.append(&key, revision(1)).unwrap();
        index.append(&key, revision(2)).unwrap();

        let mut skipping = link(2);
        skipping.to_sequence = 0;
        assert!(matches!(
            index.link_patch(&key, skipping),
            Err(IndexError::NotConsecutive { from: 2, to: 0, .. })
        ));

        index.link_patch(&key, link(2)).unwrap();
        assert!(matches!(
            index.link_patch(&key, link(2)),
            Err(IndexError::DuplicateLink { from: 2, .. })
        ));
        assert_eq!(index.chain(&key).unwrap().len(), 1);
    }

    #[test]
    fn test_chain_stays_ordered_when_backfilled() {
        let index = MemoryIndex::new();
        let key = key();
        for seq in 0..4 {
            index.append(&key, revision(seq)).unwrap();
        }
        index.link_patch(&key, link(3)).unwrap();
        index.link_patch(&key, link(1)).unwrap();

        let entry = index.entry(&key).unwrap().unwrap();
        assert_eq!(entry.missing_links(), vec![2]);

        index.link_patch(&key, link(2)).unwrap();
        let froms: Vec<u64> = index
            .chain(&key)
            .unwrap()
            .iter()
            .map(|l| l.from_sequence)
            .collect();
        assert_eq!(froms, vec![1, 2, 3]);
    }

    #[test]
    fn test_append_rotated_records_previous_head() {
        let index = MemoryIndex::new();
        let key = key();

        // Nothing to attach the archive to yet; the revision is still recorded
        index
            .append_rotated(&key, revision(0), Some(PathBuf::from("stray-000")))
            .unwrap();
        index
            .append_rotated(&key, revision(1), Some(PathBuf::from("repodata-001")))
            .unwrap();

        let entry = index.entry(&key).unwrap().unwrap();
        assert_eq!(entry.archives.len(), 1);
        assert_eq!(entry.archived_path(0), Some(Path::new("repodata-001")));
        assert!(entry.is_head(1));
    }

    #[test]
    fn test_file_index_reports_corrupt_ledger() {
        let temp = TempDir::new().unwrap();
        let index = FileIndex::open(temp.path().to_path_buf());
        let path = index.ledger_path(&key());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            index.entry(&key()),
            Err(IndexError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_failed_mutation_leaves_entry_intact() {
        let temp = TempDir::new().unwrap();
        let index = FileIndex::open(temp.path().to_path_buf());
        let key = key();
        index.append(&key, revision(0)).unwrap();
        let before = std::fs::read_to_string(index.ledger_path(&key)).unwrap();

        assert!(index.append(&key, revision(5)).is_err());
        assert_eq!(std::fs::read_to_string(index.ledger_path(&key)).unwrap(), before);
        assert_eq!(index.revisions(&key).unwrap().len(), 1);
    }
}
