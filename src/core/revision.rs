//! Revisions and patch links
//!
//! A [`Revision`] is one immutable snapshot of a key. A [`PatchLink`] turns
//! the document of revision `n` back into the document of revision `n - 1`.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::core::diff::PatchOps;

/// One fetched snapshot of a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    /// Position in the key's history, starting at 0
    pub sequence: u64,
    /// SHA256 of the raw fetched bytes
    pub content_hash: String,
    /// SHA256 of the canonical JSON form of the document
    pub document_hash: String,
    /// When the snapshot was retrieved
    pub retrieved_at: DateTime<Utc>,
    /// Size of the raw document in bytes
    pub size_bytes: u64,
    /// Canonical path the artifact was written to
    pub storage_path: PathBuf,
    /// ETag or Last-Modified reported by the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator: Option<String>,
}

/// Reverse patch between two consecutive revisions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchLink {
    /// Newer revision the patch applies to
    pub from_sequence: u64,
    /// Older revision the patch produces
    pub to_sequence: u64,
    /// Patch operations
    pub ops: PatchOps,
    /// Document hash of `to_sequence`, checked after applying `ops`
    pub content_hash: String,
}

/// Compute SHA256 checksum of data
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hash of a parsed document
///
/// serde_json maps are ordered by key, so two equal documents always
/// serialize to the same bytes regardless of their source formatting.
pub fn document_hash(doc: &Value) -> String {
    let canonical = serde_json::to_vec(doc).unwrap_or_default();
    compute_checksum(&canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_compute_checksum() {
        assert_eq!(
            compute_checksum(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_compute_checksum_empty() {
        assert_eq!(
            compute_checksum(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_document_hash_ignores_formatting_and_key_order() {
        let compact: Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
        let pretty: Value = serde_json::from_str("{\n  \"a\": 1,\n  \"b\": 2\n}").unwrap();
        assert_eq!(document_hash(&compact), document_hash(&pretty));
    }

    #[test]
    fn test_document_hash_differs_for_different_documents() {
        assert_ne!(
            document_hash(&json!({"packages": {"a": 1}})),
            document_hash(&json!({"packages": {"a": 1, "b": 2}}))
        );
    }

    #[test]
    fn test_revision_serializes_without_missing_validator() {
        let revision = Revision {
            sequence: 0,
            content_hash: compute_checksum(b"{}"),
            document_hash: document_hash(&json!({})),
            retrieved_at: Utc::now(),
            size_bytes: 2,
            storage_path: PathBuf::from("repodata.json.gz"),
            validator: None,
        };
        let text = serde_json::to_string(&revision).unwrap();
        assert!(!text.contains("validator"));
        let back: Revision = serde_json::from_str(&text).unwrap();
        assert_eq!(back, revision);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Checksum is always 64 hex characters
        #[test]
        fn prop_checksum_format(data in proptest::collection::vec(any::<u8>(), 0..1000)) {
            let checksum = compute_checksum(&data);
            prop_assert_eq!(checksum.len(), 64);
            prop_assert!(checksum.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }
}
