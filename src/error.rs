//! Error types for repodata-history
//!
//! Domain-specific error types using thiserror.

use std::path::PathBuf;
use thiserror::Error;

/// Key validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// A path segment contains characters that cannot be stored on disk
    #[error("Invalid {field} segment '{segment}'")]
    InvalidSegment { field: &'static str, segment: String },

    /// Empty component
    #[error("Key {field} must not be empty")]
    Empty { field: &'static str },

    /// Unknown document kind
    #[error("Unknown document kind '{0}' (expected repodata or current_repodata)")]
    UnknownKind(String),
}

/// Fetch errors reported by a [`crate::infra::fetcher::Fetcher`]
#[derive(Error, Debug)]
pub enum FetchError {
    /// Network error (connection refused, timeout, truncated body)
    #[error("Network error fetching '{url}': {error}")]
    Network { url: String, error: String },

    /// Non-success HTTP status
    #[error("HTTP {code} fetching '{url}'")]
    HttpStatus { url: String, code: u16 },

    /// Local HTTP cache could not be read or written
    #[error("HTTP cache error for '{path}': {error}")]
    Cache { path: PathBuf, error: String },
}

/// Artifact store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO error
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },

    /// Artifact missing on disk
    #[error("Artifact not found: {path}")]
    NotFound { path: PathBuf },

    /// Encoding or decoding failed
    #[error("Codec error for '{path}': {error}")]
    Codec { path: PathBuf, error: String },

    /// Bytes are not a JSON document
    #[error("'{path}' is not a JSON document: {error}")]
    InvalidDocument { path: PathBuf, error: String },
}

/// Revision index (ledger) errors
#[derive(Error, Debug)]
pub enum IndexError {
    /// Revision sequence does not follow the current head
    #[error("Revision {got} for '{key}' is out of order (expected {expected})")]
    OutOfOrder {
        key: String,
        expected: u64,
        got: u64,
    },

    /// Link or archive refers to a revision that is not recorded
    #[error("Revision {sequence} is not recorded for '{key}'")]
    UnknownRevision { key: String, sequence: u64 },

    /// Link does not connect two consecutive revisions
    #[error("Patch link {from} -> {to} for '{key}' does not connect consecutive revisions")]
    NotConsecutive { key: String, from: u64, to: u64 },

    /// A link already leaves this revision
    #[error("Revision {from} for '{key}' already has a patch link")]
    DuplicateLink { key: String, from: u64 },

    /// Archive location already recorded
    #[error("Revision {sequence} for '{key}' is already archived")]
    DuplicateArchive { key: String, sequence: u64 },

    /// Ledger could not be persisted
    #[error("Failed to persist ledger '{path}': {error}")]
    Persist { path: PathBuf, error: String },

    /// Ledger on disk could not be parsed
    #[error("Corrupt ledger '{path}': {error}")]
    Corrupt { path: PathBuf, error: String },
}

/// Patch chain errors
#[derive(Error, Debug)]
pub enum ChainError {
    /// A computed patch does not invert the newer document
    #[error(
        "Patch {from} -> {to} for '{key}' failed verification: expected {expected}, got {actual}"
    )]
    PatchIntegrity {
        key: String,
        from: u64,
        to: u64,
        expected: String,
        actual: String,
    },

    /// Requested sequence does not exist
    #[error("Unknown revision {sequence} for '{key}'")]
    UnknownRevision { key: String, sequence: u64 },

    /// A link needed for reconstruction is missing
    #[error("Patch chain for '{key}' has no link from revision {from}")]
    BrokenChain { key: String, from: u64 },

    /// Fewer than two revisions
    #[error("'{key}' has fewer than two revisions; nothing to link")]
    NothingToLink { key: String },

    /// Head already linked
    #[error("Revision {from} for '{key}' is already linked")]
    AlreadyLinked { key: String, from: u64 },

    /// Patch could not be applied
    #[error("Failed to apply patch {from} -> {to} for '{key}': {error}")]
    Apply {
        key: String,
        from: u64,
        to: u64,
        error: String,
    },

    /// Store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Index error
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Snapshot ingestion errors
#[derive(Error, Debug)]
pub enum IngestError {
    /// Fetch failed; nothing was written
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Fetched bytes are not a JSON document; nothing was written
    #[error("'{url}' did not return a JSON document: {error}")]
    InvalidDocument { url: String, error: String },

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Index error
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// Worker task failed
    #[error("Ingest task for '{key}' failed: {error}")]
    Task { key: String, error: String },
}

/// Patch set file errors
#[derive(Error, Debug)]
pub enum PatchSetError {
    /// IO error
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },

    /// File is not valid JSON of the expected shape
    #[error("Failed to parse '{path}': {error}")]
    Parse { path: PathBuf, error: String },

    /// No entry leads from the given document
    #[error("Patch set has no patch leaving document {hash}")]
    Unreachable { hash: String },

    /// Starting document is not the set's latest
    #[error("Document {actual} is not the latest of the patch set (expected {expected})")]
    NotLatest { expected: String, actual: String },

    /// Patch could not be applied
    #[error("Failed to apply patch from {from}: {error}")]
    Apply { from: String, error: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file '{path}': {error}")]
    ReadError { path: String, error: String },

    /// Failed to parse config file
    #[error("Failed to parse config file '{path}': {error}")]
    ParseError { path: String, error: String },

    /// Failed to write config file
    #[error("Failed to write config file '{path}': {error}")]
    WriteError { path: String, error: String },

    /// Invalid tracked key
    #[error("Invalid tracked key: {0}")]
    Key(#[from] KeyError),
}

/// Top-level error type
#[derive(Error, Debug)]
pub enum HistoryError {
    /// Key error
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    /// Fetch error
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Index error
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// Chain error
    #[error("Patch chain error: {0}")]
    Chain(#[from] ChainError),

    /// Ingest error
    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// Patch set error
    #[error("Patch set error: {0}")]
    PatchSet(#[from] PatchSetError),

    /// Config error
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}
