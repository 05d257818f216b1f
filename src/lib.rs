//! repodata-history - versioned mirror of conda repository index documents
//!
//! Fetches `repodata.json` / `current_repodata.json` per repository and
//! subdirectory, keeps every distinct snapshot on disk, and maintains a
//! reverse patch chain so any past snapshot can be rebuilt from the newest.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Keys, revisions, storage, patch chains and ingestion
//! - [`infra`] - Network fetching, HTTP cache and directory layout
//! - [`config`] - Configuration constants
//! - [`error`] - Error types and handling

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;
