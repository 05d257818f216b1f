//! Core history logic
//!
//! # Submodules
//!
//! - [`key`] - Document stream keys
//! - [`revision`] - Revisions, patch links and hashing
//! - [`codec`] - Artifact encoding
//! - [`diff`] - JSON diff engine
//! - [`store`] - On-disk artifact store with collision-safe rotation
//! - [`index`] - Revision ledgers
//! - [`chain`] - Reverse patch chain construction and replay
//! - [`ingest`] - Snapshot ingestion
//! - [`patchset`] - Hash-addressed patch set files
//! - [`config`] - Global configuration management

pub mod chain;
pub mod codec;
pub mod config;
pub mod diff;
pub mod index;
pub mod ingest;
pub mod key;
pub mod patchset;
pub mod revision;
pub mod store;
