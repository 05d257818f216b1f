//! CLI command for `repodata-history patchset`
//!
//! Appends the diff between two documents to a patch set file. Documents
//! ending in `.gz` are decompressed first.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::cli::output::{status, OutputConfig};
use crate::core::codec::{Codec, GzipCodec};
use crate::core::diff::JsonPatchEngine;
use crate::core::patchset::PatchSet;
use crate::core::revision::document_hash;

/// Execute patchset
pub fn execute(
    left: &Path,
    right: &Path,
    patches: &Path,
    init: bool,
    url: &str,
    output: OutputConfig,
) -> Result<()> {
    let left_doc = read_document(left)?;
    let right_doc = read_document(right)?;

    let mut set = if init {
        PatchSet::new(url)
    } else {
        PatchSet::load(patches)?
    };
    set.append_pair(&left_doc, &right_doc, &JsonPatchEngine);
    set.save(patches)?;

    tracing::debug!(
        "Appended {} -> {} to {}",
        document_hash(&left_doc),
        document_hash(&right_doc),
        patches.display()
    );
    output.line(format!(
        "{} {} now holds {} patches (latest {})",
        status::SUCCESS,
        patches.display(),
        set.patches.len(),
        set.latest
    ));
    output.emit_json(&set)
}

fn read_document(path: &Path) -> Result<Value> {
    let raw = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let bytes = if path.extension().is_some_and(|ext| ext == "gz") {
        GzipCodec::default()
            .decode(&raw)
            .with_context(|| format!("Failed to decompress {}", path.display()))?
    } else {
        raw
    };
    serde_json::from_slice(&bytes).with_context(|| format!("{} is not a JSON document", path.display()))
}
