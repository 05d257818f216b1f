//! CLI command for `repodata-history export`
//!
//! Writes a key's patch chain in the hash-addressed patch set format.

use std::path::Path;

use anyhow::{Context, Result};

use super::HistoryContext;
use crate::cli::output::{status, OutputConfig};
use crate::core::index::RevisionIndex;
use crate::core::key::Key;
use crate::core::patchset::PatchSet;

/// Execute export
pub fn execute(
    ctx: &HistoryContext,
    key: &Key,
    path: Option<&Path>,
    output: OutputConfig,
) -> Result<()> {
    let entry = ctx
        .index
        .entry(key)?
        .with_context(|| format!("No history recorded for {key}"))?;
    let set = PatchSet::from_entry(key.url(), &entry);

    match path {
        Some(path) => {
            set.save(path)?;
            output.line(format!(
                "{} Exported {} patches for {key} to {}",
                status::SUCCESS,
                set.patches.len(),
                path.display()
            ));
        }
        None => println!("{}", serde_json::to_string_pretty(&set)?),
    }
    Ok(())
}
