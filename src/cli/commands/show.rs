//! CLI command for `repodata-history show`
//!
//! Prints the head of a key or rebuilds a past revision from the chain.

use std::path::Path;

use anyhow::{Context, Result};

use super::HistoryContext;
use crate::cli::output::{status, OutputConfig};
use crate::core::index::RevisionIndex;
use crate::core::key::Key;

/// Execute show
pub fn execute(
    ctx: &HistoryContext,
    key: &Key,
    revision: Option<u64>,
    path: Option<&Path>,
    output: OutputConfig,
) -> Result<()> {
    let head = ctx
        .index
        .head(key)?
        .with_context(|| format!("No history recorded for {key}"))?;
    let target = revision.unwrap_or(head.sequence);

    let doc = ctx.chain.reconstruct(key, target)?;
    let rendered = serde_json::to_string_pretty(&doc)?;

    match path {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            output.line(format!(
                "{} Revision {target} of {key} written to {}",
                status::SUCCESS,
                path.display()
            ));
        }
        None => println!("{rendered}"),
    }
    Ok(())
}
