//! CLI command for `repodata-history status`
//!
//! Lists recorded keys with their head, revision count and chain gaps.

use anyhow::Result;
use serde::Serialize;

use super::{HistoryContext, KeyArgs};
use crate::cli::output::{format_size, status, OutputConfig};
use crate::core::index::RevisionIndex;

/// Status of one key
#[derive(Debug, Serialize)]
struct KeyStatus {
    key: String,
    url: String,
    head: Option<u64>,
    revisions: usize,
    links: usize,
    missing_links: Vec<u64>,
    artifacts: usize,
    head_size_bytes: Option<u64>,
}

/// Execute status
pub fn execute(ctx: &HistoryContext, args: &KeyArgs, output: OutputConfig) -> Result<()> {
    let keys = ctx.recorded_keys(args)?;
    let mut rows = Vec::with_capacity(keys.len());

    for key in keys {
        let Some(entry) = ctx.index.entry(&key)? else {
            continue;
        };
        rows.push(KeyStatus {
            key: key.to_string(),
            url: key.url(),
            head: entry.head_sequence(),
            revisions: entry.revisions.len(),
            links: entry.patch_chain.len(),
            missing_links: entry.missing_links(),
            artifacts: ctx.store.list_artifacts(&key).len(),
            head_size_bytes: entry.head().map(|h| h.size_bytes),
        });
    }

    if rows.is_empty() {
        output.line(format!(
            "{} No history recorded yet. Run 'repodata-history sync' first.",
            status::INFO
        ));
    }

    for row in &rows {
        let prefix = if row.missing_links.is_empty() {
            status::SUCCESS
        } else {
            status::WARNING
        };
        output.line(format!(
            "{prefix} {}: head {} ({}), {} revisions, {} links, {} artifacts",
            row.key,
            row.head.map_or_else(|| "-".to_string(), |h| h.to_string()),
            row.head_size_bytes.map_or_else(|| "-".to_string(), format_size),
            row.revisions,
            row.links,
            row.artifacts,
        ));
        if !row.missing_links.is_empty() {
            output.line(format!(
                "    missing links from revisions {:?}; run 'repodata-history repair'",
                row.missing_links
            ));
        }
    }

    output.emit_json(&rows)
}
