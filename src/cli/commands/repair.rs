//! CLI command for `repodata-history repair`
//!
//! Links consecutive revisions that were left without a patch.

use anyhow::Result;
use serde::Serialize;

use super::{HistoryContext, KeyArgs};
use crate::cli::output::{status, OutputConfig};

#[derive(Debug, Default, Serialize)]
struct RepairRow {
    key: String,
    linked: Vec<u64>,
    failed: Vec<(u64, String)>,
}

/// Execute repair
pub fn execute(ctx: &HistoryContext, args: &KeyArgs, output: OutputConfig) -> Result<()> {
    let mut rows = Vec::new();

    for key in ctx.recorded_keys(args)? {
        let mut row = RepairRow {
            key: key.to_string(),
            ..Default::default()
        };
        for (from, result) in ctx.chain.backfill(&key)? {
            match result {
                Ok(link) => row.linked.push(link.from_sequence),
                Err(e) => row.failed.push((from, e.to_string())),
            }
        }
        if row.linked.is_empty() && row.failed.is_empty() {
            continue;
        }

        for from in &row.linked {
            output.line(format!("{} {key}: linked {from} -> {}", status::SUCCESS, from - 1));
        }
        for (from, reason) in &row.failed {
            output.line(format!("{} {key}: revision {from}: {reason}", status::ERROR));
        }
        rows.push(row);
    }

    if rows.is_empty() {
        output.line(format!("{} All chains are complete", status::SUCCESS));
    }
    output.emit_json(&rows)?;

    let failed: usize = rows.iter().map(|r| r.failed.len()).sum();
    if failed > 0 {
        anyhow::bail!("{failed} links could not be created");
    }
    Ok(())
}
