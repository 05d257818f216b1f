//! CLI command for `repodata-history verify`
//!
//! Replays every recorded revision and compares it with its hash.

use anyhow::Result;
use serde::Serialize;

use super::{HistoryContext, KeyArgs};
use crate::cli::output::{status, OutputConfig};
use crate::core::chain::ChainReport;

#[derive(Debug, Serialize)]
struct VerifyRow {
    key: String,
    #[serde(flatten)]
    report: ChainReport,
}

/// Execute verify
pub fn execute(ctx: &HistoryContext, args: &KeyArgs, output: OutputConfig) -> Result<()> {
    let keys = ctx.recorded_keys(args)?;
    let spinner = output.spinner(&format!("Verifying {} keys", keys.len()));

    let mut rows = Vec::with_capacity(keys.len());
    for key in keys {
        spinner.set_message(format!("Verifying {key}"));
        let report = ctx.chain.verify(&key)?;
        rows.push(VerifyRow {
            key: key.to_string(),
            report,
        });
    }
    spinner.finish_and_clear();

    let mut incomplete = 0;
    for row in &rows {
        if row.report.is_complete() {
            output.line(format!(
                "{} {}: {} revisions verified",
                status::SUCCESS,
                row.key,
                row.report.verified.len()
            ));
            continue;
        }
        incomplete += 1;
        output.line(format!(
            "{} {}: {} of {} revisions verified",
            status::ERROR,
            row.key,
            row.report.verified.len(),
            row.report.revisions
        ));
        if !row.report.missing_links.is_empty() {
            output.line(format!("    missing links from {:?}", row.report.missing_links));
        }
        for (sequence, reason) in &row.report.failed {
            output.line(format!("    revision {sequence}: {reason}"));
        }
    }

    output.emit_json(&rows)?;

    if incomplete > 0 {
        anyhow::bail!("{incomplete} of {} keys have incomplete chains", rows.len());
    }
    Ok(())
}
