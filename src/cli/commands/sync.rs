//! CLI command for `repodata-history sync`
//!
//! Fetches every tracked document and records the ones that changed.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use super::{HistoryContext, KeyArgs};
use crate::cli::output::{status, OutputConfig};
use crate::core::ingest::SnapshotIngestor;
use crate::infra::fetcher::HttpFetcher;
use crate::infra::http_cache::HttpCache;

/// Per-key line of the sync report
#[derive(Debug, Serialize)]
struct SyncRow {
    key: String,
    outcome: &'static str,
    sequence: Option<u64>,
    linked: bool,
    served_from_cache: bool,
    error: Option<String>,
}

/// Execute sync
pub async fn execute(
    ctx: &HistoryContext,
    args: &KeyArgs,
    parallel: Option<usize>,
    output: OutputConfig,
) -> Result<()> {
    let keys = ctx.tracked_keys(args)?;
    let parallel = parallel.unwrap_or_else(|| ctx.config.parallel());

    let fetcher = HttpFetcher::with_config(
        HttpCache::new(ctx.dirs.http_cache_dir()),
        ctx.config.max_retries(),
        ctx.config.base_delay_ms(),
        ctx.config.timeout_secs(),
    );
    let ingestor = SnapshotIngestor::new(
        Arc::new(fetcher),
        ctx.store.clone(),
        ctx.index.clone(),
        ctx.chain.clone(),
    );

    tracing::info!("Syncing {} documents with {parallel} workers", keys.len());
    let spinner = output.spinner(&format!("Syncing {} documents", keys.len()));
    let results = ingestor.ingest_all(keys.clone(), parallel).await;
    spinner.finish_and_clear();

    let mut rows = Vec::with_capacity(results.len());
    for (key, result) in keys.iter().zip(results) {
        let row = match result {
            Ok(r) => SyncRow {
                key: key.to_string(),
                outcome: if r.is_new { "new" } else { "unchanged" },
                sequence: r.revision.as_ref().map(|rev| rev.sequence),
                linked: r.linked.is_some(),
                served_from_cache: r.served_from_cache,
                error: r.link_error,
            },
            Err(e) => SyncRow {
                key: key.to_string(),
                outcome: "failed",
                sequence: None,
                linked: false,
                served_from_cache: false,
                error: Some(e.to_string()),
            },
        };

        match (row.outcome, &row.error) {
            ("failed", Some(error)) => output.line(format!("{} {key}: {error}", status::ERROR)),
            ("new", Some(error)) => output.line(format!(
                "{} {key}: revision {} recorded, not linked: {error}",
                status::WARNING,
                row.sequence.unwrap_or_default()
            )),
            ("new", None) => output.line(format!(
                "{} {key}: revision {}",
                status::SUCCESS,
                row.sequence.unwrap_or_default()
            )),
            _ => output.line(format!("{} {key}: unchanged", status::INFO)),
        }
        rows.push(row);
    }

    output.emit_json(&rows)?;

    let failed = rows.iter().filter(|r| r.outcome == "failed").count();
    let new = rows.iter().filter(|r| r.outcome == "new").count();
    output.line(format!(
        "\n{new} new, {} unchanged, {failed} failed",
        rows.len() - new - failed
    ));

    if failed > 0 {
        anyhow::bail!("{failed} of {} documents failed to sync", rows.len());
    }
    Ok(())
}
