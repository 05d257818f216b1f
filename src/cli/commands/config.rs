//! CLI command for `repodata-history config`
//!
//! Prints the effective configuration or writes the defaults to disk.

use std::path::Path;

use anyhow::Result;

use crate::cli::output::{status, OutputConfig};
use crate::core::config::GlobalConfig;

/// Execute config show
pub fn execute_show(path: &Path, output: OutputConfig) -> Result<()> {
    let config = GlobalConfig::load_from_path(path)?.effective();

    if output.json {
        return output.emit_json(&config);
    }
    if !output.quiet {
        println!("# {}", path.display());
        print!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}

/// Execute config init
pub fn execute_init(path: &Path, force: bool, output: OutputConfig) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config file {} already exists (use --force to overwrite)",
            path.display()
        );
    }

    GlobalConfig::default().effective().save_to_path(path)?;
    output.line(format!("{} Wrote {}", status::SUCCESS, path.display()));
    Ok(())
}
