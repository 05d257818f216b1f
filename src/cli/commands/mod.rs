//! CLI command implementations
//!
//! Each command is implemented in its own submodule.

pub mod config;
pub mod export;
pub mod patchset;
pub mod repair;
pub mod show;
pub mod status;
pub mod sync;
pub mod verify;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};

use crate::cli::output::OutputConfig;
use crate::core::chain::PatchChainBuilder;
use crate::core::config::{GlobalConfig, KeyFilter};
use crate::core::diff::JsonPatchEngine;
use crate::core::index::{FileIndex, RevisionIndex};
use crate::core::key::{DocumentKind, Key};
use crate::core::store::ArtifactStore;
use crate::infra::dirs::HistoryDirs;

/// Filters selecting a set of keys
#[derive(Args, Debug, Clone, Default)]
pub struct KeyArgs {
    /// Repository (repeatable), e.g. conda.anaconda.org/conda-forge
    #[arg(long = "repo", value_name = "REPO")]
    pub repositories: Vec<String>,

    /// Subdirectory (repeatable), e.g. linux-64
    #[arg(long = "subdir", value_name = "SUBDIR")]
    pub subdirs: Vec<String>,

    /// Document kind (repeatable): repodata or current_repodata
    #[arg(long = "kind", value_name = "KIND")]
    pub kinds: Vec<DocumentKind>,
}

impl KeyArgs {
    /// Convert into a key filter
    pub fn filter(&self) -> KeyFilter {
        KeyFilter {
            repositories: self.repositories.clone(),
            subdirs: self.subdirs.clone(),
            kinds: self.kinds.clone(),
        }
    }
}

/// A single key
#[derive(Args, Debug, Clone)]
pub struct KeySpec {
    /// Repository, e.g. conda.anaconda.org/conda-forge
    #[arg(long = "repo", value_name = "REPO")]
    pub repository: String,

    /// Subdirectory, e.g. linux-64
    #[arg(long)]
    pub subdir: String,

    /// Document kind
    #[arg(long, default_value = "repodata")]
    pub kind: DocumentKind,
}

impl KeySpec {
    /// Build the validated key
    pub fn key(&self) -> Result<Key> {
        Ok(Key::new(
            self.repository.as_str(),
            self.subdir.as_str(),
            self.kind,
        )?)
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch tracked documents and record new revisions
    Sync {
        /// Number of documents fetched in parallel
        #[arg(short, long)]
        parallel: Option<usize>,

        #[command(flatten)]
        keys: KeyArgs,
    },

    /// Show recorded history per key
    Status {
        #[command(flatten)]
        keys: KeyArgs,
    },

    /// Print the head or a past revision of a document
    Show {
        #[command(flatten)]
        key: KeySpec,

        /// Revision sequence (defaults to the head)
        #[arg(short, long)]
        revision: Option<u64>,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Rebuild every revision and check it against its hash
    Verify {
        #[command(flatten)]
        keys: KeyArgs,
    },

    /// Create links missing from patch chains
    Repair {
        #[command(flatten)]
        keys: KeyArgs,
    },

    /// Export a key's patch chain as a patch set file
    Export {
        #[command(flatten)]
        key: KeySpec,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Append the diff between two documents to a patch set file
    Patchset {
        /// Newer document
        #[arg(long)]
        left: PathBuf,

        /// Older document
        #[arg(long)]
        right: PathBuf,

        /// Patch set file to update
        #[arg(long)]
        patches: PathBuf,

        /// Start a new patch set instead of loading one
        #[arg(long)]
        init: bool,

        /// URL recorded in a new patch set
        #[arg(long, default_value = "./repodata.json")]
        url: String,
    },

    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

impl Commands {
    /// Execute the command
    pub async fn run(self, config_path: Option<&Path>, output: OutputConfig) -> Result<()> {
        match self {
            Self::Sync { parallel, keys } => {
                let ctx = HistoryContext::open(config_path)?;
                sync::execute(&ctx, &keys, parallel, output).await
            }
            Self::Status { keys } => {
                let ctx = HistoryContext::open(config_path)?;
                status::execute(&ctx, &keys, output)
            }
            Self::Show {
                key,
                revision,
                output: path,
            } => {
                let ctx = HistoryContext::open(config_path)?;
                show::execute(&ctx, &key.key()?, revision, path.as_deref(), output)
            }
            Self::Verify { keys } => {
                let ctx = HistoryContext::open(config_path)?;
                verify::execute(&ctx, &keys, output)
            }
            Self::Repair { keys } => {
                let ctx = HistoryContext::open(config_path)?;
                repair::execute(&ctx, &keys, output)
            }
            Self::Export { key, output: path } => {
                let ctx = HistoryContext::open(config_path)?;
                export::execute(&ctx, &key.key()?, path.as_deref(), output)
            }
            Self::Patchset {
                left,
                right,
                patches,
                init,
                url,
            } => patchset::execute(&left, &right, &patches, init, &url, output),
            Self::Config { command } => {
                let dirs = HistoryDirs::new();
                let path = config_path.map_or_else(|| dirs.config_path(), Path::to_path_buf);
                match command {
                    ConfigCommands::Show => config::execute_show(&path, output),
                    ConfigCommands::Init { force } => config::execute_init(&path, force, output),
                }
            }
        }
    }
}

/// Opened history: configuration, store, ledgers and chain builder
pub struct HistoryContext {
    /// Loaded configuration
    pub config: GlobalConfig,
    /// Directory layout
    pub dirs: HistoryDirs,
    /// Artifact store
    pub store: Arc<ArtifactStore>,
    /// Ledger index
    pub index: Arc<FileIndex>,
    /// Chain builder over the store and index
    pub chain: PatchChainBuilder,
}

impl HistoryContext {
    /// Open the history using the platform directories
    pub fn open(config_path: Option<&Path>) -> Result<Self> {
        let dirs = HistoryDirs::new();
        let path = config_path.map_or_else(|| dirs.config_path(), Path::to_path_buf);
        let config = GlobalConfig::load_from_path(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
        Ok(Self::with_config(dirs, config))
    }

    /// Open the history with explicit directories and configuration
    pub fn with_config(dirs: HistoryDirs, config: GlobalConfig) -> Self {
        let store = Arc::new(ArtifactStore::new(
            dirs.artifacts_dir(),
            config.compression().build(),
        ));
        let index = Arc::new(FileIndex::open(dirs.index_dir()));
        let chain = PatchChainBuilder::new(store.clone(), index.clone(), Arc::new(JsonPatchEngine));
        Self {
            config,
            dirs,
            store,
            index,
            chain,
        }
    }

    /// Keys to fetch: configured lists, with any non-empty filter list
    /// replacing the configured one
    pub fn tracked_keys(&self, args: &KeyArgs) -> Result<Vec<Key>> {
        let mut config = self.config.clone();
        if !args.repositories.is_empty() {
            config.tracking.repositories = Some(args.repositories.clone());
        }
        if !args.subdirs.is_empty() {
            config.tracking.subdirs = Some(args.subdirs.clone());
        }
        if !args.kinds.is_empty() {
            config.tracking.kinds = Some(args.kinds.clone());
        }
        Ok(config.keys()?)
    }

    /// Keys with recorded history passing the filter
    pub fn recorded_keys(&self, args: &KeyArgs) -> Result<Vec<Key>> {
        let filter = args.filter();
        Ok(self
            .index
            .all_keys()?
            .into_iter()
            .filter(|key| filter.matches(key))
            .collect())
    }
}
