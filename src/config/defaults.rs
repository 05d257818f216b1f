//! Default configuration values

/// Repositories tracked when no configuration exists
pub const DEFAULT_REPOSITORIES: &[&str] =
    &["repo.anaconda.com/pkgs/main", "conda.anaconda.org/conda-forge"];

/// Platform subdirectories tracked when no configuration exists
pub const DEFAULT_SUBDIRS: &[&str] = &[
    "linux-32",
    "linux-64",
    "linux-aarch64",
    "linux-armv6l",
    "linux-armv7l",
    "linux-ppc64le",
    "linux-s390x",
    "noarch",
    "osx-64",
    "osx-arm64",
    "win-32",
    "win-64",
    "zos-z",
];

/// Maximum number of fetch attempts per document
pub const MAX_FETCH_RETRIES: u32 = 3;

/// Initial backoff between fetch attempts (in milliseconds)
pub const RETRY_BASE_DELAY_MS: u64 = 1000;

/// Request timeout (in seconds); full repodata documents are large
pub const FETCH_TIMEOUT_SECS: u64 = 300;

/// Default number of keys ingested in parallel
pub const DEFAULT_PARALLEL_FETCHES: usize = 4;

