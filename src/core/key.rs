//! Document stream keys
//!
//! A [`Key`] names one independently versioned document stream:
//! `(repository, subdirectory, kind)`, e.g.
//! `(conda.anaconda.org/conda-forge, linux-64, repodata)`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::KeyError;

/// Characters allowed in a single path segment of a key
const SEGMENT_PATTERN: &str = r"^[A-Za-z0-9._:+-]+$";

/// Directory holding plain-http repositories
const HTTP_DIR: &str = "http%3A";

const ENCODED_COLON: &str = "%3A";

fn segment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(SEGMENT_PATTERN).expect("segment pattern is valid"))
}

/// Kind of index document published per subdirectory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Full `repodata.json`
    Repodata,
    /// Trimmed `current_repodata.json`
    CurrentRepodata,
}

impl DocumentKind {
    /// All known kinds, in the order the cacher fetches them
    pub const ALL: [DocumentKind; 2] = [DocumentKind::Repodata, DocumentKind::CurrentRepodata];

    /// File stem used both remotely and on disk
    pub fn stem(self) -> &'static str {
        match self {
            Self::Repodata => "repodata",
            Self::CurrentRepodata => "current_repodata",
        }
    }

    /// Remote file name
    pub fn file_name(self) -> String {
        format!("{}.json", self.stem())
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stem())
    }
}

impl FromStr for DocumentKind {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_end_matches(".json") {
            "repodata" => Ok(Self::Repodata),
            "current_repodata" | "current-repodata" => Ok(Self::CurrentRepodata),
            other => Err(KeyError::UnknownKind(other.to_string())),
        }
    }
}

/// Identifier of one logical document stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    /// Repository location, `host/path` with an optional `http://` or `https://` prefix
    pub repository: String,
    /// Platform subdirectory (`linux-64`, `noarch`, ...)
    pub subdirectory: String,
    /// Document kind
    pub kind: DocumentKind,
}

impl Key {
    /// Create a validated key
    pub fn new(
        repository: impl Into<String>,
        subdirectory: impl Into<String>,
        kind: DocumentKind,
    ) -> Result<Self, KeyError> {
        let repository = repository.into();
        // https is implied; only a plain-http prefix is kept on the key
        let repository = repository
            .strip_prefix("https://")
            .unwrap_or(&repository)
            .trim_end_matches('/')
            .to_string();
        let subdirectory = subdirectory.into();

        if repository.is_empty() {
            return Err(KeyError::Empty {
                field: "repository",
            });
        }
        if subdirectory.is_empty() {
            return Err(KeyError::Empty {
                field: "subdirectory",
            });
        }

        let key = Self {
            repository,
            subdirectory,
            kind,
        };
        for segment in key.repository_segments() {
            validate_segment("repository", segment)?;
        }
        validate_segment("subdirectory", &key.subdirectory)?;
        Ok(key)
    }

    /// URL scheme, defaulting to https
    pub fn scheme(&self) -> &str {
        if self.repository.starts_with("http://") {
            "http"
        } else {
            "https"
        }
    }

    /// Repository without its scheme prefix
    pub fn repository_location(&self) -> &str {
        self.repository
            .strip_prefix("https://")
            .or_else(|| self.repository.strip_prefix("http://"))
            .unwrap_or(&self.repository)
    }

    /// Repository path segments (host first)
    pub fn repository_segments(&self) -> impl Iterator<Item = &str> {
        self.repository_location().split('/')
    }

    /// Remote URL of the document
    pub fn url(&self) -> String {
        format!(
            "{}://{}/{}/{}",
            self.scheme(),
            self.repository_location(),
            self.subdirectory,
            self.kind.file_name()
        )
    }

    /// Relative directory for this key, shared by artifacts and ledgers
    ///
    /// `:` is percent-encoded so host:port repositories stay portable, and
    /// plain-http repositories live under their own top-level directory.
    /// `%` never appears in a valid segment, so distinct keys never share a
    /// directory.
    pub fn relative_dir(&self) -> PathBuf {
        let mut dir = PathBuf::new();
        if self.scheme() == "http" {
            dir.push(HTTP_DIR);
        }
        for segment in self.repository_segments() {
            dir.push(segment.replace(':', ENCODED_COLON));
        }
        dir.push(self.subdirectory.replace(':', ENCODED_COLON));
        dir
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.repository_location(),
            self.subdirectory,
            self.kind
        )
    }
}

fn validate_segment(field: &'static str, segment: &str) -> Result<(), KeyError> {
    if segment == "." || segment == ".." || !segment_regex().is_match(segment) {
        return Err(KeyError::InvalidSegment {
            field,
            segment: segment.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_url_defaults_to_https() {
        let key = Key::new("conda.anaconda.org/conda-forge", "linux-64", DocumentKind::Repodata)
            .unwrap();
        assert_eq!(
            key.url(),
            "https://conda.anaconda.org/conda-forge/linux-64/repodata.json"
        );
    }

    #[test]
    fn test_url_keeps_explicit_http() {
        let key = Key::new(
            "http://127.0.0.1:8080/pkgs/main/",
            "noarch",
            DocumentKind::CurrentRepodata,
        )
        .unwrap();
        assert_eq!(
            key.url(),
            "http://127.0.0.1:8080/pkgs/main/noarch/current_repodata.json"
        );
        assert_eq!(
            key.relative_dir(),
            PathBuf::from("http%3A/127.0.0.1%3A8080/pkgs/main/noarch")
        );
    }

    #[test]
    fn test_distinct_keys_never_share_a_directory() {
        let repos = [
            "mirror.example/main",
            "https://mirror.example/main",
            "http://mirror.example/main",
            "mirror.example:80/main",
            "mirror.example_80/main",
            "http://mirror.example:80/main",
            "http%3A/mirror.example/main",
            "mirror.example/main/noarch",
        ];
        let keys: Vec<Key> = repos
            .iter()
            .flat_map(|repo| {
                ["noarch", "linux-64"]
                    .into_iter()
                    .filter_map(move |subdir| Key::new(*repo, subdir, DocumentKind::Repodata).ok())
            })
            .collect();
        // The %-prefixed repository is not a valid key
        assert_eq!(keys.len(), (repos.len() - 1) * 2);

        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                if a != b {
                    assert_ne!(a.relative_dir(), b.relative_dir(), "{a:?} vs {b:?}");
                }
            }
        }
        assert_eq!(
            Key::new("https://mirror.example/main", "noarch", DocumentKind::Repodata).unwrap(),
            Key::new("mirror.example/main", "noarch", DocumentKind::Repodata).unwrap()
        );
    }

    #[test]
    fn test_display() {
        let key =
            Key::new("repo.anaconda.com/pkgs/main", "osx-arm64", DocumentKind::Repodata).unwrap();
        assert_eq!(key.to_string(), "repo.anaconda.com/pkgs/main/osx-arm64/repodata");
    }

    #[test]
    fn test_rejects_parent_segments() {
        let err = Key::new("conda.anaconda.org/../etc", "linux-64", DocumentKind::Repodata)
            .unwrap_err();
        assert!(matches!(err, KeyError::InvalidSegment { field: "repository", .. }));

        let err = Key::new("conda.anaconda.org", "..", DocumentKind::Repodata).unwrap_err();
        assert!(matches!(err, KeyError::InvalidSegment { field: "subdirectory", .. }));
    }

    #[test]
    fn test_rejects_empty() {
        assert!(matches!(
            Key::new("", "linux-64", DocumentKind::Repodata),
            Err(KeyError::Empty { field: "repository" })
        ));
        assert!(matches!(
            Key::new("conda.anaconda.org/conda-forge", "", DocumentKind::Repodata),
            Err(KeyError::Empty { field: "subdirectory" })
        ));
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("repodata".parse::<DocumentKind>().unwrap(), DocumentKind::Repodata);
        assert_eq!(
            "current_repodata.json".parse::<DocumentKind>().unwrap(),
            DocumentKind::CurrentRepodata
        );
        assert!("channeldata".parse::<DocumentKind>().is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Valid keys always map below their own relative directory
        #[test]
        fn prop_relative_dir_has_no_parent_components(
            host in "[a-z]{1,10}\\.[a-z]{2,4}",
            channel in "[a-z0-9-]{1,12}",
            subdir in "[a-z0-9-]{1,12}",
        ) {
            let key = Key::new(format!("{host}/{channel}"), subdir, DocumentKind::Repodata).unwrap();
            let dir = key.relative_dir();
            prop_assert!(dir.components().all(|c| matches!(c, std::path::Component::Normal(_))));
        }
    }
}
