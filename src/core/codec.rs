//! Artifact encoding
//!
//! Stored snapshots pass through a [`Codec`] on their way to and from disk.
//! Gzip is the default, matching how upstream repodata mirrors are archived.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

/// Reversible byte transformation applied to stored artifacts
pub trait Codec: Send + Sync + std::fmt::Debug {
    /// Encode raw document bytes
    fn encode(&self, data: &[u8]) -> std::io::Result<Vec<u8>>;

    /// Decode stored bytes; must return exactly what was encoded
    fn decode(&self, data: &[u8]) -> std::io::Result<Vec<u8>>;

    /// File extension appended after the document stem (`json.gz`, `json`)
    fn extension(&self) -> &'static str;
}

/// Gzip codec
#[derive(Debug, Clone, Copy)]
pub struct GzipCodec {
    level: u32,
}

impl GzipCodec {
    /// Create a codec with an explicit compression level (0-9)
    pub fn new(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

impl Default for GzipCodec {
    fn default() -> Self {
        Self::new(Compression::default().level())
    }
}

impl Codec for GzipCodec {
    fn encode(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.level));
        encoder.write_all(data)?;
        encoder.finish()
    }

    fn decode(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(data);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;
        Ok(decompressed)
    }

    fn extension(&self) -> &'static str {
        "json.gz"
    }
}

/// Identity codec, stores documents as fetched
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainCodec;

impl Codec for PlainCodec {
    fn encode(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decode(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn extension(&self) -> &'static str {
        "json"
    }
}

/// Codec selection in configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// Gzip-compress artifacts
    #[default]
    Gzip,
    /// Store artifacts uncompressed
    None,
}

impl CodecKind {
    /// Every selectable codec
    pub const ALL: [CodecKind; 2] = [CodecKind::Gzip, CodecKind::None];

    /// Instantiate the selected codec
    pub fn build(self) -> Arc<dyn Codec> {
        match self {
            Self::Gzip => Arc::new(GzipCodec::default()),
            Self::None => Arc::new(PlainCodec),
        }
    }

    /// Extension of artifacts written with this codec
    pub fn extension(self) -> &'static str {
        match self {
            Self::Gzip => "json.gz",
            Self::None => "json",
        }
    }

    /// Codec an artifact was written with, judged by its file name
    ///
    /// The longest matching extension wins, so `repodata.json.gz` is gzip.
    pub fn for_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        Self::ALL
            .into_iter()
            .filter(|kind| {
                name.strip_suffix(kind.extension())
                    .is_some_and(|stem| stem.ends_with('.'))
            })
            .max_by_key(|kind| kind.extension().len())
    }
}
