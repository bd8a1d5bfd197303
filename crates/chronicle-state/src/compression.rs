//! Payload compression for state snapshots.
//!
//! Compression is a pure per-call transform. A payload is compressed only
//! when it reaches the configured minimum size and does not already look
//! compressed. The "already compressed" check samples the head of the
//! payload and counts distinct byte values; it is a tunable guess, not a
//! guarantee. A payload that grows under compression is still stored
//! compressed and flagged with `expanded = true` in the descriptor metadata.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use chronicle_types::{CompressionInfo, StoreError, StoreResult, TRANSFORM_NONE};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

/// Format version written into every [`CompressionInfo`].
pub const COMPRESSION_FORMAT_VERSION: u32 = 1;

/// Gzip member header.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Supported compression algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// Store payloads as-is.
    None,
    /// DEFLATE in a gzip container (levels 0-9).
    #[default]
    Gzip,
    /// LZ4 block format with a size prefix.
    Lz4,
}

impl CompressionAlgorithm {
    /// Name recorded in the descriptor `type` field.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => TRANSFORM_NONE,
            Self::Gzip => "gzip",
            Self::Lz4 => "lz4",
        }
    }

    /// Highest accepted level.
    ///
    /// LZ4 levels are recorded but the block encoder always runs its fast
    /// mode.
    pub const fn max_level(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Gzip => 9,
            Self::Lz4 => 12,
        }
    }

    /// Level used when none is configured.
    pub const fn default_level(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Gzip => 6,
            Self::Lz4 => 1,
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionAlgorithm {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" | "" => Ok(Self::None),
            "gzip" => Ok(Self::Gzip),
            "lz4" => Ok(Self::Lz4),
            other => Err(StoreError::validation(
                "compression.algorithm",
                format!("unknown algorithm '{other}'"),
            )),
        }
    }
}

/// Compression settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Algorithm applied to eligible payloads.
    pub algorithm: CompressionAlgorithm,
    /// Algorithm level, within `0..=algorithm.max_level()`.
    pub level: u32,
    /// Payloads smaller than this many bytes are stored uncompressed.
    pub min_size: usize,
    /// Skip payloads whose head looks already compressed.
    pub skip_precompressed: bool,
    /// How many leading bytes the precompressed check samples.
    pub sample_size: usize,
    /// Distinct byte values within the sample at or above which the payload
    /// is treated as already compressed.
    pub distinct_threshold: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: CompressionAlgorithm::Gzip,
            level: CompressionAlgorithm::Gzip.default_level(),
            min_size: 1024,
            skip_precompressed: true,
            sample_size: 100,
            distinct_threshold: 70,
        }
    }
}

impl CompressionConfig {
    /// Gzip at `level`.
    pub fn gzip(level: u32) -> Self {
        Self {
            algorithm: CompressionAlgorithm::Gzip,
            level,
            ..Self::default()
        }
    }

    /// LZ4 at its default level.
    pub fn lz4() -> Self {
        Self {
            algorithm: CompressionAlgorithm::Lz4,
            level: CompressionAlgorithm::Lz4.default_level(),
            ..Self::default()
        }
    }

    /// Override the minimum payload size.
    #[must_use]
    pub const fn with_min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }

    /// Enable or disable the precompressed heuristic.
    #[must_use]
    pub const fn with_skip_precompressed(mut self, skip: bool) -> Self {
        self.skip_precompressed = skip;
        self
    }

    /// Reject out-of-range levels and an empty heuristic sample.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] naming the offending field.
    pub fn validate(&self) -> StoreResult<()> {
        let max = self.algorithm.max_level();
        if self.level > max {
            return Err(StoreError::validation(
                "compression.level",
                format!("{} level must be within 0..={max}, got {}", self.algorithm, self.level),
            ));
        }
        if self.skip_precompressed && self.sample_size == 0 {
            return Err(StoreError::validation(
                "compression.sample_size",
                "must be positive when skip_precompressed is set",
            ));
        }
        Ok(())
    }
}

/// Applies a validated [`CompressionConfig`].
#[derive(Debug, Clone)]
pub struct Compressor {
    config: CompressionConfig,
}

impl Compressor {
    /// Validate `config` and build a compressor.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for an invalid configuration.
    pub fn new(config: CompressionConfig) -> StoreResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The active configuration.
    pub const fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Whether `data` looks like it is already compressed.
    pub fn looks_compressed(&self, data: &[u8]) -> bool {
        if data.starts_with(&GZIP_MAGIC) {
            return true;
        }
        if data.len() < self.config.sample_size {
            return false;
        }
        let distinct: HashSet<u8> = data.iter().take(self.config.sample_size).copied().collect();
        distinct.len() >= self.config.distinct_threshold
    }

    /// Compress `data` if it is eligible.
    ///
    /// Returns `None` when the payload is stored as-is: compression is off,
    /// the payload is below the minimum size, or it looks precompressed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CompressionFailed`] when the encoder fails.
    pub fn compress(&self, data: &[u8]) -> StoreResult<Option<(Vec<u8>, CompressionInfo)>> {
        let algorithm = self.config.algorithm;
        if algorithm == CompressionAlgorithm::None || data.len() < self.config.min_size {
            return Ok(None);
        }
        if self.config.skip_precompressed && self.looks_compressed(data) {
            tracing::debug!(size = data.len(), "Skipping compression of precompressed payload");
            return Ok(None);
        }

        let compressed = match algorithm {
            CompressionAlgorithm::Gzip => gzip(data, self.config.level)?,
            CompressionAlgorithm::Lz4 => lz4_flex::compress_prepend_size(data),
            CompressionAlgorithm::None => return Ok(None),
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("originalSize".to_owned(), data.len().to_string());
        metadata.insert("compressedSize".to_owned(), compressed.len().to_string());
        if compressed.len() >= data.len() {
            tracing::debug!(
                algorithm = %algorithm,
                original = data.len(),
                compressed = compressed.len(),
                "Compression did not shrink payload"
            );
            metadata.insert("expanded".to_owned(), "true".to_owned());
        }

        let info = CompressionInfo {
            kind: algorithm.as_str().to_owned(),
            version: COMPRESSION_FORMAT_VERSION,
            level: self.config.level,
            metadata,
        };
        Ok(Some((compressed, info)))
    }
}

fn gzip(data: &[u8], level: u32) -> StoreResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::new(level));
    encoder
        .write_all(data)
        .map_err(|e| StoreError::CompressionFailed(format!("gzip encode: {e}")))?;
    encoder
        .finish()
        .map_err(|e| StoreError::CompressionFailed(format!("gzip finish: {e}")))
}

/// Reverse the compression described by `info`.
///
/// # Errors
///
/// Returns [`StoreError::CompressionFailed`] for an unknown algorithm or a
/// corrupt payload.
pub fn decompress(data: &[u8], info: &CompressionInfo) -> StoreResult<Vec<u8>> {
    if !info.is_applied() {
        return Ok(data.to_vec());
    }
    let algorithm: CompressionAlgorithm = info
        .kind
        .parse()
        .map_err(|e| StoreError::CompressionFailed(format!("{e}")))?;
    match algorithm {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Gzip => {
            let mut out = Vec::with_capacity(data.len().saturating_mul(2));
            GzDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|e| StoreError::CompressionFailed(format!("gzip decode: {e}")))?;
            Ok(out)
        }
        CompressionAlgorithm::Lz4 => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| StoreError::CompressionFailed(format!("lz4 decode: {e}"))),
    }
}
