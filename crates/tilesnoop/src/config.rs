//! Pipeline configuration. Fixed once a pipeline is built.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, SnoopError};

/// Largest block the presence bitmap can track.
pub const MAX_BLOCK_SIZE: usize = 64;

/// Monitored write window and block geometry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// First monitored address (inclusive)
    pub window_start: u32,
    /// Last monitored address (inclusive)
    pub window_end: u32,
    /// Bytes per block
    pub block_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        // Tile data region: 384 tiles of 16 bytes
        Self {
            window_start: 0x8000,
            window_end: 0x97FF,
            block_size: 16,
        }
    }
}

impl CaptureConfig {
    /// True if `address` falls inside the monitored window.
    #[inline]
    pub fn contains(&self, address: u32) -> bool {
        (self.window_start..=self.window_end).contains(&address)
    }
}

/// Membership filter geometry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Number of bits in the filter; must be a power of two
    pub bits: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self { bits: 65536 }
    }
}

/// Dictionary index geometry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryConfig {
    /// Low fingerprint bits used to select a bucket
    pub bucket_bits: u32,
    /// Slots scanned per bucket before giving up
    pub chain_depth: usize,
}

impl Default for DictionaryConfig {
    fn default() -> Self {
        Self {
            bucket_bits: 12,
            chain_depth: 4,
        }
    }
}

impl DictionaryConfig {
    /// Number of buckets.
    #[inline]
    pub fn bucket_count(&self) -> usize {
        1usize << self.bucket_bits
    }

    /// Total slots across all buckets.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.bucket_count() * self.chain_depth
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnoopConfig {
    /// Capture window and block size
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Filter size
    #[serde(default)]
    pub filter: FilterConfig,
    /// Bucket and chain dimensions
    #[serde(default)]
    pub dictionary: DictionaryConfig,
    /// Default tracing filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SnoopConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            filter: FilterConfig::default(),
            dictionary: DictionaryConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl SnoopConfig {
    /// Load a configuration from a `.toml` or `.json` file and validate it.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: SnoopConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents).map_err(|e| SnoopError::Parse(e.to_string()))?,
            "json" => {
                serde_json::from_str(&contents).map_err(|e| SnoopError::Parse(e.to_string()))?
            }
            _ => {
                return Err(SnoopError::InvalidConfig(format!(
                    "unsupported config file extension: {}",
                    ext
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every dimension against what the pipeline can represent.
    pub fn validate(&self) -> Result<()> {
        let capture = &self.capture;
        if capture.window_start > capture.window_end {
            return Err(SnoopError::InvalidConfig(format!(
                "window start {:#x} is after window end {:#x}",
                capture.window_start, capture.window_end
            )));
        }
        if capture.block_size == 0 || capture.block_size > MAX_BLOCK_SIZE {
            return Err(SnoopError::InvalidConfig(format!(
                "block size {} must be in 1..={}",
                capture.block_size, MAX_BLOCK_SIZE
            )));
        }

        let bits = self.filter.bits;
        if !(2..=65536).contains(&bits) || !bits.is_power_of_two() {
            return Err(SnoopError::InvalidConfig(format!(
                "filter size {} must be a power of two in 2..=65536",
                bits
            )));
        }

        let dict = &self.dictionary;
        if !(1..=16).contains(&dict.bucket_bits) {
            return Err(SnoopError::InvalidConfig(format!(
                "bucket bits {} must be in 1..=16",
                dict.bucket_bits
            )));
        }
        if dict.chain_depth == 0 {
            return Err(SnoopError::InvalidConfig(
                "chain depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
