//! Configuration management and validation.
//!
//! Settings are layered: built-in defaults, then an optional TOML config
//! file, then environment variables, then command-line arguments (applied
//! by the CLI through the `with_*` builders).

use crate::codebook::{ParseOptions, VariableMatch};
use crate::constants::api::{API_KEY_ENV, DEFAULT_BASE_URL, DOWNLOAD_DIR_ENV};
use crate::constants::{
    APP_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_REQUEST_TIMEOUT_SECS,
    DEFAULT_WAIT_TIMEOUT_SECS,
};
use crate::error::{NhgisError, Result};
use clap::ValueEnum;
use polars::prelude::ParquetCompression;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Supported compression algorithms for parquet output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// Snappy compression - good balance of speed and compression
    Snappy,
    /// ZSTD compression - better compression ratio, slower
    Zstd,
    /// LZ4 compression - fastest, lower compression ratio
    Lz4,
    /// No compression
    Uncompressed,
}

impl CompressionAlgorithm {
    /// Convert to polars ParquetCompression type
    pub fn to_polars_compression(&self) -> ParquetCompression {
        match self {
            CompressionAlgorithm::Snappy => ParquetCompression::Snappy,
            CompressionAlgorithm::Zstd => ParquetCompression::Zstd(None),
            CompressionAlgorithm::Lz4 => ParquetCompression::Lz4Raw,
            CompressionAlgorithm::Uncompressed => ParquetCompression::Uncompressed,
        }
    }
}

/// Global configuration for extract retrieval and output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NhgisConfig {
    /// Base URL of the IPUMS API
    pub api_base_url: String,

    /// IPUMS API key
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Directory receiving downloaded and unpacked extracts
    pub download_dir: PathBuf,

    /// Seconds between extract status checks
    pub poll_interval_secs: u64,

    /// Maximum seconds to wait for an extract to complete
    pub wait_timeout_secs: u64,

    /// Timeout of a single HTTP request
    pub request_timeout_secs: u64,

    /// Parquet compression for derived output
    pub compression: CompressionAlgorithm,

    /// How codebook variable lines are recognised
    pub variable_match: VariableMatch,
}

impl Default for NhgisConfig {
    fn default() -> Self {
        let download_dir = dirs::data_dir()
            .map(|dir| dir.join(APP_DIR_NAME).join("downloads"))
            .unwrap_or_else(|| PathBuf::from("downloads"));

        Self {
            api_base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            download_dir,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            wait_timeout_secs: DEFAULT_WAIT_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            compression: CompressionAlgorithm::Snappy,
            variable_match: VariableMatch::Prefix,
        }
    }
}

impl NhgisConfig {
    /// Default config file location (~/.config/nhgis-extract/config.toml)
    pub fn default_config_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
            .ok_or_else(|| NhgisError::configuration("Could not determine user config directory"))
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text).map_err(|e| {
            NhgisError::configuration(format!("Invalid config file {}: {}", path.display(), e))
        })
    }

    fn from_toml(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Defaults, then the config file if present, then the environment
    pub fn load_layered(config_file: Option<&Path>) -> Result<Self> {
        let config = match config_file {
            Some(path) if path.exists() => {
                debug!("Loading config file {}", path.display());
                Self::from_file(path)?
            }
            Some(path) => {
                return Err(NhgisError::FileNotFound {
                    path: path.to_path_buf(),
                });
            }
            None => match Self::default_config_path() {
                Ok(path) if path.exists() => {
                    debug!("Loading config file {}", path.display());
                    Self::from_file(&path)?
                }
                _ => Self::default(),
            },
        };

        Ok(config.apply_env(|key| std::env::var(key).ok()))
    }

    /// Override settings from environment variables
    pub fn apply_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(API_KEY_ENV).filter(|key| !key.trim().is_empty()) {
            self.api_key = Some(key.trim().to_string());
        }
        if let Some(dir) = lookup(DOWNLOAD_DIR_ENV).filter(|dir| !dir.trim().is_empty()) {
            self.download_dir = PathBuf::from(dir);
        }
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_download_dir(mut self, download_dir: impl Into<PathBuf>) -> Self {
        self.download_dir = download_dir.into();
        self
    }

    pub fn with_poll_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    pub fn with_wait_timeout(mut self, secs: u64) -> Self {
        self.wait_timeout_secs = secs;
        self
    }

    pub fn with_compression(mut self, compression: CompressionAlgorithm) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_strict_codebook(mut self) -> Self {
        self.variable_match = VariableMatch::Strict;
        self
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            variable_match: self.variable_match,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// API key, required for anything that talks to the API
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                NhgisError::configuration(format!(
                    "Missing required parameters: api_key (pass --api-key or set {})",
                    API_KEY_ENV
                ))
            })
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_base_url.trim().is_empty() {
            return Err(NhgisError::configuration("api_base_url must not be empty"));
        }
        if self.poll_interval_secs == 0 {
            return Err(NhgisError::configuration(
                "poll_interval_secs must be greater than zero",
            ));
        }
        if self.wait_timeout_secs < self.poll_interval_secs {
            return Err(NhgisError::configuration(
                "wait_timeout_secs must not be shorter than poll_interval_secs",
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(NhgisError::configuration(
                "request_timeout_secs must be greater than zero",
            ));
        }
        Ok(())
    }
}
