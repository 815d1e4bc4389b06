//! Client configuration.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Client settings, read from TOML. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Command line that runs one worker RPC, e.g. `["ssh", "builder", "cloudcc-worker", "rpc"]`.
    pub worker_command: Vec<String>,
    /// Partition count when `--chunks` is not given.
    pub default_chunks: u32,
    /// zlib level (0-9) used with `--compress`.
    pub compression_level: u32,
    /// Parallel compile requests in `compile-all` when `--jobs` is not given.
    pub jobs: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            worker_command: vec!["cloudcc-worker".to_string(), "rpc".to_string()],
            default_chunks: 4,
            compression_level: 6,
            jobs: 8,
        }
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_command.first().map_or(true, |p| p.is_empty()) {
            return Err(ConfigError::Invalid("worker_command must name a program".to_string()));
        }
        if self.default_chunks == 0 {
            return Err(ConfigError::Invalid("default_chunks must be at least 1".to_string()));
        }
        if self.compression_level > 9 {
            return Err(ConfigError::Invalid(format!(
                "compression_level {} is outside 0..=9",
                self.compression_level
            )));
        }
        if self.jobs == 0 {
            return Err(ConfigError::Invalid("jobs must be at least 1".to_string()));
        }
        Ok(())
    }
}
