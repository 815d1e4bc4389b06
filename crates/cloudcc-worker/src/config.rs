//! Worker configuration.
//!
//! Loaded from TOML; every field has a default so an empty file (or no file)
//! yields a working local setup.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cloudcc_flags::FlagPolicy;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::logging::LogFormat;

/// Errors loading or validating configuration.
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

/// Worker configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Minimum supported protocol version.
    pub protocol_min: i32,
    /// Maximum supported protocol version.
    pub protocol_max: i32,
    /// Directory under which per-request staging directories are created.
    pub staging_root: PathBuf,
    /// Upper bound on `chunks` in a split request.
    pub max_chunks: u32,
    /// Upper bound on decoded inline source bytes.
    pub max_inline_bytes: u64,
    /// Requests `serve` handles at once.
    pub max_concurrent_requests: usize,
    /// Log output format.
    pub log_format: LogFormat,
    pub store: StoreConfig,
    pub tools: ToolsConfig,
    /// Limits for caller-supplied flag strings.
    pub flags: FlagPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            protocol_min: 1,
            protocol_max: 1,
            staging_root: std::env::temp_dir().join("cloudcc-staging"),
            max_chunks: 64,
            max_inline_bytes: 64 * 1024 * 1024,
            max_concurrent_requests: 8,
            log_format: LogFormat::default(),
            store: StoreConfig::default(),
            tools: ToolsConfig::default(),
            flags: FlagPolicy::default(),
        }
    }
}

/// Artifact store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory of the filesystem store.
    pub root: PathBuf,
    /// Namespace (bucket) name.
    pub namespace: String,
    /// Base URL clients PUT signed uploads to.
    pub public_base_url: String,
    /// Hex-encoded HMAC secret; a random one is generated when absent.
    pub signing_secret_hex: Option<String>,
    pub default_upload_ttl_secs: u64,
    pub max_upload_ttl_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("cloudcc-store"),
            namespace: "cloudcc".to_string(),
            public_base_url: "http://localhost:8080".to_string(),
            signing_secret_hex: None,
            default_upload_ttl_secs: 15 * 60,
            max_upload_ttl_secs: 60 * 60,
        }
    }
}

impl StoreConfig {
    /// Decoded signing secret, if configured.
    pub fn signing_secret(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        let Some(hex_secret) = &self.signing_secret_hex else {
            return Ok(None);
        };
        let secret = hex::decode(hex_secret.trim())
            .map_err(|e| ConfigError::Invalid(format!("store.signing_secret_hex: {}", e)))?;
        if secret.len() < 16 {
            return Err(ConfigError::Invalid(
                "store.signing_secret_hex must be at least 16 bytes".to_string(),
            ));
        }
        Ok(Some(secret))
    }
}

/// One external tool command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: PathBuf,
    /// Arguments placed before the caller's flags.
    #[serde(default)]
    pub args: Vec<String>,
    /// Kill the tool after this many seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ToolCommand {
    fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: PathBuf::from(program),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout_secs: Some(600),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// External tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub frontend: ToolCommand,
    pub splitter: ToolCommand,
    pub backend: ToolCommand,
    /// Seconds between SIGTERM and SIGKILL when a tool is terminated.
    pub termination_grace_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            frontend: ToolCommand::new("clang-12", &["-c", "-emit-llvm"]),
            splitter: ToolCommand::new("llvm-split-12", &[]),
            backend: ToolCommand::new("clang-12", &["-c"]),
            termination_grace_secs: 5,
        }
    }
}

impl WorkerConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let text = String::from_utf8(raw.clone())
            .map_err(|e| ConfigError::Invalid(format!("{} is not UTF-8: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(
            path = %path.display(),
            digest = %hex::encode(Sha256::digest(&raw)),
            "loaded worker config"
        );
        Ok(config)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol_min < 1 || self.protocol_min > self.protocol_max {
            return Err(ConfigError::Invalid(format!(
                "protocol range [{}, {}] is invalid",
                self.protocol_min, self.protocol_max
            )));
        }
        if self.max_chunks == 0 {
            return Err(ConfigError::Invalid("max_chunks must be at least 1".to_string()));
        }
        if self.max_inline_bytes == 0 {
            return Err(ConfigError::Invalid("max_inline_bytes must be positive".to_string()));
        }
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::Invalid("max_concurrent_requests must be at least 1".to_string()));
        }

        let ns = &self.store.namespace;
        if ns.is_empty() || ns == "." || ns == ".." || ns.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!(
                "store.namespace '{}' must be a single path component",
                ns
            )));
        }
        if self.store.default_upload_ttl_secs == 0
            || self.store.default_upload_ttl_secs > self.store.max_upload_ttl_secs
        {
            return Err(ConfigError::Invalid(
                "store.default_upload_ttl_secs must be in 1..=max_upload_ttl_secs".to_string(),
            ));
        }
        self.store.signing_secret()?;

        for (name, tool) in [
            ("frontend", &self.tools.frontend),
            ("splitter", &self.tools.splitter),
            ("backend", &self.tools.backend),
        ] {
            if tool.program.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!("tools.{}.program is empty", name)));
            }
            if tool.timeout_secs == Some(0) {
                return Err(ConfigError::Invalid(format!("tools.{}.timeout_secs must be positive", name)));
            }
        }
        Ok(())
    }

    /// Supported features advertised by probe.
    pub fn features(&self) -> Vec<String> {
        ["probe", "split", "compile", "upload_url"]
            .iter()
            .map(|f| f.to_string())
            .collect()
    }
}
