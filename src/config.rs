use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file")]
    Read(#[from] std::io::Error),

    #[error("Invalid config file")]
    Parse(#[from] toml::de::Error),
}

/// Server configuration.
///
/// Loaded from an optional TOML file; command-line flags are applied on top
/// before the value is frozen into [`crate::AppState`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Reject PUT and DELETE with 405. Writes must be enabled explicitly.
    #[serde(default = "default_true")]
    pub read_only: bool,

    /// Emit ETag headers and honour If-Match / If-None-Match
    #[serde(default = "default_true")]
    pub etags: bool,

    /// Maximum request body size for PUT (in bytes)
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: usize,

    /// File served for GET/HEAD on a directory
    #[serde(default)]
    pub index_file: Option<String>,

    /// Serve files through symlinks that point outside the root
    #[serde(default)]
    pub follow_symlinks: bool,

    /// Number of consecutive ports tried when the requested one is taken
    #[serde(default = "default_port_attempts")]
    pub port_attempts: u16,

    /// Add CORS headers to every response
    #[serde(default)]
    pub cors: bool,

    /// Value of Access-Control-Allow-Origin ("*" for any)
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,

    /// Seconds in-flight requests get to finish after a shutdown signal
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_upload_size() -> usize {
    100 * 1024 * 1024 // 100 MB
}

fn default_port_attempts() -> u16 {
    10
}

fn default_cors_origin() -> String {
    "*".to_string()
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            read_only: default_true(),
            etags: default_true(),
            max_upload_size: default_max_upload_size(),
            index_file: None,
            follow_symlinks: false,
            port_attempts: default_port_attempts(),
            cors: false,
            cors_origin: default_cors_origin(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Methods advertised in the Allow header of 405 responses
    pub fn allowed_methods(&self) -> &'static str {
        if self.read_only {
            crate::error::ALLOW_READ_ONLY
        } else {
            crate::error::ALLOW_READ_WRITE
        }
    }
}
