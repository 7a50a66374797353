//! Wrapper configuration: optional TOML file with built-in defaults.
//!
//! Resolution order for the file path:
//! 1. `--config <path>` on the command line
//! 2. `$LSP_SERVER_WRAPPER_CONFIG`
//! 3. `<config dir>/lsp-server-wrapper/config.toml` (XDG on Linux, Library on macOS)
//!
//! An explicitly named file must exist. The default location is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::codec::DEFAULT_MAX_MESSAGE_SIZE;
use crate::filter::BackpressureFilter;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "LSP_SERVER_WRAPPER_CONFIG";

/// Errors raised while loading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Runtime settings for one wrapper session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WrapperConfig {
    /// Client messages are dropped once this many are queued for the server.
    pub max_queue_depth: usize,
    /// Largest message body accepted from either side, in bytes.
    pub max_message_size: usize,
    /// How long the server gets to exit after SIGTERM before it is killed.
    pub terminate_grace_ms: u64,
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for WrapperConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: BackpressureFilter::DEFAULT_MAX_QUEUE_DEPTH,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            terminate_grace_ms: 2000,
            log_filter: "lsp_server_wrapper=info".to_string(),
        }
    }
}

impl WrapperConfig {
    /// Load the config, falling back to defaults when no file is found at the
    /// default location.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
        match explicit.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::from_file(&path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Parse and validate a specific TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!(path = %path.display(), "loading config file");
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_queue_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "max_queue_depth",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid {
                field: "max_message_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }
}

/// `<config dir>/lsp-server-wrapper/config.toml`, if the platform has one.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("lsp-server-wrapper").join("config.toml"))
}
