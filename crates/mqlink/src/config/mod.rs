//! Library configuration.
//!
//! All limits and timeouts are fixed when the [`SessionManager`](crate::SessionManager)
//! is initialized. Values come from, in increasing precedence:
//! - built-in defaults (`DEFAULT_*` constants)
//! - a TOML file, with `${VAR}` or `${VAR:-default}` substitution
//! - environment variables with the `MQLINK__` prefix (double underscore for nesting)
//!
//! ```toml
//! [limits]
//! max_sessions = 4
//! max_outgoing_publishes = 8
//!
//! [timeouts]
//! ack_timeout_ms = ${MQLINK_ACK_TIMEOUT:-3000}
//!
//! [backoff]
//! max_attempts = 10
//! ```
//!
//! Environment override example: `MQLINK__LIMITS__MAX_RETRIES=5`.

mod backoff;
mod limits;
mod timeouts;

use std::path::Path;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

pub use backoff::{
    BackoffConfig, DEFAULT_BACKOFF_INITIAL_DELAY_MS, DEFAULT_BACKOFF_MAX_ATTEMPTS,
    DEFAULT_BACKOFF_MAX_DELAY_MS, DEFAULT_BACKOFF_MULTIPLIER,
};
pub use limits::{
    LimitsConfig, DEFAULT_MAX_OUTGOING_PUBLISHES, DEFAULT_MAX_RETRIES, DEFAULT_MAX_SESSIONS,
    DEFAULT_MAX_TOPICS_PER_REQUEST, DEFAULT_MIN_NETWORK_BUFFER_SIZE,
};
pub use timeouts::{
    TimeoutConfig, DEFAULT_ACK_POLL_INTERVAL_MS, DEFAULT_ACK_TIMEOUT_MS,
    DEFAULT_CONNACK_TIMEOUT_MS, DEFAULT_DISCONNECT_QUEUE_TIMEOUT_MS,
    DEFAULT_RECEIVE_POLL_INTERVAL_MS, DEFAULT_RECEIVE_TIMEOUT_MS, DEFAULT_SEND_TIMEOUT_MS,
};

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")
        .map_err(|e| ConfigError::Validation(format!("substitution pattern: {}", e)))?;
    Ok(re
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .to_string())
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    pub limits: LimitsConfig,
    pub timeouts: TimeoutConfig,
    pub backoff: BackoffConfig,
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// Config parsing/loading error.
    Config(config::ConfigError),
    /// Invalid configuration value.
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

impl LibraryConfig {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// A missing file is not an error; defaults and `MQLINK__*` variables still apply.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        let path = path.as_ref();
        if path.is_file() {
            let content = std::fs::read_to_string(path)?;
            let substituted = substitute_env_vars(&content)?;
            builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
        }

        let cfg = builder
            .add_source(
                Environment::with_prefix("MQLINK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: LibraryConfig = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string, without environment overrides.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let substituted = substitute_env_vars(content)?;
        let config: LibraryConfig = config::Config::builder()
            .add_source(File::from_str(&substituted, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limits.validate().map_err(ConfigError::Validation)?;
        self.timeouts.validate().map_err(ConfigError::Validation)?;
        self.backoff.validate().map_err(ConfigError::Validation)?;
        Ok(())
    }
}
