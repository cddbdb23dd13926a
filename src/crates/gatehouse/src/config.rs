//! Gatehouse configuration
//!
//! Loads `gatehouse.toml`. Every section and key is optional; anything
//! left out takes the default below.
//!
//! ```toml
//! [checkpoints]
//! default_timeout_hours = 24
//!
//! [bridge]
//! input_timeout_secs = 300
//! default_input = ""
//! queue_capacity = 1024
//! publish_retries = 3
//! retry_backoff_ms = 50
//! max_line_bytes = 65536
//!
//! [realtime]
//! outbound_queue_bound = 256
//!
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::bridge::line_buffer::DEFAULT_MAX_LINE_BYTES;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "GATEHOUSE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Checkpoint defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Deadline for checkpoints created without an explicit timeout, and
    /// the default approval wait
    pub default_timeout_hours: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            default_timeout_hours: 24,
        }
    }
}

impl CheckpointConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_hours.saturating_mul(3600))
    }
}

/// Execution bridge settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    /// How long an input request blocks before falling back
    pub input_timeout_secs: u64,
    /// Answer handed to the run when no reply arrives
    pub default_input: String,
    /// Size of each run's ordered delivery queue
    pub queue_capacity: usize,
    /// Attempts to enqueue an input request before giving up
    pub publish_retries: usize,
    /// Initial backoff between those attempts
    pub retry_backoff_ms: u64,
    /// Unterminated output longer than this is forwarded as a line
    pub max_line_bytes: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            input_timeout_secs: 300,
            default_input: String::new(),
            queue_capacity: 1024,
            publish_retries: 3,
            retry_backoff_ms: 50,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl BridgeConfig {
    pub fn input_timeout(&self) -> Duration {
        Duration::from_secs(self.input_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Subscriber delivery settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Messages a connection may fall behind before it is dropped
    pub outbound_queue_bound: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            outbound_queue_bound: 256,
        }
    }
}

/// Listen address for `gatehouse-server`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    /// Listen address, with `HOST` and `PORT` taking precedence
    pub fn bind_address(&self) -> String {
        let host = std::env::var("HOST").unwrap_or_else(|_| self.host.clone());
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(self.port);
        format!("{}:{}", host, port)
    }
}

/// Complete gatehouse configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatehouseConfig {
    pub checkpoints: CheckpointConfig,
    pub bridge: BridgeConfig,
    pub realtime: RealtimeConfig,
    pub server: ServerConfig,
}

impl GatehouseConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the environment or default locations
    ///
    /// Searches for config in:
    /// 1. GATEHOUSE_CONFIG environment variable
    /// 2. ./config/gatehouse.toml
    /// 3. ./gatehouse.toml
    ///
    /// Falls back to defaults when no file exists.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(config_path) = std::env::var(CONFIG_ENV) {
            return Self::from_file(config_path);
        }

        let paths = [
            PathBuf::from("config/gatehouse.toml"),
            PathBuf::from("./gatehouse.toml"),
        ];

        for path in &paths {
            if path.exists() {
                tracing::info!("Loading configuration from {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Reject values that would make waits or queues degenerate
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.checkpoints.default_timeout_hours == 0 {
            return Err(ConfigError::Invalid(
                "checkpoints.default_timeout_hours must be greater than 0".to_string(),
            ));
        }
        if self.bridge.input_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "bridge.input_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.bridge.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "bridge.queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.bridge.publish_retries == 0 {
            return Err(ConfigError::Invalid(
                "bridge.publish_retries must be at least 1".to_string(),
            ));
        }
        if self.bridge.max_line_bytes == 0 {
            return Err(ConfigError::Invalid(
                "bridge.max_line_bytes must be greater than 0".to_string(),
            ));
        }
        if self.realtime.outbound_queue_bound == 0 {
            return Err(ConfigError::Invalid(
                "realtime.outbound_queue_bound must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = GatehouseConfig::default();
        assert_eq!(config.checkpoints.default_timeout_hours, 24);
        assert_eq!(config.bridge.input_timeout(), Duration::from_secs(300));
        assert_eq!(config.bridge.default_input, "");
        assert_eq!(config.realtime.outbound_queue_bound, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config() {
        let config = GatehouseConfig::from_str(
            r#"
[bridge]
input_timeout_secs = 30
default_input = "continue"

[realtime]
outbound_queue_bound = 16
"#,
        )
        .unwrap();

        assert_eq!(config.bridge.input_timeout_secs, 30);
        assert_eq!(config.bridge.default_input, "continue");
        assert_eq!(config.bridge.queue_capacity, 1024);
        assert_eq!(config.realtime.outbound_queue_bound, 16);
        assert_eq!(config.checkpoints.default_timeout_hours, 24);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_empty_config() {
        assert_eq!(
            GatehouseConfig::from_str("").unwrap(),
            GatehouseConfig::default()
        );
    }

    #[test]
    fn test_rejects_zero_values() {
        let err = GatehouseConfig::from_str("[realtime]\noutbound_queue_bound = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = GatehouseConfig::from_str("[checkpoints]\ndefault_timeout_hours = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = GatehouseConfig::from_str("[bridge]\nmax_line_bytes = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_parse_error() {
        let err = GatehouseConfig::from_str("[bridge]\nqueue_capacity = \"lots\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[checkpoints]\ndefault_timeout_hours = 2").unwrap();

        let config = GatehouseConfig::from_file(file.path()).unwrap();
        assert_eq!(config.checkpoints.default_timeout(), Duration::from_secs(7200));

        let missing = GatehouseConfig::from_file("/nonexistent/gatehouse.toml");
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
