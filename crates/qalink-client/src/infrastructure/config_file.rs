//! TOML configuration file for the client.
//!
//! Every key is optional; a missing key takes the value shown below, which is
//! also what [`ConfigFile::default`] produces.
//!
//! ```toml
//! log_level = "info"
//!
//! [server]
//! host = "127.0.0.1"
//! port = 54321
//!
//! [protocol]
//! framing = "length_prefixed"   # raw | length_prefixed | lines
//! max_frame_len = 16777216
//! correlation = "tagged"        # fifo | tagged
//!
//! [timeouts]
//! connect_ms = 10000
//! request_ms = 0                # 0 waits forever
//!
//! [reconnect]
//! strategy = "fixed"            # fixed | exponential
//! delay_ms = 2000               # fixed only
//! initial_ms = 500              # exponential only
//! max_ms = 30000                # exponential only
//! multiplier = 2.0              # exponential only
//! jitter = 0.2                  # exponential only
//! max_attempts = 0              # 0 retries forever
//! ```
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the key is absent, so a partial file (or an empty one)
//! is always valid TOML for this schema.  Semantic checks (port 0, a jitter
//! outside `0.0..=1.0`, an unknown framing name) happen in
//! [`ConfigFile::into_client_config`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use qalink_core::{CorrelationMode, Framing, DEFAULT_MAX_FRAME_LEN};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::config::{
    ClientConfig, Endpoint, ReconnectConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_HOST, DEFAULT_PORT,
    DEFAULT_RECONNECT_DELAY,
};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The TOML parsed but a value is unusable.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level layout of the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Default tracing filter when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub protocol: ProtocolSection,

    #[serde(default)]
    pub timeouts: TimeoutSection,

    #[serde(default)]
    pub reconnect: ReconnectSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolSection {
    /// `raw`, `length_prefixed`, or `lines`.
    #[serde(default = "default_framing")]
    pub framing: String,
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    #[serde(default)]
    pub correlation: CorrelationMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutSection {
    #[serde(default = "default_connect_ms")]
    pub connect_ms: u64,
    /// 0 disables the request timeout.
    #[serde(default)]
    pub request_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectStrategy {
    #[default]
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectSection {
    #[serde(default)]
    pub strategy: ReconnectStrategy,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_initial_ms")]
    pub initial_ms: u64,
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// 0 retries forever.
    #[serde(default)]
    pub max_attempts: u32,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_framing() -> String {
    Framing::default().to_string()
}
fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}
fn default_connect_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_millis() as u64
}
fn default_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY.as_millis() as u64
}
fn default_initial_ms() -> u64 {
    500
}
fn default_max_ms() -> u64 {
    30_000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_jitter() -> f64 {
    0.2
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            server: ServerSection::default(),
            protocol: ProtocolSection::default(),
            timeouts: TimeoutSection::default(),
            reconnect: ReconnectSection::default(),
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for ProtocolSection {
    fn default() -> Self {
        Self {
            framing: default_framing(),
            max_frame_len: default_max_frame_len(),
            correlation: CorrelationMode::default(),
        }
    }
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            connect_ms: default_connect_ms(),
            request_ms: 0,
        }
    }
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            strategy: ReconnectStrategy::default(),
            delay_ms: default_delay_ms(),
            initial_ms: default_initial_ms(),
            max_ms: default_max_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
            max_attempts: 0,
        }
    }
}

impl ConfigFile {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the TOML is malformed or a value has
    /// the wrong type.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Converts the file layout into the runtime configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for values that parse but cannot be
    /// used.
    pub fn into_client_config(self) -> Result<ClientConfig, ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::Invalid("server.host is empty".to_string()));
        }
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must not be 0".to_string()));
        }
        if self.protocol.max_frame_len == 0 {
            return Err(ConfigError::Invalid(
                "protocol.max_frame_len must be positive".to_string(),
            ));
        }
        if self.timeouts.connect_ms == 0 {
            return Err(ConfigError::Invalid(
                "timeouts.connect_ms must be positive".to_string(),
            ));
        }

        let framing = self
            .protocol
            .framing
            .parse::<Framing>()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?
            .with_max_frame_len(self.protocol.max_frame_len);

        let max_attempts = (self.reconnect.max_attempts > 0).then_some(self.reconnect.max_attempts);
        let reconnect = match self.reconnect.strategy {
            ReconnectStrategy::Fixed => ReconnectConfig::Fixed {
                delay: Duration::from_millis(self.reconnect.delay_ms),
                max_attempts,
            },
            ReconnectStrategy::Exponential => ReconnectConfig::Exponential {
                initial: Duration::from_millis(self.reconnect.initial_ms),
                max: Duration::from_millis(self.reconnect.max_ms),
                multiplier: self.reconnect.multiplier,
                jitter: self.reconnect.jitter,
                max_attempts,
            },
        };
        reconnect.validate().map_err(ConfigError::Invalid)?;

        Ok(ClientConfig {
            endpoint: Endpoint::new(self.server.host, self.server.port),
            framing,
            correlation: self.protocol.correlation,
            connect_timeout: Duration::from_millis(self.timeouts.connect_ms),
            request_timeout: (self.timeouts.request_ms > 0)
                .then(|| Duration::from_millis(self.timeouts.request_ms)),
            reconnect,
        })
    }
}

/// Loads a [`ConfigFile`] from `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read (a missing file
/// included: an explicitly named file must exist) and [`ConfigError::Parse`]
/// if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    ConfigFile::from_toml_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_yields_defaults() {
        // Act
        let cfg = ConfigFile::from_toml_str("").unwrap();

        // Assert
        assert_eq!(cfg, ConfigFile::default());
        assert_eq!(cfg.into_client_config().unwrap(), ClientConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        // Arrange
        let toml = r#"
            [server]
            port = 6000
        "#;

        // Act
        let cfg = ConfigFile::from_toml_str(toml).unwrap();

        // Assert
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.port, 6000);
        assert_eq!(cfg.reconnect.delay_ms, 2000);
    }

    #[test]
    fn test_legacy_settings_round_into_client_config() {
        let toml = r#"
            [protocol]
            framing = "raw"
            correlation = "fifo"
        "#;

        let client = ConfigFile::from_toml_str(toml)
            .unwrap()
            .into_client_config()
            .unwrap();

        assert_eq!(client, ClientConfig::legacy());
    }

    #[test]
    fn test_exponential_section_builds_exponential_config() {
        let toml = r#"
            [timeouts]
            request_ms = 1500

            [reconnect]
            strategy = "exponential"
            initial_ms = 100
            max_ms = 1000
            multiplier = 3.0
            jitter = 0.0
            max_attempts = 4
        "#;

        let client = ConfigFile::from_toml_str(toml)
            .unwrap()
            .into_client_config()
            .unwrap();

        assert_eq!(client.request_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(
            client.reconnect,
            ReconnectConfig::Exponential {
                initial: Duration::from_millis(100),
                max: Duration::from_millis(1000),
                multiplier: 3.0,
                jitter: 0.0,
                max_attempts: Some(4),
            }
        );
    }

    #[test]
    fn test_lines_framing_applies_max_frame_len() {
        let toml = r#"
            [protocol]
            framing = "lines"
            max_frame_len = 4096
        "#;

        let client = ConfigFile::from_toml_str(toml)
            .unwrap()
            .into_client_config()
            .unwrap();

        assert_eq!(client.framing, Framing::json_lines().with_max_frame_len(4096));
    }

    #[test]
    fn test_port_zero_is_invalid() {
        let cfg = ConfigFile::from_toml_str("[server]\nport = 0\n").unwrap();
        assert!(matches!(cfg.into_client_config(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unknown_framing_is_invalid() {
        let cfg = ConfigFile::from_toml_str("[protocol]\nframing = \"xml\"\n").unwrap();
        let err = cfg.into_client_config().unwrap_err();
        assert!(err.to_string().contains("xml"), "unexpected: {err}");
    }

    #[test]
    fn test_jitter_out_of_range_is_invalid() {
        let toml = "[reconnect]\nstrategy = \"exponential\"\njitter = 2.0\n";
        let cfg = ConfigFile::from_toml_str(toml).unwrap();
        assert!(matches!(cfg.into_client_config(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_wrong_type_is_parse_error() {
        let result = ConfigFile::from_toml_str("[server]\nport = \"eighty\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_unknown_correlation_is_parse_error() {
        let result = ConfigFile::from_toml_str("[protocol]\ncorrelation = \"lifo\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let path = std::env::temp_dir().join(format!("qalink-missing-{}.toml", std::process::id()));
        let result = load_config(&path);
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_load_reads_file_from_disk() {
        // Arrange
        let path = std::env::temp_dir().join(format!("qalink-load-{}.toml", std::process::id()));
        std::fs::write(&path, "log_level = \"debug\"\n[server]\nhost = \"qa.local\"\n").unwrap();

        // Act
        let cfg = load_config(&path);
        let _ = std::fs::remove_file(&path);

        // Assert
        let cfg = cfg.unwrap();
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.server.host, "qa.local");
    }

    #[test]
    fn test_default_file_serializes_and_parses_back() {
        let text = toml::to_string_pretty(&ConfigFile::default()).unwrap();
        assert_eq!(ConfigFile::from_toml_str(&text).unwrap(), ConfigFile::default());
    }
}
