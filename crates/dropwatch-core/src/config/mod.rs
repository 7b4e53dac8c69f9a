//! Configuration management for Dropwatch.
//!
//! This module handles loading, saving, and validating Dropwatch configuration.
//! The core never reads configuration on its own: a [`Config`] value is built
//! by the caller and handed to the scheduler and watcher explicitly.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/dropwatch/config.toml` |
//! | macOS | `~/Library/Application Support/com.dropwatch.Dropwatch/config.toml` |
//! | Windows | `%APPDATA%\dropwatch\Dropwatch\config\config.toml` |
//!
//! ## Example
//!
//! ```toml
//! [endpoint]
//! host = "10.0.0.5"
//! port = 65432
//!
//! [watch]
//! directory = "/data/outgoing"
//! exclude_patterns = ["*.part"]
//!
//! [retry]
//! max_retries = 5
//! retry_delay = "2s"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration struct for Dropwatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Receiving endpoint
    pub endpoint: EndpointConfig,
    /// Watched directory
    pub watch: WatchConfig,
    /// Per-attempt transfer settings
    pub transfer: TransferConfig,
    /// Retry policy
    pub retry: RetryConfig,
}

/// Where files are delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Host name or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Maximum time to establish a connection
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            connect_timeout: Duration::from_secs(crate::DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

impl EndpointConfig {
    /// `host:port` form used for connecting and logging.
    #[must_use]
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Which directory is watched and what is ignored in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Directory to watch (may be given on the command line instead)
    pub directory: Option<PathBuf>,
    /// Glob patterns matched against file names to skip
    pub exclude_patterns: Vec<String>,
    /// Quiet period before a change event is forwarded
    #[serde(with = "humantime_serde")]
    pub debounce: Duration,
    /// Queue the files already present when watching starts
    pub scan_on_start: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            directory: None,
            exclude_patterns: vec![
                ".DS_Store".into(),
                "Thumbs.db".into(),
                "*.swp".into(),
                "*.tmp".into(),
            ],
            debounce: Duration::from_millis(200),
            scan_on_start: true,
        }
    }
}

/// Settings for a single transfer attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Bytes read from the file and written per chunk
    pub chunk_size: usize,
    /// Wait for the endpoint's response after the body is sent
    #[serde(with = "humantime_serde")]
    pub response_timeout: Duration,
    /// Minimum interval between throughput samples
    #[serde(with = "humantime_serde")]
    pub speed_sample_interval: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            response_timeout: Duration::from_secs(crate::DEFAULT_RESPONSE_TIMEOUT_SECS),
            speed_sample_interval: Duration::from_millis(crate::DEFAULT_SPEED_SAMPLE_MS),
        }
    }
}

/// Retry policy for retryable failures (open errors, refused connections).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt before a path is abandoned
    pub max_retries: u32,
    /// Fixed delay before a failed path is re-enqueued
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: crate::DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(crate::DEFAULT_RETRY_DELAY_MS),
        }
    }
}

/// Upper bound on the chunk size (16 MB).
const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from an explicit path.
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration to the default location.
    ///
    /// Creates the configuration directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to an explicit path.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Check the values a transfer depends on.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.host.trim().is_empty() {
            return Err(invalid("endpoint.host", "must not be empty"));
        }
        if self.endpoint.port == 0 {
            return Err(invalid("endpoint.port", "must be between 1 and 65535"));
        }
        if self.endpoint.connect_timeout.is_zero() {
            return Err(invalid("endpoint.connect_timeout", "must be greater than zero"));
        }
        if self.transfer.chunk_size == 0 || self.transfer.chunk_size > MAX_CHUNK_SIZE {
            return Err(invalid(
                "transfer.chunk_size",
                &format!("must be between 1 and {MAX_CHUNK_SIZE} bytes"),
            ));
        }
        if self.transfer.response_timeout.is_zero() {
            return Err(invalid("transfer.response_timeout", "must be greater than zero"));
        }
        Ok(())
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "dropwatch", "Dropwatch")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }
}

fn invalid(key: &str, reason: &str) -> Error {
    Error::InvalidConfig {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis();
        if millis % 1000 == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{millis}ms"))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            return ms
                .trim()
                .parse()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string());
        }
        if let Some(secs) = s.strip_suffix('s') {
            return secs
                .trim()
                .parse()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string());
        }
        if let Some(mins) = s.strip_suffix('m') {
            return mins
                .trim()
                .parse::<u64>()
                .map_err(|e| e.to_string())?
                .checked_mul(60)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("duration out of range: {s:?}"));
        }
        Err(format!("invalid duration format: {s:?}"))
    }
}

/// Parse a human-readable duration such as `500ms`, `2s` or `1m`.
///
/// # Errors
///
/// Returns `Error::ConfigError` if the string has no recognised unit or the
/// number does not parse.
pub fn parse_duration(s: &str) -> Result<Duration> {
    humantime_serde::parse(s).map_err(Error::ConfigError)
}
