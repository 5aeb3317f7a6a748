//! Configuration management for the SIMES daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/simes/config.toml`.
//!
//! ```toml
//! [daemon]
//! log_level = "info"
//!
//! [network]
//! listen_addr = "127.0.0.1:12345"
//! server_addr = "127.0.0.1:12345"
//! read_timeout_secs = 30
//!
//! [identity]
//! name = "client"
//!
//! [limits]
//! max_frame_size = 16777216
//!
//! [keys]
//! client = "<hex key>"
//! server = "<hex key>"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use simes_protocol::framing::FRAME_FIXED_BODY_SIZE;
use simes_protocol::{KeyDirectory, SymmetricKey, BLOCK_SIZE, MAX_FRAME_SIZE, MAX_SENDER_ID_LEN};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("listen_addr must be host:port, got {0}")]
    InvalidListenAddr(String),

    #[error("server_addr must be host:port, got {0}")]
    InvalidServerAddr(String),

    #[error("read_timeout_secs must be between 0 and 3600, got {0}")]
    InvalidReadTimeout(u64),

    #[error("max_frame_size must be between {min} and {max}, got {got}")]
    InvalidMaxFrameSize { got: usize, min: usize, max: usize },

    #[error("identity name must be 1 to {max} bytes, got {len}")]
    InvalidIdentityName { len: usize, max: usize },

    #[error("no key configured for own identity {0:?}")]
    MissingOwnKey(String),

    #[error("invalid key for sender {sender:?}: {reason}")]
    InvalidKey { sender: String, reason: String },
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Default TCP port, shared by the listener and the client.
pub const DEFAULT_PORT: u16 = 12345;

/// Main configuration structure for the SIMES daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Listener and peer addresses.
    pub network: NetworkConfig,

    /// This node's sender identity.
    pub identity: IdentityConfig,

    /// Frame limits.
    pub limits: LimitsConfig,

    /// Sender name to hex-encoded key.
    pub keys: BTreeMap<String, String>,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address `simes serve` binds to.
    pub listen_addr: String,

    /// Address `simes send` connects to.
    pub server_addr: String,

    /// Per-read timeout in seconds (0 = wait forever).
    pub read_timeout_secs: u64,
}

/// Identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IdentityConfig {
    /// Sender id written into every outgoing frame.
    pub name: String,
}

/// Frame limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum frame body size in bytes, for both directions.
    pub max_frame_size: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: format!("127.0.0.1:{}", DEFAULT_PORT),
            server_addr: format!("127.0.0.1:{}", DEFAULT_PORT),
            read_timeout_secs: 30,
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: "client".to_string(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("simes")
        .join("config.toml")
}

/// Smallest frame body that can hold a one-block ciphertext.
fn min_frame_size() -> usize {
    FRAME_FIXED_BODY_SIZE + BLOCK_SIZE
}

fn is_host_port(addr: &str) -> bool {
    match addr.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - SIMES_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - SIMES_LISTEN_ADDR: Override the listen address
    /// - SIMES_SERVER_ADDR: Override the server address
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("SIMES_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }

        if let Ok(addr) = std::env::var("SIMES_LISTEN_ADDR") {
            if !addr.is_empty() {
                tracing::info!("Overriding listen_addr from environment: {}", addr);
                self.network.listen_addr = addr;
            }
        }

        if let Ok(addr) = std::env::var("SIMES_SERVER_ADDR") {
            if !addr.is_empty() {
                tracing::info!("Overriding server_addr from environment: {}", addr);
                self.network.server_addr = addr;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        if !is_host_port(&self.network.listen_addr) {
            return Err(ConfigError::InvalidListenAddr(
                self.network.listen_addr.clone(),
            ));
        }
        if !is_host_port(&self.network.server_addr) {
            return Err(ConfigError::InvalidServerAddr(
                self.network.server_addr.clone(),
            ));
        }

        if self.network.read_timeout_secs > 3600 {
            return Err(ConfigError::InvalidReadTimeout(self.network.read_timeout_secs));
        }

        let max = u32::MAX as usize;
        if self.limits.max_frame_size < min_frame_size() || self.limits.max_frame_size > max {
            return Err(ConfigError::InvalidMaxFrameSize {
                got: self.limits.max_frame_size,
                min: min_frame_size(),
                max,
            });
        }

        let name_len = self.identity.name.len();
        if name_len == 0 || name_len > MAX_SENDER_ID_LEN {
            return Err(ConfigError::InvalidIdentityName {
                len: name_len,
                max: MAX_SENDER_ID_LEN,
            });
        }

        // Parses every key
        self.key_directory()?;

        if !self.keys.contains_key(&self.identity.name) {
            return Err(ConfigError::MissingOwnKey(self.identity.name.clone()));
        }

        Ok(())
    }

    /// Build the key directory from the `[keys]` table.
    pub fn key_directory(&self) -> Result<KeyDirectory, ConfigError> {
        self.keys
            .iter()
            .map(|(sender, encoded)| {
                SymmetricKey::from_hex(encoded)
                    .map(|key| (sender.clone(), key))
                    .map_err(|e| ConfigError::InvalidKey {
                        sender: sender.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect()
    }

    /// The key this node encrypts its own frames with.
    pub fn own_key(&self) -> Result<SymmetricKey, ConfigError> {
        let encoded = self
            .keys
            .get(&self.identity.name)
            .ok_or_else(|| ConfigError::MissingOwnKey(self.identity.name.clone()))?;
        SymmetricKey::from_hex(encoded).map_err(|e| ConfigError::InvalidKey {
            sender: self.identity.name.clone(),
            reason: e.to_string(),
        })
    }

    /// Read timeout, or `None` when disabled.
    pub fn read_timeout(&self) -> Option<Duration> {
        match self.network.read_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
