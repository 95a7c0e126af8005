//! Configuration management for netvault.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/netvault/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use keyseal::{EncodingMode, DEFAULT_PBKDF2_ITERATIONS};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("encoding must be one of: standard, standard_no_pad, url_safe, url_safe_no_pad; got {0}")]
    InvalidEncoding(String),

    #[error("retry_attempts must be between 1 and 10, got {0}")]
    InvalidRetryAttempts(u32),

    #[error("retry_backoff_ms must be at most 5000, got {0}")]
    InvalidRetryBackoff(u64),

    #[error("pbkdf2_iterations must be at least 10000, got {0}")]
    InvalidPbkdf2Iterations(u32),

    #[error("key service and alias must not be empty")]
    EmptyKeyName,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Lowest PBKDF2 round count accepted from configuration.
pub const MIN_PBKDF2_ITERATIONS: u32 = 10_000;

/// Main configuration structure for netvault.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Where credentials are stored.
    pub storage: StorageConfig,

    /// Where the installation key comes from.
    pub keys: KeysConfig,

    /// Logging settings.
    pub log: LogConfig,
}

/// Credential database configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the SQLite database.
    pub database_path: PathBuf,

    /// Base64 variant used for sealed blobs inside URIs.
    pub encoding: String,
}

/// Key store backends selectable from configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeyBackend {
    /// Derived key if this installation already has one, otherwise the
    /// platform keychain.
    #[default]
    Auto,
    /// Random key held in the platform keychain.
    Keychain,
    /// PBKDF2-derived key in a preferences file, wrapped by a keychain key.
    Derived,
    /// Throwaway in-memory key. Nothing saved survives the process.
    Memory,
}

/// Installation key configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeysConfig {
    pub backend: KeyBackend,

    /// Keychain service name.
    pub service: String,

    /// Keychain entry name of the installation key.
    pub alias: String,

    /// Preferences file used by the derived backend.
    pub preferences_path: PathBuf,

    /// PBKDF2 rounds for newly derived keys.
    pub pbkdf2_iterations: u32,

    /// Attempts at reaching the key store before giving up.
    pub retry_attempts: u32,

    /// Delay before the first retry; doubles on each further attempt.
    pub retry_backoff_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub level: String,

    /// Also write logs to this file.
    pub file: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_data_dir().join("vault.db"),
            encoding: EncodingMode::default().as_str().to_string(),
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            backend: KeyBackend::Auto,
            service: "netvault".to_string(),
            alias: "installation-key".to_string(),
            preferences_path: default_data_dir().join("key-preferences.json"),
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
            retry_attempts: 3,
            retry_backoff_ms: 50,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("netvault")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("netvault")
}

impl StorageConfig {
    /// The configured blob encoding. Call after [`Config::validate`].
    pub fn encoding_mode(&self) -> EncodingMode {
        EncodingMode::parse(&self.encoding).unwrap_or_default()
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - NETVAULT_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - NETVAULT_DATABASE: Override the database path
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("NETVAULT_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log level from environment: {}", level);
                self.log.level = level;
            }
        }

        if let Ok(path) = std::env::var("NETVAULT_DATABASE") {
            if !path.is_empty() {
                tracing::info!("Overriding database path from environment: {}", path);
                self.storage.database_path = PathBuf::from(path);
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if EncodingMode::parse(&self.storage.encoding).is_none() {
            return Err(ConfigError::InvalidEncoding(self.storage.encoding.clone()));
        }

        if !(1..=10).contains(&self.keys.retry_attempts) {
            return Err(ConfigError::InvalidRetryAttempts(self.keys.retry_attempts));
        }

        if self.keys.retry_backoff_ms > 5000 {
            return Err(ConfigError::InvalidRetryBackoff(self.keys.retry_backoff_ms));
        }

        if self.keys.pbkdf2_iterations < MIN_PBKDF2_ITERATIONS {
            return Err(ConfigError::InvalidPbkdf2Iterations(
                self.keys.pbkdf2_iterations,
            ));
        }

        if self.keys.service.trim().is_empty() || self.keys.alias.trim().is_empty() {
            return Err(ConfigError::EmptyKeyName);
        }

        let level = self.log.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.log.level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
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
