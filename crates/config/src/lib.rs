#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Configuration management for leasehold
//!
//! This crate handles loading and merging pool configuration from:
//! - Default values (hard-coded)
//! - Configuration file (~/.config/leasehold/config.toml)
//! - Environment variables

use leasehold_errors::{ConfigError, Error};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Resource pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of interchangeable resources managed by the pool
    #[serde(default = "default_resource_count")]
    pub resource_count: usize,
    /// Serve blocked callers in strict arrival order
    #[serde(default = "default_fair")]
    pub fair: bool,
    /// Lease length used when a caller does not pass one
    #[serde(default = "default_lease_ms")]
    pub default_lease_ms: u64,
    /// Whether pool acquires observe caller interrupts
    #[serde(default = "default_interruptible")]
    pub interruptible: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            resource_count: 2,
            fair: true,
            default_lease_ms: 30_000, // 30 seconds
            interruptible: true,
        }
    }
}

impl PoolConfig {
    /// Default lease as a `Duration`
    #[must_use]
    pub fn default_lease_duration(&self) -> Duration {
        Duration::from_millis(self.default_lease_ms)
    }

    /// Check that the values describe a usable pool
    ///
    /// # Errors
    ///
    /// Returns an error if the pool would have no resources or leases would
    /// expire immediately.
    pub fn validate(&self) -> Result<(), Error> {
        if self.resource_count == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pool.resource_count".to_string(),
                value: "0".to_string(),
            }
            .into());
        }
        if self.default_lease_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pool.default_lease_ms".to_string(),
                value: "0".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_resource_count() -> usize {
    2
}

fn default_fair() -> bool {
    true
}

fn default_lease_ms() -> u64 {
    30_000
}

fn default_interruptible() -> bool {
    true
}

fn parse_bool(field: &str, value: String) -> Result<bool, Error> {
    match value.as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value,
        }
        .into()),
    }
}

impl Config {
    /// Get the default config file path
    ///
    /// # Errors
    ///
    /// Returns an error if the system config directory cannot be determined.
    pub fn default_path() -> Result<PathBuf, Error> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::NotFound {
            path: "config directory".to_string(),
        })?;
        Ok(config_dir.join("leasehold").join("config.toml"))
    }

    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or if the file contents
    /// contain invalid TOML syntax that cannot be parsed.
    pub async fn load_from_file(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound {
                    path: path.display().to_string(),
                }
                .into()
            } else {
                Error::io_with_path(&e, path)
            }
        })?;

        toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError {
                message: e.to_string(),
            })
            .map_err(Into::into)
    }

    /// Load configuration with fallback to defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read
    /// or contains invalid TOML syntax.
    pub async fn load() -> Result<Self, Error> {
        let config_path = Self::default_path()?;

        if config_path.exists() {
            Self::load_from_file(&config_path).await
        } else {
            tracing::debug!(path = %config_path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration from an optional path or use default
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self, Error> {
        match path {
            Some(config_path) => Self::load_from_file(config_path).await,
            None => Self::load().await,
        }
    }

    /// Merge with environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables contain invalid values
    /// that cannot be parsed into the expected types.
    pub fn merge_env(&mut self) -> Result<(), Error> {
        // LEASEHOLD_RESOURCE_COUNT
        if let Ok(count) = std::env::var("LEASEHOLD_RESOURCE_COUNT") {
            self.pool.resource_count = count.parse().map_err(|_| ConfigError::InvalidValue {
                field: "LEASEHOLD_RESOURCE_COUNT".to_string(),
                value: count,
            })?;
        }

        // LEASEHOLD_FAIR
        if let Ok(fair) = std::env::var("LEASEHOLD_FAIR") {
            self.pool.fair = parse_bool("LEASEHOLD_FAIR", fair)?;
        }

        // LEASEHOLD_DEFAULT_LEASE_MS
        if let Ok(lease) = std::env::var("LEASEHOLD_DEFAULT_LEASE_MS") {
            self.pool.default_lease_ms = lease.parse().map_err(|_| ConfigError::InvalidValue {
                field: "LEASEHOLD_DEFAULT_LEASE_MS".to_string(),
                value: lease,
            })?;
        }

        // LEASEHOLD_INTERRUPTIBLE
        if let Ok(interruptible) = std::env::var("LEASEHOLD_INTERRUPTIBLE") {
            self.pool.interruptible = parse_bool("LEASEHOLD_INTERRUPTIBLE", interruptible)?;
        }

        Ok(())
    }
}
