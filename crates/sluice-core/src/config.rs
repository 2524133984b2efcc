//! Configuration system for Sluice
//!
//! Supports TOML configuration files with sensible defaults.
//! Configuration is loaded from:
//! - macOS: ~/Library/Application Support/sluice/config.toml
//! - Linux: ~/.config/sluice/config.toml
//! - Windows: %APPDATA%/sluice/config.toml

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::DEFAULT_PIPE_CAPACITY;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// File service settings
    pub service: ServiceConfig,
    /// Path cache settings
    pub cache: CacheConfig,
}

/// File service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Start the file service at all
    pub enabled: bool,
    /// Maximum protocol requests in flight
    pub capacity: Capacity,
    /// Buffer size of each streaming channel
    pub pipe_capacity: Capacity,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: Capacity::mebibytes(1),
            pipe_capacity: Capacity(DEFAULT_PIPE_CAPACITY as u64),
        }
    }
}

/// Path cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of resolved paths kept
    pub max_entries: usize,
    /// Time-to-live of a resolved path in seconds
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            ttl_secs: 600, // 10 minutes
        }
    }
}

/// A positive count that may be written as a plain integer or a byte size
/// (`"1MB"`, `"64KiB"`, `"512"`). Size units are binary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "CapacityRepr", into = "CapacityRepr")]
pub struct Capacity(u64);

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum CapacityRepr {
    Count(u64),
    Text(String),
}

impl Capacity {
    pub fn new(value: u64) -> Result<Self, ConfigError> {
        if value == 0 {
            return Err(ConfigError::Invalid("capacity must be positive".into()));
        }
        Ok(Self(value))
    }

    pub const fn kibibytes(n: u64) -> Self {
        Self(n * 1024)
    }

    pub const fn mebibytes(n: u64) -> Self {
        Self(n * 1024 * 1024)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    /// Value as `usize`, saturating on narrow targets
    pub fn as_usize(self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

impl FromStr for Capacity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(s.len());
        let (digits, unit) = s.split_at(split);
        let value: u64 = digits
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("invalid capacity: {:?}", s)))?;
        let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
            "" | "b" | "byte" | "bytes" => 1,
            "k" | "kb" | "kib" => 1024,
            "m" | "mb" | "mib" => 1024 * 1024,
            "g" | "gb" | "gib" => 1024 * 1024 * 1024,
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown capacity unit: {:?}",
                    other
                )))
            }
        };
        let total = value
            .checked_mul(multiplier)
            .ok_or_else(|| ConfigError::Invalid(format!("capacity overflows: {:?}", s)))?;
        Capacity::new(total)
    }
}

impl TryFrom<CapacityRepr> for Capacity {
    type Error = ConfigError;

    fn try_from(repr: CapacityRepr) -> Result<Self, Self::Error> {
        match repr {
            CapacityRepr::Count(n) => Capacity::new(n),
            CapacityRepr::Text(s) => s.parse(),
        }
    }
}

impl From<Capacity> for CapacityRepr {
    fn from(c: Capacity) -> Self {
        CapacityRepr::Count(c.0)
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("Failed to load config from {:?}: {}, using defaults", path, e);
                Self::default()
            }),
            None => {
                debug!("No config directory found, using defaults");
                Self::default()
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "sluice", "sluice")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Generate a sample configuration file content
    pub fn sample() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

/// Configuration errors
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialization error: {0}")]
    Serialize(String),
    #[error("Invalid value: {0}")]
    Invalid(String),
}
