//! Configuration for keyfeed.
//!
//! Settings are read from a TOML file, by default `~/.keyfeed/config.toml`:
//!
//! ```toml
//! # Emulator command line (argument vector)
//! command = ["make", "qemu-nox"]
//!
//! # Directory to launch it from (default: current directory)
//! working_dir = "/home/me/xv6"
//!
//! # Commands typed when none are given on the command line
//! script = ["ls", "cat README"]
//!
//! [timing]
//! boot_delay_ms = 2000
//! command_delay_ms = 1000
//! per_byte_delay_ms = 0
//! settle_delay_ms = 3000
//! quit_grace_ms = 1000
//! stop_grace_ms = 1000
//! ```
//!
//! Every key is optional; missing keys take the defaults shown above.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::timing::TimingPolicy;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Emulator argument vector
    pub command: Vec<String>,
    /// Launch directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Default command script
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<Vec<String>>,
    /// Console pacing
    pub timing: TimingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command: vec!["make".to_string(), "qemu-nox".to_string()],
            working_dir: None,
            script: None,
            timing: TimingConfig::default(),
        }
    }
}

/// Timing settings, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub boot_delay_ms: u64,
    pub command_delay_ms: u64,
    pub per_byte_delay_ms: u64,
    pub settle_delay_ms: u64,
    pub quit_grace_ms: u64,
    pub stop_grace_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig::from(TimingPolicy::default())
    }
}

impl From<TimingPolicy> for TimingConfig {
    fn from(policy: TimingPolicy) -> Self {
        let ms = |d: Duration| u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        Self {
            boot_delay_ms: ms(policy.boot_delay),
            command_delay_ms: ms(policy.command_delay),
            per_byte_delay_ms: ms(policy.per_byte_delay),
            settle_delay_ms: ms(policy.settle_delay),
            quit_grace_ms: ms(policy.quit_grace),
            stop_grace_ms: ms(policy.stop_grace),
        }
    }
}

impl From<TimingConfig> for TimingPolicy {
    fn from(config: TimingConfig) -> Self {
        Self {
            boot_delay: Duration::from_millis(config.boot_delay_ms),
            command_delay: Duration::from_millis(config.command_delay_ms),
            per_byte_delay: Duration::from_millis(config.per_byte_delay_ms),
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            quit_grace: Duration::from_millis(config.quit_grace_ms),
            stop_grace: Duration::from_millis(config.stop_grace_ms),
        }
    }
}

impl Config {
    /// Load the default config file, falling back to defaults
    pub fn load() -> Self {
        Self::load_from(Self::get_config_path())
    }

    /// Load `path` if it exists; a missing or broken file yields defaults
    fn load_from(path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            if path.exists() {
                match Self::from_path(&path) {
                    Ok(config) => {
                        debug!("Loaded config from {}", path.display());
                        return config;
                    }
                    Err(e) => warn!("{}; using defaults", e),
                }
            }
        }
        Self::default()
    }

    /// Load a specific config file
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Get config file path
    fn get_config_path() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".keyfeed").join("config.toml"))
    }
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}
