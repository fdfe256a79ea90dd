//! Configuration parsing and management.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Tuning for a single space instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceConfig {
    /// Cadence of the short expiry generation
    #[serde(default = "default_short_sweep_ms")]
    pub short_sweep_ms: u64,

    /// Cadence of the long expiry generation
    #[serde(default = "default_long_sweep_ms")]
    pub long_sweep_ms: u64,

    /// Entries with a timeout below this land in the short generation
    #[serde(default = "default_short_threshold_ms")]
    pub short_threshold_ms: u64,

    /// Polling resolution for `nrd` and timed `exist_any`
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,

    /// Maximum number of keys written by `dump`
    #[serde(default = "default_dump_limit")]
    pub dump_limit: usize,

    /// Run the background expiry sweeper
    #[serde(default = "default_true")]
    pub sweeper: bool,
}

fn default_short_sweep_ms() -> u64 {
    5_000
}

fn default_long_sweep_ms() -> u64 {
    60_000
}

fn default_short_threshold_ms() -> u64 {
    60_000
}

fn default_poll_ms() -> u64 {
    500
}

fn default_dump_limit() -> usize {
    100
}

fn default_true() -> bool {
    true
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self {
            short_sweep_ms: default_short_sweep_ms(),
            long_sweep_ms: default_long_sweep_ms(),
            short_threshold_ms: default_short_threshold_ms(),
            poll_ms: default_poll_ms(),
            dump_limit: default_dump_limit(),
            sweeper: true,
        }
    }
}

impl SpaceConfig {
    pub fn short_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.short_sweep_ms)
    }

    pub fn long_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.long_sweep_ms)
    }

    pub fn short_threshold(&self) -> Duration {
        Duration::from_millis(self.short_threshold_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("short_sweep_ms", self.short_sweep_ms),
            ("long_sweep_ms", self.long_sweep_ms),
            ("poll_ms", self.poll_ms),
        ];
        for (field, value) in intervals {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Directory-wide configuration matching the tspace.yml schema
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Settings applied to every space without an override
    #[serde(default)]
    pub defaults: SpaceConfig,

    /// Per-space overrides keyed by directory string (`scheme:name[:param]`)
    #[serde(default)]
    pub spaces: HashMap<String, SpaceConfig>,
}

impl DirectoryConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: DirectoryConfig = serde_yaml::from_str(contents)?;
        config.defaults.validate()?;
        for space in config.spaces.values() {
            space.validate()?;
        }
        Ok(config)
    }

    /// Settings for one directory string; `uri` should already be normalized
    pub fn config_for(&self, uri: &str) -> SpaceConfig {
        self.spaces
            .get(uri)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_cadences() {
        let config = SpaceConfig::default();
        assert_eq!(config.short_sweep_interval(), Duration::from_secs(5));
        assert_eq!(config.long_sweep_interval(), Duration::from_secs(60));
        assert_eq!(config.short_threshold(), Duration::from_secs(60));
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = DirectoryConfig::from_yaml(
            r#"
defaults:
  poll_ms: 50
spaces:
  "tspace:orders":
    short_sweep_ms: 100
    sweeper: false
"#,
        )
        .unwrap();

        assert_eq!(config.defaults.poll_ms, 50);
        assert_eq!(config.defaults.long_sweep_ms, 60_000);

        let orders = config.config_for("tspace:orders");
        assert_eq!(orders.short_sweep_ms, 100);
        assert!(!orders.sweeper);
        assert_eq!(config.config_for("tspace:other").poll_ms, 50);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = DirectoryConfig::from_yaml("defaults:\n  poll_ms: 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "poll_ms",
                ..
            }
        ));
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = DirectoryConfig::from_yaml("{}").unwrap();
        assert_eq!(config.defaults, SpaceConfig::default());
        assert!(config.spaces.is_empty());
    }
}
