//! Scheduler configuration loading
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high → low):
//! 1. Environment variables (FORKPOOL_*)
//! 2. Config file ([scheduler] table)
//! 3. Default values
//! ```
//!
//! # Usage
//!
//! ```rust
//! use forkpool::util::config::parse_config;
//!
//! let config = parse_config("[scheduler]\nnum_workers = 4\npolicy = \"round_robin\"\n").unwrap();
//! assert_eq!(config.num_workers, 4);
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runtime::scheduler::{PlacementPolicy, SchedulerConfig};

pub const ENV_WORKERS: &str = "FORKPOOL_WORKERS";
pub const ENV_POLICY: &str = "FORKPOOL_POLICY";
pub const ENV_DEQUE_CAPACITY: &str = "FORKPOOL_DEQUE_CAPACITY";

/// On-disk configuration file layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Scheduler settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: `{value}`")]
    InvalidValue { key: &'static str, value: String },
}

/// Parse a TOML document with a `[scheduler]` table.
pub fn parse_config(content: &str) -> Result<SchedulerConfig, ConfigError> {
    let file: ConfigFile = toml::from_str(content)?;
    Ok(file.scheduler)
}

/// Load a config file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<SchedulerConfig, ConfigError> {
    if !path.exists() {
        return Ok(SchedulerConfig::default());
    }
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Overlay `FORKPOOL_*` environment variables on `config`.
pub fn apply_env_overrides(config: SchedulerConfig) -> Result<SchedulerConfig, ConfigError> {
    apply_overrides(config, |key| std::env::var(key).ok())
}

/// Load `path` and then overlay the environment.
pub fn load_config_with_env(path: &Path) -> Result<SchedulerConfig, ConfigError> {
    apply_env_overrides(load_config(path)?)
}

fn apply_overrides(
    mut config: SchedulerConfig,
    lookup: impl Fn(&'static str) -> Option<String>,
) -> Result<SchedulerConfig, ConfigError> {
    if let Some(value) = lookup(ENV_WORKERS) {
        config.num_workers = parse_usize(ENV_WORKERS, &value)?;
    }
    if let Some(value) = lookup(ENV_POLICY) {
        config.policy = value
            .parse::<PlacementPolicy>()
            .map_err(|_| ConfigError::InvalidValue {
                key: ENV_POLICY,
                value,
            })?;
    }
    if let Some(value) = lookup(ENV_DEQUE_CAPACITY) {
        config.deque_capacity = parse_usize(ENV_DEQUE_CAPACITY, &value)?;
    }
    Ok(config)
}

fn parse_usize(
    key: &'static str,
    value: &str,
) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        })
}
