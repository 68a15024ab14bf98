//! Pool configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MIN_SIZE: usize = 1;
pub const DEFAULT_MAX_SIZE: usize = 1000;
pub const DEFAULT_RECLAIM_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("min_size must be greater than zero")]
    ZeroMinSize,

    #[error("min_size ({min}) must not exceed max_size ({max})")]
    MinAboveMax { min: usize, max: usize },

    #[error("reclaim_interval_secs must be greater than zero")]
    ZeroReclaimInterval,

    #[error("failed to read config '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Runtime pool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub reclaim_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: DEFAULT_MIN_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            reclaim_interval_secs: DEFAULT_RECLAIM_INTERVAL.as_secs(),
        }
    }
}

impl PoolConfig {
    pub fn new(min_size: usize, max_size: usize) -> Self {
        Self {
            min_size,
            max_size,
            ..Self::default()
        }
    }

    /// Load from a JSON file. Missing fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_size == 0 {
            return Err(ConfigError::ZeroMinSize);
        }
        if self.min_size > self.max_size {
            return Err(ConfigError::MinAboveMax {
                min: self.min_size,
                max: self.max_size,
            });
        }
        if self.reclaim_interval_secs == 0 {
            return Err(ConfigError::ZeroReclaimInterval);
        }
        Ok(())
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs)
    }
}
