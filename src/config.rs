use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::arena::{DEFAULT_POOL_SIZE, MIN_POOL_SIZE};
use crate::error::ConfigError;
use crate::freelist::{DEFAULT_BATCH_SIZE, MAX_BYTES};

/// File name searched for by [`Config::discover`]
pub const CONFIG_FILE_NAME: &str = "mempool.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub arena: ArenaConfig,

    #[serde(default)]
    pub free_list: FreeListConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaConfig {
    /// Bytes per block; the first block also holds the pool header
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeListConfig {
    /// Nodes carved per refill
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

impl Default for FreeListConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

fn default_pool_size() -> usize { DEFAULT_POOL_SIZE }
fn default_batch_size() -> usize { DEFAULT_BATCH_SIZE }

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Find `mempool.toml` in the current directory or its parents
    pub fn discover() -> Self {
        let mut current = std::env::current_dir().ok();

        while let Some(dir) = current {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                if let Ok(config) = Self::load(&config_path) {
                    return config;
                }
            }
            current = dir.parent().map(|p| p.to_path_buf());
        }

        Self::default()
    }

    /// Reject sizes the engines cannot honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.arena.pool_size < MIN_POOL_SIZE {
            return Err(ConfigError::Invalid {
                field: "arena.pool_size",
                reason: format!("must be at least {} bytes", MIN_POOL_SIZE),
            });
        }
        if self.free_list.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "free_list.batch_size",
                reason: "must be at least 1".to_string(),
            });
        }
        // A refill of the largest class obtains twice the batch
        if MAX_BYTES
            .checked_mul(self.free_list.batch_size)
            .and_then(|batch_bytes| batch_bytes.checked_mul(2))
            .is_none()
        {
            return Err(ConfigError::Invalid {
                field: "free_list.batch_size",
                reason: "slab size overflows usize".to_string(),
            });
        }
        Ok(())
    }

    /// Generate default configuration file content
    pub fn generate_default() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate config"))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
