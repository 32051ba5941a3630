//! Error types shared by both engines and the configuration loader

use std::io;
use thiserror::Error;

/// Allocation and construction failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The raw heap could not supply a block
    #[error("heap exhausted while obtaining {requested} bytes")]
    HeapExhausted { requested: usize },

    /// A pool was requested with less room than its own bookkeeping needs
    #[error("pool size {requested} is below the minimum of {minimum} bytes")]
    PoolTooSmall { requested: usize, minimum: usize },

    /// The heap is exhausted and no out-of-memory handler is registered
    #[error("out of memory: {requested} bytes requested and no handler is set")]
    OutOfMemory { requested: usize },
}

/// Configuration loading failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}
