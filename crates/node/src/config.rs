//! Node configuration, loaded from TOML.

use plasma_chain::{MempoolConfig, CHILD_BLOCK_INTERVAL};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// What to do when the root chain rejects or fails a block submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SubmissionPolicy {
    /// Retry with exponential backoff. A block whose attempts are exhausted stays
    /// pending and is submitted again on the next production tick.
    Retry {
        max_attempts: u32,
        initial_backoff_ms: u64,
    },
    /// Stop the node on the first failure.
    Fatal,
}

impl Default for SubmissionPolicy {
    fn default() -> Self {
        SubmissionPolicy::Retry {
            max_attempts: 5,
            initial_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub listen: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: SocketAddr::from(([127, 0, 0, 1], 8545)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Wall-clock period between block production attempts.
    pub block_interval_ms: u64,
    pub child_block_interval: u64,
    /// Maximum transactions taken from the pool per child block.
    pub max_block_size: usize,
    /// Hex encoded secp256k1 secret. A fresh key is generated when absent.
    pub operator_private_key: Option<String>,
    // Tables must follow plain values when serialized to TOML.
    pub mempool: MempoolConfig,
    pub submission: SubmissionPolicy,
    pub api: ApiConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            block_interval_ms: 3000,
            child_block_interval: CHILD_BLOCK_INTERVAL,
            max_block_size: 1000,
            operator_private_key: None,
            mempool: MempoolConfig::default(),
            submission: SubmissionPolicy::default(),
            api: ApiConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_interval_ms == 0 {
            return Err(ConfigError::Invalid("block_interval_ms must be positive".into()));
        }
        if self.child_block_interval < 2 {
            return Err(ConfigError::Invalid(
                "child_block_interval must leave room for deposit blocks".into(),
            ));
        }
        if self.max_block_size == 0 {
            return Err(ConfigError::Invalid("max_block_size must be positive".into()));
        }
        if let SubmissionPolicy::Retry { max_attempts: 0, .. } = self.submission {
            return Err(ConfigError::Invalid("submission.max_attempts must be positive".into()));
        }
        Ok(())
    }

    pub fn block_interval(&self) -> Duration {
        Duration::from_millis(self.block_interval_ms)
    }
}
