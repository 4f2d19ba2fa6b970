//! Configuration for the ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Chain configuration
    pub chain: ChainConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/goodwill"),
            service_name: "goodwill-ledger".to_string(),
            rocksdb: RocksDBConfig::default(),
            chain: ChainConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

/// What to do when the persisted chain fails validation on load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Quarantine the stored blocks and start over from a fresh genesis
    RegenerateGenesis,
    /// Fail startup with `Error::ChainCorruption`
    Refuse,
}

/// Chain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Required number of leading '0' hex characters in a mined block hash
    pub difficulty: usize,

    /// Recovery policy for a corrupt chain
    pub recovery: RecoveryPolicy,

    /// Maximum pool transactions sealed into one block
    pub max_block_transactions: usize,

    /// Interval between periodic pool sealing passes (milliseconds)
    pub seal_interval_ms: u64,

    /// Give up a single mining search after this long (milliseconds)
    pub mining_timeout_ms: Option<u64>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            difficulty: 4,
            recovery: RecoveryPolicy::RegenerateGenesis,
            max_block_transactions: 500,
            seal_interval_ms: 5_000,
            mining_timeout_ms: None,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `GOODWILL_*` environment variables
    pub fn apply_env(&mut self) -> crate::Result<()> {
        if let Ok(data_dir) = std::env::var("GOODWILL_DATA_DIR") {
            self.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(difficulty) = std::env::var("GOODWILL_DIFFICULTY") {
            self.chain.difficulty = difficulty
                .parse()
                .map_err(|_| crate::Error::Config(format!("Bad GOODWILL_DIFFICULTY: {}", difficulty)))?;
        }

        self.validate()
    }

    /// Reject settings the chain cannot work with
    pub fn validate(&self) -> crate::Result<()> {
        // A SHA-256 hex digest has 64 characters
        if self.chain.difficulty > 64 {
            return Err(crate::Error::Config(format!(
                "difficulty {} exceeds hash length",
                self.chain.difficulty
            )));
        }
        if self.chain.max_block_transactions == 0 {
            return Err(crate::Error::Config(
                "max_block_transactions must be positive".to_string(),
            ));
        }
        if self.chain.seal_interval_ms == 0 {
            return Err(crate::Error::Config(
                "seal_interval_ms must be positive".to_string(),
            ));
        }
        if self.chain.mining_timeout_ms == Some(0) {
            return Err(crate::Error::Config(
                "mining_timeout_ms must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}
