//! Configuration for the settlement pipeline

use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};

/// Settlement service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Emit logs as JSON lines
    pub log_json: bool,

    /// Ledger store and chain configuration
    pub ledger: goodwill_ledger::Config,

    /// Claim queue configuration
    pub queue: QueueConfig,

    /// Worker pool configuration
    pub workers: WorkerConfig,

    /// Scoring configuration
    pub scoring: ScoringConfig,

    /// Minting configuration
    pub minting: MintingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "goodwill-node".to_string(),
            log_json: false,
            ledger: goodwill_ledger::Config::default(),
            queue: QueueConfig::default(),
            workers: WorkerConfig::default(),
            scoring: ScoringConfig::default(),
            minting: MintingConfig::default(),
        }
    }
}

/// Longest accepted claim lease (one year)
pub const MAX_LEASE_SECS: u64 = 365 * 24 * 60 * 60;

/// Claim queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Items claimed per worker cycle
    pub batch_size: usize,

    /// Claim lease length in seconds
    pub lease_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            lease_secs: 300,
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent workers
    pub count: usize,

    /// Sleep after an empty claim (milliseconds)
    pub poll_interval_ms: u64,

    /// Settle each item right after it is verified
    pub auto_settle: bool,

    /// Retry policy for transient store errors
    pub retry: RetryConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            poll_interval_ms: 1_000,
            auto_settle: false,
            retry: RetryConfig::default(),
        }
    }
}

/// Scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Lower bound of the health factor
    pub health_min: f64,

    /// Upper bound of the health factor
    pub health_max: f64,

    /// Fixed damping factor
    pub damping: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            health_min: 0.9,
            health_max: 1.1,
            damping: 0.9,
        }
    }
}

impl ScoringConfig {
    /// Health 1.0, damping 1.0
    pub fn neutral() -> Self {
        Self {
            health_min: 1.0,
            health_max: 1.0,
            damping: 1.0,
        }
    }
}

/// When minted transactions are sealed into blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MintMode {
    /// Leave transactions in the pool for the periodic sealer
    Pool,
    /// Mine a block right after each settlement commits
    Immediate,
}

/// Minting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MintingConfig {
    /// Sender address recorded on every mint
    pub minter_address: String,

    /// Sealing mode
    pub mode: MintMode,
}

impl Default for MintingConfig {
    fn default() -> Self {
        Self {
            minter_address: "goodwill-minter".to_string(),
            mode: MintMode::Pool,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.apply_env()?;
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
        self.ledger.apply_env()?;

        if let Ok(workers) = std::env::var("GOODWILL_WORKERS") {
            self.workers.count = workers
                .parse()
                .map_err(|_| crate::Error::Config(format!("Bad GOODWILL_WORKERS: {}", workers)))?;
        }

        if let Ok(address) = std::env::var("GOODWILL_MINTER_ADDRESS") {
            self.minting.minter_address = address;
        }

        if let Ok(json) = std::env::var("GOODWILL_LOG_JSON") {
            self.log_json = matches!(json.as_str(), "1" | "true" | "yes");
        }

        self.validate()
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        self.ledger.validate()?;

        if self.workers.count == 0 {
            return Err(crate::Error::Config("workers.count must be positive".to_string()));
        }
        if self.queue.batch_size == 0 {
            return Err(crate::Error::Config("queue.batch_size must be positive".to_string()));
        }
        if self.queue.lease_secs == 0 || self.queue.lease_secs > MAX_LEASE_SECS {
            return Err(crate::Error::Config(format!(
                "queue.lease_secs must be in 1..={}, got {}",
                MAX_LEASE_SECS, self.queue.lease_secs
            )));
        }
        if self.workers.poll_interval_ms == 0 {
            return Err(crate::Error::Config(
                "workers.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.minting.minter_address.trim().is_empty() {
            return Err(crate::Error::Config(
                "minting.minter_address must be configured".to_string(),
            ));
        }

        let scoring = &self.scoring;
        if !(scoring.health_min > 0.0 && scoring.health_min <= scoring.health_max) {
            return Err(crate::Error::Config(format!(
                "health range [{}, {}] is empty or non-positive",
                scoring.health_min, scoring.health_max
            )));
        }
        if scoring.damping <= 0.0 {
            return Err(crate::Error::Config("scoring.damping must be positive".to_string()));
        }
        Ok(())
    }
}
