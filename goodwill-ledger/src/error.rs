//! Error types for the goodwill ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Canonical JSON encoding error
    #[error("Canonical encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Block failed linkage, hash or difficulty validation
    #[error("Invalid block at height {height}: {reason}")]
    InvalidBlock {
        /// Height of the rejected block
        height: u64,
        /// Why it was rejected
        reason: String,
    },

    /// Persisted chain failed validation after load
    #[error("Chain corruption: {0}")]
    ChainCorruption(String),

    /// Proof-of-work search was cancelled or hit its deadline
    #[error("Mining cancelled after {attempts} attempts")]
    MiningCancelled {
        /// Nonces tried before stopping
        attempts: u64,
    },

    /// Work item not found
    #[error("Work item not found: {0}")]
    WorkItemNotFound(String),

    /// Account not found
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Block not found
    #[error("Block not found: {0}")]
    BlockNotFound(String),

    /// Illegal status transition or stale claim
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Rejected caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Account, node or entry already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Invariant violation (negative balance, ledger drift, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::Io(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Storage("busy".to_string()).is_transient());
        assert!(!Error::WorkItemNotFound("x".to_string()).is_transient());
        assert!(!Error::InvalidBlock {
            height: 3,
            reason: "bad hash".to_string()
        }
        .is_transient());
    }
}
