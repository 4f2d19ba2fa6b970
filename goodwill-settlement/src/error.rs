//! Error types for the settlement pipeline

use thiserror::Error;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] goodwill_ledger::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Background task failed or was aborted
    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Service already started or not running
    #[error("Service state: {0}")]
    State(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a retry with backoff may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Ledger(e) => e.is_transient(),
            Error::Io(_) => true,
            _ => false,
        }
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
    fn test_transient_follows_ledger() {
        let busy: Error = goodwill_ledger::Error::Storage("busy".to_string()).into();
        assert!(busy.is_transient());

        let missing: Error = goodwill_ledger::Error::WorkItemNotFound("x".to_string()).into();
        assert!(!missing.is_transient());
        assert!(!Error::Config("bad".to_string()).is_transient());
    }
}
