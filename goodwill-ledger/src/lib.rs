//! Goodwill Ledger
//!
//! Durable state for the goodwill settlement rail: work items, accounts,
//! ledger entries and a hash-linked block chain, all in one RocksDB store.
//!
//! # Architecture
//!
//! - **Unit of Work**: every mutation is one `WriteBatch` guarded by row locks
//! - **Single Writer Chain**: block appends are serialized and validated
//!   against the head before anything is written
//! - **Proof of Work**: blocks carry a nonce whose hash meets a difficulty
//! - **Canonical Hashing**: block identity is SHA-256 over key-sorted JSON
//!
//! # Invariants
//!
//! - Balances never go negative
//! - One ledger entry per settled work item
//! - Ledger entries and accounts are never deleted; blocks only move to
//!   quarantine during recovery
//! - Every adjacent pair of blocks links by height and hash

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod locks;
pub mod metrics;
pub mod registry;
pub mod storage;
pub mod types;

// Re-exports
pub use chain::{LedgerChain, MineControl};
pub use config::{ChainConfig, Config, RecoveryPolicy};
pub use error::{Error, Result};
pub use metrics::Metrics;
pub use registry::{ConflictReason, Registration};
pub use storage::{Storage, UnitOfWork};
pub use types::{
    Account, AccountId, Block, ChainPage, ChainStatus, ChainTransaction, EntryStatus, LedgerEntry,
    Node, TransactionType, WorkItem, WorkStatus,
};
