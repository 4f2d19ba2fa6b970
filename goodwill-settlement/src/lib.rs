//! Goodwill Settlement
//!
//! Scores submitted goodwill work and settles it exactly once into balances
//! and the ledger chain.
//!
//! # Pipeline
//!
//! 1. **Submission**: work items enter the queue as PENDING
//! 2. **Claiming**: workers claim batches with skip-locked semantics and a lease
//! 3. **Scoring**: description length times action multiplier, health and damping
//! 4. **Minting**: one atomic credit plus ledger entry per VERIFIED item
//! 5. **Sealing**: pooled mint transactions are mined into blocks
//!
//! # Example
//!
//! ```no_run
//! use goodwill_settlement::{Config, SettleOutcome, SettlementService};
//! use std::collections::BTreeMap;
//!
//! fn main() -> goodwill_settlement::Result<()> {
//!     let service = SettlementService::open(Config::default())?;
//!     service.open_account("alice", Some("addr-alice".to_string()))?;
//!
//!     let id = service.submit("alice", "donation", "gave blood", BTreeMap::new())?;
//!     match service.settle(id)? {
//!         SettleOutcome::Skipped { status } => println!("not verified yet: {}", status),
//!         other => println!("{:?}", other),
//!     }
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod minting;
pub mod queue;
pub mod retry;
pub mod scoring;
pub mod service;
pub mod worker;

// Re-exports
pub use config::{Config, MintMode};
pub use error::{Error, Result};
pub use minting::{IdentityMint, MintPolicy, MintingEngine, Reconciliation, SettleOutcome};
pub use queue::{Claim, ClaimQueue, ClaimSource};
pub use retry::{AlertHook, LogAlert, RetryConfig, RetryPolicy};
pub use scoring::{Scorer, Verdict};
pub use service::SettlementService;
pub use worker::{WorkerContext, WorkerPool};
