//! Core types for the goodwill ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode at rest, canonical JSON for hashing)
//! - Exact arithmetic (Decimal for balances and mint amounts)
//! - Monotonic lifecycles (status transitions only move forward)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::{Error, Result};

/// Previous-hash sentinel carried by the genesis block
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Token symbol recorded on minted ledger entries
pub const TOKEN_SYMBOL: &str = "LOVES";

/// Account identifier (the performer reference on work items)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Work item status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum WorkStatus {
    /// Submitted, waiting for a worker
    Pending = 1,
    /// Claimed by exactly one worker
    Processing = 2,
    /// Scored and eligible for minting
    Verified = 3,
    /// Terminal failure (scoring or settlement)
    Failed = 4,
    /// Minted and recorded in the ledger (terminal)
    IssuedOnChain = 5,
}

impl WorkStatus {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::Pending => "PENDING",
            WorkStatus::Processing => "PROCESSING",
            WorkStatus::Verified => "VERIFIED",
            WorkStatus::Failed => "FAILED",
            WorkStatus::IssuedOnChain => "ISSUED_ON_CHAIN",
        }
    }

    /// Whether `self -> next` is a legal lifecycle step.
    ///
    /// `Processing -> Pending` is only taken when a claim lease expires.
    pub fn can_transition_to(&self, next: WorkStatus) -> bool {
        use WorkStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Pending)
                | (Processing, Verified)
                | (Processing, Failed)
                | (Verified, Failed)
                | (Verified, IssuedOnChain)
        )
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of submitted goodwill work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique ID (UUIDv7, so the status index is submission-ordered)
    pub id: Uuid,

    /// Account credited on settlement
    pub performer: AccountId,

    /// Action type (drives the scoring multiplier)
    pub action_type: String,

    /// Free-text description
    pub description: String,

    /// Opaque submitter context
    #[serde(default)]
    pub contextual_data: BTreeMap<String, String>,

    /// Score in [0, 100], set when verified
    pub score: Option<u32>,

    /// Current status
    pub status: WorkStatus,

    /// Transaction hash of the mint; set at most once
    pub settlement_tx: Option<String>,

    /// Ownership token of the current claim
    pub claim_token: Option<Uuid>,

    /// When the current claim lapses
    pub lease_expires_at: Option<DateTime<Utc>>,

    /// Reason code for FAILED items
    pub failure_reason: Option<String>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    /// Build a new PENDING item
    pub fn new(
        performer: AccountId,
        action_type: impl Into<String>,
        description: impl Into<String>,
        contextual_data: BTreeMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            performer,
            action_type: action_type.into(),
            description: description.into(),
            contextual_data,
            score: None,
            status: WorkStatus::Pending,
            settlement_tx: None,
            claim_token: None,
            lease_expires_at: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, rejecting illegal steps
    pub fn transition(&mut self, next: WorkStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition(format!(
                "work item {}: {} -> {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Whether the mint marker has been written
    pub fn is_settled(&self) -> bool {
        self.settlement_tx.is_some() || self.status == WorkStatus::IssuedOnChain
    }

    /// Whether the claim has lapsed at `now`
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == WorkStatus::Processing
            && self.lease_expires_at.map_or(true, |expiry| expiry <= now)
    }
}

/// User account holding a minted balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Account ID
    pub id: AccountId,

    /// Current balance (never negative)
    pub balance: Decimal,

    /// Primary wallet address; required to receive mints
    pub primary_address: Option<String>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Open an empty account
    pub fn new(id: AccountId, primary_address: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            balance: Decimal::ZERO,
            primary_address,
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a non-negative amount to the balance
    pub fn credit(&mut self, amount: Decimal) -> Result<()> {
        if amount.is_sign_negative() {
            return Err(Error::InvariantViolation(format!(
                "negative credit {} to account {}",
                amount, self.id
            )));
        }
        self.balance += amount;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Ledger entry transaction type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    /// Tokens minted for a verified work item
    MintGoodwill,
}

/// Ledger entry status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum EntryStatus {
    /// Balance credited and recorded
    Confirmed,
}

/// Permanent record of one settlement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique transaction hash
    pub tx_hash: String,

    /// Settled work item (one entry per item)
    pub work_item_id: Uuid,

    /// Transaction type
    pub transaction_type: TransactionType,

    /// Minted amount
    pub amount: Decimal,

    /// Token symbol
    pub token_symbol: String,

    /// Minter address
    pub sender_address: String,

    /// Receiver primary address
    pub receiver_address: String,

    /// Credited account
    pub receiver_account: AccountId,

    /// Block expected to include the transaction
    pub block_height: u64,

    /// Settlement timestamp
    pub timestamp: DateTime<Utc>,

    /// Status
    pub status: EntryStatus,
}

/// Transaction as carried in the pool and in blocks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTransaction {
    /// Transaction hash (matches the ledger entry)
    pub tx_hash: String,

    /// Settled work item
    pub work_item_id: Uuid,

    /// Sender address
    pub sender: String,

    /// Receiver address
    pub receiver: String,

    /// Amount (serialized as a string for stable hashing)
    pub amount: Decimal,

    /// Creation time (milliseconds since Unix epoch)
    pub timestamp_ms: i64,
}

impl ChainTransaction {
    /// Key in the pool column family: time-ordered, unique per hash
    pub fn pool_key(&self) -> Vec<u8> {
        let mut key = self.timestamp_ms.to_be_bytes().to_vec();
        key.extend_from_slice(self.tx_hash.as_bytes());
        key
    }
}

/// A hash-linked batch of transactions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block height (0 = genesis)
    pub height: u64,

    /// Creation time (milliseconds since Unix epoch)
    pub timestamp_ms: i64,

    /// Ordered transactions
    pub transactions: Vec<ChainTransaction>,

    /// Hash of the previous block
    pub previous_hash: String,

    /// Proof-of-work nonce
    pub nonce: u64,

    /// Hash of this block's contents
    pub hash: String,
}

impl Block {
    /// Recompute the canonical hash from the block's contents
    pub fn compute_hash(&self) -> Result<String> {
        crate::crypto::hash_block(self)
    }

    /// Hash has `difficulty` leading '0' hex characters
    pub fn meets_difficulty(&self, difficulty: usize) -> bool {
        crate::crypto::meets_difficulty(&self.hash, difficulty)
    }

    /// Merkle root over the transaction hashes (hex)
    pub fn merkle_root(&self) -> String {
        let leaves: Vec<[u8; 32]> = self
            .transactions
            .iter()
            .map(|tx| crate::crypto::hash_bytes(tx.tx_hash.as_bytes()))
            .collect();
        hex::encode(crate::crypto::merkle_root(&leaves))
    }

    /// Genesis shape: height 0 with the sentinel previous hash
    pub fn is_genesis(&self) -> bool {
        self.height == 0 && self.previous_hash == GENESIS_PREVIOUS_HASH
    }
}

/// Registered chain node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node ID
    pub id: String,

    /// Unique network address
    pub address: String,

    /// Registration time
    pub registered_at: DateTime<Utc>,
}

/// Page metadata for chain listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// 1-based page number
    pub page: u64,
    /// Blocks per page
    pub per_page: u64,
    /// Total blocks in the chain
    pub total: u64,
    /// Total pages
    pub total_pages: u64,
}

/// Block as listed for audit dashboards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSummary {
    /// The block
    #[serde(flatten)]
    pub block: Block,
    /// Merkle root of its transactions
    pub merkle_root: String,
}

/// One page of the chain, ascending by height
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainPage {
    /// Blocks on this page
    pub blocks: Vec<BlockSummary>,
    /// Page metadata
    pub pagination: Pagination,
}

/// Chain health snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStatus {
    /// Head height
    pub height: u64,
    /// Head hash
    pub head_hash: String,
    /// Transactions waiting in the pool
    pub pending_transactions: usize,
    /// Elected leader
    pub leader: Option<String>,
    /// Registered node count
    pub node_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_are_monotonic() {
        use WorkStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Verified));
        assert!(Verified.can_transition_to(IssuedOnChain));
        assert!(!Verified.can_transition_to(Pending));
        assert!(!IssuedOnChain.can_transition_to(Verified));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Verified));
    }

    #[test]
    fn test_work_item_transition_rejects_skip() {
        let mut item = WorkItem::new(
            AccountId::new("alice"),
            "volunteering",
            "helped at the food bank",
            BTreeMap::new(),
        );
        assert_eq!(item.status, WorkStatus::Pending);
        assert!(item.transition(WorkStatus::IssuedOnChain).is_err());
        assert_eq!(item.status, WorkStatus::Pending);

        item.transition(WorkStatus::Processing).unwrap();
        item.transition(WorkStatus::Verified).unwrap();
        assert!(!item.is_settled());
    }

    #[test]
    fn test_account_rejects_negative_credit() {
        let mut account = Account::new(AccountId::new("bob"), Some("addr-bob".to_string()));
        account.credit(Decimal::new(1650, 2)).unwrap();
        assert_eq!(account.balance, Decimal::new(1650, 2));
        assert!(account.credit(Decimal::new(-1, 0)).is_err());
        assert_eq!(account.balance, Decimal::new(1650, 2));
    }

    #[test]
    fn test_lease_expired_without_expiry() {
        let mut item = WorkItem::new(AccountId::new("c"), "donation", "gave", BTreeMap::new());
        assert!(!item.lease_expired(Utc::now()));
        item.status = WorkStatus::Processing;
        assert!(item.lease_expired(Utc::now()));
        item.lease_expires_at = Some(Utc::now() + chrono::Duration::seconds(60));
        assert!(!item.lease_expired(Utc::now()));
    }
}
