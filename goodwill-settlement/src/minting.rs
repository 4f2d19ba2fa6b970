//! Minting engine
//!
//! Turns a VERIFIED work item into exactly one balance credit and one ledger
//! entry. Under the item and account row locks, one batch writes the credit,
//! the ledger entry, the pool transaction and the ISSUED_ON_CHAIN flip. Any
//! error before the commit leaves the store untouched.

use crate::config::{MintMode, MintingConfig};
use crate::error::Result;
use chrono::Utc;
use goodwill_ledger::{
    crypto::new_tx_hash, types::TOKEN_SYMBOL, Account, AccountId, ChainTransaction, EntryStatus,
    Error as LedgerError, LedgerChain, LedgerEntry, Metrics, MineControl, Storage,
    TransactionType, UnitOfWork, WorkItem, WorkStatus,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Performer has no account
pub const REASON_USER_NOT_FOUND: &str = "FAILED_USER_NOT_FOUND";

/// Performer's account has no primary address
pub const REASON_WALLET_MISSING: &str = "FAILED_WALLET_MISSING";

/// Converts a score into a mint amount
pub trait MintPolicy: Send + Sync + Debug {
    /// Amount minted for `score`; must not be negative
    fn amount(&self, score: u32) -> Decimal;
}

/// One token per score point
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityMint;

impl MintPolicy for IdentityMint {
    fn amount(&self, score: u32) -> Decimal {
        Decimal::from(score)
    }
}

/// Result of `settle`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettleOutcome {
    /// Balance credited and ledger entry written
    Settled {
        /// Mint transaction hash
        tx_hash: String,
        /// Amount credited
        amount: Decimal,
        /// Block expected to include the transaction
        block_height: u64,
    },
    /// Item was settled before; nothing changed
    AlreadySettled {
        /// Transaction hash of the earlier settlement
        tx_hash: Option<String>,
    },
    /// Item is not VERIFIED; nothing changed
    Skipped {
        /// Status found
        status: WorkStatus,
    },
    /// Item moved to FAILED
    Failed {
        /// Reason code recorded on the item
        reason: String,
    },
}

impl SettleOutcome {
    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            SettleOutcome::Settled { .. } => "settled",
            SettleOutcome::AlreadySettled { .. } => "already_settled",
            SettleOutcome::Skipped { .. } => "skipped",
            SettleOutcome::Failed { .. } => "failed",
        }
    }
}

/// Balance versus ledger comparison for one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    /// Account checked
    pub account: AccountId,
    /// Stored balance
    pub balance: Decimal,
    /// Sum of ledger entries crediting the account
    pub ledger_total: Decimal,
    /// Number of ledger entries
    pub entries: usize,
}

impl Reconciliation {
    /// Balance equals the ledger sum
    pub fn is_consistent(&self) -> bool {
        self.balance == self.ledger_total
    }
}

/// Minting engine
#[derive(Debug)]
pub struct MintingEngine {
    storage: Arc<Storage>,
    chain: Arc<LedgerChain>,
    policy: Arc<dyn MintPolicy>,
    config: MintingConfig,
    metrics: Metrics,
    /// Stops immediate-mode sealing on shutdown
    mining_cancel: Arc<AtomicBool>,
}

impl MintingEngine {
    /// Create an engine; `mining_cancel` aborts immediate-mode sealing
    pub fn new(
        chain: Arc<LedgerChain>,
        policy: Arc<dyn MintPolicy>,
        config: MintingConfig,
        metrics: Metrics,
        mining_cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            storage: Arc::clone(chain.storage()),
            chain,
            policy,
            config,
            metrics,
            mining_cancel,
        }
    }

    /// Settle one work item
    pub fn settle(&self, id: Uuid) -> Result<SettleOutcome> {
        let outcome = self.settle_locked(id)?;
        self.metrics.record_settlement(outcome.label());

        if self.config.mode == MintMode::Immediate {
            if let SettleOutcome::Settled { .. } = outcome {
                self.seal_now();
            }
        }
        Ok(outcome)
    }

    fn settle_locked(&self, id: Uuid) -> Result<SettleOutcome> {
        let mut uow = self.storage.begin();
        uow.lock_work_item(id);
        let mut item = self.storage.work_item(id)?;

        if item.is_settled() {
            tracing::debug!(item_id = %id, "Work item already settled");
            return Ok(SettleOutcome::AlreadySettled {
                tx_hash: item.settlement_tx,
            });
        }
        if let Some(entry) = self.storage.ledger_entry_for_work_item(id)? {
            tracing::warn!(item_id = %id, tx_hash = %entry.tx_hash, "Ledger entry exists without settlement marker");
            return Ok(SettleOutcome::AlreadySettled {
                tx_hash: Some(entry.tx_hash),
            });
        }
        if item.status != WorkStatus::Verified {
            tracing::debug!(item_id = %id, status = %item.status, "Skipping unverified work item");
            return Ok(SettleOutcome::Skipped {
                status: item.status,
            });
        }

        uow.lock_account(&item.performer);
        let mut account = match self.storage.get_account(&item.performer)? {
            Some(account) => account,
            None => return self.fail_item(uow, item, REASON_USER_NOT_FOUND),
        };
        let receiver = match account.primary_address.as_deref().map(str::trim) {
            Some(address) if !address.is_empty() => address.to_string(),
            _ => return self.fail_item(uow, item, REASON_WALLET_MISSING),
        };

        let score = item.score.ok_or_else(|| {
            LedgerError::InvariantViolation(format!("verified work item {} has no score", id))
        })?;
        let amount = self.policy.amount(score);
        if amount.is_sign_negative() {
            return Err(LedgerError::InvariantViolation(format!(
                "mint policy produced negative amount {} for score {}",
                amount, score
            ))
            .into());
        }

        let tx_hash = new_tx_hash();
        let now = Utc::now();
        let block_height = self.chain.anticipated_height()?;

        let transaction = ChainTransaction {
            tx_hash: tx_hash.clone(),
            work_item_id: id,
            sender: self.config.minter_address.clone(),
            receiver: receiver.clone(),
            amount,
            timestamp_ms: now.timestamp_millis(),
        };
        let entry = LedgerEntry {
            tx_hash: tx_hash.clone(),
            work_item_id: id,
            transaction_type: TransactionType::MintGoodwill,
            amount,
            token_symbol: TOKEN_SYMBOL.to_string(),
            sender_address: self.config.minter_address.clone(),
            receiver_address: receiver,
            receiver_account: account.id.clone(),
            block_height,
            timestamp: now,
            status: EntryStatus::Confirmed,
        };

        account.credit(amount)?;
        item.transition(WorkStatus::IssuedOnChain)?;
        item.settlement_tx = Some(tx_hash.clone());

        uow.put_account(&account)?;
        uow.put_ledger_entry(&entry)?;
        uow.put_pool_transaction(&transaction)?;
        uow.put_work_item(&item, Some(WorkStatus::Verified))?;
        uow.commit()?;

        tracing::info!(
            item_id = %id,
            account = %account.id,
            %amount,
            %tx_hash,
            block_height,
            "Minted goodwill"
        );

        Ok(SettleOutcome::Settled {
            tx_hash,
            amount,
            block_height,
        })
    }

    fn fail_item(
        &self,
        mut uow: UnitOfWork<'_>,
        mut item: WorkItem,
        reason: &str,
    ) -> Result<SettleOutcome> {
        item.transition(WorkStatus::Failed)?;
        item.failure_reason = Some(reason.to_string());
        uow.put_work_item(&item, Some(WorkStatus::Verified))?;
        uow.commit()?;

        tracing::warn!(item_id = %item.id, performer = %item.performer, reason, "Settlement failed");
        Ok(SettleOutcome::Failed {
            reason: reason.to_string(),
        })
    }

    fn seal_now(&self) {
        let timeout = self.chain.config().mining_timeout_ms.map(Duration::from_millis);
        let control = MineControl::with_flag(Arc::clone(&self.mining_cancel), timeout);
        match self.chain.seal_pending(&control) {
            Ok(Some(block)) => {
                tracing::debug!(height = block.height, "Sealed block after settlement")
            }
            Ok(None) => {}
            // Transactions stay pooled for the periodic sealer
            Err(e) => tracing::warn!(error = %e, "Immediate sealing failed"),
        }
    }

    /// Settle up to `limit` VERIFIED items, oldest first
    pub fn settle_verified(&self, limit: usize) -> Result<Vec<(Uuid, SettleOutcome)>> {
        let ids = self
            .storage
            .work_ids_with_status(WorkStatus::Verified, limit)?;
        ids.into_iter()
            .map(|id| self.settle(id).map(|outcome| (id, outcome)))
            .collect()
    }

    /// Open an account; fails if it exists
    pub fn open_account(&self, id: AccountId, primary_address: Option<String>) -> Result<Account> {
        if id.as_str().trim().is_empty() {
            return Err(LedgerError::InvalidInput("account id must be non-empty".to_string()).into());
        }

        let mut uow = self.storage.begin();
        uow.lock_account(&id);
        if self.storage.get_account(&id)?.is_some() {
            return Err(LedgerError::AlreadyExists(format!("account {}", id)).into());
        }
        let account = Account::new(id, primary_address);
        uow.put_account(&account)?;
        uow.commit()?;

        tracing::info!(account = %account.id, has_address = account.primary_address.is_some(), "Account opened");
        Ok(account)
    }

    /// Set or replace an account's primary address
    pub fn set_primary_address(&self, id: &AccountId, address: String) -> Result<Account> {
        let mut uow = self.storage.begin();
        uow.lock_account(id);
        let mut account = self
            .storage
            .get_account(id)?
            .ok_or_else(|| LedgerError::AccountNotFound(id.to_string()))?;
        account.primary_address = Some(address);
        account.updated_at = Utc::now();
        uow.put_account(&account)?;
        uow.commit()?;
        Ok(account)
    }

    /// Fetch an account
    pub fn account(&self, id: &AccountId) -> Result<Account> {
        Ok(self
            .storage
            .get_account(id)?
            .ok_or_else(|| LedgerError::AccountNotFound(id.to_string()))?)
    }

    /// Compare an account's balance with its ledger entries
    pub fn reconcile(&self, id: &AccountId) -> Result<Reconciliation> {
        // Hold the account row so no settlement commits between the reads
        let mut uow = self.storage.begin();
        uow.lock_account(id);
        let account = self.account(id)?;
        let entries = self.storage.ledger_entries_for_account(id)?;
        drop(uow);

        let reconciliation = Reconciliation {
            account: account.id,
            balance: account.balance,
            ledger_total: entries.iter().map(|e| e.amount).sum(),
            entries: entries.len(),
        };
        if !reconciliation.is_consistent() {
            tracing::error!(
                account = %reconciliation.account,
                balance = %reconciliation.balance,
                ledger_total = %reconciliation.ledger_total,
                "Balance does not match ledger"
            );
        }
        Ok(reconciliation)
    }

    /// Reconcile every account; returns the inconsistent ones
    pub fn audit_all(&self) -> Result<Vec<Reconciliation>> {
        let mut mismatches = Vec::new();
        for account in self.storage.all_accounts()? {
            let reconciliation = self.reconcile(&account.id)?;
            if !reconciliation.is_consistent() {
                mismatches.push(reconciliation);
            }
        }
        tracing::info!(mismatches = mismatches.len(), "Ledger audit finished");
        Ok(mismatches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use goodwill_ledger::Config;
    use std::collections::BTreeMap;

    struct Fixture {
        _dir: tempfile::TempDir,
        chain: Arc<LedgerChain>,
        engine: MintingEngine,
    }

    fn fixture(mode: MintMode) -> Fixture {
        fixture_with(mode, 1, Arc::new(AtomicBool::new(false)))
    }

    fn fixture_with(mode: MintMode, difficulty: usize, mining_cancel: Arc<AtomicBool>) -> Fixture {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.chain.difficulty = difficulty;
        let metrics = Metrics::new().unwrap();
        let storage = Arc::new(Storage::open(&config).unwrap());
        let chain = Arc::new(LedgerChain::open(storage, config.chain, metrics.clone()).unwrap());
        let engine = MintingEngine::new(
            Arc::clone(&chain),
            Arc::new(IdentityMint),
            MintingConfig {
                minter_address: "0xMINTER".to_string(),
                mode,
            },
            metrics,
            mining_cancel,
        );
        Fixture {
            _dir: temp_dir,
            chain,
            engine,
        }
    }

    /// Write an item straight into `status` with `score`
    fn seed_item(fx: &Fixture, performer: &str, status: WorkStatus, score: u32) -> Uuid {
        let mut item = WorkItem::new(
            AccountId::new(performer),
            "community_service",
            "served meals",
            BTreeMap::new(),
        );
        item.status = status;
        item.score = Some(score);
        let mut uow = fx.chain.storage().begin();
        uow.put_work_item(&item, None).unwrap();
        uow.commit().unwrap();
        item.id
    }

    #[test]
    fn test_settle_credits_once() {
        let fx = fixture(MintMode::Pool);
        let alice = AccountId::new("alice");
        fx.engine
            .open_account(alice.clone(), Some("addr-alice".to_string()))
            .unwrap();
        let id = seed_item(&fx, "alice", WorkStatus::Verified, 16);

        let first = fx.engine.settle(id).unwrap();
        let tx_hash = match &first {
            SettleOutcome::Settled {
                tx_hash,
                amount,
                block_height,
            } => {
                assert_eq!(*amount, Decimal::from(16));
                assert_eq!(*block_height, 1);
                tx_hash.clone()
            }
            other => panic!("unexpected {:?}", other),
        };

        assert_eq!(
            fx.engine.settle(id).unwrap(),
            SettleOutcome::AlreadySettled {
                tx_hash: Some(tx_hash.clone())
            }
        );

        assert_eq!(fx.engine.account(&alice).unwrap().balance, Decimal::from(16));
        let entries = fx.chain.storage().ledger_entries_for_account(&alice).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tx_hash, tx_hash);
        assert_eq!(entries[0].sender_address, "0xMINTER");
        assert_eq!(entries[0].token_symbol, "LOVES");

        let item = fx.chain.storage().work_item(id).unwrap();
        assert_eq!(item.status, WorkStatus::IssuedOnChain);
        assert_eq!(item.settlement_tx, Some(tx_hash));
        assert_eq!(fx.chain.storage().pool_size().unwrap(), 1);
        assert!(fx.engine.reconcile(&alice).unwrap().is_consistent());
    }

    #[test]
    fn test_unverified_items_skipped() {
        let fx = fixture(MintMode::Pool);
        fx.engine
            .open_account(AccountId::new("bob"), Some("addr-bob".to_string()))
            .unwrap();
        let id = seed_item(&fx, "bob", WorkStatus::Pending, 0);

        assert_eq!(
            fx.engine.settle(id).unwrap(),
            SettleOutcome::Skipped {
                status: WorkStatus::Pending
            }
        );
        assert_eq!(fx.chain.storage().work_item(id).unwrap().status, WorkStatus::Pending);
    }

    #[test]
    fn test_missing_account_fails_item() {
        let fx = fixture(MintMode::Pool);
        let id = seed_item(&fx, "ghost", WorkStatus::Verified, 30);

        assert_eq!(
            fx.engine.settle(id).unwrap(),
            SettleOutcome::Failed {
                reason: REASON_USER_NOT_FOUND.to_string()
            }
        );
        let item = fx.chain.storage().work_item(id).unwrap();
        assert_eq!(item.status, WorkStatus::Failed);
        assert_eq!(item.failure_reason.as_deref(), Some(REASON_USER_NOT_FOUND));
        assert!(fx.chain.storage().all_accounts().unwrap().is_empty());
    }

    #[test]
    fn test_missing_wallet_fails_item() {
        let fx = fixture(MintMode::Pool);
        let carol = AccountId::new("carol");
        fx.engine.open_account(carol.clone(), None).unwrap();
        let id = seed_item(&fx, "carol", WorkStatus::Verified, 30);

        assert_eq!(
            fx.engine.settle(id).unwrap(),
            SettleOutcome::Failed {
                reason: REASON_WALLET_MISSING.to_string()
            }
        );
        assert_eq!(fx.engine.account(&carol).unwrap().balance, Decimal::ZERO);
        assert_eq!(fx.chain.storage().pool_size().unwrap(), 0);
    }

    #[test]
    fn test_unknown_item_is_error() {
        let fx = fixture(MintMode::Pool);
        assert!(matches!(
            fx.engine.settle(Uuid::now_v7()),
            Err(crate::Error::Ledger(LedgerError::WorkItemNotFound(_)))
        ));
    }

    #[test]
    fn test_immediate_mode_seals_block() {
        let fx = fixture(MintMode::Immediate);
        fx.engine
            .open_account(AccountId::new("dave"), Some("addr-dave".to_string()))
            .unwrap();
        let id = seed_item(&fx, "dave", WorkStatus::Verified, 5);

        fx.engine.settle(id).unwrap();

        let head = fx.chain.head().unwrap();
        assert_eq!(head.height, 1);
        assert_eq!(head.transactions.len(), 1);
        assert_eq!(head.transactions[0].work_item_id, id);
        assert_eq!(fx.chain.storage().pool_size().unwrap(), 0);
    }

    #[test]
    fn test_cancelled_immediate_seal_leaves_tx_pooled() {
        let cancel = Arc::new(AtomicBool::new(false));
        // Unreachable difficulty: only the flag can end the search
        let fx = fixture_with(MintMode::Immediate, 64, Arc::clone(&cancel));
        fx.engine
            .open_account(AccountId::new("gil"), Some("addr-gil".to_string()))
            .unwrap();
        let id = seed_item(&fx, "gil", WorkStatus::Verified, 7);

        cancel.store(true, std::sync::atomic::Ordering::Relaxed);
        let outcome = fx.engine.settle(id).unwrap();

        assert_eq!(outcome.label(), "settled");
        assert_eq!(fx.chain.head().unwrap().height, 0);
        assert_eq!(fx.chain.storage().pool_size().unwrap(), 1);
        assert!(fx.engine.reconcile(&AccountId::new("gil")).unwrap().is_consistent());
    }

    #[test]
    fn test_audit_flags_drift() {
        let fx = fixture(MintMode::Pool);
        let erin = AccountId::new("erin");
        fx.engine
            .open_account(erin.clone(), Some("addr-erin".to_string()))
            .unwrap();
        let id = seed_item(&fx, "erin", WorkStatus::Verified, 12);
        fx.engine.settle(id).unwrap();
        assert!(fx.engine.audit_all().unwrap().is_empty());

        // Credit outside the minting path
        let mut account = fx.engine.account(&erin).unwrap();
        account.balance += Decimal::ONE;
        let mut uow = fx.chain.storage().begin();
        uow.put_account(&account).unwrap();
        uow.commit().unwrap();

        let mismatches = fx.engine.audit_all().unwrap();
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].ledger_total, Decimal::from(12));
        assert_eq!(mismatches[0].balance, Decimal::from(13));
    }

    #[test]
    fn test_duplicate_account_rejected() {
        let fx = fixture(MintMode::Pool);
        fx.engine.open_account(AccountId::new("f"), None).unwrap();
        assert!(fx.engine.open_account(AccountId::new("f"), None).is_err());
    }
}
