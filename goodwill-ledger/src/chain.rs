//! Append-only hash-linked block chain
//!
//! The chain is an internal single-writer audit log. Blocks are sealed from
//! the transaction pool with a proof-of-work search, validated against the
//! current head, and written together with the removal of their
//! transactions from the pool.
//!
//! # Example
//!
//! ```no_run
//! use goodwill_ledger::{chain::MineControl, Config, LedgerChain, Metrics, Storage};
//! use std::sync::Arc;
//!
//! fn main() -> goodwill_ledger::Result<()> {
//!     let config = Config::default();
//!     let storage = Arc::new(Storage::open(&config)?);
//!     let chain = LedgerChain::open(storage, config.chain.clone(), Metrics::default())?;
//!
//!     // Seal whatever the pool holds into the next block
//!     if let Some(block) = chain.seal_pending(&MineControl::new())? {
//!         println!("sealed block {} ({})", block.height, block.hash);
//!     }
//!     Ok(())
//! }
//! ```

use crate::{
    config::{ChainConfig, RecoveryPolicy},
    crypto::{meets_difficulty, BlockPreimage},
    error::{Error, Result},
    metrics::Metrics,
    registry::{NodeRegistry, Registration},
    storage::Storage,
    types::{
        Block, BlockSummary, ChainPage, ChainStatus, ChainTransaction, Node, Pagination,
        GENESIS_PREVIOUS_HASH,
    },
};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default page size for chain listings
pub const DEFAULT_PER_PAGE: u64 = 50;

/// Largest page a listing returns
pub const MAX_PER_PAGE: u64 = 100;

/// Nonces tried between cancellation checks
const CANCEL_CHECK_INTERVAL: u64 = 1024;

/// Cancellation flag and optional deadline for a mining search
#[derive(Debug, Clone, Default)]
pub struct MineControl {
    cancel: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl MineControl {
    /// Control that only stops when cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Control that also stops once `timeout` has elapsed
    pub fn with_deadline(timeout: Duration) -> Self {
        Self {
            cancel: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Share an existing cancellation flag
    pub fn with_flag(cancel: Arc<AtomicBool>, timeout: Option<Duration>) -> Self {
        Self {
            cancel,
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    /// Stop any search using this control
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Whether `cancel` was called
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn should_stop(&self) -> bool {
        self.is_cancelled() || self.deadline.map_or(false, |d| Instant::now() >= d)
    }
}

/// Block chain over [`Storage`]
#[derive(Debug)]
pub struct LedgerChain {
    storage: Arc<Storage>,
    config: ChainConfig,
    /// Serializes every chain mutation (genesis, recovery, append)
    writer: Mutex<()>,
    /// One pool seal at a time
    sealing: Mutex<()>,
    registry: NodeRegistry,
    metrics: Metrics,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn genesis_block() -> Result<Block> {
    let mut block = Block {
        height: 0,
        timestamp_ms: now_ms(),
        transactions: Vec::new(),
        previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
        nonce: 0,
        hash: String::new(),
    };
    block.hash = block.compute_hash()?;
    Ok(block)
}

impl LedgerChain {
    /// Open the chain: create genesis on an empty store, validate otherwise
    pub fn open(storage: Arc<Storage>, config: ChainConfig, metrics: Metrics) -> Result<Self> {
        let registry = NodeRegistry::load(Arc::clone(&storage))?;
        let chain = Self {
            storage,
            config,
            writer: Mutex::new(()),
            sealing: Mutex::new(()),
            registry,
            metrics,
        };
        chain.load()?;
        Ok(chain)
    }

    fn load(&self) -> Result<()> {
        let _writer = self.writer.lock();
        let blocks = self.storage.all_blocks()?;

        if blocks.is_empty() {
            let genesis = genesis_block()?;
            let mut uow = self.storage.begin();
            uow.put_block(&genesis)?;
            uow.commit()?;
            tracing::info!(hash = %genesis.hash, "Created genesis block");
            return Ok(());
        }

        let reason = match Self::check_chain(&blocks) {
            Ok(()) => {
                tracing::info!(height = blocks.len() - 1, "Chain loaded and valid");
                return Ok(());
            }
            Err(reason) => reason,
        };

        match self.config.recovery {
            RecoveryPolicy::Refuse => {
                tracing::error!(%reason, "Stored chain is invalid, refusing to start");
                Err(Error::ChainCorruption(reason))
            }
            RecoveryPolicy::RegenerateGenesis => {
                tracing::error!(
                    %reason,
                    quarantined = blocks.len(),
                    "Stored chain is invalid, quarantining blocks and regenerating genesis"
                );
                let generation = now_ms();
                let genesis = genesis_block()?;
                let mut uow = self.storage.begin();
                for block in &blocks {
                    uow.quarantine_block(block, generation)?;
                }
                uow.put_block(&genesis)?;
                uow.commit()?;
                Ok(())
            }
        }
    }

    /// Canonical SHA-256 hash of a block's contents
    pub fn hash(block: &Block) -> Result<String> {
        block.compute_hash()
    }

    /// Write the genesis block; fails if the chain already has blocks
    pub fn create_genesis(&self) -> Result<Block> {
        let _writer = self.writer.lock();
        if let Some(head) = self.storage.get_latest_block()? {
            return Err(Error::AlreadyExists(format!(
                "chain already has blocks up to height {}",
                head.height
            )));
        }
        let genesis = genesis_block()?;
        let mut uow = self.storage.begin();
        uow.put_block(&genesis)?;
        uow.commit()?;
        tracing::info!(hash = %genesis.hash, "Created genesis block");
        Ok(genesis)
    }

    /// Latest block
    pub fn head(&self) -> Result<Block> {
        self.storage
            .get_latest_block()?
            .ok_or_else(|| Error::ChainCorruption("chain has no blocks".to_string()))
    }

    /// Height the next block will take
    pub fn anticipated_height(&self) -> Result<u64> {
        Ok(self.head()?.height + 1)
    }

    /// Configured difficulty
    pub fn difficulty(&self) -> usize {
        self.config.difficulty
    }

    /// Chain configuration
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Underlying storage
    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Build a block on top of the head and search for a nonce meeting the
    /// difficulty. Blocking and CPU-bound; stops when `control` trips.
    pub fn mine(&self, pending: Vec<ChainTransaction>, control: &MineControl) -> Result<Block> {
        let head = self.head()?;
        let started = Instant::now();
        let difficulty = self.config.difficulty;

        let mut block = Block {
            height: head.height + 1,
            timestamp_ms: now_ms(),
            transactions: pending,
            previous_hash: head.hash,
            nonce: 0,
            hash: String::new(),
        };
        let mut preimage = BlockPreimage::new(&block)?;
        let mut nonce: u64 = 0;
        let mut attempts: u64 = 0;

        loop {
            if attempts % CANCEL_CHECK_INTERVAL == 0 && control.should_stop() {
                tracing::warn!(height = block.height, attempts, "Mining stopped before a solution");
                return Err(Error::MiningCancelled { attempts });
            }

            let hash = preimage.hash(nonce);
            attempts += 1;
            if meets_difficulty(&hash, difficulty) {
                block.nonce = nonce;
                block.hash = hash;
                break;
            }

            nonce = match nonce.checked_add(1) {
                Some(next) => next,
                None => {
                    // Nonce space exhausted: move the timestamp and start over
                    block.timestamp_ms = now_ms();
                    preimage = BlockPreimage::new(&block)?;
                    0
                }
            };
        }

        let elapsed = started.elapsed();
        self.metrics.record_mining_duration(elapsed.as_secs_f64());
        tracing::debug!(
            height = block.height,
            nonce = block.nonce,
            attempts,
            elapsed_ms = elapsed.as_millis() as u64,
            "Mined block"
        );

        Ok(block)
    }

    fn check_link(block: &Block, previous: &Block) -> std::result::Result<(), String> {
        if block.height != previous.height + 1 {
            return Err(format!(
                "height {} does not follow {}",
                block.height, previous.height
            ));
        }
        if block.previous_hash != previous.hash {
            return Err(format!(
                "previous hash {} does not match block {} hash {}",
                block.previous_hash, previous.height, previous.hash
            ));
        }
        Self::check_hash(block)
    }

    fn check_hash(block: &Block) -> std::result::Result<(), String> {
        match block.compute_hash() {
            Ok(hash) if hash == block.hash => Ok(()),
            Ok(hash) => Err(format!(
                "stored hash {} does not match contents {}",
                block.hash, hash
            )),
            Err(e) => Err(format!("cannot hash block: {}", e)),
        }
    }

    fn check_chain(chain: &[Block]) -> std::result::Result<(), String> {
        let genesis = chain
            .first()
            .ok_or_else(|| "chain is empty".to_string())?;
        if !genesis.is_genesis() {
            return Err(format!(
                "first block has height {} and previous hash {}",
                genesis.height, genesis.previous_hash
            ));
        }
        Self::check_hash(genesis).map_err(|reason| format!("genesis: {}", reason))?;

        for pair in chain.windows(2) {
            Self::check_link(&pair[1], &pair[0])
                .map_err(|reason| format!("block {}: {}", pair[1].height, reason))?;
        }
        Ok(())
    }

    /// Heights sequential, previous hash matches, stored hash recomputes
    pub fn validate_link(block: &Block, previous: &Block) -> bool {
        Self::check_link(block, previous).is_ok()
    }

    /// Genesis shape plus every adjacent link
    pub fn is_chain_valid(chain: &[Block]) -> bool {
        Self::check_chain(chain).is_ok()
    }

    /// Validate every stored block
    pub fn verify(&self) -> Result<bool> {
        Ok(Self::is_chain_valid(&self.storage.all_blocks()?))
    }

    /// Validate `block` against the head and the difficulty, then write it
    /// and drop its transactions from the pool in one batch
    pub fn append(&self, block: Block) -> Result<()> {
        let _writer = self.writer.lock();
        let head = self.head()?;

        let verdict = Self::check_link(&block, &head).and_then(|()| {
            if block.meets_difficulty(self.config.difficulty) {
                Ok(())
            } else {
                Err(format!(
                    "hash {} misses difficulty {}",
                    block.hash, self.config.difficulty
                ))
            }
        });

        if let Err(reason) = verdict {
            self.metrics.record_block_rejected();
            tracing::warn!(height = block.height, %reason, "Rejected block");
            return Err(Error::InvalidBlock {
                height: block.height,
                reason,
            });
        }

        let mut uow = self.storage.begin();
        uow.put_block(&block)?;
        for tx in &block.transactions {
            uow.remove_pool_transaction(tx)?;
        }
        uow.commit()?;

        self.metrics.record_block_appended();
        tracing::info!(
            height = block.height,
            hash = %block.hash,
            transactions = block.transactions.len(),
            "Appended block"
        );
        Ok(())
    }

    /// Mine and append the oldest pooled transactions; `None` if the pool is
    /// empty
    pub fn seal_pending(&self, control: &MineControl) -> Result<Option<Block>> {
        let _sealing = self.sealing.lock();
        let pending = self
            .storage
            .pool_transactions(self.config.max_block_transactions)?;
        if pending.is_empty() {
            return Ok(None);
        }

        let block = self.mine(pending, control)?;
        self.append(block.clone())?;
        Ok(Some(block))
    }

    /// One page of blocks, ascending by height (1-based pages)
    pub fn list_chain(&self, page: u64, per_page: u64) -> Result<ChainPage> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, MAX_PER_PAGE);
        let total = self.head()?.height + 1;
        let total_pages = (total + per_page - 1) / per_page;

        let from = (page - 1).saturating_mul(per_page);
        let to = from.saturating_add(per_page);
        let blocks = self
            .storage
            .blocks_range(from, to)?
            .into_iter()
            .map(|block| {
                let merkle_root = block.merkle_root();
                BlockSummary { block, merkle_root }
            })
            .collect();

        Ok(ChainPage {
            blocks,
            pagination: Pagination {
                page,
                per_page,
                total,
                total_pages,
            },
        })
    }

    /// Head, pool and leader summary
    pub fn status(&self) -> Result<ChainStatus> {
        let head = self.head()?;
        Ok(ChainStatus {
            height: head.height,
            head_hash: head.hash,
            pending_transactions: self.storage.pool_size()?,
            leader: self.registry.leader(),
            node_count: self.registry.len(),
        })
    }

    /// Register a node and re-elect
    pub fn register_node(&self, id: &str, address: &str) -> Result<Registration> {
        self.registry.register(id, address)
    }

    /// Re-run leader election
    pub fn elect_leader(&self) -> Option<String> {
        self.registry.elect_leader()
    }

    /// Current leader
    pub fn leader(&self) -> Option<String> {
        self.registry.leader()
    }

    /// Registered nodes
    pub fn nodes(&self) -> Vec<Node> {
        self.registry.nodes()
    }
}
