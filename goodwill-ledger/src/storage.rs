//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `work_items` - Work items (key: item id)
//! - `accounts` - Account balances (key: account id)
//! - `ledger_entries` - Settlement records (key: tx hash)
//! - `blocks` - Chain blocks (key: height, big-endian)
//! - `tx_pool` - Transactions awaiting a block (key: timestamp || tx hash)
//! - `nodes` - Node registry (`id:` and `addr:` keys)
//! - `indices` - Secondary indices (status, work item -> entry, account -> entries)
//! - `quarantine` - Blocks moved aside by chain recovery
//!
//! Every mutation goes through a [`UnitOfWork`]: a `WriteBatch` plus the row
//! locks it holds. Nothing is visible until [`UnitOfWork::commit`]; dropping
//! the unit discards the batch and releases the locks.

use crate::{
    error::{Error, Result},
    locks::{RowGuard, RowLocks},
    types::{Account, AccountId, Block, ChainTransaction, LedgerEntry, Node, WorkItem, WorkStatus},
    Config,
};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode,
    Options, WriteBatch, DB,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_WORK_ITEMS: &str = "work_items";
const CF_ACCOUNTS: &str = "accounts";
const CF_LEDGER: &str = "ledger_entries";
const CF_BLOCKS: &str = "blocks";
const CF_POOL: &str = "tx_pool";
const CF_NODES: &str = "nodes";
const CF_INDICES: &str = "indices";
const CF_QUARANTINE: &str = "quarantine";

const ALL_CFS: [&str; 8] = [
    CF_WORK_ITEMS,
    CF_ACCOUNTS,
    CF_LEDGER,
    CF_BLOCKS,
    CF_POOL,
    CF_NODES,
    CF_INDICES,
    CF_QUARANTINE,
];

/// Index key prefixes
const IDX_STATUS: u8 = b's';
const IDX_WORK_ENTRY: u8 = b'w';
const IDX_ACCOUNT_ENTRY: u8 = b'a';

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
    locks: Arc<RowLocks>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .field("locks", &self.locks)
            .finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        db_opts.set_compaction_style(DBCompactionStyle::Level);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name)))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(
            path = ?path,
            column_families = ALL_CFS.len(),
            "Opened RocksDB"
        );

        Ok(Self {
            db: Arc::new(db),
            locks: RowLocks::new(),
        })
    }

    fn cf_options(name: &str) -> Options {
        let mut opts = Options::default();
        match name {
            CF_BLOCKS | CF_LEDGER | CF_QUARANTINE => {
                opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
            }
            CF_INDICES => {
                opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                let mut block_opts = rocksdb::BlockBasedOptions::default();
                block_opts.set_bloom_filter(10.0, false);
                opts.set_block_based_table_factory(&block_opts);
            }
            _ => {
                opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
            }
        }
        opts
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn get_value<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(&cf, key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Scan keys starting with `prefix`, up to `limit` entries
    fn scan_prefix(
        &self,
        cf_name: &str,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let cf = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut out = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) || out.len() >= limit {
                break;
            }
            out.push((key, value));
        }
        Ok(out)
    }

    /// Begin a unit of work
    pub fn begin(&self) -> UnitOfWork<'_> {
        UnitOfWork {
            storage: self,
            batch: WriteBatch::default(),
            guards: Vec::new(),
        }
    }

    /// Row lock table shared by all units of work
    pub fn locks(&self) -> &Arc<RowLocks> {
        &self.locks
    }

    // Work item operations

    /// Get work item by ID
    pub fn get_work_item(&self, id: Uuid) -> Result<Option<WorkItem>> {
        self.get_value(CF_WORK_ITEMS, id.as_bytes())
    }

    /// Get work item by ID, failing if absent
    pub fn work_item(&self, id: Uuid) -> Result<WorkItem> {
        self.get_work_item(id)?
            .ok_or_else(|| Error::WorkItemNotFound(id.to_string()))
    }

    /// IDs of items in `status`, oldest first
    pub fn work_ids_with_status(&self, status: WorkStatus, limit: usize) -> Result<Vec<Uuid>> {
        let prefix = [IDX_STATUS, status as u8];
        let rows = self.scan_prefix(CF_INDICES, &prefix, limit)?;
        rows.iter()
            .map(|(key, _)| -> Result<Uuid> {
                let id_bytes: [u8; 16] = key[2..]
                    .try_into()
                    .map_err(|_| Error::Storage("Malformed status index key".to_string()))?;
                Ok(Uuid::from_bytes(id_bytes))
            })
            .collect()
    }

    /// Number of items in `status`
    pub fn count_with_status(&self, status: WorkStatus) -> Result<usize> {
        Ok(self.work_ids_with_status(status, usize::MAX)?.len())
    }

    // Account operations

    /// Get account by ID
    pub fn get_account(&self, id: &AccountId) -> Result<Option<Account>> {
        self.get_value(CF_ACCOUNTS, id.as_str().as_bytes())
    }

    /// All accounts
    pub fn all_accounts(&self) -> Result<Vec<Account>> {
        self.scan_prefix(CF_ACCOUNTS, &[], usize::MAX)?
            .iter()
            .map(|(_, value)| bincode::deserialize(value).map_err(Error::from))
            .collect()
    }

    // Ledger entry operations

    /// Get ledger entry by transaction hash
    pub fn get_ledger_entry(&self, tx_hash: &str) -> Result<Option<LedgerEntry>> {
        self.get_value(CF_LEDGER, tx_hash.as_bytes())
    }

    /// Ledger entry for a work item, if it was settled
    pub fn ledger_entry_for_work_item(&self, id: Uuid) -> Result<Option<LedgerEntry>> {
        let cf = self.cf(CF_INDICES)?;
        match self.db.get_cf(&cf, index_key_work_entry(id))? {
            Some(tx_hash) => {
                let tx_hash = String::from_utf8(tx_hash)
                    .map_err(|_| Error::Storage("Malformed work entry index".to_string()))?;
                self.get_ledger_entry(&tx_hash)
            }
            None => Ok(None),
        }
    }

    /// Every entry crediting `account`
    pub fn ledger_entries_for_account(&self, account: &AccountId) -> Result<Vec<LedgerEntry>> {
        let prefix = index_prefix_account_entry(account);
        let rows = self.scan_prefix(CF_INDICES, &prefix, usize::MAX)?;

        let mut entries = Vec::with_capacity(rows.len());
        for (key, _) in rows {
            let tx_hash = std::str::from_utf8(&key[prefix.len()..])
                .map_err(|_| Error::Storage("Malformed account entry index".to_string()))?;
            let entry = self
                .get_ledger_entry(tx_hash)?
                .ok_or_else(|| Error::Storage(format!("Dangling ledger index {}", tx_hash)))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    // Block operations

    /// Get block by height
    pub fn get_block(&self, height: u64) -> Result<Block> {
        self.get_value(CF_BLOCKS, &height.to_be_bytes())?
            .ok_or_else(|| Error::BlockNotFound(height.to_string()))
    }

    /// Get latest block
    pub fn get_latest_block(&self) -> Result<Option<Block>> {
        let cf = self.cf(CF_BLOCKS)?;
        let mut iter = self.db.iterator_cf(&cf, IteratorMode::End);

        match iter.next() {
            Some(item) => {
                let (_, value) = item?;
                Ok(Some(bincode::deserialize(&value)?))
            }
            None => Ok(None),
        }
    }

    /// Blocks with heights in `[from, to)`, ascending
    pub fn blocks_range(&self, from: u64, to: u64) -> Result<Vec<Block>> {
        let cf = self.cf(CF_BLOCKS)?;
        let start = from.to_be_bytes();
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&start, Direction::Forward));

        let mut blocks = Vec::new();
        for item in iter {
            let (_, value) = item?;
            let block: Block = bincode::deserialize(&value)?;
            if block.height >= to {
                break;
            }
            blocks.push(block);
        }
        Ok(blocks)
    }

    /// Every stored block, ascending
    pub fn all_blocks(&self) -> Result<Vec<Block>> {
        self.blocks_range(0, u64::MAX)
    }

    /// Blocks moved aside by recovery
    pub fn quarantined_blocks(&self) -> Result<Vec<Block>> {
        self.scan_prefix(CF_QUARANTINE, &[], usize::MAX)?
            .iter()
            .map(|(_, value)| bincode::deserialize(value).map_err(Error::from))
            .collect()
    }

    // Transaction pool operations

    /// Oldest pending transactions, up to `limit`
    pub fn pool_transactions(&self, limit: usize) -> Result<Vec<ChainTransaction>> {
        self.scan_prefix(CF_POOL, &[], limit)?
            .iter()
            .map(|(_, value)| bincode::deserialize(value).map_err(Error::from))
            .collect()
    }

    /// Number of pending transactions
    pub fn pool_size(&self) -> Result<usize> {
        Ok(self.scan_prefix(CF_POOL, &[], usize::MAX)?.len())
    }

    // Node operations

    /// Get node by ID
    pub fn get_node(&self, id: &str) -> Result<Option<Node>> {
        self.get_value(CF_NODES, &node_key(id))
    }

    /// Node ID registered at `address`
    pub fn node_id_for_address(&self, address: &str) -> Result<Option<String>> {
        let cf = self.cf(CF_NODES)?;
        match self.db.get_cf(&cf, node_address_key(address))? {
            Some(id) => Ok(Some(String::from_utf8(id).map_err(|_| {
                Error::Storage("Malformed node address index".to_string())
            })?)),
            None => Ok(None),
        }
    }

    /// All registered nodes, ordered by ID
    pub fn all_nodes(&self) -> Result<Vec<Node>> {
        self.scan_prefix(CF_NODES, b"id:", usize::MAX)?
            .iter()
            .map(|(_, value)| bincode::deserialize(value).map_err(Error::from))
            .collect()
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}

/// One atomic batch of writes plus the row locks guarding it
pub struct UnitOfWork<'a> {
    storage: &'a Storage,
    batch: WriteBatch,
    guards: Vec<RowGuard>,
}

impl std::fmt::Debug for UnitOfWork<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("pending_writes", &self.batch.len())
            .field("locks", &self.guards.len())
            .finish()
    }
}

impl<'a> UnitOfWork<'a> {
    /// Lock a work item row, waiting if needed
    pub fn lock_work_item(&mut self, id: Uuid) {
        let guard = self.storage.locks.lock(row_key_work(id));
        self.guards.push(guard);
    }

    /// Lock a work item row unless another unit holds it
    pub fn try_lock_work_item(&mut self, id: Uuid) -> bool {
        match self.storage.locks.try_lock(row_key_work(id)) {
            Some(guard) => {
                self.guards.push(guard);
                true
            }
            None => false,
        }
    }

    /// Lock an account row, waiting if needed
    pub fn lock_account(&mut self, id: &AccountId) {
        let guard = self.storage.locks.lock(row_key_account(id));
        self.guards.push(guard);
    }

    fn put<T: serde::Serialize>(&mut self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.storage.cf(cf_name)?;
        let bytes = bincode::serialize(value)?;
        self.batch.put_cf(&cf, key, bytes);
        Ok(())
    }

    fn put_raw(&mut self, cf_name: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self.storage.cf(cf_name)?;
        self.batch.put_cf(&cf, key, value);
        Ok(())
    }

    fn delete(&mut self, cf_name: &str, key: &[u8]) -> Result<()> {
        let cf = self.storage.cf(cf_name)?;
        self.batch.delete_cf(&cf, key);
        Ok(())
    }

    /// Write a work item and move its status index entry from `prior`
    pub fn put_work_item(&mut self, item: &WorkItem, prior: Option<WorkStatus>) -> Result<()> {
        self.put(CF_WORK_ITEMS, item.id.as_bytes(), item)?;
        if let Some(prior) = prior {
            if prior != item.status {
                self.delete(CF_INDICES, &index_key_status(prior, item.id))?;
            }
        }
        self.put_raw(CF_INDICES, &index_key_status(item.status, item.id), &[])
    }

    /// Write an account
    pub fn put_account(&mut self, account: &Account) -> Result<()> {
        if account.balance.is_sign_negative() {
            return Err(Error::InvariantViolation(format!(
                "account {} balance would be negative",
                account.id
            )));
        }
        self.put(CF_ACCOUNTS, account.id.as_str().as_bytes(), account)
    }

    /// Write a ledger entry with its work-item and account indices
    pub fn put_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<()> {
        self.put(CF_LEDGER, entry.tx_hash.as_bytes(), entry)?;
        self.put_raw(
            CF_INDICES,
            &index_key_work_entry(entry.work_item_id),
            entry.tx_hash.as_bytes(),
        )?;
        let mut account_key = index_prefix_account_entry(&entry.receiver_account);
        account_key.extend_from_slice(entry.tx_hash.as_bytes());
        self.put_raw(CF_INDICES, &account_key, &[])
    }

    /// Add a transaction to the pool
    pub fn put_pool_transaction(&mut self, tx: &ChainTransaction) -> Result<()> {
        self.put(CF_POOL, &tx.pool_key(), tx)
    }

    /// Remove a transaction from the pool
    pub fn remove_pool_transaction(&mut self, tx: &ChainTransaction) -> Result<()> {
        self.delete(CF_POOL, &tx.pool_key())
    }

    /// Write a block
    pub fn put_block(&mut self, block: &Block) -> Result<()> {
        self.put(CF_BLOCKS, &block.height.to_be_bytes(), block)
    }

    /// Move a stored block into quarantine
    pub fn quarantine_block(&mut self, block: &Block, generation: i64) -> Result<()> {
        let mut key = generation.to_be_bytes().to_vec();
        key.extend_from_slice(&block.height.to_be_bytes());
        self.put(CF_QUARANTINE, &key, block)?;
        self.delete(CF_BLOCKS, &block.height.to_be_bytes())
    }

    /// Write a node and its address index
    pub fn put_node(&mut self, node: &Node) -> Result<()> {
        self.put(CF_NODES, &node_key(&node.id), node)?;
        self.put_raw(CF_NODES, &node_address_key(&node.address), node.id.as_bytes())
    }

    /// Atomically apply every write in the unit, then release its locks
    pub fn commit(self) -> Result<()> {
        let writes = self.batch.len();
        self.storage.db.write(self.batch)?;
        tracing::trace!(writes, "Unit of work committed");
        // Guards drop here, after the batch is durable
        drop(self.guards);
        Ok(())
    }
}

// Key helpers

fn row_key_work(id: Uuid) -> Vec<u8> {
    let mut key = b"work:".to_vec();
    key.extend_from_slice(id.as_bytes());
    key
}

fn row_key_account(id: &AccountId) -> Vec<u8> {
    let mut key = b"acct:".to_vec();
    key.extend_from_slice(id.as_str().as_bytes());
    key
}

fn index_key_status(status: WorkStatus, id: Uuid) -> Vec<u8> {
    let mut key = vec![IDX_STATUS, status as u8];
    key.extend_from_slice(id.as_bytes());
    key
}

fn index_key_work_entry(id: Uuid) -> Vec<u8> {
    let mut key = vec![IDX_WORK_ENTRY];
    key.extend_from_slice(id.as_bytes());
    key
}

/// Length-prefixed so one account ID is never a prefix of another's keys
fn index_prefix_account_entry(account: &AccountId) -> Vec<u8> {
    let bytes = account.as_str().as_bytes();
    let mut key = vec![IDX_ACCOUNT_ENTRY];
    key.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    key.extend_from_slice(bytes);
    key
}

fn node_key(id: &str) -> Vec<u8> {
    let mut key = b"id:".to_vec();
    key.extend_from_slice(id.as_bytes());
    key
}

fn node_address_key(address: &str) -> Vec<u8> {
    let mut key = b"addr:".to_vec();
    key.extend_from_slice(address.as_bytes());
    key
}
