//! Settlement service
//!
//! Owns the store, chain, queue and minting engine for one process. `open`
//! builds everything, `start` spawns the worker pool and the maintenance
//! task (lease requeue, optional settlement sweep, pool sealing), `stop`
//! cancels any mining in progress and waits for the tasks to exit.
//!
//! The node registry is single-writer bookkeeping: nodes and the elected
//! leader are recorded, but no node replicates another's chain.
//!
//! # Example
//!
//! ```no_run
//! use goodwill_settlement::{Config, SettlementService};
//! use std::collections::BTreeMap;
//!
//! #[tokio::main]
//! async fn main() -> goodwill_settlement::Result<()> {
//!     let service = SettlementService::open(Config::from_env()?)?;
//!     service.start()?;
//!
//!     service.open_account("alice", Some("addr-alice".to_string()))?;
//!     let id = service.submit("alice", "mentorship", "coached two new volunteers", BTreeMap::new())?;
//!     println!("submitted {} ({})", id, service.get_status(id)?);
//!
//!     service.stop().await
//! }
//! ```

use crate::config::Config;
use crate::error::{Error, Result};
use crate::minting::{IdentityMint, MintPolicy, MintingEngine, Reconciliation, SettleOutcome};
use crate::queue::{ClaimQueue, ClaimSource};
use crate::retry::{AlertHook, LogAlert, RetryPolicy};
use crate::scoring::Scorer;
use crate::worker::{blocking, WorkerContext, WorkerPool};
use chrono::Utc;
use goodwill_ledger::{
    Account, AccountId, Block, ChainPage, ChainStatus, LedgerChain, Metrics, MineControl,
    Registration, Storage, WorkItem, WorkStatus,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Background tasks of a started service
#[derive(Debug)]
struct Running {
    shutdown: broadcast::Sender<()>,
    workers: WorkerPool,
    maintenance: JoinHandle<()>,
}

/// The settlement pipeline for one process
#[derive(Debug)]
pub struct SettlementService {
    config: Config,
    chain: Arc<LedgerChain>,
    queue: Arc<ClaimQueue>,
    minting: Arc<MintingEngine>,
    alert: Arc<dyn AlertHook>,
    metrics: Metrics,
    /// Shared by every mining search the service starts
    mining_cancel: Arc<AtomicBool>,
    running: Mutex<Option<Running>>,
}

impl SettlementService {
    /// Open with the identity mint policy and logging alerts
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with(config, Arc::new(IdentityMint), Arc::new(LogAlert))
    }

    /// Open with a custom mint policy and alert hook
    pub fn open_with(
        config: Config,
        policy: Arc<dyn MintPolicy>,
        alert: Arc<dyn AlertHook>,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = Metrics::new()?;
        let storage = Arc::new(Storage::open(&config.ledger)?);
        let chain = Arc::new(LedgerChain::open(
            Arc::clone(&storage),
            config.ledger.chain.clone(),
            metrics.clone(),
        )?);
        let queue = Arc::new(ClaimQueue::new(
            storage,
            config.queue.clone(),
            metrics.clone(),
        ));
        let mining_cancel = Arc::new(AtomicBool::new(false));
        let minting = Arc::new(MintingEngine::new(
            Arc::clone(&chain),
            policy,
            config.minting.clone(),
            metrics.clone(),
            Arc::clone(&mining_cancel),
        ));

        tracing::info!(
            service = %config.service_name,
            data_dir = ?config.ledger.data_dir,
            difficulty = config.ledger.chain.difficulty,
            "Settlement service opened"
        );

        Ok(Self {
            config,
            chain,
            queue,
            minting,
            alert,
            metrics,
            mining_cancel,
            running: Mutex::new(None),
        })
    }

    /// Spawn workers and the maintenance task; needs a tokio runtime
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(Error::State("service already started".to_string()));
        }

        let (shutdown, _) = broadcast::channel(1);
        self.mining_cancel.store(false, Ordering::Relaxed);

        let context = Arc::new(WorkerContext {
            queue: Arc::clone(&self.queue) as Arc<dyn ClaimSource>,
            minting: Arc::clone(&self.minting),
            scorer: Scorer::new(self.config.scoring.clone()),
            retry: RetryPolicy::new(self.config.workers.retry.clone()),
            alert: Arc::clone(&self.alert),
            metrics: self.metrics.clone(),
            batch_size: self.config.queue.batch_size,
            poll_interval: Duration::from_millis(self.config.workers.poll_interval_ms),
            auto_settle: self.config.workers.auto_settle,
        });
        let workers = WorkerPool::spawn(context, self.config.workers.count, &shutdown);

        let maintenance = tokio::spawn(maintenance_loop(
            Arc::clone(&self.chain),
            Arc::clone(&self.queue),
            Arc::clone(&self.minting),
            MaintenanceSettings {
                interval: Duration::from_millis(self.config.ledger.chain.seal_interval_ms),
                mining_timeout: self
                    .config
                    .ledger
                    .chain
                    .mining_timeout_ms
                    .map(Duration::from_millis),
                settle_batch: self
                    .config
                    .workers
                    .auto_settle
                    .then_some(self.config.queue.batch_size),
            },
            Arc::clone(&self.mining_cancel),
            shutdown.subscribe(),
        ));

        *running = Some(Running {
            shutdown,
            workers,
            maintenance,
        });
        tracing::info!("Settlement service started");
        Ok(())
    }

    /// Signal shutdown, cancel mining and wait for every task
    pub async fn stop(&self) -> Result<()> {
        let running = self
            .running
            .lock()
            .take()
            .ok_or_else(|| Error::State("service not running".to_string()))?;

        self.mining_cancel.store(true, Ordering::Relaxed);
        // Receivers may already be gone
        let _ = running.shutdown.send(());

        let workers = running.workers.join().await;
        let maintenance = running.maintenance.await;
        workers?;
        maintenance?;

        tracing::info!("Settlement service stopped");
        Ok(())
    }

    /// Whether background tasks are running
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Submit a work item for `performer_id`
    pub fn submit(
        &self,
        performer_id: &str,
        action_type: &str,
        description: &str,
        contextual_data: BTreeMap<String, String>,
    ) -> Result<Uuid> {
        let item = WorkItem::new(
            AccountId::new(performer_id.trim()),
            action_type.trim(),
            description,
            contextual_data,
        );
        self.queue.submit(item)
    }

    /// Status of a work item
    pub fn get_status(&self, id: Uuid) -> Result<WorkStatus> {
        self.queue.get_status(id)
    }

    /// Full work item
    pub fn work_item(&self, id: Uuid) -> Result<WorkItem> {
        self.queue.get_item(id)
    }

    /// Settle a verified work item
    pub fn settle(&self, id: Uuid) -> Result<SettleOutcome> {
        self.minting.settle(id)
    }

    /// Settle up to `limit` verified items
    pub fn settle_verified(&self, limit: usize) -> Result<Vec<(Uuid, SettleOutcome)>> {
        self.minting.settle_verified(limit)
    }

    /// Register a chain node
    pub fn register_node(&self, id: &str, address: &str) -> Result<Registration> {
        Ok(self.chain.register_node(id, address)?)
    }

    /// Current leader
    pub fn leader(&self) -> Option<String> {
        self.chain.leader()
    }

    /// One page of the chain
    pub fn list_chain(&self, page: u64, per_page: u64) -> Result<ChainPage> {
        Ok(self.chain.list_chain(page, per_page)?)
    }

    /// Chain summary
    pub fn chain_status(&self) -> Result<ChainStatus> {
        Ok(self.chain.status()?)
    }

    /// Seal the pool into a block now
    pub fn seal_now(&self) -> Result<Option<Block>> {
        let control = match self.config.ledger.chain.mining_timeout_ms {
            Some(ms) => MineControl::with_deadline(Duration::from_millis(ms)),
            None => MineControl::new(),
        };
        Ok(self.chain.seal_pending(&control)?)
    }

    /// Return lapsed claims to PENDING
    pub fn requeue_expired(&self) -> Result<usize> {
        self.queue.requeue_expired(Utc::now())
    }

    /// Open an account
    pub fn open_account(&self, id: &str, primary_address: Option<String>) -> Result<Account> {
        self.minting.open_account(AccountId::new(id), primary_address)
    }

    /// Set an account's primary address
    pub fn set_primary_address(&self, id: &str, address: &str) -> Result<Account> {
        self.minting
            .set_primary_address(&AccountId::new(id), address.to_string())
    }

    /// Fetch an account
    pub fn account(&self, id: &str) -> Result<Account> {
        self.minting.account(&AccountId::new(id))
    }

    /// Compare an account's balance with its ledger entries
    pub fn reconcile(&self, id: &str) -> Result<Reconciliation> {
        self.minting.reconcile(&AccountId::new(id))
    }

    /// Reconcile every account; returns the inconsistent ones
    pub fn audit_all(&self) -> Result<Vec<Reconciliation>> {
        self.minting.audit_all()
    }

    /// Claim queue
    pub fn queue(&self) -> &Arc<ClaimQueue> {
        &self.queue
    }

    /// Ledger chain
    pub fn chain(&self) -> &Arc<LedgerChain> {
        &self.chain
    }

    /// Metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

#[derive(Debug, Clone, Copy)]
struct MaintenanceSettings {
    interval: Duration,
    mining_timeout: Option<Duration>,
    /// Sweep VERIFIED items into settlement each tick
    settle_batch: Option<usize>,
}

async fn maintenance_loop(
    chain: Arc<LedgerChain>,
    queue: Arc<ClaimQueue>,
    minting: Arc<MintingEngine>,
    settings: MaintenanceSettings,
    mining_cancel: Arc<AtomicBool>,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::info!(interval_ms = settings.interval.as_millis() as u64, "Maintenance task started");
    let mut interval = tokio::time::interval(settings.interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            _ = interval.tick() => {}
        }

        let requeue = Arc::clone(&queue);
        match blocking(move || requeue.requeue_expired(Utc::now())).await {
            Ok(0) => {}
            Ok(count) => tracing::debug!(count, "Requeued lapsed claims"),
            Err(e) => tracing::warn!(error = %e, "Lease requeue failed"),
        }

        if let Some(limit) = settings.settle_batch {
            let sweep = Arc::clone(&minting);
            if let Err(e) = blocking(move || sweep.settle_verified(limit)).await {
                tracing::warn!(error = %e, "Settlement sweep failed");
            }
        }

        let sealer = Arc::clone(&chain);
        let control = MineControl::with_flag(Arc::clone(&mining_cancel), settings.mining_timeout);
        let sealed = blocking(move || Ok(sealer.seal_pending(&control)?)).await;
        match sealed {
            Ok(Some(block)) => tracing::info!(
                height = block.height,
                transactions = block.transactions.len(),
                "Sealed pending transactions"
            ),
            Ok(None) => {}
            Err(Error::Ledger(goodwill_ledger::Error::MiningCancelled { attempts })) => {
                tracing::info!(attempts, "Sealing cancelled");
            }
            Err(e) => tracing::warn!(error = %e, "Sealing failed"),
        }
    }

    tracing::info!("Maintenance task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.ledger.data_dir = dir.path().to_path_buf();
        config.ledger.chain.difficulty = 1;
        config.ledger.chain.seal_interval_ms = 20;
        config.workers.count = 2;
        config.workers.poll_interval_ms = 10;
        config
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let service = SettlementService::open(test_config(&dir)).unwrap();

        assert!(!service.is_running());
        service.start().unwrap();
        assert!(service.is_running());
        assert!(matches!(service.start(), Err(Error::State(_))));

        service.stop().await.unwrap();
        assert!(!service.is_running());
        assert!(matches!(service.stop().await, Err(Error::State(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_cancels_immediate_mode_mining() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir);
        // No nonce meets this target, so sealing only ends when cancelled
        config.ledger.chain.difficulty = 64;
        config.ledger.chain.mining_timeout_ms = None;
        config.minting.mode = crate::MintMode::Immediate;
        config.workers.auto_settle = true;
        let service = SettlementService::open(config).unwrap();
        service
            .open_account("hana", Some("addr-hana".to_string()))
            .unwrap();
        let id = service
            .submit("hana", "donation", "funded the school library", BTreeMap::new())
            .unwrap();

        service.start().unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(20);
        while service.get_status(id).unwrap() != WorkStatus::IssuedOnChain {
            assert!(std::time::Instant::now() < deadline, "item never settled");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tokio::time::timeout(Duration::from_secs(10), service.stop())
            .await
            .expect("stop hung on mining")
            .unwrap();
        assert_eq!(service.chain_status().unwrap().pending_transactions, 1);
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir);
        config.queue.batch_size = 0;
        assert!(matches!(
            SettlementService::open(config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_submit_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let service = SettlementService::open(test_config(&dir)).unwrap();
        let id = service
            .submit("alice", "donation", "gave blood", BTreeMap::new())
            .unwrap();
        assert_eq!(service.get_status(id).unwrap(), WorkStatus::Pending);
        assert!(service.get_status(Uuid::now_v7()).is_err());
        assert!(service.submit("  ", "donation", "x", BTreeMap::new()).is_err());
    }
}
