//! Claim-based work queue
//!
//! Claiming is lock-and-skip: a claimer try-locks each PENDING row, re-reads
//! it under the lock and skips rows another claimer holds or has already
//! taken. Every row claimed in one call flips to PROCESSING in a single
//! commit, carrying a fresh claim token and lease expiry. Contention yields
//! fewer items, never an error.

use crate::config::{QueueConfig, MAX_LEASE_SECS};
use crate::error::Result;
use chrono::{DateTime, Utc};
use goodwill_ledger::{Error as LedgerError, Metrics, Storage, WorkItem, WorkStatus};
use std::fmt::Debug;
use std::sync::Arc;
use uuid::Uuid;

/// Ownership of one claimed item
#[derive(Debug, Clone)]
pub struct Claim {
    /// The item as it was written when claimed
    pub item: WorkItem,
    /// Must be presented to complete or fail the item
    pub token: Uuid,
    /// When the claim lapses
    pub lease_expires_at: DateTime<Utc>,
}

/// What a worker needs from the queue
pub trait ClaimSource: Send + Sync + Debug {
    /// Claim up to `n` PENDING items
    fn claim_batch(&self, n: usize) -> Result<Vec<Claim>>;
    /// PROCESSING -> VERIFIED
    fn complete(&self, id: Uuid, token: Uuid, score: u32) -> Result<()>;
    /// PROCESSING -> FAILED
    fn fail(&self, id: Uuid, token: Uuid, reason: &str) -> Result<()>;
}

/// Work queue over the ledger store
#[derive(Debug)]
pub struct ClaimQueue {
    storage: Arc<Storage>,
    config: QueueConfig,
    metrics: Metrics,
}

impl ClaimQueue {
    /// Create a queue
    pub fn new(storage: Arc<Storage>, config: QueueConfig, metrics: Metrics) -> Self {
        Self {
            storage,
            config,
            metrics,
        }
    }

    /// Insert a new PENDING item
    pub fn submit(&self, item: WorkItem) -> Result<Uuid> {
        if item.status != WorkStatus::Pending {
            return Err(LedgerError::InvalidTransition(format!(
                "submitted item {} must be PENDING, got {}",
                item.id, item.status
            ))
            .into());
        }
        if item.performer.as_str().trim().is_empty() || item.action_type.trim().is_empty() {
            return Err(LedgerError::InvalidInput(
                "performer and action type must be non-empty".to_string(),
            )
            .into());
        }

        let mut uow = self.storage.begin();
        uow.lock_work_item(item.id);
        if self.storage.get_work_item(item.id)?.is_some() {
            return Err(LedgerError::AlreadyExists(format!("work item {}", item.id)).into());
        }
        uow.put_work_item(&item, None)?;
        uow.commit()?;

        self.metrics.record_item("submitted", 1);
        tracing::info!(
            item_id = %item.id,
            performer = %item.performer,
            action_type = %item.action_type,
            "Work item submitted"
        );
        Ok(item.id)
    }

    /// Claim up to `n` PENDING items, skipping rows held by other claimers
    pub fn claim_batch(&self, n: usize) -> Result<Vec<Claim>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        // Over-scan so rows lost to other claimers don't starve this one
        let candidates = self
            .storage
            .work_ids_with_status(WorkStatus::Pending, n.saturating_mul(4).saturating_add(16))?;

        let now = Utc::now();
        // Capped so the cast and the addition cannot overflow
        let lease_secs = self.config.lease_secs.min(MAX_LEASE_SECS) as i64;
        let lease_expires_at = now + chrono::Duration::seconds(lease_secs);
        let mut uow = self.storage.begin();
        let mut claims = Vec::with_capacity(n);

        for id in candidates {
            if claims.len() >= n {
                break;
            }
            if !uow.try_lock_work_item(id) {
                continue;
            }
            let mut item = match self.storage.get_work_item(id)? {
                Some(item) if item.status == WorkStatus::Pending => item,
                _ => continue,
            };

            let token = Uuid::new_v4();
            item.transition(WorkStatus::Processing)?;
            item.claim_token = Some(token);
            item.lease_expires_at = Some(lease_expires_at);
            uow.put_work_item(&item, Some(WorkStatus::Pending))?;

            claims.push(Claim {
                item,
                token,
                lease_expires_at,
            });
        }

        if claims.is_empty() {
            return Ok(claims);
        }

        uow.commit()?;
        self.metrics.record_item("claimed", claims.len() as u64);
        tracing::debug!(claimed = claims.len(), requested = n, "Claimed work items");
        Ok(claims)
    }

    fn load_claimed(&self, item: &WorkItem, token: Uuid) -> Result<()> {
        if item.status != WorkStatus::Processing || item.claim_token != Some(token) {
            return Err(LedgerError::InvalidTransition(format!(
                "stale claim on work item {} (status {})",
                item.id, item.status
            ))
            .into());
        }
        Ok(())
    }

    /// PROCESSING -> VERIFIED with `score`
    pub fn complete(&self, id: Uuid, token: Uuid, score: u32) -> Result<()> {
        if score > crate::scoring::MAX_SCORE {
            return Err(LedgerError::InvalidInput(format!("score {} out of range", score)).into());
        }

        let mut uow = self.storage.begin();
        uow.lock_work_item(id);
        let mut item = self.storage.work_item(id)?;
        self.load_claimed(&item, token)?;

        item.transition(WorkStatus::Verified)?;
        item.score = Some(score);
        item.claim_token = None;
        item.lease_expires_at = None;
        uow.put_work_item(&item, Some(WorkStatus::Processing))?;
        uow.commit()?;

        self.metrics.record_item("verified", 1);
        tracing::debug!(item_id = %id, score, "Work item verified");
        Ok(())
    }

    /// PROCESSING -> FAILED with `reason`
    pub fn fail(&self, id: Uuid, token: Uuid, reason: &str) -> Result<()> {
        let mut uow = self.storage.begin();
        uow.lock_work_item(id);
        let mut item = self.storage.work_item(id)?;
        self.load_claimed(&item, token)?;

        item.transition(WorkStatus::Failed)?;
        item.failure_reason = Some(reason.to_string());
        item.claim_token = None;
        item.lease_expires_at = None;
        uow.put_work_item(&item, Some(WorkStatus::Processing))?;
        uow.commit()?;

        self.metrics.record_item("failed", 1);
        tracing::info!(item_id = %id, reason, "Work item failed");
        Ok(())
    }

    /// Return PROCESSING items whose lease lapsed before `now` to PENDING
    pub fn requeue_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let processing = self
            .storage
            .work_ids_with_status(WorkStatus::Processing, usize::MAX)?;

        let mut uow = self.storage.begin();
        let mut requeued = 0usize;
        for id in processing {
            if !uow.try_lock_work_item(id) {
                continue;
            }
            let mut item = match self.storage.get_work_item(id)? {
                Some(item) if item.lease_expired(now) => item,
                _ => continue,
            };

            item.transition(WorkStatus::Pending)?;
            item.claim_token = None;
            item.lease_expires_at = None;
            uow.put_work_item(&item, Some(WorkStatus::Processing))?;
            requeued += 1;
        }

        if requeued > 0 {
            uow.commit()?;
            self.metrics.record_item("requeued", requeued as u64);
            tracing::warn!(requeued, "Requeued work items with expired leases");
        }
        Ok(requeued)
    }

    /// Current status of an item
    pub fn get_status(&self, id: Uuid) -> Result<WorkStatus> {
        Ok(self.storage.work_item(id)?.status)
    }

    /// Full item
    pub fn get_item(&self, id: Uuid) -> Result<WorkItem> {
        Ok(self.storage.work_item(id)?)
    }

    /// Number of items in `status`
    pub fn count(&self, status: WorkStatus) -> Result<usize> {
        Ok(self.storage.count_with_status(status)?)
    }
}

impl ClaimSource for ClaimQueue {
    fn claim_batch(&self, n: usize) -> Result<Vec<Claim>> {
        ClaimQueue::claim_batch(self, n)
    }

    fn complete(&self, id: Uuid, token: Uuid, score: u32) -> Result<()> {
        ClaimQueue::complete(self, id, token, score)
    }

    fn fail(&self, id: Uuid, token: Uuid, reason: &str) -> Result<()> {
        ClaimQueue::fail(self, id, token, reason)
    }
}
