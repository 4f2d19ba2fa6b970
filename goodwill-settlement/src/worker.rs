//! Worker pool
//!
//! Each worker loops claim, score, complete/fail as its own tokio task. Store
//! calls run on the blocking pool. Workers share nothing but the store; the
//! claim queue's row try-locks are the only point where they meet.

use crate::error::{Error, Result};
use crate::minting::MintingEngine;
use crate::queue::ClaimSource;
use crate::retry::{AlertHook, RetryPolicy};
use crate::scoring::{Scorer, Verdict};
use goodwill_ledger::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Run a store call on the blocking pool
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Everything a worker needs, shared by the pool
#[derive(Debug)]
pub struct WorkerContext {
    /// Claim queue
    pub queue: Arc<dyn ClaimSource>,
    /// Minting engine, used when `auto_settle` is set
    pub minting: Arc<MintingEngine>,
    /// Scorer
    pub scorer: Scorer,
    /// Retry policy for store calls
    pub retry: RetryPolicy,
    /// Fired when a cycle is abandoned
    pub alert: Arc<dyn AlertHook>,
    /// Metrics
    pub metrics: Metrics,
    /// Items claimed per cycle
    pub batch_size: usize,
    /// Sleep after an empty claim
    pub poll_interval: Duration,
    /// Settle items as soon as they verify
    pub auto_settle: bool,
}

impl WorkerContext {
    /// One claim/score/record cycle; returns the number of items handled
    pub async fn run_cycle(&self, worker_id: usize) -> Result<usize> {
        let batch_size = self.batch_size;
        let claims = self
            .retry
            .execute_with_retry(
                || {
                    let queue = Arc::clone(&self.queue);
                    blocking(move || queue.claim_batch(batch_size))
                },
                "claim_batch",
            )
            .await?;

        if claims.is_empty() {
            return Ok(0);
        }

        let mut handled = 0;
        for claim in claims {
            let id = claim.item.id;
            let token = claim.token;
            let verdict = self.scorer.evaluate(&claim.item);

            let recorded = self
                .retry
                .execute_with_retry(
                    || {
                        let queue = Arc::clone(&self.queue);
                        blocking(move || match verdict {
                            Verdict::Verified(score) => queue.complete(id, token, score),
                            Verdict::Rejected(reason) => queue.fail(id, token, reason),
                        })
                    },
                    "record_score",
                )
                .await;

            match recorded {
                Ok(()) => handled += 1,
                // Exhausted retries: abandon the rest of the batch, leases
                // bring the rows back
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    tracing::warn!(worker_id, item_id = %id, error = %e, "Could not record score");
                    continue;
                }
            }

            if let (true, Verdict::Verified(score)) = (self.auto_settle, verdict) {
                let minting = Arc::clone(&self.minting);
                match blocking(move || minting.settle(id)).await {
                    Ok(outcome) => {
                        tracing::debug!(worker_id, item_id = %id, score, outcome = outcome.label(), "Auto-settled")
                    }
                    Err(e) => {
                        tracing::warn!(worker_id, item_id = %id, error = %e, "Auto-settle failed, item stays VERIFIED")
                    }
                }
            }
        }

        tracing::debug!(worker_id, handled, "Worker cycle finished");
        Ok(handled)
    }

    /// Loop until a shutdown message arrives or the sender drops
    pub async fn run(self: Arc<Self>, worker_id: usize, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(worker_id, "Worker started");

        loop {
            let handled = match self.run_cycle(worker_id).await {
                Ok(handled) => handled,
                Err(e) => {
                    self.metrics.record_alert();
                    self.alert.alert("worker_cycle", &e);
                    0
                }
            };

            let pause = if handled == 0 {
                self.poll_interval
            } else {
                Duration::ZERO
            };

            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        tracing::info!(worker_id, "Worker stopped");
    }
}

/// Fixed-size set of workers
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers listening on `shutdown`
    pub fn spawn(
        context: Arc<WorkerContext>,
        count: usize,
        shutdown: &broadcast::Sender<()>,
    ) -> Self {
        let handles = (0..count)
            .map(|worker_id| {
                let context = Arc::clone(&context);
                tokio::spawn(context.run(worker_id, shutdown.subscribe()))
            })
            .collect();

        tracing::info!(workers = count, "Worker pool started");
        Self { handles }
    }

    /// Number of workers
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether the pool has no workers
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit
    pub async fn join(self) -> Result<()> {
        let mut first_error: Option<Error> = None;
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task ended abnormally");
                first_error.get_or_insert(e.into());
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
