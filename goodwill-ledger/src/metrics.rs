//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for the settlement pipeline.
//! Collectors live on a private [`Registry`] so several pipelines (and
//! tests) can coexist in one process.
//!
//! # Metrics
//!
//! - `goodwill_items_total{event}` - Work item lifecycle events
//! - `goodwill_settlements_total{outcome}` - Settlement results
//! - `goodwill_blocks_total` - Blocks appended to the chain
//! - `goodwill_blocks_rejected_total` - Blocks failing validation
//! - `goodwill_mining_duration_seconds` - Proof-of-work search time
//! - `goodwill_alerts_total` - Alert hook invocations

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Work item events (submitted, claimed, verified, failed, requeued)
    pub items_total: IntCounterVec,

    /// Settlement outcomes (settled, already_settled, skipped, failed)
    pub settlements_total: IntCounterVec,

    /// Blocks appended
    pub blocks_total: IntCounter,

    /// Blocks rejected by validation
    pub blocks_rejected: IntCounter,

    /// Mining duration histogram
    pub mining_duration: Histogram,

    /// Alerts fired
    pub alerts_total: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let items_total = IntCounterVec::new(
            Opts::new("goodwill_items_total", "Work item lifecycle events"),
            &["event"],
        )?;
        registry.register(Box::new(items_total.clone()))?;

        let settlements_total = IntCounterVec::new(
            Opts::new("goodwill_settlements_total", "Settlement results by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(settlements_total.clone()))?;

        let blocks_total = IntCounter::new("goodwill_blocks_total", "Blocks appended to the chain")?;
        registry.register(Box::new(blocks_total.clone()))?;

        let blocks_rejected = IntCounter::new(
            "goodwill_blocks_rejected_total",
            "Blocks rejected by validation",
        )?;
        registry.register(Box::new(blocks_rejected.clone()))?;

        let mining_duration = Histogram::with_opts(
            HistogramOpts::new(
                "goodwill_mining_duration_seconds",
                "Proof-of-work search time",
            )
            .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
        )?;
        registry.register(Box::new(mining_duration.clone()))?;

        let alerts_total = IntCounter::new("goodwill_alerts_total", "Alert hook invocations")?;
        registry.register(Box::new(alerts_total.clone()))?;

        Ok(Self {
            items_total,
            settlements_total,
            blocks_total,
            blocks_rejected,
            mining_duration,
            alerts_total,
            registry,
        })
    }

    /// Record a work item event
    pub fn record_item(&self, event: &str, count: u64) {
        self.items_total.with_label_values(&[event]).inc_by(count);
    }

    /// Record a settlement outcome
    pub fn record_settlement(&self, outcome: &str) {
        self.settlements_total.with_label_values(&[outcome]).inc();
    }

    /// Record an appended block
    pub fn record_block_appended(&self) {
        self.blocks_total.inc();
    }

    /// Record a rejected block
    pub fn record_block_rejected(&self) {
        self.blocks_rejected.inc();
    }

    /// Record mining duration
    pub fn record_mining_duration(&self, duration_seconds: f64) {
        self.mining_duration.observe(duration_seconds);
    }

    /// Record an alert
    pub fn record_alert(&self) {
        self.alerts_total.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        // Collector names are static and unique within the private registry
        Self::new().expect("Failed to create metrics")
    }
}
