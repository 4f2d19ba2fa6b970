//! Goodwill settlement node binary
//!
//! Usage: `goodwill-node [config.toml]`. Without a path the configuration
//! comes from defaults plus `GOODWILL_*` environment variables.

use anyhow::Context;
use goodwill_settlement::{Config, SettlementService};
use tracing_subscriber::EnvFilter;

fn load_config() -> anyhow::Result<Config> {
    match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path).with_context(|| format!("loading {}", path)),
        None => Config::from_env().context("loading config from environment"),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    init_tracing(config.log_json);

    tracing::info!(service = %config.service_name, "Starting goodwill settlement node");

    let service = SettlementService::open(config).context("opening settlement service")?;
    service.start()?;

    let status = service.chain_status()?;
    tracing::info!(
        height = status.height,
        head = %status.head_hash,
        pending = status.pending_transactions,
        leader = ?status.leader,
        "Chain ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    service.stop().await?;

    let mismatches = service.audit_all()?;
    if !mismatches.is_empty() {
        tracing::error!(accounts = mismatches.len(), "Ledger audit found balance drift");
    }

    tracing::info!("Goodwill settlement node stopped");
    Ok(())
}
