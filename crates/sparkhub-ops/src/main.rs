use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use redis::Msg;
use sparkhub_core::{AccountReconciliation, LedgerStore, NewReconciliationRun};
use sparkhub_ledger::PgLedgerStore;
use sparkhub_platform::{
    LEDGER_POSTED, LedgerPostedEvent, RedisBus, ServiceConfig, connect_database,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "sparkhub_ops=info".to_string()),
        )
        .init();

    let config = ServiceConfig::worker_from_env()?;
    let sweep_secs: u64 = match std::env::var("SWEEP_SECS") {
        Ok(raw) => raw.parse().context("SWEEP_SECS could not be parsed")?,
        Err(_) => 300,
    };
    let pool = connect_database(&config.database_url).await?;
    let redis = RedisBus::connect(&config.redis_url)?;
    let store = PgLedgerStore::new(pool);

    let mut pubsub = redis.subscribe(LEDGER_POSTED).await?;
    let mut messages = pubsub.on_message();
    let mut sweep = tokio::time::interval(Duration::from_secs(sweep_secs));

    info!("ops worker subscribed to ledger.posted, sweeping every {sweep_secs}s");

    loop {
        tokio::select! {
            msg = messages.next() => {
                let msg = msg.context("ledger.posted stream ended unexpectedly")?;
                if let Err(err) = handle_message(&store, msg).await {
                    error!("failed to process message: {err:#}");
                }
            }
            _ = sweep.tick() => {
                if let Err(err) = run_sweep(&store).await {
                    error!("reconciliation sweep failed: {err:#}");
                }
            }
        }
    }
}

/// Spot-check the account a ledger entry just touched, then hand its pending
/// notifications to the delivery layer.
async fn handle_message(store: &PgLedgerStore, msg: Msg) -> Result<()> {
    let payload: String = msg.get_payload()?;
    let event: LedgerPostedEvent = serde_json::from_str(&payload)?;

    let report = store.reconcile(event.account_id).await?;
    if report.drift() != 0 {
        error!(
            account = %report.account_id,
            balance = report.balance,
            entry_total = report.entry_total,
            "balance does not match its entries"
        );
    }

    let delivered = store.mark_notifications_delivered(event.account_id).await?;
    if delivered > 0 {
        info!(
            account = %event.account_id,
            count = delivered,
            "notifications handed to delivery"
        );
    }

    Ok(())
}

/// Full pass over every account. Drift is logged loudly and recorded, never
/// auto-corrected.
async fn run_sweep(store: &PgLedgerStore) -> Result<()> {
    let reports = store.reconcile_all().await?;
    let drifted: Vec<&AccountReconciliation> =
        reports.iter().filter(|report| report.drift() != 0).collect();
    for report in &drifted {
        error!(
            account = %report.account_id,
            balance = report.balance,
            entry_total = report.entry_total,
            "balance does not match its entries"
        );
    }
    let notes = if drifted.is_empty() {
        None
    } else {
        Some(
            drifted
                .iter()
                .map(|report| report.account_id.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        )
    };
    let run = store
        .record_reconciliation_run(NewReconciliationRun {
            accounts_checked: reports.len() as i64,
            drift_count: drifted.len() as i64,
            notes,
        })
        .await?;
    info!(
        checked = run.accounts_checked,
        drift = run.drift_count,
        "reconciliation sweep recorded"
    );

    Ok(())
}
