//! End-to-end walkthrough: accounts, token redemption, bulk staging,
//! anomaly scoring, and audit sync against the mock ledger.

use std::collections::HashMap;
use std::sync::Arc;

use anomaly_engine::LocalScorer;
use ledger_sync::MockAuditLedger;
use settlement_core::{AccountId, Amount, Config, PrincipalId, SettlementEngine, SyncState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut config = Config::from_env()?;
    config.data_dir =
        std::env::temp_dir().join(format!("wagerail-demo-{}", uuid::Uuid::new_v4()));

    let engine = SettlementEngine::new(
        config,
        Arc::new(LocalScorer::new()),
        Arc::new(MockAuditLedger::accepting()),
    )?;

    let employer = engine.open_account(
        AccountId::new("acc-employer"),
        PrincipalId::new("employer-demo"),
    )?;
    let worker = engine.open_account(
        AccountId::new("acc-worker"),
        PrincipalId::new("worker-demo"),
    )?;

    // Fund the employer via a direct posting
    engine.record_direct_wage(
        &employer.account_id,
        Amount::from_minor(10_000_00),
        HashMap::new(),
    )?;

    // Worker shows a QR; employer scans and pays
    let token = engine.issue_token(
        &worker.account_id,
        Some(Amount::from_minor(1_500_00)),
        None,
        &PrincipalId::new("worker-demo"),
    )?;
    let transfer = engine.settle_via_token(&token.encode()?, &employer.account_id, None)?;
    println!(
        "token redemption settled: {} -> {} ({})",
        employer.account_id, worker.account_id, transfer.amount
    );

    // Bulk wage row: staged, then released
    let staged = engine.stage_direct_wage(
        &worker.account_id,
        Amount::from_minor(2_000_00),
        HashMap::from([("batch".to_string(), "2026-08".to_string())]),
    )?;
    let released = engine.release_staged(staged.transfer_id)?;
    println!("staged wage released: {} ({})", released.transfer_id, released.amount);

    // Let the async side channels (scoring, audit sync) catch up
    for _ in 0..50 {
        let current = engine.transfer(transfer.transfer_id)?;
        if matches!(current.sync_state, SyncState::Synced { .. })
            && current.anomaly_verdict.is_some()
        {
            println!(
                "transfer {}: status={}, verdict={:?}, sync={:?}",
                current.transfer_id,
                current.status,
                current.anomaly_verdict.map(|v| v.category),
                current.sync_state
            );
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    println!(
        "worker balance: {}",
        engine.account(&worker.account_id)?.balance
    );
    Ok(())
}
