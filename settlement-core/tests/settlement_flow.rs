//! End-to-end settlement flows: token redemption, staged wages, anomaly
//! scoring, and audit-ledger sync across the whole engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anomaly_engine::{AnomalyScorer, LocalScorer, TransferFeatures, Verdict};
use ledger_sync::MockAuditLedger;
use settlement_core::{
    AccountId, Amount, Config, Error, PrincipalId, SettlementEngine, SyncState, TransferStatus,
};

const EMPLOYER: &str = "acc-employer";
const WORKER: &str = "acc-worker";

fn test_config(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.data_dir = dir.path().to_path_buf();
    // Keep retries fast so failure paths finish within the test
    config.sync.max_attempts = 3;
    config.sync.initial_delay_ms = 1;
    config.sync.max_delay_ms = 10;
    config.sync.max_elapsed_ms = 5_000;
    config
}

fn engine_with(client: Arc<MockAuditLedger>) -> (Arc<SettlementEngine>, tempfile::TempDir) {
    engine_with_scorer(Arc::new(LocalScorer::new()), client)
}

fn engine_with_scorer(
    scorer: Arc<dyn AnomalyScorer>,
    client: Arc<MockAuditLedger>,
) -> (Arc<SettlementEngine>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let engine = SettlementEngine::new(test_config(&dir), scorer, client).unwrap();
    (engine, dir)
}

/// Scorer that behaves like a dead external model endpoint
struct UnreachableScorer;

#[async_trait::async_trait]
impl AnomalyScorer for UnreachableScorer {
    async fn score(&self, _features: &TransferFeatures) -> anomaly_engine::Result<Verdict> {
        Err(anomaly_engine::Error::ScorerUnavailable(
            "connection refused".to_string(),
        ))
    }
}

fn seed(engine: &SettlementEngine, employer_funds: u64) {
    engine
        .open_account(AccountId::new(EMPLOYER), PrincipalId::new("employer-1"))
        .unwrap();
    engine
        .open_account(AccountId::new(WORKER), PrincipalId::new("worker-1"))
        .unwrap();
    if employer_funds > 0 {
        engine
            .record_direct_wage(
                &AccountId::new(EMPLOYER),
                Amount::from_minor(employer_funds),
                HashMap::new(),
            )
            .unwrap();
    }
}

async fn wait_for<F>(mut predicate: F, what: &str)
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test(flavor = "multi_thread")]
async fn qr_redemption_moves_value_and_stays_zero_sum() {
    let (engine, _dir) = engine_with(Arc::new(MockAuditLedger::accepting()));
    seed(&engine, 5_000_00);
    let supply = engine.store().total_balance().unwrap();

    let token = engine
        .issue_token(
            &AccountId::new(WORKER),
            Some(Amount::from_minor(1_500_00)),
            None,
            &PrincipalId::new("worker-1"),
        )
        .unwrap();

    let transfer = engine
        .settle_via_token(&token.encode().unwrap(), &AccountId::new(EMPLOYER), None)
        .unwrap();

    assert!(transfer.status.is_settled());
    assert_eq!(
        engine.account(&AccountId::new(WORKER)).unwrap().balance,
        Amount::from_minor(1_500_00)
    );
    assert_eq!(
        engine.account(&AccountId::new(EMPLOYER)).unwrap().balance,
        Amount::from_minor(3_500_00)
    );
    assert_eq!(engine.store().total_balance().unwrap(), supply);

    let history = engine.transfers_for_account(&AccountId::new(WORKER)).unwrap();
    assert!(history.iter().any(|t| t.transfer_id == transfer.transfer_id));
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_redemptions_have_exactly_one_winner() {
    let (engine, _dir) = engine_with(Arc::new(MockAuditLedger::accepting()));
    seed(&engine, 10_000_00);

    let wire = engine
        .issue_token(
            &AccountId::new(WORKER),
            Some(Amount::from_minor(1_000_00)),
            None,
            &PrincipalId::new("worker-1"),
        )
        .unwrap()
        .encode()
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let wire = wire.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            engine.settle_via_token(&wire, &AccountId::new(EMPLOYER), None)
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(Error::TokenAlreadyConsumed(_)) => {}
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(
        engine.account(&AccountId::new(WORKER)).unwrap().balance,
        Amount::from_minor(1_000_00)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn expired_token_leaves_balances_untouched() {
    let (engine, _dir) = engine_with(Arc::new(MockAuditLedger::accepting()));
    seed(&engine, 5_000_00);

    let wire = engine
        .issue_token(
            &AccountId::new(WORKER),
            Some(Amount::from_minor(1_000_00)),
            Some(chrono::Duration::milliseconds(-1)),
            &PrincipalId::new("worker-1"),
        )
        .unwrap()
        .encode()
        .unwrap();

    let err = engine
        .settle_via_token(&wire, &AccountId::new(EMPLOYER), None)
        .unwrap_err();
    assert!(matches!(err, Error::TokenExpired(_)));
    assert_eq!(
        engine.account(&AccountId::new(WORKER)).unwrap().balance,
        Amount::ZERO
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn anomalous_spike_is_flagged_but_still_settled() {
    let (engine, _dir) = engine_with(Arc::new(MockAuditLedger::accepting()));
    seed(&engine, 0);

    // Modest wage history for the worker
    for _ in 0..3 {
        engine
            .record_direct_wage(
                &AccountId::new(WORKER),
                Amount::from_minor(100_00),
                HashMap::new(),
            )
            .unwrap();
    }

    // A credit far above the receiver's own baseline
    let spike = engine
        .record_direct_wage(
            &AccountId::new(WORKER),
            Amount::from_minor(50_000_01),
            HashMap::new(),
        )
        .unwrap();
    assert_eq!(spike.status, TransferStatus::Completed);

    // The alert is written after the verdict, so waiting on it covers both
    wait_for(
        || {
            !engine
                .store()
                .alerts_for_transfer(spike.transfer_id)
                .unwrap()
                .is_empty()
        },
        "anomaly alert",
    )
    .await;

    let scored = engine.transfer(spike.transfer_id).unwrap();
    // Flagged is still settled: the money moved and stays moved
    assert_eq!(scored.status, TransferStatus::Flagged);
    assert!(scored.status.is_settled());
    assert_eq!(
        engine.account(&AccountId::new(WORKER)).unwrap().balance,
        Amount::from_minor(300_00 + 50_000_01)
    );

    let alerts = engine.store().alerts_for_transfer(spike.transfer_id).unwrap();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].verdict.confidence > 0.6);
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_scorer_never_blocks_settlement() {
    let (engine, _dir) = engine_with_scorer(
        Arc::new(UnreachableScorer),
        Arc::new(MockAuditLedger::accepting()),
    );
    seed(&engine, 0);

    // Same history-then-spike shape that gets flagged when scoring works
    for _ in 0..3 {
        engine
            .record_direct_wage(
                &AccountId::new(WORKER),
                Amount::from_minor(100_00),
                HashMap::new(),
            )
            .unwrap();
    }
    let spike = engine
        .record_direct_wage(
            &AccountId::new(WORKER),
            Amount::from_minor(50_000_01),
            HashMap::new(),
        )
        .unwrap();

    assert_eq!(spike.status, TransferStatus::Completed);
    assert_eq!(
        engine.account(&AccountId::new(WORKER)).unwrap().balance,
        Amount::from_minor(300_00 + 50_000_01)
    );

    // Sync runs on its own track; once it lands the scoring task has had
    // ample room to run and fail
    wait_for(
        || {
            matches!(
                engine.transfer(spike.transfer_id).unwrap().sync_state,
                SyncState::Synced { .. }
            )
        },
        "sync despite scorer outage",
    )
    .await;

    let current = engine.transfer(spike.transfer_id).unwrap();
    assert_eq!(current.status, TransferStatus::Completed);
    assert!(current.anomaly_verdict.is_none());
    assert!(engine
        .store()
        .alerts_for_transfer(spike.transfer_id)
        .unwrap()
        .is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_retries_then_succeeds() {
    let client = Arc::new(MockAuditLedger::failing_first(2));
    let (engine, _dir) = engine_with(client.clone());
    seed(&engine, 0);

    let transfer = engine
        .record_direct_wage(
            &AccountId::new(WORKER),
            Amount::from_minor(500_00),
            HashMap::new(),
        )
        .unwrap();

    wait_for(
        || {
            matches!(
                engine.transfer(transfer.transfer_id).unwrap().sync_state,
                SyncState::Synced { .. }
            )
        },
        "sync to land after retries",
    )
    .await;

    assert!(client.attempts() >= 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_sync_never_unsettles_the_transfer() {
    // More failures than the configured attempt budget
    let client = Arc::new(MockAuditLedger::failing_first(100));
    let (engine, _dir) = engine_with(client);
    seed(&engine, 0);

    let transfer = engine
        .record_direct_wage(
            &AccountId::new(WORKER),
            Amount::from_minor(500_00),
            HashMap::new(),
        )
        .unwrap();

    wait_for(
        || {
            matches!(
                engine.transfer(transfer.transfer_id).unwrap().sync_state,
                SyncState::SyncFailed { .. }
            )
        },
        "sync to exhaust retries",
    )
    .await;

    let current = engine.transfer(transfer.transfer_id).unwrap();
    assert!(current.status.is_settled());
    assert_eq!(
        engine.account(&AccountId::new(WORKER)).unwrap().balance,
        Amount::from_minor(500_00)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn bulk_staging_settles_only_on_release() {
    let (engine, _dir) = engine_with(Arc::new(MockAuditLedger::accepting()));
    seed(&engine, 0);

    let first = engine
        .stage_direct_wage(
            &AccountId::new(WORKER),
            Amount::from_minor(700_00),
            HashMap::from([("row".to_string(), "1".to_string())]),
        )
        .unwrap();
    let second = engine
        .stage_direct_wage(
            &AccountId::new(WORKER),
            Amount::from_minor(700_00),
            HashMap::from([("row".to_string(), "2".to_string())]),
        )
        .unwrap();

    engine.cancel_transfer(second.transfer_id, "duplicate row").unwrap();
    engine.release_staged(first.transfer_id).unwrap();

    assert_eq!(
        engine.account(&AccountId::new(WORKER)).unwrap().balance,
        Amount::from_minor(700_00)
    );
    assert_eq!(
        engine.transfer(second.transfer_id).unwrap().status,
        TransferStatus::Cancelled
    );

    // Releasing the cancelled row is an illegal transition
    let err = engine.release_staged(second.transfer_id).unwrap_err();
    assert!(matches!(err, Error::InvalidStateTransition { .. }));
}
