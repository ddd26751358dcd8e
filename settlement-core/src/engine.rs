//! Settlement engine
//!
//! Orchestrates the settlement paths (token redemption, direct wage posting,
//! staged bulk postings) over the store's atomic transfer unit, then fans out
//! the two post-settlement side channels: anomaly scoring and audit-ledger
//! sync. Both are advisory and asynchronous; a settled transfer is final
//! regardless of what either of them does.

use chrono::{Datelike, Timelike};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use anomaly_engine::{AnomalyScorer, TransferFeatures, Verdict};
use ledger_sync::{spawn_sync_worker, AuditLedgerClient, SyncHandle, SyncOutcome, SyncRecord, SyncSink};

use crate::config::Config;
use crate::metrics::Metrics;
use crate::refgen;
use crate::store::{Store, TransferPlan};
use crate::token::{SignedToken, TokenManager, TokenPayload, TokenRecord};
use crate::types::{
    Account, AccountId, AlertStatus, Amount, AnomalyAlert, Channel, PrincipalId, StatusEntry,
    SyncState, Transfer, TransferStatus,
};
use crate::{Error, Result};

/// The settlement engine
pub struct SettlementEngine {
    store: Arc<Store>,
    tokens: TokenManager,
    scorer: Arc<dyn AnomalyScorer>,
    sync: SyncHandle,
    config: Config,
    metrics: Arc<Metrics>,
}

impl SettlementEngine {
    /// Open the store and start the sync worker. Must run inside a tokio
    /// runtime.
    pub fn new(
        config: Config,
        scorer: Arc<dyn AnomalyScorer>,
        audit_client: Arc<dyn AuditLedgerClient>,
    ) -> Result<Arc<Self>> {
        let store = Arc::new(Store::open(&config)?);
        let metrics = Arc::new(Metrics::new()?);
        let tokens = TokenManager::new(store.clone(), &config.token)?;

        let sink = Arc::new(StoreSink {
            store: store.clone(),
            metrics: metrics.clone(),
        });
        let sync = spawn_sync_worker(
            audit_client,
            sink,
            config.sync.retry_policy(),
            config.sync.queue_depth,
        );

        Ok(Arc::new(Self {
            store,
            tokens,
            scorer,
            sync,
            config,
            metrics,
        }))
    }

    /// Underlying store, for queries the engine does not wrap
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Metrics registry handle
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    // Accounts

    /// Open a new account with a zero balance in the ledger currency
    pub fn open_account(&self, account_id: AccountId, owner: PrincipalId) -> Result<Account> {
        let now = chrono::Utc::now();
        let account = Account {
            account_id,
            owner,
            balance: Amount::ZERO,
            currency: self.config.currency,
            default_account: false,
            verified: false,
            created_at: now,
            updated_at: now,
        };
        self.store.create_account(account.clone())?;
        Ok(account)
    }

    /// Account lookup
    pub fn account(&self, id: &AccountId) -> Result<Account> {
        self.store.get_account(id)
    }

    // Tokens

    /// Issue a payment token bound to `receiving_account`
    pub fn issue_token(
        &self,
        receiving_account: &AccountId,
        fixed_amount: Option<Amount>,
        validity: Option<chrono::Duration>,
        issuer: &PrincipalId,
    ) -> Result<SignedToken> {
        if let Some(amount) = fixed_amount {
            self.check_amount(amount)?;
        }
        let token = self.tokens.issue(receiving_account, fixed_amount, validity, issuer)?;
        self.metrics.tokens_issued_total.inc();
        Ok(token)
    }

    /// Validate a wire token without redeeming it
    pub fn validate_token(&self, token_str: &str) -> Result<TokenPayload> {
        self.tokens.validate(token_str)
    }

    // Settlement paths

    /// Redeem a payment token: move value from `sender` into the token's
    /// receiving account and consume the token, atomically.
    ///
    /// `amount` must match the token's fixed amount when one is bound, and
    /// must be supplied when none is.
    pub fn settle_via_token(
        &self,
        token_str: &str,
        sender: &AccountId,
        amount: Option<Amount>,
    ) -> Result<Transfer> {
        let started = Instant::now();
        let result = self.settle_via_token_inner(token_str, sender, amount);
        self.finish_settlement(started, Channel::QrToken, result)
    }

    fn settle_via_token_inner(
        &self,
        token_str: &str,
        sender: &AccountId,
        amount: Option<Amount>,
    ) -> Result<Transfer> {
        let payload = self.tokens.validate(token_str)?;

        let amount = match (payload.fixed_amount, amount) {
            (Some(fixed), Some(got)) if got != fixed => {
                return Err(Error::AmountMismatch {
                    expected: fixed,
                    got,
                })
            }
            (Some(fixed), _) => fixed,
            (None, Some(got)) => got,
            (None, None) => {
                return Err(Error::InvalidAmount(
                    "open-amount token requires an amount".to_string(),
                ))
            }
        };
        self.check_amount(amount)?;

        if *sender == payload.receiving_account {
            return Err(Error::SelfTransfer(sender.to_string()));
        }

        let transfer = self.store.execute_transfer(TransferPlan {
            transfer_id: refgen::transfer_id(),
            sender: Some(sender.clone()),
            receiver: payload.receiving_account.clone(),
            amount,
            currency: self.config.currency,
            channel: Channel::QrToken,
            consume_token: Some(payload.token_id),
            metadata: HashMap::new(),
        })?;

        tracing::info!(
            transfer_id = %transfer.transfer_id,
            token_id = %payload.token_id,
            sender = %sender,
            receiver = %payload.receiving_account,
            amount = %amount,
            "token redeemed"
        );

        self.after_settlement(&transfer);
        Ok(transfer)
    }

    /// Post an inbound wage directly into `receiver`, settling immediately
    pub fn record_direct_wage(
        &self,
        receiver: &AccountId,
        amount: Amount,
        metadata: HashMap<String, String>,
    ) -> Result<Transfer> {
        let started = Instant::now();
        let result = (|| {
            self.check_amount(amount)?;
            let transfer = self.store.execute_transfer(TransferPlan {
                transfer_id: refgen::transfer_id(),
                sender: None,
                receiver: receiver.clone(),
                amount,
                currency: self.config.currency,
                channel: Channel::Manual,
                consume_token: None,
                metadata,
            })?;

            tracing::info!(
                transfer_id = %transfer.transfer_id,
                receiver = %receiver,
                amount = %amount,
                "direct wage recorded"
            );

            self.after_settlement(&transfer);
            Ok(transfer)
        })();
        self.finish_settlement(started, Channel::Manual, result)
    }

    /// Stage an inbound wage posting from a bulk upload.
    ///
    /// Creates a `Pending` entry with no balance effect; the receiver is not
    /// required to exist yet and is resolved at release.
    pub fn stage_direct_wage(
        &self,
        receiver: &AccountId,
        amount: Amount,
        metadata: HashMap<String, String>,
    ) -> Result<Transfer> {
        self.check_amount(amount)?;

        let now = chrono::Utc::now();
        let transfer = Transfer {
            transfer_id: refgen::transfer_id(),
            sender: None,
            receiver: receiver.clone(),
            amount,
            currency: self.config.currency,
            channel: Channel::Bulk,
            status: TransferStatus::Pending,
            status_history: vec![StatusEntry {
                status: TransferStatus::Pending,
                at: now,
                note: Some("staged from bulk upload".to_string()),
            }],
            anomaly_verdict: None,
            sync_state: SyncState::Unsynced,
            consumed_token: None,
            created_at: now,
            updated_at: now,
            metadata,
        };
        self.store.insert_pending_transfer(&transfer)?;
        Ok(transfer)
    }

    /// Release a staged posting: `Pending -> Completed`, crediting the
    /// receiver. A missing receiver marks the entry `Failed`.
    pub fn release_staged(&self, transfer_id: Uuid) -> Result<Transfer> {
        let started = Instant::now();
        let result = self.store.complete_staged(transfer_id).map(|transfer| {
            self.after_settlement(&transfer);
            transfer
        });
        self.finish_settlement(started, Channel::Bulk, result)
    }

    /// Cancel a staged posting before release
    pub fn cancel_transfer(&self, transfer_id: Uuid, reason: &str) -> Result<Transfer> {
        self.store.cancel_transfer(transfer_id, reason)
    }

    // Queries

    /// Transfer lookup
    pub fn transfer(&self, transfer_id: Uuid) -> Result<Transfer> {
        self.store.get_transfer(transfer_id)
    }

    /// Transfers touching an account, oldest first
    pub fn transfers_for_account(&self, account: &AccountId) -> Result<Vec<Transfer>> {
        self.store.transfers_for_account(account)
    }

    /// Transfers in a given status
    pub fn transfers_by_status(&self, status: TransferStatus) -> Result<Vec<Transfer>> {
        self.store.transfers_by_status(status)
    }

    /// Transfers created in `[from, to)`
    pub fn transfers_in_range(
        &self,
        from: chrono::DateTime<chrono::Utc>,
        to: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Transfer>> {
        self.store.transfers_in_range(from, to)
    }

    /// Unconsumed, unexpired tokens bound to an account
    pub fn active_tokens(&self, account: &AccountId) -> Result<Vec<TokenRecord>> {
        let now = chrono::Utc::now();
        Ok(self
            .store
            .active_tokens_for_account(account)?
            .into_iter()
            .filter(|record| !record.payload.is_expired(now))
            .collect())
    }

    fn check_amount(&self, amount: Amount) -> Result<()> {
        if amount.is_zero() {
            return Err(Error::InvalidAmount("amount must be positive".to_string()));
        }
        if amount > self.config.max_transfer_amount {
            return Err(Error::InvalidAmount(format!(
                "amount {} exceeds ceiling {}",
                amount, self.config.max_transfer_amount
            )));
        }
        Ok(())
    }

    fn finish_settlement(
        &self,
        started: Instant,
        channel: Channel,
        result: Result<Transfer>,
    ) -> Result<Transfer> {
        match &result {
            Ok(_) => {
                self.metrics
                    .settlements_total
                    .with_label_values(&[channel_label(channel)])
                    .inc();
                self.metrics
                    .settlement_duration_seconds
                    .observe(started.elapsed().as_secs_f64());
            }
            Err(e) => {
                self.metrics
                    .settlement_failures_total
                    .with_label_values(&[e.kind().as_str()])
                    .inc();
            }
        }
        result
    }

    // Post-settlement fan-out. Failures here never surface to the caller:
    // the transfer already settled.
    fn after_settlement(&self, transfer: &Transfer) {
        self.enqueue_sync(transfer);

        let ctx = ScoringContext {
            store: self.store.clone(),
            scorer: self.scorer.clone(),
            metrics: self.metrics.clone(),
            confidence_threshold: self.config.anomaly.confidence_threshold,
            history_months: self.config.anomaly.history_months as usize,
        };
        let transfer = transfer.clone();
        tokio::spawn(async move {
            if let Err(e) = ctx.score_transfer(&transfer).await {
                tracing::warn!(
                    transfer_id = %transfer.transfer_id,
                    error = %e,
                    "anomaly scoring skipped"
                );
            }
        });
    }

    fn enqueue_sync(&self, transfer: &Transfer) {
        let record = match serde_json::to_string(transfer) {
            Ok(payload) => SyncRecord::new(transfer.transfer_id, payload),
            Err(e) => {
                tracing::error!(
                    transfer_id = %transfer.transfer_id,
                    error = %e,
                    "transfer not serializable for audit sync"
                );
                return;
            }
        };

        // Mark Pending before handing off: once the worker has the record,
        // its terminal outcome must not be overwritten by this call.
        self.set_sync_state(transfer.transfer_id, SyncState::Pending);

        if let Err(e) = self.sync.enqueue(record) {
            self.metrics.ledger_sync_failures_total.inc();
            tracing::warn!(
                transfer_id = %transfer.transfer_id,
                error = %e,
                "audit sync enqueue failed"
            );
            self.set_sync_state(
                transfer.transfer_id,
                SyncState::SyncFailed {
                    reason: e.to_string(),
                },
            );
        }
    }

    fn set_sync_state(&self, transfer_id: Uuid, state: SyncState) {
        let result = self.store.update_transfer_with(transfer_id, |t| {
            t.sync_state = state.clone();
            Ok(())
        });
        if let Err(e) = result {
            tracing::error!(
                transfer_id = %transfer_id,
                error = %e,
                "failed to record sync state"
            );
        }
    }
}

/// Everything the spawned scoring task needs, detached from the engine
struct ScoringContext {
    store: Arc<Store>,
    scorer: Arc<dyn AnomalyScorer>,
    metrics: Arc<Metrics>,
    confidence_threshold: f64,
    history_months: usize,
}

impl ScoringContext {
    async fn score_transfer(&self, transfer: &Transfer) -> Result<()> {
        let features = self.features_for(transfer)?;
        let verdict = self
            .scorer
            .score(&features)
            .await
            .map_err(|e| Error::Other(format!("scorer failed: {}", e)))?;

        let flag = verdict.exceeds(self.confidence_threshold);

        self.store.update_transfer_with(transfer.transfer_id, |t| {
            t.anomaly_verdict = Some(verdict.clone());
            if flag && t.status.can_transition_to(TransferStatus::Flagged) {
                t.push_status(
                    TransferStatus::Flagged,
                    Some(verdict.reasons.join("; ")),
                );
            }
            Ok(())
        })?;

        if flag {
            self.raise_alert(transfer.transfer_id, &verdict)?;
        }
        Ok(())
    }

    fn raise_alert(&self, transfer_id: Uuid, verdict: &Verdict) -> Result<()> {
        let alert = AnomalyAlert {
            alert_id: refgen::alert_id(),
            transfer_id,
            verdict: verdict.clone(),
            status: AlertStatus::Open,
            created_at: chrono::Utc::now(),
        };
        self.store.insert_alert(&alert)?;
        self.metrics.anomaly_alerts_total.inc();

        tracing::warn!(
            alert_id = %alert.alert_id,
            transfer_id = %transfer_id,
            category = ?verdict.category,
            confidence = verdict.confidence,
            "anomaly alert raised"
        );
        Ok(())
    }

    /// Feature vector for the scorer, built from the receiver's credit
    /// history at settlement time.
    fn features_for(&self, transfer: &Transfer) -> Result<TransferFeatures> {
        let history = self.store.transfers_for_account(&transfer.receiver)?;
        let months = self.history_months;
        let mut monthly_totals = vec![0u64; months];
        let mut recent_credit_count = 0u32;
        let mut days_since_last_credit: Option<u32> = None;

        for prior in &history {
            if prior.transfer_id == transfer.transfer_id
                || prior.receiver != transfer.receiver
                || !prior.status.is_settled()
            {
                continue;
            }
            let age = transfer.created_at - prior.created_at;
            let days = age.num_days();
            if days < 0 {
                continue;
            }

            let bucket = (days / 30) as usize;
            if bucket < months {
                monthly_totals[bucket] =
                    monthly_totals[bucket].saturating_add(prior.amount.minor());
            }
            if age <= chrono::Duration::days(30) {
                recent_credit_count += 1;
            }
            let days = days as u32;
            days_since_last_credit = Some(match days_since_last_credit {
                Some(existing) => existing.min(days),
                None => days,
            });
        }

        let weekday = transfer.created_at.weekday();
        Ok(TransferFeatures {
            transfer_id: transfer.transfer_id,
            amount: transfer.amount.minor(),
            channel: transfer.channel.into(),
            hour_of_day: transfer.created_at.hour() as u8,
            weekend: matches!(weekday, chrono::Weekday::Sat | chrono::Weekday::Sun),
            monthly_totals,
            recent_credit_count,
            days_since_last_credit,
        })
    }
}

fn channel_label(channel: Channel) -> &'static str {
    match channel {
        Channel::Manual => "manual",
        Channel::QrToken => "qr_token",
        Channel::Bulk => "bulk",
    }
}

/// Writes sync outcomes back onto the transfer record
struct StoreSink {
    store: Arc<Store>,
    metrics: Arc<Metrics>,
}

impl SyncSink for StoreSink {
    fn record_outcome(&self, transfer_id: Uuid, outcome: SyncOutcome) {
        let state = match outcome {
            SyncOutcome::Synced(external_ref) => SyncState::Synced {
                external_ref: external_ref.0,
            },
            SyncOutcome::Failed(reason) => {
                self.metrics.ledger_sync_failures_total.inc();
                SyncState::SyncFailed { reason }
            }
        };

        let result = self.store.update_transfer_with(transfer_id, |t| {
            t.sync_state = state.clone();
            Ok(())
        });
        match result {
            Ok(_) => {
                tracing::debug!(transfer_id = %transfer_id, state = ?state, "sync state recorded")
            }
            Err(e) => {
                tracing::error!(
                    transfer_id = %transfer_id,
                    error = %e,
                    "failed to record sync outcome"
                )
            }
        }
    }
}
