//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `accounts` - Account records (key: account_id)
//! - `tokens` - Payment token records (key: token_id)
//! - `transfers` - Transfer ledger entries (key: transfer_id, UUIDv7 so
//!   iteration is time-ordered)
//! - `alerts` - Anomaly alerts (key: alert_id)
//! - `indices` - Account-to-transfer index (key: account_id || 0x00 || transfer_id)
//!
//! # Atomicity
//!
//! `execute_transfer` is the system's atomicity unit: debit, credit, token
//! consumption, and the transfer record commit in one `WriteBatch` while
//! per-account mutexes are held in ascending account-id order. Balances are
//! re-read under the locks, never cached across them.

use dashmap::DashMap;
use parking_lot::Mutex;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, IteratorMode, Options, WriteBatch, DB,
};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::token::{TokenRecord, TokenState};
use crate::types::{
    Account, AccountId, Amount, AnomalyAlert, Channel, Currency, PrincipalId, StatusEntry,
    SyncState, Transfer, TransferStatus,
};
use crate::{Error, Result};

const CF_ACCOUNTS: &str = "accounts";
const CF_TOKENS: &str = "tokens";
const CF_TRANSFERS: &str = "transfers";
const CF_ALERTS: &str = "alerts";
const CF_INDICES: &str = "indices";

// Index entries carry no value; the key is the data
const INDEX_VALUE: &[u8] = &[];

/// Everything `execute_transfer` needs to settle atomically
#[derive(Debug, Clone)]
pub struct TransferPlan {
    /// Transfer id (UUIDv7, from refgen)
    pub transfer_id: Uuid,

    /// Sender; None for inbound wage postings
    pub sender: Option<AccountId>,

    /// Receiver
    pub receiver: AccountId,

    /// Amount, positive
    pub amount: Amount,

    /// Currency
    pub currency: Currency,

    /// Channel
    pub channel: Channel,

    /// Token consumed with this transfer, if redeemed via QR
    pub consume_token: Option<Uuid>,

    /// Metadata carried onto the transfer
    pub metadata: HashMap<String, String>,
}

/// Storage wrapper for RocksDB plus the account lock table
pub struct Store {
    db: Arc<DB>,
    account_locks: DashMap<AccountId, Arc<Mutex<()>>>,
    transfer_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl Store {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_TOKENS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_TRANSFERS, Self::cf_options_archive()),
            ColumnFamilyDescriptor::new(CF_ALERTS, Self::cf_options_archive()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!("Opened settlement store at {:?}", path);

        Ok(Self {
            db: Arc::new(db),
            account_locks: DashMap::new(),
            transfer_locks: DashMap::new(),
        })
    }

    // Frequently read/written records: favor speed
    fn cf_options_hot() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    // Append-mostly ledger entries: favor compression
    fn cf_options_archive() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn account_lock(&self, id: &AccountId) -> Arc<Mutex<()>> {
        self.account_locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn transfer_lock(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.transfer_locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // Account operations

    /// Create a new account
    pub fn create_account(&self, account: Account) -> Result<()> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        let key = account.account_id.as_str().as_bytes();

        if self.db.get_cf(cf, key)?.is_some() {
            return Err(Error::AccountExists(account.account_id.to_string()));
        }

        self.db.put_cf(cf, key, bincode::serialize(&account)?)?;
        Ok(())
    }

    /// Get account by id
    pub fn get_account(&self, id: &AccountId) -> Result<Account> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        let bytes = self
            .db
            .get_cf(cf, id.as_str().as_bytes())?
            .ok_or_else(|| Error::AccountNotFound(id.to_string()))?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// All accounts owned by a principal
    pub fn accounts_for_principal(&self, owner: &PrincipalId) -> Result<Vec<Account>> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        let mut accounts = Vec::new();

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            let account: Account = bincode::deserialize(&value)?;
            if account.owner == *owner {
                accounts.push(account);
            }
        }

        Ok(accounts)
    }

    /// Sum of all balances; internal transfers must never change it
    pub fn total_balance(&self) -> Result<Amount> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        let mut total = Amount::ZERO;

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            let account: Account = bincode::deserialize(&value)?;
            total = total
                .checked_add(account.balance)
                .ok_or_else(|| Error::Other("total balance overflow".to_string()))?;
        }

        Ok(total)
    }

    // Token operations

    /// Insert or overwrite a token record
    pub fn put_token_record(&self, record: &TokenRecord) -> Result<()> {
        let cf = self.cf_handle(CF_TOKENS)?;
        self.db.put_cf(
            cf,
            record.payload.token_id.as_bytes(),
            bincode::serialize(record)?,
        )?;
        Ok(())
    }

    /// Get token record by id
    pub fn get_token_record(&self, token_id: Uuid) -> Result<Option<TokenRecord>> {
        let cf = self.cf_handle(CF_TOKENS)?;
        match self.db.get_cf(cf, token_id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Active (unconsumed) tokens bound to an account. Expiry filtering is
    /// the caller's concern; the store does not consult the clock.
    pub fn active_tokens_for_account(&self, account: &AccountId) -> Result<Vec<TokenRecord>> {
        let cf = self.cf_handle(CF_TOKENS)?;
        let mut tokens = Vec::new();

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            let record: TokenRecord = bincode::deserialize(&value)?;
            if record.payload.receiving_account == *account
                && matches!(record.state, TokenState::Active)
            {
                tokens.push(record);
            }
        }

        Ok(tokens)
    }

    // Transfer operations

    /// Execute a settlement atomically.
    ///
    /// Debits the sender (if any), credits the receiver, consumes the token
    /// (if any) via compare-and-set under the account locks, and writes the
    /// `Completed` transfer in one `WriteBatch`, all or nothing. On any error
    /// nothing is written.
    pub fn execute_transfer(&self, plan: TransferPlan) -> Result<Transfer> {
        if plan.amount.is_zero() {
            return Err(Error::InvalidAmount("amount must be positive".to_string()));
        }
        // A sender crediting itself would collapse to a single key where the
        // credit put overwrites the debit put, minting the amount.
        if plan.sender.as_ref() == Some(&plan.receiver) {
            return Err(Error::SelfTransfer(plan.receiver.to_string()));
        }

        // Ordered lock acquisition prevents inversion when two transfers
        // move money in opposite directions between the same pair.
        let mut lock_ids: Vec<&AccountId> =
            plan.sender.iter().chain(std::iter::once(&plan.receiver)).collect();
        lock_ids.sort();
        lock_ids.dedup();
        let locks: Vec<_> = lock_ids.iter().map(|id| self.account_lock(id)).collect();
        let _guards: Vec<_> = locks.iter().map(|l| l.lock()).collect();

        // Re-read everything under the locks
        let mut receiver = self.get_account(&plan.receiver)?;
        let mut sender = match &plan.sender {
            Some(id) => Some(self.get_account(id)?),
            None => None,
        };

        if let Some(sender_acc) = &sender {
            if sender_acc.balance < plan.amount {
                return Err(Error::InsufficientFunds {
                    required: plan.amount,
                    available: sender_acc.balance,
                });
            }
        }

        let token_record = match plan.consume_token {
            Some(token_id) => {
                let record = self
                    .get_token_record(token_id)?
                    .ok_or_else(|| Error::TokenMalformed("unknown token".to_string()))?;
                match record.state {
                    TokenState::Active => Some(record),
                    TokenState::Consumed { transfer_id, .. } => {
                        // Lost the compare-and-set race to a concurrent redemption
                        return Err(Error::TokenAlreadyConsumed(transfer_id));
                    }
                }
            }
            None => None,
        };

        let now = chrono::Utc::now();

        if let Some(sender_acc) = sender.as_mut() {
            sender_acc.balance = sender_acc
                .balance
                .checked_sub(plan.amount)
                .ok_or_else(|| Error::Other("debit underflow".to_string()))?;
            sender_acc.updated_at = now;
        }
        receiver.balance = receiver
            .balance
            .checked_add(plan.amount)
            .ok_or_else(|| Error::Other("receiver balance overflow".to_string()))?;
        receiver.updated_at = now;

        let transfer = Transfer {
            transfer_id: plan.transfer_id,
            sender: plan.sender.clone(),
            receiver: plan.receiver.clone(),
            amount: plan.amount,
            currency: plan.currency,
            channel: plan.channel,
            status: TransferStatus::Completed,
            status_history: vec![
                StatusEntry {
                    status: TransferStatus::Pending,
                    at: now,
                    note: None,
                },
                StatusEntry {
                    status: TransferStatus::Completed,
                    at: now,
                    note: None,
                },
            ],
            anomaly_verdict: None,
            sync_state: SyncState::Unsynced,
            consumed_token: plan.consume_token,
            created_at: now,
            updated_at: now,
            metadata: plan.metadata,
        };

        let mut batch = WriteBatch::default();
        let cf_accounts = self.cf_handle(CF_ACCOUNTS)?;
        let cf_transfers = self.cf_handle(CF_TRANSFERS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        if let Some(sender_acc) = &sender {
            batch.put_cf(
                cf_accounts,
                sender_acc.account_id.as_str().as_bytes(),
                bincode::serialize(sender_acc)?,
            );
            batch.put_cf(
                cf_indices,
                index_key(&sender_acc.account_id, transfer.transfer_id),
                INDEX_VALUE,
            );
        }
        batch.put_cf(
            cf_accounts,
            receiver.account_id.as_str().as_bytes(),
            bincode::serialize(&receiver)?,
        );
        batch.put_cf(
            cf_indices,
            index_key(&receiver.account_id, transfer.transfer_id),
            INDEX_VALUE,
        );
        batch.put_cf(
            cf_transfers,
            transfer.transfer_id.as_bytes(),
            bincode::serialize(&transfer)?,
        );

        if let Some(mut record) = token_record {
            record.state = TokenState::Consumed {
                transfer_id: transfer.transfer_id,
                consumed_at: now,
            };
            let cf_tokens = self.cf_handle(CF_TOKENS)?;
            batch.put_cf(cf_tokens, record.payload.token_id.as_bytes(), bincode::serialize(&record)?);
        }

        self.db.write(batch)?;

        Ok(transfer)
    }

    /// Insert a staged transfer (`Pending`, no balance effect)
    pub fn insert_pending_transfer(&self, transfer: &Transfer) -> Result<()> {
        if transfer.status != TransferStatus::Pending {
            return Err(Error::InvalidStateTransition {
                from: transfer.status.to_string(),
                to: TransferStatus::Pending.to_string(),
            });
        }

        let mut batch = WriteBatch::default();
        let cf_transfers = self.cf_handle(CF_TRANSFERS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        batch.put_cf(
            cf_transfers,
            transfer.transfer_id.as_bytes(),
            bincode::serialize(transfer)?,
        );
        batch.put_cf(cf_indices, index_key(&transfer.receiver, transfer.transfer_id), INDEX_VALUE);
        if let Some(sender) = &transfer.sender {
            batch.put_cf(cf_indices, index_key(sender, transfer.transfer_id), INDEX_VALUE);
        }

        self.db.write(batch)?;
        Ok(())
    }

    /// Settle a staged transfer: `Pending -> Completed`, crediting the
    /// receiver atomically with the status change.
    pub fn complete_staged(&self, transfer_id: Uuid) -> Result<Transfer> {
        let tlock = self.transfer_lock(transfer_id);
        let _tguard = tlock.lock();

        let mut transfer = self.get_transfer(transfer_id)?;
        if !transfer.status.can_transition_to(TransferStatus::Completed) {
            return Err(Error::InvalidStateTransition {
                from: transfer.status.to_string(),
                to: TransferStatus::Completed.to_string(),
            });
        }

        let alock = self.account_lock(&transfer.receiver);
        let _aguard = alock.lock();

        let mut receiver = match self.get_account(&transfer.receiver) {
            Ok(account) => account,
            Err(Error::AccountNotFound(id)) => {
                // Receiver vanished between staging and release; record the
                // failure so the entry is not stuck pending forever.
                transfer.push_status(
                    TransferStatus::Failed,
                    Some(format!("receiver account {} not found at release", id)),
                );
                self.put_transfer(&transfer)?;
                return Err(Error::AccountNotFound(id));
            }
            Err(e) => return Err(e),
        };

        let now = chrono::Utc::now();
        receiver.balance = receiver
            .balance
            .checked_add(transfer.amount)
            .ok_or_else(|| Error::Other("receiver balance overflow".to_string()))?;
        receiver.updated_at = now;
        transfer.push_status(TransferStatus::Completed, Some("staged posting released".to_string()));

        let mut batch = WriteBatch::default();
        let cf_accounts = self.cf_handle(CF_ACCOUNTS)?;
        let cf_transfers = self.cf_handle(CF_TRANSFERS)?;
        batch.put_cf(
            cf_accounts,
            receiver.account_id.as_str().as_bytes(),
            bincode::serialize(&receiver)?,
        );
        batch.put_cf(
            cf_transfers,
            transfer.transfer_id.as_bytes(),
            bincode::serialize(&transfer)?,
        );
        self.db.write(batch)?;

        Ok(transfer)
    }

    /// Cancel a staged transfer. Legal only from `Pending`.
    pub fn cancel_transfer(&self, transfer_id: Uuid, reason: &str) -> Result<Transfer> {
        let tlock = self.transfer_lock(transfer_id);
        let _tguard = tlock.lock();

        let mut transfer = self.get_transfer(transfer_id)?;
        if !transfer.status.can_transition_to(TransferStatus::Cancelled) {
            return Err(Error::InvalidStateTransition {
                from: transfer.status.to_string(),
                to: TransferStatus::Cancelled.to_string(),
            });
        }

        transfer.push_status(TransferStatus::Cancelled, Some(reason.to_string()));
        self.put_transfer(&transfer)?;
        Ok(transfer)
    }

    /// Get transfer by id
    pub fn get_transfer(&self, transfer_id: Uuid) -> Result<Transfer> {
        let cf = self.cf_handle(CF_TRANSFERS)?;
        let bytes = self
            .db
            .get_cf(cf, transfer_id.as_bytes())?
            .ok_or(Error::TransferNotFound(transfer_id))?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// Read-modify-write a transfer under its per-transfer lock.
    ///
    /// Used for the post-settlement fields that may change after `Completed`
    /// (anomaly verdict, flag, sync state) without racing each other.
    pub fn update_transfer_with(
        &self,
        transfer_id: Uuid,
        f: impl FnOnce(&mut Transfer) -> Result<()>,
    ) -> Result<Transfer> {
        let tlock = self.transfer_lock(transfer_id);
        let _tguard = tlock.lock();

        let mut transfer = self.get_transfer(transfer_id)?;
        f(&mut transfer)?;
        transfer.updated_at = chrono::Utc::now();
        self.put_transfer(&transfer)?;
        Ok(transfer)
    }

    fn put_transfer(&self, transfer: &Transfer) -> Result<()> {
        let cf = self.cf_handle(CF_TRANSFERS)?;
        self.db
            .put_cf(cf, transfer.transfer_id.as_bytes(), bincode::serialize(transfer)?)?;
        Ok(())
    }

    /// Transfers touching an account, oldest first (index keys carry UUIDv7)
    pub fn transfers_for_account(&self, account: &AccountId) -> Result<Vec<Transfer>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let prefix = index_prefix(account);

        let mut transfers = Vec::new();
        let iter = self.db.iterator_cf(
            cf_indices,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let id_bytes: [u8; 16] = key[prefix.len()..]
                .try_into()
                .map_err(|_| Error::Storage("corrupt index key".to_string()))?;
            transfers.push(self.get_transfer(Uuid::from_bytes(id_bytes))?);
        }

        Ok(transfers)
    }

    /// Transfers in a given status
    pub fn transfers_by_status(&self, status: TransferStatus) -> Result<Vec<Transfer>> {
        let cf = self.cf_handle(CF_TRANSFERS)?;
        let mut transfers = Vec::new();

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            let transfer: Transfer = bincode::deserialize(&value)?;
            if transfer.status == status {
                transfers.push(transfer);
            }
        }

        Ok(transfers)
    }

    /// Transfers created in `[from, to)`, oldest first
    pub fn transfers_in_range(
        &self,
        from: chrono::DateTime<chrono::Utc>,
        to: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Transfer>> {
        let cf = self.cf_handle(CF_TRANSFERS)?;
        let mut transfers = Vec::new();

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            let transfer: Transfer = bincode::deserialize(&value)?;
            if transfer.created_at >= from && transfer.created_at < to {
                transfers.push(transfer);
            }
        }

        Ok(transfers)
    }

    // Alert operations

    /// Insert an anomaly alert
    pub fn insert_alert(&self, alert: &AnomalyAlert) -> Result<()> {
        let cf = self.cf_handle(CF_ALERTS)?;
        self.db
            .put_cf(cf, alert.alert_id.as_bytes(), bincode::serialize(alert)?)?;
        Ok(())
    }

    /// Alerts referencing a transfer
    pub fn alerts_for_transfer(&self, transfer_id: Uuid) -> Result<Vec<AnomalyAlert>> {
        let cf = self.cf_handle(CF_ALERTS)?;
        let mut alerts = Vec::new();

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            let alert: AnomalyAlert = bincode::deserialize(&value)?;
            if alert.transfer_id == transfer_id {
                alerts.push(alert);
            }
        }

        Ok(alerts)
    }
}

fn index_prefix(account: &AccountId) -> Vec<u8> {
    let mut prefix = account.as_str().as_bytes().to_vec();
    prefix.push(0);
    prefix
}

fn index_key(account: &AccountId, transfer_id: Uuid) -> Vec<u8> {
    let mut key = index_prefix(account);
    key.extend_from_slice(transfer_id.as_bytes());
    key
}
