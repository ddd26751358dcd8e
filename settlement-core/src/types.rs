//! Core types for the settlement ledger
//!
//! All money is integer minor-units (`Amount`); balances are non-negative by
//! construction and arithmetic is checked, never floating point.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use anomaly_engine::Verdict;

/// Currency amount in integer minor units (paise, cents)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    /// Zero amount
    pub const ZERO: Amount = Amount(0);

    /// Create from minor units
    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    /// Raw minor units
    pub const fn minor(&self) -> u64 {
        self.0
    }

    /// Whether the amount is zero
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked addition
    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    /// Checked subtraction; None when it would go negative
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// ISO 4217 currency code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Currency {
    /// Indian Rupee
    INR,
    /// US Dollar
    USD,
    /// Euro
    EUR,
}

impl Currency {
    /// ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::INR => "INR",
            Currency::USD => "USD",
            Currency::EUR => "EUR",
        }
    }

    /// Parse from string
    pub fn from_code(s: &str) -> Option<Self> {
        match s {
            "INR" => Some(Currency::INR),
            "USD" => Some(Currency::USD),
            "EUR" => Some(Currency::EUR),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Account identifier
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Principal (worker, employer, official) identifier from the authz layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrincipalId(String);

impl PrincipalId {
    /// Create new principal ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Financial account owned by exactly one principal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Account identifier
    pub account_id: AccountId,

    /// Owning principal
    pub owner: PrincipalId,

    /// Current balance, minor units, never negative
    pub balance: Amount,

    /// Currency
    pub currency: Currency,

    /// Default account for the owner
    pub default_account: bool,

    /// Bank verification flag
    pub verified: bool,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last balance/metadata update
    pub updated_at: DateTime<Utc>,
}

/// Channel a transfer was initiated through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    /// Manually entered transfer
    Manual,
    /// QR token redemption
    QrToken,
    /// Bulk wage upload
    Bulk,
}

impl From<Channel> for anomaly_engine::TransferChannel {
    fn from(channel: Channel) -> Self {
        match channel {
            Channel::Manual => anomaly_engine::TransferChannel::Manual,
            Channel::QrToken => anomaly_engine::TransferChannel::QrToken,
            Channel::Bulk => anomaly_engine::TransferChannel::Bulk,
        }
    }
}

/// Transfer status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    /// Staged, no balance effect yet
    Pending,
    /// Settled; amount and parties are frozen
    Completed,
    /// Cancelled before settlement
    Cancelled,
    /// Failed before settlement
    Failed,
    /// Completed and flagged by anomaly scoring (still settled)
    Flagged,
}

impl TransferStatus {
    /// Legal status transitions
    pub fn can_transition_to(&self, to: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self, to),
            (Pending, Completed) | (Pending, Cancelled) | (Pending, Failed) | (Completed, Flagged)
        )
    }

    /// Whether the transfer has settled (balances moved)
    pub fn is_settled(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Flagged)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Completed => "completed",
            TransferStatus::Cancelled => "cancelled",
            TransferStatus::Failed => "failed",
            TransferStatus::Flagged => "flagged",
        };
        write!(f, "{}", s)
    }
}

/// One entry in a transfer's status history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEntry {
    /// Status entered
    pub status: TransferStatus,

    /// When
    pub at: DateTime<Utc>,

    /// Optional operator/system note
    pub note: Option<String>,
}

/// External-ledger sync state, tracked independently of settlement state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    /// Not yet handed to the sync worker
    Unsynced,
    /// Queued or in flight
    Pending,
    /// Accepted by the external ledger
    Synced {
        /// Reference returned by the external ledger
        external_ref: String,
    },
    /// Retries exhausted; needs manual reconciliation
    SyncFailed {
        /// Last submission error
        reason: String,
    },
}

/// One value movement between accounts (the ledger entry)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    /// Globally unique, externally referenceable id (UUIDv7)
    pub transfer_id: Uuid,

    /// Sender account; None for inbound wage postings
    pub sender: Option<AccountId>,

    /// Receiver account
    pub receiver: AccountId,

    /// Amount, positive minor units
    pub amount: Amount,

    /// Currency
    pub currency: Currency,

    /// Initiating channel
    pub channel: Channel,

    /// Current status
    pub status: TransferStatus,

    /// Ordered status history
    pub status_history: Vec<StatusEntry>,

    /// Anomaly verdict, None until scored
    pub anomaly_verdict: Option<Verdict>,

    /// External-ledger sync state
    pub sync_state: SyncState,

    /// Token consumed by this transfer, if redeemed via QR
    pub consumed_token: Option<Uuid>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last update (status, verdict, or sync state)
    pub updated_at: DateTime<Utc>,

    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Transfer {
    /// Append a status entry and move to the new status.
    ///
    /// Callers must have checked `can_transition_to`; this only records.
    pub fn push_status(&mut self, status: TransferStatus, note: Option<String>) {
        let now = Utc::now();
        self.status_history.push(StatusEntry { status, at: now, note });
        self.status = status;
        self.updated_at = now;
    }
}

/// Review status of an anomaly alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertStatus {
    /// Awaiting review
    Open,
    /// Reviewed by an official
    Reviewed,
    /// Dismissed as benign
    Dismissed,
}

/// Alert raised when a verdict crosses the confidence threshold.
///
/// Advisory only: it references the transfer and never blocks or reverses it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyAlert {
    /// Alert identifier
    pub alert_id: Uuid,

    /// Triggering transfer
    pub transfer_id: Uuid,

    /// Verdict that crossed the threshold
    pub verdict: Verdict,

    /// Review status
    pub status: AlertStatus,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}
