//! Error types for the settlement core

use thiserror::Error;

use crate::types::Amount;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Token payload could not be decoded or authenticated
    #[error("Token malformed: {0}")]
    TokenMalformed(String),

    /// Token past its expiry
    #[error("Token expired at {0}")]
    TokenExpired(chrono::DateTime<chrono::Utc>),

    /// Token already redeemed, by this or a concurrent call
    #[error("Token already consumed by transfer {0}")]
    TokenAlreadyConsumed(uuid::Uuid),

    /// Redemption amount differs from the token's fixed amount
    #[error("Amount mismatch: token is fixed at {expected}, got {got}")]
    AmountMismatch {
        /// Amount bound to the token
        expected: Amount,
        /// Amount the caller attempted
        got: Amount,
    },

    /// Zero amount or amount above the configured ceiling
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Sender and receiver are the same account
    #[error("Self transfer rejected for account {0}")]
    SelfTransfer(String),

    /// Account not found
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Account already exists
    #[error("Account already exists: {0}")]
    AccountExists(String),

    /// Sender balance below the transfer amount
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        /// Amount the transfer needs
        required: Amount,
        /// Sender's current balance
        available: Amount,
    },

    /// Illegal status transition
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// Transfer not found
    #[error("Transfer not found: {0}")]
    TransferNotFound(uuid::Uuid),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Concurrency error
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Coarse error classification for callers mapping to user-facing messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or out-of-policy input
    Validation,
    /// Missing account or insufficient funds
    Resource,
    /// Lost race (token compare-and-set, mailbox closed)
    Concurrency,
    /// Illegal lifecycle transition
    State,
    /// Storage, serialization, config, IO
    Internal,
}

impl ErrorKind {
    /// Stable label, used for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Resource => "resource",
            ErrorKind::Concurrency => "concurrency",
            ErrorKind::State => "state",
            ErrorKind::Internal => "internal",
        }
    }
}

impl Error {
    /// Classify the error for the caller
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::TokenMalformed(_)
            | Error::TokenExpired(_)
            | Error::AmountMismatch { .. }
            | Error::InvalidAmount(_)
            | Error::SelfTransfer(_)
            | Error::AccountExists(_) => ErrorKind::Validation,
            Error::AccountNotFound(_)
            | Error::InsufficientFunds { .. }
            | Error::TransferNotFound(_) => ErrorKind::Resource,
            Error::TokenAlreadyConsumed(_) | Error::Concurrency(_) => ErrorKind::Concurrency,
            Error::InvalidStateTransition { .. } => ErrorKind::State,
            Error::Storage(_)
            | Error::Serialization(_)
            | Error::Config(_)
            | Error::Io(_)
            | Error::Other(_) => ErrorKind::Internal,
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
