//! Settlement Core for WageRail
//!
//! Wage settlement and transaction ledger: short-lived single-use payment
//! tokens, atomic zero-sum balance transfers, an immutable-intent transfer
//! ledger, advisory anomaly scoring, and best-effort mirroring to an external
//! audit ledger.
//!
//! The atomicity unit is [`store::Store::execute_transfer`]: debit, credit,
//! token consumption, and the ledger entry commit together or not at all.
//! Everything after settlement (scoring, audit sync) is asynchronous and
//! advisory.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod refgen;
pub mod store;
pub mod token;
pub mod types;

pub use config::Config;
pub use engine::SettlementEngine;
pub use error::{Error, ErrorKind, Result};
pub use metrics::Metrics;
pub use store::{Store, TransferPlan};
pub use token::{SignedToken, TokenManager, TokenPayload, TokenRecord, TokenState};
pub use types::{
    Account, AccountId, AlertStatus, Amount, AnomalyAlert, Channel, Currency, PrincipalId,
    StatusEntry, SyncState, Transfer, TransferStatus,
};
