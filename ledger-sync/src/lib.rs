//! Ledger Sync for WageRail
//!
//! Best-effort, at-least-once mirroring of completed transfers to an external
//! append-only audit ledger. Sync state is tracked per transfer, independently
//! of settlement state; a sync failure never touches a completed settlement.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod types;
pub mod worker;

pub use client::{AuditLedgerClient, MockAuditLedger};
pub use error::{Error, Result};
pub use types::{ExternalRef, RetryPolicy, SyncOutcome, SyncRecord, SyncSink};
pub use worker::{spawn_sync_worker, SyncHandle};
