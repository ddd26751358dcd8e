//! Audit ledger client seam
//!
//! The external ledger is a write-mostly audit mirror; this module only
//! defines the submission boundary and a mock for tests. Consensus, block
//! production, and replication belong to the ledger itself.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::types::{ExternalRef, SyncRecord};
use crate::{Error, Result};

/// Submission boundary to the external append-only ledger
#[async_trait]
pub trait AuditLedgerClient: Send + Sync {
    /// Submit one record; returns the ledger's reference on acceptance
    async fn submit(&self, record: &SyncRecord) -> Result<ExternalRef>;
}

/// In-process mock ledger.
///
/// Fails the first `fail_first` submissions, then accepts everything and
/// remembers accepted records for assertions.
pub struct MockAuditLedger {
    fail_first: u32,
    attempts: AtomicU32,
    accepted: Mutex<Vec<SyncRecord>>,
}

impl MockAuditLedger {
    /// Mock that accepts every submission
    pub fn accepting() -> Self {
        Self::failing_first(0)
    }

    /// Mock that fails the first `n` submissions
    pub fn failing_first(n: u32) -> Self {
        Self {
            fail_first: n,
            attempts: AtomicU32::new(0),
            accepted: Mutex::new(Vec::new()),
        }
    }

    /// Total submission attempts seen
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Records accepted so far
    pub fn accepted(&self) -> Vec<SyncRecord> {
        self.accepted.lock().clone()
    }
}

#[async_trait]
impl AuditLedgerClient for MockAuditLedger {
    async fn submit(&self, record: &SyncRecord) -> Result<ExternalRef> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return Err(Error::Submission("mock ledger unavailable".to_string()));
        }

        self.accepted.lock().push(record.clone());
        Ok(ExternalRef(format!("audit-{}", record.transfer_id)))
    }
}
