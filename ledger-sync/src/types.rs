//! Core types for ledger sync

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use uuid::Uuid;

/// Reference handed back by the external ledger on successful submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRef(pub String);

impl std::fmt::Display for ExternalRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One completed transfer queued for mirroring.
///
/// The payload is the transfer's JSON view; the content hash lets the audit
/// side detect divergence without parsing the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Transfer being mirrored
    pub transfer_id: Uuid,

    /// SHA-256 of the payload bytes
    pub content_hash: [u8; 32],

    /// Transfer view, JSON-encoded
    pub payload: String,

    /// Enqueue time
    pub enqueued_at: DateTime<Utc>,
}

impl SyncRecord {
    /// Build a record from a transfer id and its JSON view
    pub fn new(transfer_id: Uuid, payload: String) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(payload.as_bytes());
        let content_hash: [u8; 32] = hasher.finalize().into();

        Self {
            transfer_id,
            content_hash,
            payload,
            enqueued_at: Utc::now(),
        }
    }
}

/// Retry policy for submissions: exponential backoff with jitter, bounded in
/// both attempts and wall-clock time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts per record (including the first)
    pub max_attempts: u32,

    /// Initial delay (milliseconds)
    pub initial_delay_ms: u64,

    /// Delay cap (milliseconds)
    pub max_delay_ms: u64,

    /// Backoff multiplier
    pub backoff_multiplier: f64,

    /// Jitter factor (fraction of the delay)
    pub jitter_factor: f64,

    /// Wall-clock budget per record (milliseconds)
    pub max_elapsed_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            max_elapsed_ms: 120_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before the nth retry (attempt 0 = first retry)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay_ms as f64);

        // Jitter prevents thundering herd on recovery
        let jitter_range = capped * self.jitter_factor;
        let jitter = (rand::random::<f64>() - 0.5) * jitter_range * 2.0;

        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

/// Outcome reported back to the owning store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Accepted by the external ledger
    Synced(ExternalRef),
    /// Retries exhausted; surfaced for manual reconciliation
    Failed(String),
}

/// Callback seam into the caller's store. The worker reports the terminal
/// outcome for each record; the sink must not fail settlement state.
pub trait SyncSink: Send + Sync {
    /// Record the terminal sync outcome for a transfer
    fn record_outcome(&self, transfer_id: Uuid, outcome: SyncOutcome);
}
