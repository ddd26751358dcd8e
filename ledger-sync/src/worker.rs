//! Background sync worker
//!
//! One tokio task drains a bounded queue of sync records. Each record is
//! submitted with bounded exponential-backoff retries; the terminal outcome
//! is reported through the `SyncSink`. Settlement never waits on this path
//! beyond the enqueue itself.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

use crate::client::AuditLedgerClient;
use crate::types::{RetryPolicy, SyncOutcome, SyncRecord, SyncSink};
use crate::{Error, Result};

/// Handle for enqueueing records to the worker
#[derive(Clone)]
pub struct SyncHandle {
    sender: mpsc::Sender<SyncRecord>,
}

impl SyncHandle {
    /// Enqueue a record without blocking.
    ///
    /// A full queue or a stopped worker is an error for the caller to log;
    /// it must never fail the settlement that produced the record.
    pub fn enqueue(&self, record: SyncRecord) -> Result<()> {
        self.sender.try_send(record).map_err(|e| match e {
            mpsc::error::TrySendError::Full(r) => {
                Error::Queue(format!("sync queue full, dropping transfer {}", r.transfer_id))
            }
            mpsc::error::TrySendError::Closed(r) => {
                Error::Queue(format!("sync worker stopped, dropping transfer {}", r.transfer_id))
            }
        })
    }
}

/// Spawn the sync worker task
pub fn spawn_sync_worker(
    client: Arc<dyn AuditLedgerClient>,
    sink: Arc<dyn SyncSink>,
    policy: RetryPolicy,
    queue_depth: usize,
) -> SyncHandle {
    let (tx, rx) = mpsc::channel(queue_depth);

    tokio::spawn(run_worker(client, sink, policy, rx));

    SyncHandle { sender: tx }
}

async fn run_worker(
    client: Arc<dyn AuditLedgerClient>,
    sink: Arc<dyn SyncSink>,
    policy: RetryPolicy,
    mut rx: mpsc::Receiver<SyncRecord>,
) {
    while let Some(record) = rx.recv().await {
        let transfer_id = record.transfer_id;
        let outcome = match submit_with_retry(client.as_ref(), &policy, &record).await {
            Ok(external_ref) => {
                tracing::info!(%transfer_id, %external_ref, "transfer mirrored to audit ledger");
                SyncOutcome::Synced(external_ref)
            }
            Err(e) => {
                tracing::error!(%transfer_id, error = %e, "audit sync exhausted, needs manual reconciliation");
                SyncOutcome::Failed(e.to_string())
            }
        };

        sink.record_outcome(transfer_id, outcome);
    }

    tracing::debug!("sync worker queue closed, exiting");
}

async fn submit_with_retry(
    client: &dyn AuditLedgerClient,
    policy: &RetryPolicy,
    record: &SyncRecord,
) -> Result<crate::types::ExternalRef> {
    let started = Instant::now();
    let mut last_error = None;

    for attempt in 0..policy.max_attempts {
        if attempt > 0 {
            let delay = policy.delay_for(attempt - 1);
            if started.elapsed() + delay
                > std::time::Duration::from_millis(policy.max_elapsed_ms)
            {
                break;
            }
            tracing::warn!(
                transfer_id = %record.transfer_id,
                attempt,
                max_attempts = policy.max_attempts,
                ?delay,
                "retrying audit submission"
            );
            tokio::time::sleep(delay).await;
        }

        match client.submit(record).await {
            Ok(external_ref) => return Ok(external_ref),
            Err(e) => {
                tracing::warn!(
                    transfer_id = %record.transfer_id,
                    attempt = attempt + 1,
                    error = %e,
                    "audit submission failed"
                );
                last_error = Some(e);
            }
        }
    }

    Err(Error::RetriesExhausted {
        attempts: policy.max_attempts,
        last_error: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "wall-clock budget exceeded".to_string()),
    })
}
