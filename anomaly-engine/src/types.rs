//! Core types for anomaly scoring

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;

/// Channel a transfer arrived through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferChannel {
    /// Manually entered transfer
    Manual,
    /// QR token redemption
    QrToken,
    /// Bulk wage upload
    Bulk,
}

/// Features of a single transfer plus the receiver's recent history.
///
/// Amounts are integer minor-units; history entries are per-month credit
/// totals, most recent last.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferFeatures {
    /// Transfer being scored
    pub transfer_id: Uuid,

    /// Amount in minor units
    pub amount: u64,

    /// Channel
    pub channel: TransferChannel,

    /// Hour of day (0-23, UTC)
    pub hour_of_day: u8,

    /// Transfer landed on a weekend
    pub weekend: bool,

    /// Monthly credit totals for the receiver, most recent last
    pub monthly_totals: Vec<u64>,

    /// Credits to the receiver in the last 30 days
    pub recent_credit_count: u32,

    /// Days since the receiver's previous credit (None for first credit)
    pub days_since_last_credit: Option<u32>,
}

impl TransferFeatures {
    /// Mean of the receiver's monthly totals (0 when no history)
    pub fn baseline_monthly(&self) -> f64 {
        if self.monthly_totals.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.monthly_totals.iter().sum();
        sum as f64 / self.monthly_totals.len() as f64
    }
}

/// Anomaly category, mirrors the upstream pattern model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalyCategory {
    /// Amount several times the receiver's own baseline
    SuddenSpike,
    /// Suspiciously round amount
    RoundAmount,
    /// Many transfers just under a reporting threshold
    Structuring,
    /// Transfer frequency changed dramatically
    VelocityChange,
    /// Large activity after a long dormant period
    DormantBurst,
    /// Nothing unusual
    Normal,
}

/// Scoring verdict: a confidence in [0, 1] and the dominant category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    /// Transfer the verdict applies to
    pub transfer_id: Uuid,

    /// Confidence that the transfer is anomalous, 0.0 - 1.0
    pub confidence: f64,

    /// Dominant category
    pub category: AnomalyCategory,

    /// Human-readable reasons, one per triggered rule
    pub reasons: Vec<String>,

    /// Scoring timestamp
    pub scored_at: chrono::DateTime<chrono::Utc>,
}

impl Verdict {
    /// Verdict for an unremarkable transfer
    pub fn normal(transfer_id: Uuid) -> Self {
        Self {
            transfer_id,
            confidence: 0.0,
            category: AnomalyCategory::Normal,
            reasons: vec![],
            scored_at: chrono::Utc::now(),
        }
    }

    /// Whether the verdict crosses the given alert threshold
    pub fn exceeds(&self, threshold: f64) -> bool {
        self.confidence > threshold
    }
}

/// Scoring seam. Implementations may call out to an external model;
/// callers must treat any error as advisory and absorb it.
#[async_trait]
pub trait AnomalyScorer: Send + Sync {
    /// Score a transfer's features
    async fn score(&self, features: &TransferFeatures) -> Result<Verdict>;
}
