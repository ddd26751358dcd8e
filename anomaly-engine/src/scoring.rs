//! Local heuristic scorer
//!
//! Pattern-based rules against the receiver's own history, not absolute
//! thresholds. Each rule contributes to the confidence; the dominant rule
//! becomes the verdict category.

use async_trait::async_trait;

use crate::types::{AnomalyCategory, AnomalyScorer, TransferFeatures, Verdict};
use crate::Result;

/// Amount multiple over the receiver's own baseline that counts as a spike
const SPIKE_MULTIPLIER: f64 = 3.0;

/// Reporting threshold used by the structuring rule (minor units)
const STRUCTURING_CEILING: u64 = 50_000_00;

/// Window just under the ceiling that counts as structuring (minor units)
const STRUCTURING_BAND: u64 = 5_000_00;

/// Dormancy cutoff in days
const DORMANT_DAYS: u32 = 90;

/// Credits in 30 days that count as a velocity surge
const VELOCITY_SURGE: u32 = 20;

/// Deterministic rule-based scorer.
///
/// Stands in for the external pattern model when it is not deployed; also
/// the reference behavior the external model is validated against.
pub struct LocalScorer;

impl LocalScorer {
    /// Create new scorer
    pub fn new() -> Self {
        Self
    }

    fn evaluate(&self, features: &TransferFeatures) -> Verdict {
        let mut hits: Vec<(AnomalyCategory, f64, String)> = Vec::new();

        // Spike vs the receiver's own monthly baseline
        let baseline = features.baseline_monthly();
        if baseline > 0.0 && features.amount as f64 > baseline * SPIKE_MULTIPLIER {
            let ratio = features.amount as f64 / baseline;
            hits.push((
                AnomalyCategory::SuddenSpike,
                (0.4 + ratio / 20.0).min(0.9),
                format!("amount is {:.1}x the receiver's monthly baseline", ratio),
            ));
        }

        // Round amounts (whole thousands of major units) are weak evidence
        if features.amount >= 10_000_00 && features.amount % 1_000_00 == 0 {
            hits.push((
                AnomalyCategory::RoundAmount,
                0.3,
                "round amount".to_string(),
            ));
        }

        // Just under the reporting ceiling
        if features.amount < STRUCTURING_CEILING
            && features.amount >= STRUCTURING_CEILING - STRUCTURING_BAND
            && features.recent_credit_count >= 3
        {
            hits.push((
                AnomalyCategory::Structuring,
                0.7,
                "repeated amounts just below the reporting threshold".to_string(),
            ));
        }

        // Burst after dormancy
        if let Some(days) = features.days_since_last_credit {
            if days >= DORMANT_DAYS && baseline > 0.0 && features.amount as f64 > baseline {
                hits.push((
                    AnomalyCategory::DormantBurst,
                    0.6,
                    format!("large credit after {} dormant days", days),
                ));
            }
        }

        // Velocity surge
        if features.recent_credit_count >= VELOCITY_SURGE {
            hits.push((
                AnomalyCategory::VelocityChange,
                0.5,
                format!("{} credits in 30 days", features.recent_credit_count),
            ));
        }

        // Off-hours weekend activity amplifies an existing hit
        if features.weekend && !(6..=22).contains(&features.hour_of_day) && !hits.is_empty() {
            for hit in &mut hits {
                hit.1 = (hit.1 + 0.1).min(1.0);
            }
        }

        match hits
            .iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        {
            None => Verdict::normal(features.transfer_id),
            Some((category, confidence, _)) => Verdict {
                transfer_id: features.transfer_id,
                confidence: *confidence,
                category: *category,
                reasons: hits.iter().map(|(_, _, r)| r.clone()).collect(),
                scored_at: chrono::Utc::now(),
            },
        }
    }
}

impl Default for LocalScorer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnomalyScorer for LocalScorer {
    async fn score(&self, features: &TransferFeatures) -> Result<Verdict> {
        let verdict = self.evaluate(features);
        tracing::debug!(
            transfer_id = %verdict.transfer_id,
            category = ?verdict.category,
            confidence = verdict.confidence,
            "transfer scored"
        );
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransferChannel;
    use uuid::Uuid;

    fn base_features(amount: u64) -> TransferFeatures {
        TransferFeatures {
            transfer_id: Uuid::new_v4(),
            amount,
            channel: TransferChannel::QrToken,
            hour_of_day: 11,
            weekend: false,
            monthly_totals: vec![100_000, 110_000, 95_000],
            recent_credit_count: 4,
            days_since_last_credit: Some(7),
        }
    }

    #[tokio::test]
    async fn normal_amount_scores_low() {
        let scorer = LocalScorer::new();
        let verdict = scorer.score(&base_features(90_000)).await.unwrap();
        assert_eq!(verdict.category, AnomalyCategory::Normal);
        assert!(!verdict.exceeds(0.5));
    }

    #[tokio::test]
    async fn spike_over_baseline_is_flagged() {
        let scorer = LocalScorer::new();
        let verdict = scorer.score(&base_features(900_001)).await.unwrap();
        assert_eq!(verdict.category, AnomalyCategory::SuddenSpike);
        assert!(verdict.confidence >= 0.4);
        assert!(!verdict.reasons.is_empty());
    }

    #[tokio::test]
    async fn dormant_burst_detected() {
        let scorer = LocalScorer::new();
        let mut features = base_features(150_000);
        features.days_since_last_credit = Some(120);
        let verdict = scorer.score(&features).await.unwrap();
        assert_eq!(verdict.category, AnomalyCategory::DormantBurst);
    }

    #[tokio::test]
    async fn structuring_band_detected() {
        let scorer = LocalScorer::new();
        let mut features = base_features(STRUCTURING_CEILING - 1);
        features.monthly_totals = vec![20_000_000, 19_000_000];
        features.recent_credit_count = 5;
        let verdict = scorer.score(&features).await.unwrap();
        assert_eq!(verdict.category, AnomalyCategory::Structuring);
        assert!(verdict.exceeds(0.6));
    }

    #[tokio::test]
    async fn no_history_never_spikes() {
        let scorer = LocalScorer::new();
        let mut features = base_features(5_000_000);
        features.monthly_totals = vec![];
        features.days_since_last_credit = None;
        let verdict = scorer.score(&features).await.unwrap();
        assert_ne!(verdict.category, AnomalyCategory::SuddenSpike);
    }
}
