//! Prometheus metrics for the settlement core

use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, Histogram, IntCounter, IntCounterVec, Registry,
};

use crate::Result;

/// Metrics collected by the settlement engine
pub struct Metrics {
    registry: Registry,

    /// Settlements completed, by channel
    pub settlements_total: IntCounterVec,

    /// Settlement attempts rejected, by error kind
    pub settlement_failures_total: IntCounterVec,

    /// Settlement latency
    pub settlement_duration_seconds: Histogram,

    /// Payment tokens issued
    pub tokens_issued_total: IntCounter,

    /// Anomaly alerts raised
    pub anomaly_alerts_total: IntCounter,

    /// Audit-ledger submissions that exhausted retries
    pub ledger_sync_failures_total: IntCounter,
}

impl Metrics {
    /// Register all metrics in a fresh registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let settlements_total = register_int_counter_vec_with_registry!(
            "settlements_total",
            "Settlements completed",
            &["channel"],
            registry
        )
        .map_err(|e| crate::Error::Other(format!("metric registration failed: {}", e)))?;

        let settlement_failures_total = register_int_counter_vec_with_registry!(
            "settlement_failures_total",
            "Settlement attempts rejected",
            &["kind"],
            registry
        )
        .map_err(|e| crate::Error::Other(format!("metric registration failed: {}", e)))?;

        let settlement_duration_seconds = register_histogram_with_registry!(
            "settlement_duration_seconds",
            "Settlement latency in seconds",
            vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0],
            registry
        )
        .map_err(|e| crate::Error::Other(format!("metric registration failed: {}", e)))?;

        let tokens_issued_total = register_int_counter_with_registry!(
            "tokens_issued_total",
            "Payment tokens issued",
            registry
        )
        .map_err(|e| crate::Error::Other(format!("metric registration failed: {}", e)))?;

        let anomaly_alerts_total = register_int_counter_with_registry!(
            "anomaly_alerts_total",
            "Anomaly alerts raised",
            registry
        )
        .map_err(|e| crate::Error::Other(format!("metric registration failed: {}", e)))?;

        let ledger_sync_failures_total = register_int_counter_with_registry!(
            "ledger_sync_failures_total",
            "Audit-ledger submissions that exhausted retries",
            registry
        )
        .map_err(|e| crate::Error::Other(format!("metric registration failed: {}", e)))?;

        Ok(Self {
            registry,
            settlements_total,
            settlement_failures_total,
            settlement_duration_seconds,
            tokens_issued_total,
            anomaly_alerts_total,
            ledger_sync_failures_total,
        })
    }

    /// Registry for scrape endpoints
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_and_count() {
        let metrics = Metrics::new().unwrap();
        metrics.settlements_total.with_label_values(&["qr_token"]).inc();
        metrics.tokens_issued_total.inc();

        assert_eq!(
            metrics.settlements_total.with_label_values(&["qr_token"]).get(),
            1
        );
        assert_eq!(metrics.tokens_issued_total.get(), 1);
        assert!(!metrics.registry().gather().is_empty());
    }
}
