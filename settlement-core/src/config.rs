//! Configuration for the settlement core

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::{Amount, Currency};

/// Settlement configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Ledger currency
    pub currency: Currency,

    /// Per-transfer ceiling, minor units
    pub max_transfer_amount: Amount,

    /// Token configuration
    pub token: TokenConfig,

    /// Anomaly configuration
    pub anomaly: AnomalyConfig,

    /// Audit-ledger sync configuration
    pub sync: SyncConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/settlement"),
            service_name: "settlement-core".to_string(),
            currency: Currency::INR,
            max_transfer_amount: Amount::from_minor(10_000_000), // 1 lakh
            token: TokenConfig::default(),
            anomaly: AnomalyConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

/// Payment token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Default validity window (seconds)
    pub default_validity_secs: u64,

    /// 32-byte MAC key, hex-encoded. Generated at startup when absent;
    /// tokens then do not survive a restart.
    pub mac_key_hex: Option<String>,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            default_validity_secs: 900, // 15 minutes
            mac_key_hex: None,
        }
    }
}

/// Anomaly scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    /// Verdict confidence above which an alert is raised
    pub confidence_threshold: f64,

    /// Months of receiver history fed to the scorer
    pub history_months: u32,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
            history_months: 6,
        }
    }
}

/// Audit-ledger sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Bounded queue depth between engine and worker
    pub queue_depth: usize,

    /// Maximum submission attempts per transfer
    pub max_attempts: u32,

    /// Initial retry delay (milliseconds)
    pub initial_delay_ms: u64,

    /// Retry delay cap (milliseconds)
    pub max_delay_ms: u64,

    /// Backoff multiplier
    pub backoff_multiplier: f64,

    /// Jitter factor
    pub jitter_factor: f64,

    /// Wall-clock budget per transfer (milliseconds)
    pub max_elapsed_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue_depth: 1024,
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            max_elapsed_ms: 120_000,
        }
    }
}

impl SyncConfig {
    /// Retry policy for the sync worker
    pub fn retry_policy(&self) -> ledger_sync::RetryPolicy {
        ledger_sync::RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay_ms: self.initial_delay_ms,
            max_delay_ms: self.max_delay_ms,
            backoff_multiplier: self.backoff_multiplier,
            jitter_factor: self.jitter_factor,
            max_elapsed_ms: self.max_elapsed_ms,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load defaults with environment overrides
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("SETTLEMENT_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(max) = std::env::var("SETTLEMENT_MAX_TRANSFER_MINOR") {
            let minor = max
                .parse::<u64>()
                .map_err(|e| crate::Error::Config(format!("bad max transfer amount: {}", e)))?;
            config.max_transfer_amount = Amount::from_minor(minor);
        }

        if let Ok(key) = std::env::var("SETTLEMENT_TOKEN_KEY_HEX") {
            config.token.mac_key_hex = Some(key);
        }

        if let Ok(secs) = std::env::var("SETTLEMENT_TOKEN_VALIDITY_SECS") {
            config.token.default_validity_secs = secs
                .parse::<u64>()
                .map_err(|e| crate::Error::Config(format!("bad token validity: {}", e)))?;
        }

        Ok(config)
    }
}
