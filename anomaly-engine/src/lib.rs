//! Anomaly Engine for WageRail
//!
//! Advisory anomaly scoring for completed wage transfers. A verdict never
//! blocks or reverses settlement; callers decide whether to raise an alert.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod scoring;
pub mod types;

pub use error::{Error, Result};
pub use scoring::LocalScorer;
pub use types::*;
