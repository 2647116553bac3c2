//! The metric sample.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum metric name length in bytes.
pub const MAX_METRIC_NAME_LEN: usize = 256;

/// Oldest acceptable sample stamp (2015-01-01T00:00:00Z). Anything
/// earlier is a client clock problem, not history worth keeping.
pub const STAMP_HORIZON: u32 = 1_420_070_400;

/// Validation failures for an incoming metric.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetricError {
    #[error("metric name is empty")]
    NameEmpty,
    #[error("metric name exceeds {MAX_METRIC_NAME_LEN} bytes")]
    NameTooLong,
    #[error("metric name contains whitespace")]
    NameHasWhitespace,
    #[error("metric stamp predates the horizon")]
    StampTooSmall,
}

/// A single time series observation.
///
/// `score`, `average` and `link` start zeroed and are filled in during
/// detection; a metric is persisted exactly once, after detection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Dotted metric name.
    pub name: String,
    /// Unix timestamp in seconds.
    pub stamp: u32,
    /// Observed value.
    pub value: f64,
    /// Anomaly score, set by detection.
    pub score: f64,
    /// Reference average, set by detection.
    pub average: f64,
    /// Handle tying the metric to its index record.
    pub link: u32,
}

impl Metric {
    /// Create an undetected metric.
    pub fn new(name: impl Into<String>, stamp: u32, value: f64) -> Self {
        Self {
            name: name.into(),
            stamp,
            value,
            ..Self::default()
        }
    }

    /// Adopt the link of the given index record.
    pub fn link_to(&mut self, link: u32) {
        self.link = link;
    }

    /// Validate name and stamp bounds.
    pub fn validate(&self) -> Result<(), MetricError> {
        validate_name(&self.name)?;
        if self.stamp < STAMP_HORIZON {
            return Err(MetricError::StampTooSmall);
        }
        Ok(())
    }
}

/// Validate a metric name.
pub fn validate_name(name: &str) -> Result<(), MetricError> {
    if name.is_empty() {
        return Err(MetricError::NameEmpty);
    }
    if name.len() > MAX_METRIC_NAME_LEN {
        return Err(MetricError::NameTooLong);
    }
    if name.chars().any(char::is_whitespace) {
        return Err(MetricError::NameHasWhitespace);
    }
    Ok(())
}
