//! The per-name index record.

use serde::{Deserialize, Serialize};

/// Per-metric-name summary used as the anomaly reference.
///
/// The index store owns the durable copy; detection reads a snapshot and
/// writes back the smoothed successor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Index {
    /// Metric name.
    pub name: String,
    /// Stamp of the latest accepted sample.
    pub stamp: u32,
    /// Exponentially smoothed anomaly score (the trend).
    pub score: f64,
    /// Smoothed reference average.
    pub average: f64,
    /// Stable handle assigned on first sight, shared with every stored
    /// sample of this name.
    pub link: u32,
}

impl Index {
    /// Create an index record for a first-seen name.
    pub fn new(name: impl Into<String>, stamp: u32) -> Self {
        Self {
            name: name.into(),
            stamp,
            ..Self::default()
        }
    }
}
