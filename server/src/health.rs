//! Process health counters.
//!
//! Cheap atomics bumped on the hot path; a snapshot is taken wherever an
//! aggregate view is needed.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Aggregated runtime counters.
#[derive(Debug, Default)]
pub struct Health {
    clients: AtomicI64,
    metrics_in: AtomicU64,
    metrics_detected: AtomicU64,
    events_alerted: AtomicU64,
    /// Microseconds spent in rule filtering.
    filter_cost_us: AtomicU64,
    /// Microseconds spent in history queries.
    query_cost_us: AtomicU64,
    /// Microseconds spent in whole-sample detection.
    detection_cost_us: AtomicU64,
}

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub clients: i64,
    pub metrics_in: u64,
    pub metrics_detected: u64,
    pub events_alerted: u64,
    pub filter_cost_us: u64,
    pub query_cost_us: u64,
    pub detection_cost_us: u64,
}

impl Health {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_clients(&self, n: i64) {
        self.clients.fetch_add(n, Ordering::Relaxed);
    }

    pub fn decr_clients(&self, n: i64) {
        self.clients.fetch_sub(n, Ordering::Relaxed);
    }

    pub fn incr_metrics_in(&self, n: u64) {
        self.metrics_in.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr_metrics_detected(&self, n: u64) {
        self.metrics_detected.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr_events_alerted(&self, n: u64) {
        self.events_alerted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_filter_cost(&self, us: u64) {
        self.filter_cost_us.fetch_add(us, Ordering::Relaxed);
    }

    pub fn add_query_cost(&self, us: u64) {
        self.query_cost_us.fetch_add(us, Ordering::Relaxed);
    }

    pub fn add_detection_cost(&self, us: u64) {
        self.detection_cost_us.fetch_add(us, Ordering::Relaxed);
    }

    /// Copy the counters.
    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            clients: self.clients.load(Ordering::Relaxed),
            metrics_in: self.metrics_in.load(Ordering::Relaxed),
            metrics_detected: self.metrics_detected.load(Ordering::Relaxed),
            events_alerted: self.events_alerted.load(Ordering::Relaxed),
            filter_cost_us: self.filter_cost_us.load(Ordering::Relaxed),
            query_cost_us: self.query_cost_us.load(Ordering::Relaxed),
            detection_cost_us: self.detection_cost_us.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let health = Health::new();
        health.incr_clients(1);
        health.incr_metrics_in(3);
        health.incr_metrics_detected(2);
        health.decr_clients(1);
        let snap = health.snapshot();
        assert_eq!(snap.clients, 0);
        assert_eq!(snap.metrics_in, 3);
        assert_eq!(snap.metrics_detected, 2);
    }
}
