//! Idle metric tracking.
//!
//! Some metrics must alert when they stop arriving. The tracker keeps
//! two name→last-stamp generations under one lock: real samples land in
//! the fresh generation `b`; the sweep walks the older generation `a`,
//! hands every walked name back for synthetic zero injection, keeps the
//! ones still inside the idle window, and rotates `a := b; b := {}`.
//! The rotation bounds each sweep to the live idle set with no
//! long-lived tombstones.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct Generations {
    a: HashMap<String, u32>,
    b: HashMap<String, u32>,
}

/// Name-keyed last-seen tracking with generation rotation.
pub struct IdleTracker {
    maps: Mutex<Generations>,
    /// Upper bound on tracked names per generation.
    limit: usize,
}

impl IdleTracker {
    pub fn new(limit: usize) -> Self {
        Self {
            maps: Mutex::new(Generations::default()),
            limit,
        }
    }

    /// Record a real sample: the name moves into the fresh generation.
    pub fn note(&self, name: &str, stamp: u32) {
        let mut maps = self.maps.lock().unwrap_or_else(|e| e.into_inner());
        if maps.b.len() < self.limit || maps.b.contains_key(name) {
            maps.b.insert(name.to_owned(), stamp);
        }
        maps.a.remove(name);
    }

    /// Walk the stale generation and rotate.
    ///
    /// Returns the names to inject synthetic zeros for. Entries whose
    /// last real sample is still within `window` seconds of `now` stay
    /// tracked; older ones are forgotten after this final injection.
    pub fn sweep(&self, now: u32, window: u32) -> Vec<String> {
        let mut maps = self.maps.lock().unwrap_or_else(|e| e.into_inner());
        let stale = std::mem::take(&mut maps.a);
        let mut inject = Vec::with_capacity(stale.len());
        for (name, last) in stale {
            inject.push(name.clone());
            if now.saturating_sub(last) < window {
                maps.b.insert(name, last);
            }
        }
        maps.a = std::mem::take(&mut maps.b);
        inject
    }

    /// Number of tracked names across both generations.
    pub fn len(&self) -> usize {
        let maps = self.maps.lock().unwrap_or_else(|e| e.into_inner());
        maps.a.len() + maps.b.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_name_is_never_injected() {
        let tracker = IdleTracker::new(16);
        tracker.note("a.b", 100);
        // First sweep only rotates the fresh generation in.
        assert!(tracker.sweep(110, 1000).is_empty());
        // The name arrives again before the next sweep.
        tracker.note("a.b", 120);
        assert!(tracker.sweep(130, 1000).is_empty());
    }

    #[test]
    fn test_idle_name_gets_injected_until_window_expires() {
        let tracker = IdleTracker::new(16);
        tracker.note("a.b", 100);
        assert!(tracker.sweep(110, 50).is_empty());
        // Gone idle: injected while inside the window.
        assert_eq!(tracker.sweep(120, 50), vec!["a.b".to_owned()]);
        assert_eq!(tracker.sweep(130, 50), vec!["a.b".to_owned()]);
        // Past the window: one final injection, then forgotten.
        assert_eq!(tracker.sweep(200, 50), vec!["a.b".to_owned()]);
        assert!(tracker.sweep(210, 50).is_empty());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_track_limit_bounds_fresh_generation() {
        let tracker = IdleTracker::new(2);
        tracker.note("a", 100);
        tracker.note("b", 100);
        tracker.note("c", 100);
        assert_eq!(tracker.len(), 2);
        // A known name still refreshes at the limit.
        tracker.note("b", 110);
        assert_eq!(tracker.len(), 2);
    }
}
