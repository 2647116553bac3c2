//! Rule matching on the hot ingestion path.
//!
//! One trie keyed by rule pattern; each terminal holds the rules sharing
//! that pattern plus a bounded hit counter. The counter advances lazily:
//! the first match at or past the next interval boundary snaps the
//! window forward and zeroes the count, so no reset ticker is needed.
//! A pattern whose hits exceed the limit inside one interval mutes the
//! metric (the whole match returns empty) until the window turns over.
//!
//! Rule changes arrive over the rule cache subscription; trie writes are
//! serialized by the single consumer task.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::models::{Metric, Rule};
use crate::rules::{RuleCache, RuleChange, CHANGE_BUFFER};
use crate::util::trie::Trie;
use crate::util::wildcard_match;

/// A trie terminal: the rules sharing one pattern and its hit window.
struct FilterNode {
    pattern: String,
    rules: Mutex<Vec<Rule>>,
    hits: AtomicU32,
    reset_stamp: AtomicU32,
}

impl FilterNode {
    fn new(pattern: String, rule: Rule) -> Self {
        Self {
            pattern,
            rules: Mutex::new(vec![rule]),
            hits: AtomicU32::new(0),
            reset_stamp: AtomicU32::new(0),
        }
    }
}

/// Trie-backed rule matcher with per-pattern interval hit limiting.
pub struct Filter {
    enable_hit_limit: bool,
    hit_limit: u32,
    interval: u32,
    ignore_list: Vec<String>,
    trie: Trie<Arc<FilterNode>>,
}

impl Filter {
    pub fn new(cfg: &Config) -> Self {
        Self {
            enable_hit_limit: cfg.detector.enable_interval_hit_limit,
            hit_limit: cfg.detector.interval_hit_limit,
            interval: cfg.interval,
            ignore_list: cfg.detector.interval_limit_ignore_list.clone(),
            trie: Trie::new(),
        }
    }

    /// Load current rules and follow the cache's change feed.
    pub fn init(self: &Arc<Self>, cache: &RuleCache) {
        let (tx, mut rx) = mpsc::channel(CHANGE_BUFFER);
        cache.on_change(tx);
        for rule in cache.all() {
            self.add_rule(rule);
        }
        debug!(patterns = self.trie.len(), "filter initialized from rule cache");
        let filter = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                match change {
                    RuleChange::Add(rule) => filter.add_rule(rule),
                    RuleChange::Delete(rule) => filter.del_rule(&rule),
                }
            }
        });
    }

    /// The rules applying to a metric, with the hit limit applied when
    /// requested. Returns empty when any matched pattern is over its
    /// limit for the current interval.
    pub fn matched(&self, m: &Metric, apply_hit_limit: bool) -> Vec<Rule> {
        let nodes = self.trie.matched(&m.name);
        if nodes.is_empty() {
            return Vec::new();
        }
        let limited = apply_hit_limit && self.enable_hit_limit && !self.is_ignored(&m.name);
        let mut rules = Vec::new();
        for node in nodes {
            if limited && self.over_limit(&node, m.stamp) {
                warn!(pattern = %node.pattern, "pattern over interval hit limit, muting metric");
                return Vec::new();
            }
            let node_rules = node.rules.lock().unwrap_or_else(|e| e.into_inner());
            rules.extend(node_rules.iter().cloned());
        }
        rules
    }

    /// Count a hit against the node's current window, rolling the window
    /// forward first when the stamp has crossed its boundary.
    fn over_limit(&self, node: &FilterNode, stamp: u32) -> bool {
        let reset = node.reset_stamp.load(Ordering::Acquire);
        if stamp >= reset.saturating_add(self.interval) {
            let boundary = stamp - stamp % self.interval;
            if node
                .reset_stamp
                .compare_exchange(reset, boundary, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                node.hits.store(0, Ordering::Release);
            }
        }
        node.hits.fetch_add(1, Ordering::AcqRel) + 1 > self.hit_limit
    }

    fn is_ignored(&self, name: &str) -> bool {
        self.ignore_list.iter().any(|p| wildcard_match(p, name))
    }

    /// Bind a rule under its pattern.
    fn add_rule(&self, rule: Rule) {
        if let Some(node) = self.trie.get(&rule.pattern) {
            let mut rules = node.rules.lock().unwrap_or_else(|e| e.into_inner());
            rules.retain(|r| r.id != rule.id);
            rules.push(rule);
        } else {
            let pattern = rule.pattern.clone();
            let node = Arc::new(FilterNode::new(pattern.clone(), rule));
            self.trie.put(&pattern, node);
        }
    }

    /// Unbind a rule; the terminal goes away with its last rule.
    fn del_rule(&self, rule: &Rule) {
        if let Some(node) = self.trie.get(&rule.pattern) {
            let empty = {
                let mut rules = node.rules.lock().unwrap_or_else(|e| e.into_inner());
                rules.retain(|r| r.id != rule.id);
                rules.is_empty()
            };
            if empty {
                self.trie.pop(&rule.pattern);
            }
        }
    }

    /// Number of distinct patterns bound.
    pub fn len(&self) -> usize {
        self.trie.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::STAMP_HORIZON;

    fn config(interval: u32, limit: u32) -> Config {
        let mut cfg = Config::default();
        cfg.interval = interval;
        cfg.detector.enable_interval_hit_limit = true;
        cfg.detector.interval_hit_limit = limit;
        cfg
    }

    fn rule(id: i32, pattern: &str) -> Rule {
        Rule {
            id,
            pattern: pattern.into(),
            ..Rule::default()
        }
    }

    fn metric(name: &str, stamp: u32) -> Metric {
        Metric::new(name, stamp, 1.0)
    }

    #[test]
    fn test_matched_by_pattern() {
        let filter = Filter::new(&Config::default());
        filter.add_rule(rule(1, "a.*.c"));
        filter.add_rule(rule(2, "a.b.*"));
        filter.add_rule(rule(3, "x.*.*"));
        let rules = filter.matched(&metric("a.b.c", STAMP_HORIZON), false);
        let mut ids: Vec<i32> = rules.iter().map(|r| r.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);
        assert!(filter.matched(&metric("y.b.c", STAMP_HORIZON), false).is_empty());
    }

    #[test]
    fn test_hit_limit_within_interval() {
        let filter = Filter::new(&config(10, 2));
        filter.add_rule(rule(1, "a.*"));
        // Counts per stamp within one interval: pass, pass, mute, mute.
        let counts: Vec<usize> = [0u32, 1, 2, 3]
            .iter()
            .map(|s| filter.matched(&metric("a.b", *s), true).len())
            .collect();
        assert_eq!(counts, vec![1, 1, 0, 0]);
        // Crossing the boundary resets the counter.
        assert_eq!(filter.matched(&metric("a.b", 10), true).len(), 1);
    }

    #[test]
    fn test_hit_limit_skipped_when_not_applied() {
        let filter = Filter::new(&config(10, 1));
        filter.add_rule(rule(1, "a.*"));
        for stamp in 0..5u32 {
            assert_eq!(filter.matched(&metric("a.b", stamp), false).len(), 1);
        }
    }

    #[test]
    fn test_ignore_list_bypasses_limit() {
        let mut cfg = config(10, 1);
        cfg.detector.interval_limit_ignore_list = vec!["a.*".into()];
        let filter = Filter::new(&cfg);
        filter.add_rule(rule(1, "a.*"));
        for stamp in 0..5u32 {
            assert_eq!(filter.matched(&metric("a.b", stamp), true).len(), 1);
        }
    }

    #[test]
    fn test_rules_share_a_pattern() {
        let filter = Filter::new(&Config::default());
        filter.add_rule(rule(1, "a.*"));
        filter.add_rule(rule(2, "a.*"));
        assert_eq!(filter.len(), 1);
        assert_eq!(filter.matched(&metric("a.b", STAMP_HORIZON), false).len(), 2);
        filter.del_rule(&rule(1, "a.*"));
        assert_eq!(filter.matched(&metric("a.b", STAMP_HORIZON), false).len(), 1);
        filter.del_rule(&rule(2, "a.*"));
        assert!(filter.is_empty());
    }

    #[tokio::test]
    async fn test_follows_rule_cache_changes() {
        let cache = RuleCache::new();
        cache.put(rule(1, "a.*")).unwrap();
        let filter = Arc::new(Filter::new(&Config::default()));
        filter.init(&cache);
        assert_eq!(filter.len(), 1);

        cache.put(rule(2, "b.*")).unwrap();
        cache.delete(1);
        // Let the subscription task drain.
        for _ in 0..50 {
            tokio::task::yield_now().await;
            if filter.len() == 1 && !filter.trie.has("a.*") {
                break;
            }
        }
        assert!(filter.trie.has("b.*"));
        assert!(!filter.trie.has("a.*"));
    }
}
