//! The in-process rule cache and its change feed.
//!
//! The cache holds the authoritative view of every rule. Mutations go
//! through [`RuleCache::put`] and [`RuleCache::delete`] and are pushed
//! as [`RuleChange`] messages to every subscriber channel; the filter
//! subscribes to keep its trie in sync, and an optional broadcast bridge
//! forwards changes to peer nodes.
//!
//! Sends never block: a full subscriber channel drops the message with
//! an error log.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::models::{Rule, RuleError};

/// Buffer size for subscriber channels.
pub const CHANGE_BUFFER: usize = 128;

/// A rule mutation pushed to subscribers.
#[derive(Debug, Clone)]
pub enum RuleChange {
    Add(Rule),
    Delete(Rule),
}

/// Transport seam for cross-node rule replication.
///
/// Implementations publish changes over some durable pub/sub exchange,
/// best effort: no acknowledgements, no cross-partition ordering. Peer
/// nodes apply received messages through [`RuleCache::put`] and
/// [`RuleCache::delete`]. Concrete transports live outside this crate.
pub trait RuleBroadcast: Send + Sync {
    fn publish(&self, change: &RuleChange) -> anyhow::Result<()>;
}

/// The authoritative in-process rule set.
#[derive(Default)]
pub struct RuleCache {
    rules: RwLock<HashMap<i32, Rule>>,
    subscribers: RwLock<Vec<mpsc::Sender<RuleChange>>>,
}

impl RuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a rule. The pattern is validated here so the
    /// hot matching path never sees a malformed one.
    pub fn put(&self, rule: Rule) -> Result<(), RuleError> {
        rule.validate()?;
        {
            let mut rules = self.rules.write().unwrap_or_else(|e| e.into_inner());
            if let Some(old) = rules.insert(rule.id, rule.clone()) {
                // Replacing: retract the old binding first so a pattern
                // edit does not leave the stale pattern matching.
                if old.pattern != rule.pattern {
                    self.push(RuleChange::Delete(old));
                }
            }
        }
        self.push(RuleChange::Add(rule));
        Ok(())
    }

    /// Remove a rule by id. Returns false if it was not cached.
    pub fn delete(&self, id: i32) -> bool {
        let removed = {
            let mut rules = self.rules.write().unwrap_or_else(|e| e.into_inner());
            rules.remove(&id)
        };
        match removed {
            Some(rule) => {
                self.push(RuleChange::Delete(rule));
                true
            }
            None => false,
        }
    }

    /// Copy of a rule by id.
    pub fn get(&self, id: i32) -> Option<Rule> {
        let rules = self.rules.read().unwrap_or_else(|e| e.into_inner());
        rules.get(&id).cloned()
    }

    /// Copies of all rules.
    pub fn all(&self) -> Vec<Rule> {
        let rules = self.rules.read().unwrap_or_else(|e| e.into_inner());
        rules.values().cloned().collect()
    }

    /// Number of cached rules.
    pub fn len(&self) -> usize {
        let rules = self.rules.read().unwrap_or_else(|e| e.into_inner());
        rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a change subscriber. The channel should be buffered; a
    /// full channel loses messages rather than blocking mutations.
    pub fn on_change(&self, tx: mpsc::Sender<RuleChange>) {
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subs.push(tx);
    }

    fn push(&self, change: RuleChange) {
        let subs = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
        for tx in subs.iter() {
            if tx.try_send(change.clone()).is_err() {
                error!("rule change subscriber channel is full, skipping");
            }
        }
    }
}

/// Bridge cache changes onto a broadcast transport.
///
/// Subscribes to the cache and forwards every change; publish errors are
/// logged and the bridge keeps going (the bus is best effort).
pub fn spawn_broadcast(cache: &RuleCache, broadcast: Arc<dyn RuleBroadcast>) {
    let (tx, mut rx) = mpsc::channel(CHANGE_BUFFER);
    cache.on_change(tx);
    tokio::spawn(async move {
        info!("rule broadcast bridge started");
        while let Some(change) = rx.recv().await {
            if let Err(err) = broadcast.publish(&change) {
                error!(%err, "failed to broadcast rule change");
            }
        }
    });
}
