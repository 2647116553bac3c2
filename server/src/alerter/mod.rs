//! The alert dispatcher.
//!
//! A pool of workers drains the detector's event channel, applies the
//! suppression policies in order, persists accepted events and fans out
//! to user commands and webhook notifiers. Suppression state is keyed by
//! `(rule id, metric name)` and shared across workers; the daily counter
//! map is wiped by a 24h ticker.

pub mod notifier;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Timelike;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::directory::Directory;
use crate::health::Health;
use crate::models::{Event, Project};
use crate::storage::{EventRecord, Storage};
use crate::util::wildcard_match;

use notifier::NotifierRegistry;

/// Capacity of the inbound event channel.
const BUFFERED_EVENTS_LIMIT: usize = 10 * 1024;

/// Suppression state key.
type AlertKey = (i32, String);

/// The alerting service.
pub struct Alerter {
    cfg: Arc<Config>,
    storage: Arc<Storage>,
    directory: Arc<Directory>,
    notifiers: Arc<NotifierRegistry>,
    health: Arc<Health>,
    tx: mpsc::Sender<Event>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Event>>,
    /// Key → stamp of the last accepted alert.
    last_alerts: DashMap<AlertKey, u32>,
    /// Key → alerts accepted since the last daily reset.
    daily_counts: DashMap<AlertKey, u32>,
    /// Key → ring of recent event stamps, `notify_after` deep.
    recent_hits: Mutex<HashMap<AlertKey, VecDeque<u32>>>,
}

impl Alerter {
    pub fn new(
        cfg: Arc<Config>,
        storage: Arc<Storage>,
        directory: Arc<Directory>,
        notifiers: Arc<NotifierRegistry>,
        health: Arc<Health>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(BUFFERED_EVENTS_LIMIT);
        Self {
            cfg,
            storage,
            directory,
            notifiers,
            health,
            tx,
            rx: tokio::sync::Mutex::new(rx),
            last_alerts: DashMap::new(),
            daily_counts: DashMap::new(),
            recent_hits: Mutex::new(HashMap::new()),
        }
    }

    /// The channel to register with the detector's fan-out.
    pub fn input(&self) -> mpsc::Sender<Event> {
        self.tx.clone()
    }

    /// Spawn the worker pool and the daily reset ticker.
    pub fn start(self: &Arc<Self>) {
        info!(workers = self.cfg.alerter.workers, "starting alerter workers");
        for _ in 0..self.cfg.alerter.workers {
            let alerter = Arc::clone(self);
            tokio::spawn(async move {
                loop {
                    let ev = { alerter.rx.lock().await.recv().await };
                    match ev {
                        Some(ev) => alerter.work(ev).await,
                        None => break,
                    }
                }
            });
        }
        let alerter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
            ticker.tick().await; // completes immediately
            loop {
                ticker.tick().await;
                alerter.daily_counts.clear();
                debug!("daily alert counters reset");
            }
        });
    }

    /// Apply the policy chain to one event; every policy is an early
    /// return. Steps 1..=5 decide acceptance, the rest is delivery.
    pub async fn work(&self, mut ev: Event) {
        let key: AlertKey = (ev.rule.id, ev.metric.name.clone());
        if self.is_blacklisted(&ev.metric.name) {
            return;
        }
        // 1. Minimum interval per key.
        if let Some(last) = self.last_alerts.get(&key) {
            if ev.metric.stamp < last.saturating_add(self.cfg.alerter.interval) {
                return;
            }
        }
        // 2. Daily cap per key.
        if self.daily_count(&key) >= self.cfg.alerter.one_day_limit {
            return;
        }
        // 3. Consecutive-hit noise filter.
        if !self.enough_recent_hits(&key, ev.metric.stamp) {
            return;
        }
        // 4. Persist.
        if let Err(err) = self.storage.event.put(&EventRecord::from_event(&ev)) {
            warn!(%err, "failed to store event, skipping");
            return;
        }
        // 5. Record acceptance.
        self.last_alerts.insert(key.clone(), ev.metric.stamp);
        *self.daily_counts.entry(key).or_insert(0) += 1;

        // 6. Resolve ownership and quiet hours.
        let Some(project) = self.directory.project(ev.rule.project_id) else {
            warn!(
                rule = ev.rule.id,
                project = ev.rule.project_id,
                "no project for rule, not dispatching"
            );
            return;
        };
        if self.should_be_silent(&project) {
            debug!(project = %project.name, "project in silent hours, not dispatching");
            return;
        }
        ev.team = self.directory.team(project.team_id);
        let users: Vec<_> = self
            .directory
            .users_for_project(project.id)
            .into_iter()
            .filter(|u| u.rule_level <= ev.rule.level)
            .collect();
        let webhooks = self.directory.webhooks_for_project(project.id);
        ev.project = Some(project);
        if !users.is_empty() {
            ev.alarm_users = Some(users.clone());
        }

        // 7. Dispatch. Failures are logged and never stop the fan-out.
        for user in users {
            if self.cfg.alerter.command.is_empty() {
                warn!("alert command not configured");
                break;
            }
            let mut addressed = ev.clone();
            addressed.user = Some(user.clone());
            if let Err(err) = self.exec_command(&addressed).await {
                error!(user = %user.name, %err, "alert command failed");
            } else {
                info!(user = %user.name, metric = %ev.metric.name, "alert sent");
            }
        }
        for hook in webhooks {
            if ev.rule.level < hook.rule_level {
                continue;
            }
            let Some(notifier) = self.notifiers.get(&hook.kind) else {
                warn!(kind = %hook.kind, "no notifier registered for webhook type");
                continue;
            };
            let mut addressed = ev.clone();
            addressed.webhook = Some(hook.clone());
            if let Err(err) = notifier.notify(&hook, &addressed).await {
                error!(webhook = %hook.name, %err, "webhook notify failed");
            } else {
                info!(webhook = %hook.name, metric = %ev.metric.name, "alert delivered");
            }
        }
        self.health.incr_events_alerted(1);
    }

    fn is_blacklisted(&self, name: &str) -> bool {
        self.cfg
            .alerter
            .blacklist
            .iter()
            .any(|p| wildcard_match(p, name))
    }

    fn daily_count(&self, key: &AlertKey) -> u32 {
        self.daily_counts.get(key).map_or(0, |c| *c)
    }

    /// Append the stamp to the key's ring and require `notify_after`
    /// entries inside the check window. The append happens whether or
    /// not the event survives, so bursts accumulate evidence.
    fn enough_recent_hits(&self, key: &AlertKey, stamp: u32) -> bool {
        let notify_after = self.cfg.alerter.notify_after;
        if notify_after == 0 {
            return true;
        }
        let mut rings = self.recent_hits.lock().unwrap_or_else(|e| e.into_inner());
        let ring = rings.entry(key.clone()).or_default();
        ring.push_back(stamp);
        while ring.len() > notify_after {
            ring.pop_front();
        }
        let window = self.cfg.alerter.alert_check_interval;
        let hits = ring
            .iter()
            .filter(|t| stamp.saturating_sub(**t) < window)
            .count();
        hits >= notify_after
    }

    /// Quiet hours: the project's own range when enabled, the default
    /// otherwise.
    fn should_be_silent(&self, project: &Project) -> bool {
        let (start, end) = if project.enable_silent {
            (project.silent_time_start, project.silent_time_end)
        } else {
            let [start, end] = self.cfg.alerter.default_silent_time_range;
            (start, end)
        };
        hour_in_range(chrono::Local::now().hour(), start, end)
    }

    /// Run the configured command with the JSON event as its single
    /// argument, killing it at the timeout.
    async fn exec_command(&self, ev: &Event) -> anyhow::Result<()> {
        let payload = serde_json::to_string(ev)?;
        let mut child = tokio::process::Command::new(&self.cfg.alerter.command)
            .arg(payload)
            .kill_on_drop(true)
            .spawn()?;
        let timeout = Duration::from_secs(u64::from(self.cfg.alerter.exec_command_timeout));
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                if status.success() {
                    Ok(())
                } else {
                    anyhow::bail!("command exited with {status}")
                }
            }
            Ok(Err(err)) => Err(err.into()),
            Err(_) => {
                child.kill().await.ok();
                anyhow::bail!("command timed out, killed")
            }
        }
    }
}

/// Hour-of-day membership in `[start, end)` with midnight wrap-around;
/// equal bounds mean the whole day.
fn hour_in_range(hour: u32, start: u32, end: u32) -> bool {
    match start.cmp(&end) {
        std::cmp::Ordering::Less => start <= hour && hour < end,
        std::cmp::Ordering::Greater => hour >= start || hour < end,
        std::cmp::Ordering::Equal => true,
    }
}
