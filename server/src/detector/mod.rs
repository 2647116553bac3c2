//! The detection pipeline.
//!
//! A TCP line server feeds every accepted sample through:
//! parse → rule match (hit limited) → blacklist → idle tracking →
//! history scoring → index smoothing → persistence → rule tests →
//! event fan-out. Each connection runs in its own task; subscribers
//! receive events over bounded channels with drop-on-full semantics so
//! a slow consumer never stalls ingestion.

pub mod protocol;
pub mod scoring;

mod idle;

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::filter::Filter;
use crate::health::Health;
use crate::models::{any_trend_related, Event, Index, Level, Metric, Rule};
use crate::storage::{self, Storage};
use crate::util::wildcard_match;

use idle::IdleTracker;
use scoring::Bulk;

/// Per-call pipeline switches; synthetic idle samples disable both.
#[derive(Debug, Clone, Copy)]
pub struct ProcessOptions {
    pub apply_hit_limit: bool,
    pub update_idle: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            apply_hit_limit: true,
            update_idle: true,
        }
    }
}

/// The anomaly detector service.
pub struct Detector {
    cfg: Arc<Config>,
    storage: Arc<Storage>,
    filter: Arc<Filter>,
    health: Arc<Health>,
    outs: RwLock<Vec<mpsc::Sender<Event>>>,
    idle: IdleTracker,
}

impl Detector {
    pub fn new(
        cfg: Arc<Config>,
        storage: Arc<Storage>,
        filter: Arc<Filter>,
        health: Arc<Health>,
    ) -> Self {
        let idle = IdleTracker::new(cfg.detector.idle_metric_track_limit);
        Self {
            cfg,
            storage,
            filter,
            health,
            outs: RwLock::new(Vec::new()),
            idle,
        }
    }

    /// Register a channel to receive detection events. Sends are
    /// non-blocking; events to a full subscriber are dropped.
    pub fn out(&self, tx: mpsc::Sender<Event>) {
        let mut outs = self.outs.write().unwrap_or_else(|e| e.into_inner());
        outs.push(tx);
    }

    fn output(&self, ev: Event) {
        let outs = self.outs.read().unwrap_or_else(|e| e.into_inner());
        for tx in outs.iter() {
            if tx.try_send(ev.clone()).is_err() {
                error!("output channel is full, skipping");
            }
        }
    }

    /// Bind the detector port and serve connections forever.
    pub async fn serve(self: Arc<Self>) -> anyhow::Result<()> {
        let addr = ("0.0.0.0", self.cfg.detector.port);
        let listener = TcpListener::bind(addr).await?;
        info!(port = self.cfg.detector.port, "detector is listening");
        self.serve_with(listener).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve_with(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        Arc::clone(&self).spawn_idle_sweeper();
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let detector = Arc::clone(&self);
                    tokio::spawn(async move {
                        detector.handle(stream, peer.to_string()).await;
                    });
                }
                Err(err) => {
                    error!(%err, "cannot accept connection, skipping");
                }
            }
        }
    }

    /// Pump one connection: read lines, parse, process. Parse failures
    /// skip the line; read errors close the connection.
    async fn handle(&self, stream: TcpStream, peer: String) {
        self.health.incr_clients(1);
        info!(%peer, "connection established");
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match protocol::parse_line(&line) {
                    Ok(m) => self.process(m, ProcessOptions::default()).await,
                    Err(err) => {
                        error!(%peer, %err, "bad line, skipping");
                    }
                },
                Ok(None) => break,
                Err(err) => {
                    error!(%peer, %err, "read error, closing connection");
                    break;
                }
            }
        }
        info!(%peer, "connection closed");
        self.health.decr_clients(1);
    }

    /// Run one sample through the pipeline.
    pub async fn process(&self, mut m: Metric, opts: ProcessOptions) {
        self.health.incr_metrics_in(1);
        let started = Instant::now();

        let filter_started = Instant::now();
        let rules = self.filter.matched(&m, opts.apply_hit_limit);
        self.health
            .add_filter_cost(filter_started.elapsed().as_micros() as u64);
        if rules.is_empty() {
            return;
        }
        if self.is_blacklisted(&m.name) {
            debug!(name = %m.name, "metric hit black pattern, dropping");
            return;
        }
        if opts.update_idle && self.should_track_idle(&m.name, &rules) {
            self.idle.note(&m.name, m.stamp);
        }

        match self.detect(&mut m, &rules).await {
            Ok(events) => {
                self.health.incr_metrics_detected(1);
                for ev in events {
                    self.output(ev);
                }
            }
            Err(err) => {
                error!(name = %m.name, %err, "detection failed, skipping sample");
            }
        }

        let elapsed = started.elapsed();
        if elapsed.as_millis() as u64 > self.cfg.detector.warning_timeout {
            warn!(
                name = %m.name,
                elapsed_ms = elapsed.as_millis() as u64,
                "detection is slow"
            );
        }
        self.health
            .add_detection_cost(elapsed.as_micros() as u64);
    }

    /// Score the sample, move its index, persist both and test rules.
    async fn detect(
        &self,
        m: &mut Metric,
        rules: &[Rule],
    ) -> Result<Vec<Event>, storage::Error> {
        let idx = match self.storage.index.get(&m.name) {
            Ok(idx) => Some(idx),
            Err(storage::Error::NotFound) => None,
            Err(err) => return Err(err),
        };
        if let Some(idx) = &idx {
            m.link_to(idx.link);
        }

        if any_trend_related(rules) {
            let fill_zero = idx.is_some() && self.should_fill_zero(&m.name, rules);
            let mut bulks = self.history(m, fill_zero).await?;
            let least_count = self.cfg.detector.least_count;
            if bulks.len() <= 1 {
                let vals: Vec<f64> = bulks
                    .iter()
                    .flat_map(|b| b.metrics.iter().map(|h| h.value))
                    .collect();
                scoring::div3sigma(m, &vals, least_count);
            } else {
                scoring::div_day_sigma(m, &mut bulks, least_count);
            }
        } else {
            m.score = 0.0;
            m.average = m.value;
        }

        let mut next = self.next_index(idx.as_ref(), m, rules);
        self.storage.index.put(&mut next)?;
        m.link_to(next.link);
        self.storage.metric.put(m)?;

        let mut events = Vec::new();
        for rule in rules {
            let default_max = lookup_default(&self.cfg.detector.default_threshold_maxs, &m.name);
            let default_min = lookup_default(&self.cfg.detector.default_threshold_mins, &m.name);
            if rule.test(m, &next, default_max, default_min) {
                events.push(Event::new(m.clone(), next.clone(), rule.clone()));
            }
        }
        Ok(events)
    }

    /// Fetch same-phase history windows concurrently, one per prior
    /// period. Every spawned read is drained before returning so an
    /// early error cannot leak running readers.
    async fn history(&self, m: &Metric, fill_zero: bool) -> Result<Vec<Bulk>, storage::Error> {
        let started = Instant::now();
        let period = self.cfg.period;
        let expiration = self.cfg.expiration;
        let offset = (self.cfg.detector.filter_offset * f64::from(period)) as u32;
        let mut handles = Vec::new();
        let mut stamp = if self.cfg.detector.using_recent_data_points {
            m.stamp
        } else {
            m.stamp.saturating_sub(period)
        };
        while stamp.saturating_add(expiration) > m.stamp && handles.len() < self.cfg.detector.filter_times {
            let start = stamp.saturating_sub(offset);
            // The current window has no future half.
            let stop = if stamp == m.stamp {
                m.stamp
            } else {
                stamp.saturating_add(offset)
            };
            let storage = Arc::clone(&self.storage);
            let name = m.name.clone();
            let link = m.link;
            handles.push(tokio::task::spawn_blocking(move || {
                let result = storage.metric.get(&name, link, start, stop);
                (result, start, stop)
            }));
            match stamp.checked_sub(period) {
                Some(prev) => stamp = prev,
                None => break,
            }
        }

        let mut bulks = Vec::with_capacity(handles.len());
        let mut first_err = None;
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok((Ok(metrics), start, stop)) => {
                    let metrics = if fill_zero {
                        fill_zeros(&metrics, &m.name, start, stop, self.cfg.interval)
                    } else {
                        metrics
                    };
                    bulks.push(Bulk {
                        metrics,
                        start,
                        stop,
                    });
                }
                Ok((Err(err), _, _)) => {
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
                Err(err) => {
                    error!(%err, "history reader panicked");
                }
            }
        }
        self.health
            .add_query_cost(started.elapsed().as_micros() as u64);
        match first_err {
            Some(err) => Err(err),
            None => Ok(bulks),
        }
    }

    /// Next index via exponential smoothing of score and average; the
    /// factor follows the highest severity among the matched rules.
    fn next_index(&self, idx: Option<&Index>, m: &Metric, rules: &[Rule]) -> Index {
        let mut next = Index::new(&m.name, m.stamp);
        match idx {
            None => {
                next.score = m.score;
                next.average = m.average;
            }
            Some(idx) => {
                let f = self.trending_factor(rules);
                next.score = idx.score * (1.0 - f) + f * m.score;
                next.average = idx.average * (1.0 - f) + f * m.average;
                next.link = idx.link;
            }
        }
        next
    }

    fn trending_factor(&self, rules: &[Rule]) -> f64 {
        let level = rules.iter().map(|r| r.level).max().unwrap_or(Level::Low);
        match level {
            Level::Low => self.cfg.detector.trending_factor_low,
            Level::Middle => self.cfg.detector.trending_factor_middle,
            Level::High => self.cfg.detector.trending_factor_high,
        }
    }

    fn is_blacklisted(&self, name: &str) -> bool {
        self.cfg
            .detector
            .blacklist
            .iter()
            .any(|p| wildcard_match(p, name))
    }

    /// Idle tracking applies to rules that opt in, and to whitelist
    /// names matched by at least one high severity rule.
    fn should_track_idle(&self, name: &str, rules: &[Rule]) -> bool {
        if rules.iter().any(|r| r.track_idle) {
            return true;
        }
        rules.iter().any(|r| r.level == Level::High)
            && self
                .cfg
                .detector
                .idle_metric_check_list
                .iter()
                .any(|p| wildcard_match(p, name))
    }

    /// Fill-zero applies to configured name patterns unless a matched
    /// rule opts out.
    fn should_fill_zero(&self, name: &str, rules: &[Rule]) -> bool {
        if !self
            .cfg
            .detector
            .fill_blank_zeros
            .iter()
            .any(|p| wildcard_match(p, name))
        {
            return false;
        }
        !rules.iter().any(|r| r.never_fill_zero)
    }

    /// Periodically inject synthetic zeros for idle names. The injected
    /// samples skip hit limiting and idle updates so they cannot mute
    /// or re-track themselves.
    fn spawn_idle_sweeper(self: Arc<Self>) {
        let check_interval = u64::from(self.cfg.detector.idle_metric_check_interval);
        let window = self.cfg.period;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(check_interval.max(1)));
            ticker.tick().await; // completes immediately
            loop {
                ticker.tick().await;
                let now = unix_now();
                let names = self.idle.sweep(now, window);
                if names.is_empty() {
                    continue;
                }
                debug!(count = names.len(), "injecting synthetic zeros for idle metrics");
                for name in names {
                    let m = Metric::new(name, now, 0.0);
                    self.process(
                        m,
                        ProcessOptions {
                            apply_hit_limit: false,
                            update_idle: false,
                        },
                    )
                    .await;
                }
            }
        });
    }
}

/// First matching non-zero entry of a default threshold table.
fn lookup_default(
    table: &std::collections::BTreeMap<String, f64>,
    name: &str,
) -> Option<f64> {
    table
        .iter()
        .find(|(pattern, value)| **value != 0.0 && wildcard_match(pattern, name))
        .map(|(_, value)| *value)
}

/// Fill gaps between successive samples with zeros aligned to the
/// ingestion interval, for dispersed metrics such as counters. A window
/// whose leading value is itself zero is left sparse.
fn fill_zeros(ms: &[Metric], name: &str, start: u32, stop: u32, interval: u32) -> Vec<Metric> {
    let step = interval.max(1);
    let mut out: Vec<Metric> = Vec::new();
    let mut cursor = start;
    let mut i = 0;
    let zero = |stamp: u32| Metric {
        name: name.to_owned(),
        stamp,
        ..Metric::default()
    };
    while cursor < stop {
        if i < ms.len() {
            let m = &ms[i];
            while cursor < m.stamp {
                if !out.is_empty() && out[0].value != 0.0 {
                    out.push(zero(cursor));
                }
                cursor += step;
            }
            out.push(m.clone());
            i += 1;
        } else if !out.is_empty() && out[0].value != 0.0 {
            out.push(zero(cursor));
        }
        cursor += step;
    }
    out
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or_default()
}
