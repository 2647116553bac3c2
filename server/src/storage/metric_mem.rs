//! In-memory mirror of the metric store.
//!
//! Mirrors a sample of links to serve their range reads without touching
//! disk. Admission is a single Bernoulli draw per link, decided on first
//! sight and never revisited. Slab lifecycle mirrors the on-disk pool.
//!
//! Layout per slab: a concurrent map `link → ordered stamp index`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use dashmap::DashMap;
use rand::Rng;
use tracing::{error, info};

use super::error::{Error, Result};
use super::metric::{DiskPool, SlabOptions};
use crate::models::{Index, Metric};

/// The mirrored fields of one sample.
#[derive(Debug, Clone, Copy)]
struct Point {
    value: f64,
    score: f64,
    average: f64,
}

struct MemSlab {
    id: u32,
    links: DashMap<u32, BTreeMap<u32, Point>>,
}

impl MemSlab {
    fn range(&self, opts: SlabOptions) -> (u32, u32) {
        let start = self.id * opts.period;
        (start, start + opts.period)
    }
}

/// The memory slab pool.
pub(super) struct MemPool {
    opts: SlabOptions,
    percentage: f64,
    slabs: RwLock<Vec<MemSlab>>,
    /// Admission decision per link, drawn once.
    decisions: DashMap<u32, bool>,
    init_ok: AtomicBool,
    init_err: AtomicBool,
}

impl MemPool {
    pub(super) fn new(opts: SlabOptions, percentage: f64) -> Self {
        Self {
            opts,
            percentage,
            slabs: RwLock::new(Vec::new()),
            decisions: DashMap::new(),
            init_ok: AtomicBool::new(false),
            init_err: AtomicBool::new(false),
        }
    }

    /// Stream existing samples of admitted links from disk. Runs in the
    /// background; reads fall back to disk until it flips `init_ok`.
    pub(super) fn init(&self, disk: &DiskPool, idxs: &[Index]) {
        for idx in idxs {
            if !self.admit(idx.link) {
                continue;
            }
            match disk.get(&idx.name, idx.link, 0, u32::MAX) {
                Ok(ms) => {
                    for m in &ms {
                        if let Err(err) = self.put(m) {
                            self.init_err.store(true, Ordering::Release);
                            error!(name = %idx.name, %err, "failed to mirror samples to memory");
                            return;
                        }
                    }
                }
                Err(err) => {
                    self.init_err.store(true, Ordering::Release);
                    error!(name = %idx.name, %err, "failed to load samples for memory mirror");
                    return;
                }
            }
        }
        self.init_ok.store(true, Ordering::Release);
        info!("metric memory mirror init done");
    }

    pub(super) fn is_init_ok(&self) -> bool {
        self.init_ok.load(Ordering::Acquire)
    }

    pub(super) fn is_init_err(&self) -> bool {
        self.init_err.load(Ordering::Acquire)
    }

    /// The admission decision for a link, drawing it on first sight.
    pub(super) fn admit(&self, link: u32) -> bool {
        *self
            .decisions
            .entry(link)
            .or_insert_with(|| rand::thread_rng().gen::<f64>() < self.percentage)
    }

    /// True if the link was admitted (never draws).
    pub(super) fn is_admitted(&self, link: u32) -> bool {
        self.decisions.get(&link).is_some_and(|d| *d)
    }

    fn adjust(&self, slabs: &mut Vec<MemSlab>, stamp: u32) {
        let id = stamp / self.opts.period;
        if slabs.last().is_none_or(|s| id > s.id) {
            slabs.push(MemSlab {
                id,
                links: DashMap::new(),
            });
        }
        while slabs.len() > 1 {
            let newest = slabs[slabs.len() - 1].id;
            if newest - slabs[0].id < self.opts.expiration / self.opts.period {
                break;
            }
            slabs.remove(0);
        }
    }

    pub(super) fn put(&self, m: &Metric) -> Result<()> {
        if m.link == 0 {
            return Err(Error::NoLink);
        }
        let mut slabs = self.slabs.write().unwrap_or_else(|e| e.into_inner());
        self.adjust(&mut slabs, m.stamp);
        for slab in slabs.iter().rev() {
            let (min, max) = slab.range(self.opts);
            if min <= m.stamp && m.stamp < max {
                slab.links.entry(m.link).or_default().insert(
                    m.stamp,
                    Point {
                        value: m.value,
                        score: m.score,
                        average: m.average,
                    },
                );
                return Ok(());
            }
        }
        Err(Error::NoSlab)
    }

    pub(super) fn get(&self, name: &str, link: u32, start: u32, end: u32) -> Vec<Metric> {
        let slabs = self.slabs.read().unwrap_or_else(|e| e.into_inner());
        let mut ms = Vec::new();
        for slab in slabs.iter() {
            let (min, max) = slab.range(self.opts);
            if start >= max || end < min {
                continue;
            }
            let st = start.max(min);
            let ed = end.min(max);
            if let Some(points) = slab.links.get(&link) {
                for (stamp, point) in points.range(st..ed) {
                    ms.push(Metric {
                        name: name.to_owned(),
                        stamp: *stamp,
                        value: point.value,
                        score: point.score,
                        average: point.average,
                        link,
                    });
                }
            }
        }
        ms
    }
}
