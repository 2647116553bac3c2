//! The event store: time-partitioned slabs of fired alerts.
//!
//! Same slab-per-period lifecycle as the metric store. Each slab keeps
//! records ordered by stamp (key = stamp ++ event id digest) so range
//! scans come back chronological; project and level predicates are
//! applied in the scan.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::{Error, Result};
use super::metric::SlabOptions;
use crate::models::{Event, Level};

/// The persisted, flattened form of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    #[serde(rename = "ruleID")]
    pub rule_id: i32,
    #[serde(rename = "projectID")]
    pub project_id: i32,
    pub level: Level,
    pub comment: String,
    pub name: String,
    pub stamp: u32,
    /// Smoothed index score at fire time.
    pub score: f64,
    /// Smoothed index average at fire time.
    pub average: f64,
    /// Observed metric value.
    pub value: f64,
    #[serde(rename = "translatedComment")]
    pub translated_comment: String,
}

impl EventRecord {
    /// Flatten an event for storage.
    pub fn from_event(ev: &Event) -> Self {
        Self {
            id: ev.id.clone(),
            rule_id: ev.rule.id,
            project_id: ev.rule.project_id,
            level: ev.rule.level,
            comment: ev.rule.comment.clone(),
            name: ev.index.name.clone(),
            stamp: ev.metric.stamp,
            score: ev.index.score,
            average: ev.index.average,
            value: ev.metric.value,
            translated_comment: ev.rule_translated_comment.clone(),
        }
    }
}

struct EventSlab {
    id: u32,
    tree: sled::Db,
    path: PathBuf,
}

impl EventSlab {
    fn open(path: PathBuf) -> Result<Self> {
        let base = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or(Error::Corrupted)?;
        let id: u32 = base.parse().map_err(|_| Error::Corrupted)?;
        let tree = sled::open(&path)?;
        Ok(Self { id, tree, path })
    }

    fn create(dir: &Path, id: u32) -> Result<Self> {
        let path = dir.join(id.to_string());
        let tree = sled::open(&path)?;
        Ok(Self { id, tree, path })
    }

    fn range(&self, opts: SlabOptions) -> (u32, u32) {
        let start = self.id * opts.period;
        (start, start + opts.period)
    }

    fn put(&self, record: &EventRecord) -> Result<()> {
        let mut key = Vec::with_capacity(4 + record.id.len());
        key.extend_from_slice(&record.stamp.to_be_bytes());
        key.extend_from_slice(record.id.as_bytes());
        self.tree.insert(key, serde_json::to_vec(record)?)?;
        Ok(())
    }

    fn scan<F>(&self, start: u32, end: u32, keep: &F, out: &mut Vec<EventRecord>) -> Result<()>
    where
        F: Fn(&EventRecord) -> bool,
    {
        let lo = start.to_be_bytes().to_vec();
        let hi = end.to_be_bytes().to_vec();
        for entry in self.tree.range(lo..hi) {
            let (_, value) = entry?;
            match serde_json::from_slice::<EventRecord>(&value) {
                Ok(record) => {
                    if keep(&record) {
                        out.push(record);
                    }
                }
                Err(_) => warn!(slab = self.id, "corrupted event record found, skipping"),
            }
        }
        Ok(())
    }
}

/// Persistent alert history over the retention window.
pub struct EventStore {
    opts: SlabOptions,
    dir: PathBuf,
    pool: RwLock<Vec<EventSlab>>,
}

impl EventStore {
    /// Open the store, loading every slab in the directory.
    pub fn open(dir: impl Into<PathBuf>, opts: SlabOptions) -> Result<Self> {
        let dir = dir.into();
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
            debug!(dir = %dir.display(), "event directory created");
        }
        let mut pool = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            match EventSlab::open(path.clone()) {
                Ok(slab) => {
                    debug!(slab = slab.id, "event slab opened");
                    pool.push(slab);
                }
                Err(Error::Corrupted) => {
                    warn!(path = %path.display(), "unrecognized event slab entry, skipping");
                }
                Err(err) => return Err(err),
            }
        }
        pool.sort_by_key(|s| s.id);
        Ok(Self {
            opts,
            dir,
            pool: RwLock::new(pool),
        })
    }

    fn adjust(&self, pool: &mut Vec<EventSlab>, stamp: u32) -> Result<()> {
        let id = stamp / self.opts.period;
        if pool.last().is_none_or(|s| id > s.id) {
            pool.push(EventSlab::create(&self.dir, id)?);
            info!(slab = id, "event slab created");
        }
        while pool.len() > 1 {
            let newest = pool[pool.len() - 1].id;
            if newest - pool[0].id < self.opts.expiration / self.opts.period {
                break;
            }
            let expired = pool.remove(0);
            let (id, path) = (expired.id, expired.path.clone());
            drop(expired);
            std::fs::remove_dir_all(&path)?;
            info!(slab = id, "event slab expired");
        }
        Ok(())
    }

    /// Persist a fired event. The pool is adjusted first, so a current
    /// stamp always has a covering slab.
    pub fn put(&self, record: &EventRecord) -> Result<()> {
        let mut pool = self.pool.write().unwrap_or_else(|e| e.into_inner());
        self.adjust(&mut pool, record.stamp)?;
        for slab in pool.iter().rev() {
            let (min, max) = slab.range(self.opts);
            if min <= record.stamp && record.stamp < max {
                return slab.put(record);
            }
        }
        Err(Error::NoSlab)
    }

    /// Events of one project at or above a level, within `[start, end)`.
    pub fn by_project(
        &self,
        project_id: i32,
        lowest: Level,
        start: u32,
        end: u32,
    ) -> Result<Vec<EventRecord>> {
        self.query(start, end, move |r| {
            r.project_id == project_id && r.level >= lowest
        })
    }

    /// Events at or above a level, within `[start, end)`.
    pub fn by_range(&self, lowest: Level, start: u32, end: u32) -> Result<Vec<EventRecord>> {
        self.query(start, end, move |r| r.level >= lowest)
    }

    fn query<F>(&self, start: u32, end: u32, keep: F) -> Result<Vec<EventRecord>>
    where
        F: Fn(&EventRecord) -> bool,
    {
        let pool = self.pool.read().unwrap_or_else(|e| e.into_inner());
        let mut out = Vec::new();
        for slab in pool.iter() {
            let (min, max) = slab.range(self.opts);
            if start >= max || end < min {
                continue;
            }
            slab.scan(start.max(min), end.min(max), &keep, &mut out)?;
        }
        Ok(out)
    }

    /// Visit every stored record, slabs in ascending order.
    pub fn scan<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(&EventRecord) -> Result<()>,
    {
        let pool = self.pool.read().unwrap_or_else(|e| e.into_inner());
        for slab in pool.iter() {
            for entry in slab.tree.iter() {
                let (_, value) = entry?;
                match serde_json::from_slice::<EventRecord>(&value) {
                    Ok(record) => visit(&record)?,
                    Err(_) => warn!(slab = slab.id, "corrupted event record found, skipping"),
                }
            }
        }
        Ok(())
    }
}
