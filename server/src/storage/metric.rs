//! The metric store: time-partitioned slabs of samples.
//!
//! Samples shard into slabs by `slab_id = stamp / period`; each slab is
//! an independent ordered key→value tree stored in a directory named by
//! the decimal slab id. Writing past the newest boundary creates a slab;
//! the oldest slabs expire once the window exceeds `expiration/period`.
//!
//! Entry format:
//!
//! ```text
//! |------- Key (8) ------|-------------- Value (24) -----------|
//! +----------+-----------+-----------+-----------+-------------+
//! | Link (4) | Stamp (4) | Value (8) | Score (8) | Average (8) |
//! +----------+-----------+-----------+-----------+-------------+
//! ```
//!
//! All fields big-endian, so the engine's byte order is `(link, stamp)`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use super::error::{Error, Result};
use super::metric_mem::MemPool;
use crate::models::{Index, Metric};

/// Key width: link + stamp.
const KEY_LEN: usize = 4 + 4;
/// Value width: value + score + average.
const VALUE_LEN: usize = 8 + 8 + 8;

/// Slab lifecycle options.
#[derive(Debug, Clone, Copy)]
pub struct SlabOptions {
    /// Slab width in seconds.
    pub period: u32,
    /// Retention depth in seconds.
    pub expiration: u32,
}

impl SlabOptions {
    /// Number of expired-eligible slabs kept behind the writing slab.
    const fn depth(self) -> u32 {
        self.expiration / self.period
    }
}

/// One period-wide storage instance.
struct Slab {
    id: u32,
    tree: sled::Db,
    path: PathBuf,
}

impl Slab {
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

    /// Covered stamp range `[start, end)`.
    fn range(&self, opts: SlabOptions) -> (u32, u32) {
        let start = self.id * opts.period;
        (start, start + opts.period)
    }

    fn put(&self, m: &Metric) -> Result<()> {
        if m.link == 0 {
            return Err(Error::NoLink);
        }
        self.tree
            .insert(encode_key(m.link, m.stamp).to_vec(), encode_value(m).to_vec())?;
        Ok(())
    }

    fn get(&self, name: &str, link: u32, start: u32, end: u32) -> Result<Vec<Metric>> {
        let lo = encode_key(link, start);
        let hi = encode_key(link, end);
        let mut ms = Vec::new();
        for entry in self.tree.range(lo..hi) {
            let (key, value) = entry?;
            let mut m = Metric {
                name: name.to_owned(),
                ..Metric::default()
            };
            decode_key(&key, &mut m)?;
            decode_value(&value, &mut m)?;
            ms.push(m);
        }
        Ok(ms)
    }
}

/// The on-disk slab pool. Lifecycle and writes take the write lock;
/// range reads take the read lock.
pub(super) struct DiskPool {
    opts: SlabOptions,
    dir: PathBuf,
    pool: RwLock<Vec<Slab>>,
}

impl DiskPool {
    fn open(dir: PathBuf, opts: SlabOptions) -> Result<Self> {
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
            debug!(dir = %dir.display(), "metric directory created");
        }
        let mut pool = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            match Slab::open(path.clone()) {
                Ok(slab) => {
                    debug!(slab = slab.id, "metric slab opened");
                    pool.push(slab);
                }
                Err(Error::Corrupted) => {
                    warn!(path = %path.display(), "unrecognized metric slab entry, skipping");
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

    /// Create the slab covering `stamp` when it lies past the newest
    /// boundary, then expire slabs that fell out of the window.
    fn adjust(&self, pool: &mut Vec<Slab>, stamp: u32) -> Result<()> {
        let id = stamp / self.opts.period;
        if pool.last().is_none_or(|s| id > s.id) {
            pool.push(Slab::create(&self.dir, id)?);
            info!(slab = id, "metric slab created");
        }
        while pool.len() > 1 {
            let newest = pool[pool.len() - 1].id;
            let oldest = &pool[0];
            if newest - oldest.id < self.opts.depth() {
                break;
            }
            let expired = pool.remove(0);
            let (id, path) = (expired.id, expired.path.clone());
            drop(expired); // release the tree before unlinking
            std::fs::remove_dir_all(&path)?;
            info!(slab = id, "metric slab expired");
        }
        Ok(())
    }

    pub(super) fn put(&self, m: &Metric) -> Result<()> {
        let mut pool = self.pool.write().unwrap_or_else(|e| e.into_inner());
        self.adjust(&mut pool, m.stamp)?;
        for slab in pool.iter().rev() {
            let (min, max) = slab.range(self.opts);
            if min <= m.stamp && m.stamp < max {
                return slab.put(m);
            }
        }
        Err(Error::NoSlab)
    }

    pub(super) fn get(&self, name: &str, link: u32, start: u32, end: u32) -> Result<Vec<Metric>> {
        let pool = self.pool.read().unwrap_or_else(|e| e.into_inner());
        let mut ms = Vec::new();
        for slab in pool.iter() {
            let (min, max) = slab.range(self.opts);
            if start >= max || end < min {
                continue;
            }
            let st = start.max(min);
            let ed = end.min(max);
            ms.extend(slab.get(name, link, st, ed)?);
        }
        Ok(ms)
    }

    pub(super) fn scan<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(&Metric) -> Result<()>,
    {
        let pool = self.pool.read().unwrap_or_else(|e| e.into_inner());
        for slab in pool.iter() {
            for entry in slab.tree.iter() {
                let (key, value) = entry?;
                let mut m = Metric::default();
                decode_key(&key, &mut m)?;
                decode_value(&value, &mut m)?;
                visit(&m)?;
            }
        }
        Ok(())
    }
}

/// The metric store: on-disk slab pool plus the optional memory mirror.
pub struct MetricStore {
    disk: Arc<DiskPool>,
    mem: Option<Arc<MemPool>>,
}

/// Memory mirror options.
#[derive(Debug, Clone, Copy)]
pub struct CacheOptions {
    pub enabled: bool,
    /// Per-link admission probability.
    pub percentage: f64,
}

impl MetricStore {
    /// Open the store. When the mirror is enabled, a background task
    /// streams existing samples of admitted links into memory; the disk
    /// pool stays authoritative until that completes.
    pub fn open(
        dir: impl Into<PathBuf>,
        opts: SlabOptions,
        cache: CacheOptions,
        idxs: Vec<Index>,
    ) -> Result<Self> {
        let disk = Arc::new(DiskPool::open(dir.into(), opts)?);
        let mem = if cache.enabled {
            let mem = Arc::new(MemPool::new(opts, cache.percentage));
            let init_mem = Arc::clone(&mem);
            let init_disk = Arc::clone(&disk);
            std::thread::spawn(move || init_mem.init(&init_disk, &idxs));
            Some(mem)
        } else {
            None
        };
        Ok(Self { disk, mem })
    }

    /// Persist a sample, mirroring it for admitted links.
    pub fn put(&self, m: &Metric) -> Result<()> {
        self.disk.put(m)?;
        if let Some(mem) = &self.mem {
            if !mem.is_init_err() && mem.admit(m.link) {
                mem.put(m)?;
            }
        }
        Ok(())
    }

    /// Samples for `(link, [start, end))` in ascending stamp order.
    ///
    /// Served from memory once the mirror holds the link and its init
    /// has completed; otherwise from disk.
    pub fn get(&self, name: &str, link: u32, start: u32, end: u32) -> Result<Vec<Metric>> {
        if let Some(mem) = &self.mem {
            if mem.is_init_ok() && mem.is_admitted(link) {
                return Ok(mem.get(name, link, start, end));
            }
        }
        self.disk.get(name, link, start, end)
    }

    /// Visit every stored sample, slabs in ascending order. Keys do not
    /// carry names, so visited metrics hold link and stamp only.
    pub fn scan<F>(&self, visit: F) -> Result<()>
    where
        F: FnMut(&Metric) -> Result<()>,
    {
        self.disk.scan(visit)
    }
}

fn encode_key(link: u32, stamp: u32) -> [u8; KEY_LEN] {
    let mut b = [0u8; KEY_LEN];
    b[..4].copy_from_slice(&link.to_be_bytes());
    b[4..].copy_from_slice(&stamp.to_be_bytes());
    b
}

fn encode_value(m: &Metric) -> [u8; VALUE_LEN] {
    let mut b = [0u8; VALUE_LEN];
    b[..8].copy_from_slice(&m.value.to_bits().to_be_bytes());
    b[8..16].copy_from_slice(&m.score.to_bits().to_be_bytes());
    b[16..].copy_from_slice(&m.average.to_bits().to_be_bytes());
    b
}

fn decode_key(key: &[u8], m: &mut Metric) -> Result<()> {
    if key.len() != KEY_LEN {
        return Err(Error::Corrupted);
    }
    m.link = u32::from_be_bytes(key[..4].try_into().unwrap());
    m.stamp = u32::from_be_bytes(key[4..].try_into().unwrap());
    Ok(())
}

fn decode_value(value: &[u8], m: &mut Metric) -> Result<()> {
    if value.len() != VALUE_LEN {
        return Err(Error::Corrupted);
    }
    m.value = f64::from_bits(u64::from_be_bytes(value[..8].try_into().unwrap()));
    m.score = f64::from_bits(u64::from_be_bytes(value[8..16].try_into().unwrap()));
    m.average = f64::from_bits(u64::from_be_bytes(value[16..].try_into().unwrap()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: u32 = 86400;
    const OPTS: SlabOptions = SlabOptions {
        period: PERIOD,
        expiration: 7 * PERIOD,
    };
    const NO_CACHE: CacheOptions = CacheOptions {
        enabled: false,
        percentage: 0.0,
    };

    fn sample(link: u32, stamp: u32, value: f64) -> Metric {
        Metric {
            name: "a.b".into(),
            stamp,
            value,
            score: 0.0,
            average: value,
            link,
        }
    }

    #[test]
    fn test_key_order_is_link_then_stamp() {
        assert!(encode_key(1, u32::MAX) < encode_key(2, 0));
        assert!(encode_key(1, 5) < encode_key(1, 6));
    }

    #[test]
    fn test_put_get_in_range_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetricStore::open(dir.path(), OPTS, NO_CACHE, Vec::new()).unwrap();
        let base = 20000 * PERIOD;
        for (i, value) in [3.0, 1.0, 2.0].iter().enumerate() {
            store.put(&sample(1, base + 10 * (i as u32 + 1), *value)).unwrap();
        }
        // Another link inside the same slab stays invisible.
        store.put(&sample(2, base + 15, 9.0)).unwrap();

        let ms = store.get("a.b", 1, base, base + 31).unwrap();
        let stamps: Vec<u32> = ms.iter().map(|m| m.stamp).collect();
        assert_eq!(stamps, vec![base + 10, base + 20, base + 30]);
        // Half-open range excludes the right edge.
        let ms = store.get("a.b", 1, base, base + 30).unwrap();
        assert_eq!(ms.len(), 2);
    }

    #[test]
    fn test_put_without_link_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetricStore::open(dir.path(), OPTS, NO_CACHE, Vec::new()).unwrap();
        let m = sample(0, 20000 * PERIOD, 1.0);
        assert!(matches!(store.put(&m), Err(Error::NoLink)));
    }

    #[test]
    fn test_expiration_drops_old_slabs() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetricStore::open(dir.path(), OPTS, NO_CACHE, Vec::new()).unwrap();
        let base_id = 20000;
        for day in 0..9 {
            let stamp = (base_id + day) * PERIOD + 1;
            store.put(&sample(1, stamp, f64::from(day))).unwrap();
        }
        // Slabs older than newest − 7 are gone.
        let ms = store
            .get("a.b", 1, base_id * PERIOD, (base_id + 9) * PERIOD)
            .unwrap();
        let earliest = ms.iter().map(|m| m.stamp).min().unwrap();
        assert!(earliest >= (base_id + 1) * PERIOD);
        // A write preceding the oldest slab has nowhere to go.
        let stale = sample(1, (base_id - 1) * PERIOD, 0.0);
        assert!(matches!(store.put(&stale), Err(Error::NoSlab)));
    }

    #[test]
    fn test_reopen_preserves_samples() {
        let dir = tempfile::tempdir().unwrap();
        let t = 20000 * PERIOD;
        {
            let store = MetricStore::open(dir.path(), OPTS, NO_CACHE, Vec::new()).unwrap();
            for day in 0..3u32 {
                store.put(&sample(7, t + day * PERIOD, 1.0)).unwrap();
            }
        }
        let store = MetricStore::open(dir.path(), OPTS, NO_CACHE, Vec::new()).unwrap();
        let ms = store.get("a.b", 7, t, t + 2 * PERIOD).unwrap();
        assert_eq!(ms.len(), 2);
        assert_eq!(ms[0].stamp, t);
        assert_eq!(ms[1].stamp, t + PERIOD);
    }
}
