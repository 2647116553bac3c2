//! Offline relayout of a storage directory.
//!
//! A changed period moves every slab boundary, so the layout cannot be
//! reopened in place. Migration builds a sibling `<dir>_backup` layout
//! with the new options, copies the index verbatim (it is period
//! independent), replays samples and events into the new slab widths,
//! then swaps the directories, leaving the original behind as
//! `<dir>_old`. Run it with every store closed.

use std::path::{Path, PathBuf};

use tracing::info;

use super::error::{Error, Result};
use super::event::EventStore;
use super::metric::{CacheOptions, MetricStore, SlabOptions};
use super::{read_pinned_options, Options, PinnedOptions, EVENT_DIR, INDEX_DIR, METRIC_DIR, OPTIONS_FILE};

const BACKUP_EXT: &str = "_backup";
const OLD_EXT: &str = "_old";

/// Replay an existing layout into a fresh one with the given options.
/// A layout whose period already matches is left untouched.
pub fn migrate(path: impl AsRef<Path>, opts: Options) -> Result<()> {
    let root = path.as_ref();
    let pinned = read_pinned_options(root)?;
    if pinned.period == opts.period {
        return Ok(());
    }

    let backup = sibling(root, BACKUP_EXT);
    if backup.exists() {
        std::fs::remove_dir_all(&backup)?;
    }
    std::fs::create_dir_all(&backup)?;

    copy_dir(&root.join(INDEX_DIR), &backup.join(INDEX_DIR))?;

    // Replay inside a scope so every store is closed before the swap.
    {
        let no_cache = CacheOptions {
            enabled: false,
            percentage: 0.0,
        };
        let old_slabs = SlabOptions {
            period: pinned.period,
            expiration: pinned.expiration,
        };
        let new_slabs = SlabOptions {
            period: opts.period,
            expiration: opts.expiration,
        };

        let old_metric = MetricStore::open(root.join(METRIC_DIR), old_slabs, no_cache, Vec::new())?;
        let new_metric =
            MetricStore::open(backup.join(METRIC_DIR), new_slabs, no_cache, Vec::new())?;
        old_metric.scan(|m| match new_metric.put(m) {
            // Samples preceding the new window have nowhere to go.
            Ok(()) | Err(Error::NoSlab) => Ok(()),
            Err(err) => Err(err),
        })?;

        let old_event = EventStore::open(root.join(EVENT_DIR), old_slabs)?;
        let new_event = EventStore::open(backup.join(EVENT_DIR), new_slabs)?;
        old_event.scan(|record| match new_event.put(record) {
            Ok(()) | Err(Error::NoSlab) => Ok(()),
            Err(err) => Err(err),
        })?;
    }

    let new_pinned = PinnedOptions {
        period: opts.period,
        expiration: opts.expiration,
    };
    std::fs::write(backup.join(OPTIONS_FILE), serde_json::to_vec(&new_pinned)?)?;

    let old = sibling(root, OLD_EXT);
    if old.exists() {
        std::fs::remove_dir_all(&old)?;
    }
    std::fs::rename(root, &old)?;
    std::fs::rename(&backup, root)?;
    info!(
        dir = %root.display(),
        old_period = pinned.period,
        new_period = opts.period,
        "storage migrated"
    );
    Ok(())
}

fn sibling(root: &Path, ext: &str) -> PathBuf {
    let mut name = root
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(ext);
    root.with_file_name(name)
}

fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let kind = entry.file_type()?;
        let to = dst.join(entry.file_name());
        if kind.is_dir() {
            copy_dir(&entry.path(), &to)?;
        } else if kind.is_file() {
            std::fs::copy(entry.path(), &to)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::Storage;
    use super::*;
    use crate::models::{Index, Metric};

    const HOUR: u32 = 3600;

    fn options(period: u32) -> Options {
        Options {
            period,
            expiration: 5 * period,
            enable_cache: false,
            cache_percentage: 0.0,
        }
    }

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
    fn test_migrate_replays_into_new_period() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("storage");
        let base = 500_000 * HOUR;
        {
            let storage = Storage::open(&root, options(HOUR)).unwrap();
            let mut idx = Index::new("a.b", base);
            storage.index.put(&mut idx).unwrap();
            for i in 0..3u32 {
                storage.metric.put(&sample(idx.link, base + i * HOUR, 1.0)).unwrap();
            }
        }

        migrate(&root, options(2 * HOUR)).unwrap();

        let storage = Storage::open(&root, options(2 * HOUR)).unwrap();
        // Index survived the copy, links intact.
        let idx = storage.index.get("a.b").unwrap();
        assert_eq!(idx.link, 1);
        // All samples landed in the rewindowed slabs.
        let ms = storage
            .metric
            .get("a.b", idx.link, base, base + 3 * HOUR)
            .unwrap();
        assert_eq!(ms.len(), 3);
        // The original layout is kept aside.
        assert!(dir.path().join("storage_old").exists());
    }

    #[test]
    fn test_migrate_same_period_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("storage");
        {
            let _storage = Storage::open(&root, options(HOUR)).unwrap();
        }
        migrate(&root, options(HOUR)).unwrap();
        assert!(!dir.path().join("storage_old").exists());
    }
}
