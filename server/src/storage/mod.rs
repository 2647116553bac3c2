//! Tiered persistent storage.
//!
//! One root directory holds the three stores and an options lock file:
//!
//! ```text
//! storage/              (period=1day, expiration=7days)
//!   |- options.lock
//!   |- index/           one ordered key→value store
//!   |- metric/
//!   |     |- 16913      one slab per period
//!   |     |- ...
//!   |     |- 16920      active
//!   |- event/
//!         |- 16913
//!         |- ...
//! ```
//!
//! The lock file pins `period` and `expiration` at creation time. A
//! reopen with a different period is fatal, since slab boundaries would
//! no longer line up; [`migrate`] replays the data into a fresh layout
//! instead. A changed expiration only moves the retention edge and is
//! re-pinned in place.

pub mod error;

mod event;
mod index;
mod metric;
mod metric_mem;
mod migrate;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use error::Error;
pub use event::{EventRecord, EventStore};
pub use index::IndexStore;
pub use metric::{CacheOptions, MetricStore, SlabOptions};
pub use migrate::migrate;

use error::Result;

/// Name of the pinned-options file at the storage root.
const OPTIONS_FILE: &str = "options.lock";

/// Child store directory names.
const INDEX_DIR: &str = "index";
const METRIC_DIR: &str = "metric";
const EVENT_DIR: &str = "event";

/// Options to open the storage layer.
#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub period: u32,
    pub expiration: u32,
    pub enable_cache: bool,
    pub cache_percentage: f64,
}

/// The pinned layout options, serialized into `options.lock`.
#[derive(Debug, Serialize, Deserialize)]
struct PinnedOptions {
    period: u32,
    expiration: u32,
}

/// The three stores behind one root directory.
pub struct Storage {
    pub index: IndexStore,
    pub metric: MetricStore,
    pub event: EventStore,
}

impl Storage {
    /// Open (or create) the storage layout.
    pub fn open(path: impl AsRef<Path>, opts: Options) -> Result<Self> {
        let root: PathBuf = path.as_ref().into();
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
            debug!(dir = %root.display(), "storage directory created");
        }
        check_pinned_options(&root, opts)?;

        let slab_opts = SlabOptions {
            period: opts.period,
            expiration: opts.expiration,
        };
        let cache_opts = CacheOptions {
            enabled: opts.enable_cache,
            percentage: opts.cache_percentage,
        };
        let index = IndexStore::open(root.join(INDEX_DIR))?;
        let idxs = index.all();
        let metric = MetricStore::open(root.join(METRIC_DIR), slab_opts, cache_opts, idxs)?;
        let event = EventStore::open(root.join(EVENT_DIR), slab_opts)?;
        debug!("storage opened");
        Ok(Self {
            index,
            metric,
            event,
        })
    }
}

/// Verify the layout was created with the configured period, pinning
/// the options on first creation.
///
/// A changed period is fatal: slab boundaries would no longer line up,
/// so the data has to be replayed with [`migrate`]. A changed expiration
/// only moves the retention edge and is re-pinned in place.
fn check_pinned_options(root: &Path, opts: Options) -> Result<()> {
    let lock_path = root.join(OPTIONS_FILE);
    let pinned = PinnedOptions {
        period: opts.period,
        expiration: opts.expiration,
    };
    if lock_path.exists() {
        let raw = std::fs::read_to_string(&lock_path)?;
        let found: PinnedOptions = serde_json::from_str(&raw).map_err(|_| Error::Corrupted)?;
        if found.period != opts.period {
            return Err(Error::OptionsMismatch {
                found_period: found.period,
                found_expiration: found.expiration,
                want_period: opts.period,
                want_expiration: opts.expiration,
            });
        }
        if found.expiration == opts.expiration {
            return Ok(());
        }
    }
    std::fs::write(&lock_path, serde_json::to_vec(&pinned)?)?;
    Ok(())
}

/// Read the pinned options of an existing layout.
fn read_pinned_options(root: &Path) -> Result<PinnedOptions> {
    let raw = std::fs::read_to_string(root.join(OPTIONS_FILE))?;
    serde_json::from_str(&raw).map_err(|_| Error::Corrupted)
}
