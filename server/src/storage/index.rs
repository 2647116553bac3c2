//! The index store: durable `name → {link, stamp, score, average}` map
//! with an in-memory trie mirror serving reads at memory speed.
//!
//! Entry format:
//!
//! ```text
//! |--- Key --|------------------ Value (24) -------------------|
//! +----------+-----------+-----------+-----------+-------------+
//! | Name (X) |  Link (4) | Stamp (4) | Score (8) | Average (8) |
//! +----------+-----------+-----------+-----------+-------------+
//! ```
//!
//! All integers and float bit patterns are big-endian.

use std::path::Path;

use tracing::{debug, warn};

use super::error::{Error, Result};
use crate::models::Index;
use crate::util::idpool::IdPool;
use crate::util::trie::Trie;

/// Encoded value width.
const VALUE_LEN: usize = 4 + 4 + 8 + 8;

/// Lowest assignable link.
const LINK_LOW: usize = 1;
/// One past the highest assignable link.
const LINK_HIGH: usize = 1 << 24;

/// Persistent per-name index map with link assignment.
pub struct IndexStore {
    db: sled::Db,
    trie: Trie<Index>,
    pool: IdPool,
}

impl IndexStore {
    /// Open the store, loading every record into the trie mirror and
    /// reserving its link.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        let store = Self {
            db,
            trie: Trie::new(),
            pool: IdPool::new(LINK_LOW, LINK_HIGH),
        };
        store.load()?;
        debug!(indexes = store.trie.len(), "index store opened");
        Ok(store)
    }

    /// Load records from disk into the trie. Corrupted entries are
    /// skipped, not fatal.
    fn load(&self) -> Result<()> {
        for entry in self.db.iter() {
            let (key, value) = entry?;
            let Ok(name) = std::str::from_utf8(&key) else {
                warn!("corrupted index key found, skipping");
                continue;
            };
            match decode(name, &value) {
                Ok(idx) => {
                    self.pool.reserve(idx.link as usize);
                    self.trie.put(name, idx);
                }
                Err(_) => {
                    warn!(name, "corrupted index value found, skipping");
                }
            }
        }
        Ok(())
    }

    /// Insert or update a record.
    ///
    /// A new name gets a link from the pool; re-puts keep the existing
    /// link. A record that ends up without a link is rejected.
    pub fn put(&self, idx: &mut Index) -> Result<()> {
        if let Some(existing) = self.trie.get(&idx.name) {
            idx.link = existing.link;
        } else if idx.link == 0 {
            let id = self.pool.allocate();
            if id >= self.pool.high() {
                return Err(Error::NoLink);
            }
            idx.link = id as u32;
        }
        if idx.link == 0 {
            return Err(Error::NoLink);
        }
        self.db.insert(idx.name.as_bytes(), encode(idx))?;
        self.trie.put(&idx.name, idx.clone());
        Ok(())
    }

    /// Fetch a copy of a record.
    pub fn get(&self, name: &str) -> Result<Index> {
        self.trie.get(name).ok_or(Error::NotFound)
    }

    /// Returns true if the name is indexed.
    pub fn has(&self, name: &str) -> bool {
        self.trie.has(name)
    }

    /// Remove a record and return its link to the pool.
    pub fn delete(&self, name: &str) -> Result<()> {
        match self.trie.pop(name) {
            Some(idx) => {
                self.pool.release(idx.link as usize);
                self.db.remove(name.as_bytes())?;
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    /// Copies of all records whose name matches a wildcard pattern.
    pub fn filter(&self, pattern: &str) -> Vec<Index> {
        self.trie
            .match_pattern(pattern)
            .into_iter()
            .map(|(_, idx)| idx)
            .collect()
    }

    /// Copies of all records.
    pub fn all(&self) -> Vec<Index> {
        self.trie.entries().into_iter().map(|(_, idx)| idx).collect()
    }

    /// Number of indexed names.
    pub fn len(&self) -> usize {
        self.trie.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }
}

fn encode(idx: &Index) -> Vec<u8> {
    let mut b = Vec::with_capacity(VALUE_LEN);
    b.extend_from_slice(&idx.link.to_be_bytes());
    b.extend_from_slice(&idx.stamp.to_be_bytes());
    b.extend_from_slice(&idx.score.to_bits().to_be_bytes());
    b.extend_from_slice(&idx.average.to_bits().to_be_bytes());
    b
}

fn decode(name: &str, value: &[u8]) -> Result<Index> {
    if value.len() != VALUE_LEN {
        return Err(Error::Corrupted);
    }
    Ok(Index {
        name: name.to_owned(),
        link: u32::from_be_bytes(value[0..4].try_into().unwrap()),
        stamp: u32::from_be_bytes(value[4..8].try_into().unwrap()),
        score: f64::from_bits(u64::from_be_bytes(value[8..16].try_into().unwrap())),
        average: f64::from_bits(u64::from_be_bytes(value[16..24].try_into().unwrap())),
    })
}
