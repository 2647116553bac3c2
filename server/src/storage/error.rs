//! Storage error types.

use thiserror::Error;

/// Failures surfaced by the index, metric and event stores.
#[derive(Debug, Error)]
pub enum Error {
    /// Requested record does not exist. Callers distinguish this from
    /// invalid state and usually treat it as "first sight".
    #[error("storage: not found")]
    NotFound,
    /// A fixed-width value of the wrong length was read back.
    #[error("storage: corrupted data found")]
    Corrupted,
    /// The record carries no link.
    #[error("storage: no link")]
    NoLink,
    /// The write targets a stamp outside the active retention window.
    #[error("storage: no slab covers the stamp")]
    NoSlab,
    /// The on-disk layout was created with different period/expiration.
    /// Reopening with changed options requires a fresh layout.
    #[error(
        "storage: layout created with period={found_period}s expiration={found_expiration}s, \
         configured period={want_period}s expiration={want_expiration}s"
    )]
    OptionsMismatch {
        found_period: u32,
        found_expiration: u32,
        want_period: u32,
        want_expiration: u32,
    },
    #[error("storage: {0}")]
    Engine(#[from] sled::Error),
    #[error("storage: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage: record encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
