//! Persisted state.
//!
//! ```text
//! <state_dir>/
//! ├── placeholders.snap / placeholders.journal   PlaceholderIndex
//! ├── blob_sizes.snap   / blob_sizes.journal     BlobSizeCache
//! ├── tasks.log         / tasks.checkpoint       BackgroundTaskQueue (see queue)
//! └── objects/
//!     ├── pack/   pack-<checksum>.pack + .idx    LocalObjectStore
//!     └── tmp/    downloads awaiting indexing
//! ```
//!
//! Tables are a [`PersistentTable`]: an in-memory `BTreeMap` whose every
//! mutation is appended to a length-prefixed bincode [`journal`] before it is
//! applied, plus a snapshot written by [`PersistentTable::compact`].

pub mod blob_sizes;
pub mod journal;
pub mod objects;
pub mod placeholders;
pub mod table;

use thiserror::Error;

use crate::object::ObjectId;
use crate::pack::PackError;

pub use blob_sizes::BlobSizeCache;
pub use journal::Journal;
pub use objects::LocalObjectStore;
pub use placeholders::{PlaceholderEntry, PlaceholderIndex, PlaceholderKind, PlaceholderState};
pub use table::PersistentTable;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// File system failure.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded or decoded.
    #[error("store encoding error: {0}")]
    Encoding(String),

    /// A record is structurally invalid (not a torn tail).
    #[error("corrupt record in {file} at byte {offset}")]
    Corrupt { file: String, offset: u64 },

    /// The object is not in the local store.
    #[error("object {0} not found in local store")]
    ObjectNotFound(ObjectId),

    /// Reading an adopted pack failed.
    #[error(transparent)]
    Pack(#[from] PackError),
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Encoding(e.to_string())
    }
}
