//! Pack files: batch-transferred, indexable containers of objects.
//!
//! The remote store answers a batched object request with a version 2 pack:
//!
//! ```text
//! signature        50 41 43 4b ("PACK")
//! version          00 00 00 02 (network order)
//! object count     xx xx xx xx (network order)
//! entry[0..count]  type/size varint header, optional delta base, zlib body
//! trailer          20-byte SHA-1 of everything above
//! ```
//!
//! Entries are either base objects (commit, tree, blob, tag) or deltas against
//! another object, addressed by pack offset (`OFS_DELTA`) or object id
//! (`REF_DELTA`). [`index_pack`] walks a downloaded pack, verifies the trailer,
//! resolves every delta, verifies object ids, and produces a [`PackIndex`] that
//! makes the pack randomly addressable. [`read_object_at`] later inflates a
//! single object from an adopted pack.

mod builder;
mod delta;
mod entry;
mod index;
mod reader;

use thiserror::Error;

use crate::object::ObjectId;

pub use builder::PackBuilder;
pub use delta::{apply_delta, DeltaError};
pub use entry::{EntryHeader, EntryKind};
pub use index::{IndexEntry, PackIndex};
pub use reader::{index_pack, index_pack_file, read_object_at, ResolvedObject};

/// Pack signature bytes.
pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";

/// Length of the fixed pack header (signature, version, count).
pub const PACK_HEADER_LEN: usize = 12;

/// Length of the SHA-1 trailer.
pub const PACK_TRAILER_LEN: usize = 20;

/// Maximum delta chain depth followed when reading.
pub const MAX_DELTA_DEPTH: usize = 128;

/// Result type for pack operations.
pub type PackResult<T> = Result<T, PackError>;

/// Errors raised while parsing, indexing, or reading packs.
#[derive(Debug, Error)]
pub enum PackError {
    /// I/O failure reading or writing pack data.
    #[error("pack I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The data does not start with `PACK`.
    #[error("invalid pack signature")]
    BadSignature,

    /// Unsupported pack version.
    #[error("unsupported pack version {0}")]
    UnsupportedVersion(u32),

    /// The pack ends before the declared content.
    #[error("pack truncated: {0}")]
    Truncated(String),

    /// Trailer checksum does not match the content.
    #[error("pack checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// An entry uses an unknown type code.
    #[error("unknown entry type {code} at offset {offset}")]
    UnknownEntryType { code: u8, offset: u64 },

    /// Inflating an entry body failed.
    #[error("failed to inflate entry at offset {offset}: {reason}")]
    Inflate { offset: u64, reason: String },

    /// A delta could not be applied.
    #[error("bad delta at offset {offset}: {source}")]
    Delta {
        offset: u64,
        #[source]
        source: DeltaError,
    },

    /// A delta refers to a base that is neither in the pack nor available locally.
    #[error("unresolved delta base {0}")]
    UnresolvedBase(ObjectId),

    /// An offset delta points outside the pack.
    #[error("invalid base offset for entry at {0}")]
    BadBaseOffset(u64),

    /// A delta chain exceeded [`MAX_DELTA_DEPTH`].
    #[error("delta chain too deep at offset {0}")]
    ChainTooDeep(u64),

    /// Index (de)serialization failed.
    #[error("pack index encoding error: {0}")]
    Encoding(String),
}
