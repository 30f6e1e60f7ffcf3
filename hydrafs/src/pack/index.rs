//! Pack index: the object table that makes a pack randomly addressable.

use std::collections::HashMap;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{PackError, PackResult};
use crate::object::{ObjectId, ObjectKind};

/// Index format version. Bumped when the layout changes.
const INDEX_FORMAT_VERSION: u32 = 1;

/// One object in a pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Object id.
    pub id: ObjectId,
    /// Offset of the entry header in the pack.
    pub offset: u64,
    /// Resolved object kind (delta entries report their target kind).
    pub kind: ObjectKind,
    /// Resolved body size in bytes.
    pub size: u64,
}

/// Object table for a single pack file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackIndex {
    format_version: u32,
    /// Trailer checksum of the indexed pack.
    pub pack_checksum: ObjectId,
    /// Entries sorted by object id.
    entries: Vec<IndexEntry>,
}

impl PackIndex {
    /// Builds an index from unsorted entries.
    pub fn new(pack_checksum: ObjectId, mut entries: Vec<IndexEntry>) -> Self {
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries.dedup_by(|a, b| a.id == b.id);
        Self {
            format_version: INDEX_FORMAT_VERSION,
            pack_checksum,
            entries,
        }
    }

    /// Looks up an object by id.
    pub fn find(&self, id: &ObjectId) -> Option<&IndexEntry> {
        self.entries
            .binary_search_by(|e| e.id.cmp(id))
            .ok()
            .map(|idx| &self.entries[idx])
    }

    /// True if the pack contains `id`.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.find(id).is_some()
    }

    /// All entries, sorted by id.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Number of objects in the pack.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Offset to entry map, used when resolving offset deltas.
    pub fn by_offset(&self) -> HashMap<u64, IndexEntry> {
        self.entries.iter().map(|e| (e.offset, *e)).collect()
    }

    /// Loads an index from disk.
    pub fn load(path: &Path) -> PackResult<Self> {
        let file = std::fs::File::open(path)?;
        let index: Self = bincode::deserialize_from(BufReader::new(file))
            .map_err(|e| PackError::Encoding(format!("failed to decode {}: {}", path.display(), e)))?;
        if index.format_version != INDEX_FORMAT_VERSION {
            return Err(PackError::Encoding(format!(
                "index {} has format version {}, expected {}",
                path.display(),
                index.format_version,
                INDEX_FORMAT_VERSION
            )));
        }
        Ok(index)
    }

    /// Writes the index to `path` through a temp file and rename.
    pub fn save(&self, path: &Path) -> PackResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension("idx.tmp");
        {
            let file = std::fs::File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            bincode::serialize_into(&mut writer, self)
                .map_err(|e| PackError::Encoding(e.to_string()))?;
            std::io::Write::flush(&mut writer)?;
            writer.get_ref().sync_all()?;
        }
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }
}
