//! Object id → content length.
//!
//! Content is immutable and addressed by id, so entries are never
//! invalidated. Any thread may record a size; the table's own lock serializes
//! writers.

use std::path::Path;

use super::table::PersistentTable;
use super::StoreResult;
use crate::object::ObjectId;

pub struct BlobSizeCache {
    table: PersistentTable<ObjectId, u64>,
}

impl BlobSizeCache {
    /// Opens `<dir>/blob_sizes.{snap,journal}`.
    pub fn open(dir: &Path, sync: bool) -> StoreResult<Self> {
        Ok(Self {
            table: PersistentTable::open(dir, "blob_sizes", sync)?,
        })
    }

    pub fn get(&self, id: &ObjectId) -> Option<u64> {
        self.table.get(id)
    }

    /// Records a size. Known ids are left untouched.
    pub fn record(&self, id: ObjectId, size: u64) -> StoreResult<()> {
        if self.table.contains(&id) {
            return Ok(());
        }
        self.table.put(id, size)
    }

    /// Records several sizes, skipping known ids.
    pub fn record_all<I>(&self, sizes: I) -> StoreResult<usize>
    where
        I: IntoIterator<Item = (ObjectId, u64)>,
    {
        let mut added = 0;
        for (id, size) in sizes {
            if !self.table.contains(&id) {
                self.table.put(id, size)?;
                added += 1;
            }
        }
        Ok(added)
    }

    /// Ids from `ids` with no recorded size.
    pub fn missing(&self, ids: &[ObjectId]) -> Vec<ObjectId> {
        ids.iter()
            .filter(|id| !self.table.contains(id))
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn compact(&self) -> StoreResult<()> {
        self.table.compact()
    }
}
