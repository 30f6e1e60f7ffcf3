//! Placeholder index: path → projected version metadata.
//!
//! The index is flat; hierarchy is derived from path prefixes. Mutations are
//! issued by the queue worker (task application) or by the synchronous
//! placeholder-write path while it holds that path's lock, so two writers
//! never race on one key.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::table::PersistentTable;
use super::StoreResult;
use crate::object::ObjectId;
use crate::path;

/// Whether an entry is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaceholderKind {
    File,
    Directory,
}

/// Hydration state of a projected path.
///
/// `Unprojected` is the absence of an entry; `Deleted` is the absence of an
/// entry plus a tombstone in [`crate::projection::ModifiedPaths`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaceholderState {
    /// Metadata only; content is fetched on first read.
    Placeholder,
    /// Content has been materialized locally.
    Hydrated,
    /// Modified outside virtualization control. Never overwritten automatically.
    Dirty,
}

/// One projected path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderEntry {
    /// Normalized repository-relative path (the key).
    pub relative_path: String,
    pub kind: PlaceholderKind,
    /// Opaque id of the exact content version this placeholder mirrors.
    pub content_version_id: Vec<u8>,
    /// Object backing the file; [`ObjectId::NULL`] for directories.
    pub object_id: ObjectId,
    /// File length reported to the driver.
    pub size: u64,
    pub state: PlaceholderState,
}

impl PlaceholderEntry {
    /// A file placeholder whose content version is its object id.
    pub fn file(relative_path: impl Into<String>, object_id: ObjectId, size: u64) -> Self {
        Self {
            relative_path: relative_path.into(),
            kind: PlaceholderKind::File,
            content_version_id: object_id.as_bytes().to_vec(),
            object_id,
            size,
            state: PlaceholderState::Placeholder,
        }
    }

    /// A directory placeholder.
    pub fn directory(relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            kind: PlaceholderKind::Directory,
            content_version_id: Vec::new(),
            object_id: ObjectId::NULL,
            size: 0,
            state: PlaceholderState::Placeholder,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind == PlaceholderKind::Directory
    }

    pub fn is_dirty(&self) -> bool {
        self.state == PlaceholderState::Dirty
    }

    /// Returns this entry with a new state.
    pub fn with_state(mut self, state: PlaceholderState) -> Self {
        self.state = state;
        self
    }
}

/// Persisted placeholder table.
pub struct PlaceholderIndex {
    table: PersistentTable<String, PlaceholderEntry>,
}

impl PlaceholderIndex {
    /// Opens `<dir>/placeholders.{snap,journal}`.
    pub fn open(dir: &Path, sync: bool) -> StoreResult<Self> {
        Ok(Self {
            table: PersistentTable::open(dir, "placeholders", sync)?,
        })
    }

    pub fn get(&self, relative_path: &str) -> Option<PlaceholderEntry> {
        self.table.get(&relative_path.to_string())
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        self.table.contains(&relative_path.to_string())
    }

    /// Inserts or replaces the entry keyed by `entry.relative_path`.
    pub fn upsert(&self, entry: PlaceholderEntry) -> StoreResult<()> {
        self.table.put(entry.relative_path.clone(), entry)
    }

    /// Removes an entry, returning it if present.
    pub fn remove(&self, relative_path: &str) -> StoreResult<Option<PlaceholderEntry>> {
        self.table.remove(&relative_path.to_string())
    }

    /// Sets the state of an existing entry. Returns false if absent.
    pub fn set_state(&self, relative_path: &str, state: PlaceholderState) -> StoreResult<bool> {
        let updated = self.table.update(&relative_path.to_string(), |current| {
            current.cloned().map(|e| e.with_state(state))
        })?;
        Ok(updated.is_some())
    }

    /// Every entry, in path order.
    pub fn get_all_entries(&self) -> Vec<PlaceholderEntry> {
        self.table.entries().into_iter().map(|(_, v)| v).collect()
    }

    /// Entries strictly beneath `dir`.
    pub fn descendants_of(&self, dir: &str) -> Vec<PlaceholderEntry> {
        if dir.is_empty() {
            return self.get_all_entries();
        }
        // '0' sorts immediately after '/'.
        let start = format!("{}/", dir);
        let end = format!("{}0", dir);
        self.table
            .range(start..end)
            .into_iter()
            .map(|(_, v)| v)
            .collect()
    }

    /// Direct children of `dir`.
    pub fn children_of(&self, dir: &str) -> Vec<PlaceholderEntry> {
        self.descendants_of(dir)
            .into_iter()
            .filter(|e| path::is_child(&e.relative_path, dir))
            .collect()
    }

    /// Removes `dir` and everything beneath it. Returns the number removed.
    pub fn remove_subtree(&self, dir: &str) -> StoreResult<usize> {
        let mut removed = usize::from(self.remove(dir)?.is_some());
        for entry in self.descendants_of(dir) {
            if self.remove(&entry.relative_path)?.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Moves `from` (and, for directories, its descendants) to `to`.
    ///
    /// Returns the number of entries moved. Moving an absent path is a no-op,
    /// so replaying a rename after a crash is harmless.
    pub fn rename(&self, from: &str, to: &str) -> StoreResult<usize> {
        let mut moved = 0;
        if let Some(mut entry) = self.remove(from)? {
            entry.relative_path = to.to_string();
            self.upsert(entry)?;
            moved += 1;
        }
        for mut entry in self.descendants_of(from) {
            let suffix = &entry.relative_path[from.len()..];
            let target = format!("{}{}", to, suffix);
            self.remove(&entry.relative_path)?;
            entry.relative_path = target;
            self.upsert(entry)?;
            moved += 1;
        }
        Ok(moved)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Folds the journal into a snapshot.
    pub fn compact(&self) -> StoreResult<()> {
        self.table.compact()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectKind;
    use tempfile::TempDir;

    fn blob(body: &[u8]) -> ObjectId {
        ObjectId::hash_object(ObjectKind::Blob, body)
    }

    #[test]
    fn test_upsert_get_remove() {
        let dir = TempDir::new().unwrap();
        let index = PlaceholderIndex::open(dir.path(), false).unwrap();
        let entry = PlaceholderEntry::file("src/lib.rs", blob(b"lib"), 3);

        index.upsert(entry.clone()).unwrap();
        assert_eq!(index.get("src/lib.rs"), Some(entry));
        assert!(index.remove("src/lib.rs").unwrap().is_some());
        assert!(index.get("src/lib.rs").is_none());
    }

    #[test]
    fn test_children_and_descendants() {
        let dir = TempDir::new().unwrap();
        let index = PlaceholderIndex::open(dir.path(), false).unwrap();
        index.upsert(PlaceholderEntry::directory("src")).unwrap();
        index
            .upsert(PlaceholderEntry::file("src/a.rs", blob(b"a"), 1))
            .unwrap();
        index.upsert(PlaceholderEntry::directory("src/sub")).unwrap();
        index
            .upsert(PlaceholderEntry::file("src/sub/b.rs", blob(b"b"), 1))
            .unwrap();
        index
            .upsert(PlaceholderEntry::file("src0.txt", blob(b"c"), 1))
            .unwrap();

        let children: Vec<String> = index
            .children_of("src")
            .into_iter()
            .map(|e| e.relative_path)
            .collect();
        assert_eq!(children, vec!["src/a.rs", "src/sub"]);
        assert_eq!(index.descendants_of("src").len(), 3);
        assert_eq!(index.children_of("").len(), 2);
    }

    #[test]
    fn test_rename_directory_moves_descendants() {
        let dir = TempDir::new().unwrap();
        let index = PlaceholderIndex::open(dir.path(), false).unwrap();
        index.upsert(PlaceholderEntry::directory("old")).unwrap();
        index
            .upsert(PlaceholderEntry::file("old/x", blob(b"x"), 1))
            .unwrap();

        assert_eq!(index.rename("old", "new").unwrap(), 2);
        assert!(index.get("old").is_none());
        assert_eq!(index.get("new/x").unwrap().relative_path, "new/x");
        assert_eq!(index.rename("old", "new").unwrap(), 0);
    }

    #[test]
    fn test_set_state_and_subtree_removal() {
        let dir = TempDir::new().unwrap();
        let index = PlaceholderIndex::open(dir.path(), false).unwrap();
        index
            .upsert(PlaceholderEntry::file("d/f", blob(b"f"), 1))
            .unwrap();
        assert!(index.set_state("d/f", PlaceholderState::Dirty).unwrap());
        assert!(index.get("d/f").unwrap().is_dirty());
        assert!(!index.set_state("missing", PlaceholderState::Dirty).unwrap());

        assert_eq!(index.remove_subtree("d").unwrap(), 1);
        assert!(index.is_empty());
    }

    #[test]
    fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let index = PlaceholderIndex::open(dir.path(), true).unwrap();
            index
                .upsert(PlaceholderEntry::file("keep", blob(b"k"), 1))
                .unwrap();
            index.compact().unwrap();
            index
                .upsert(PlaceholderEntry::file("also", blob(b"a"), 1))
                .unwrap();
        }
        let index = PlaceholderIndex::open(dir.path(), true).unwrap();
        assert_eq!(index.len(), 2);
    }
}
