//! Local changes layered over the projection.
//!
//! Tombstones hide projected paths (and everything beneath a tombstoned
//! directory); created paths exist locally without being projected. Both
//! live in a journaled table next to the placeholder index. The queue worker
//! writes them while applying a batch, before the batch is checkpointed, so a
//! restart sees every change that left the task log.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::path;
use crate::store::{PersistentTable, StoreResult};

const TABLE_NAME: &str = "modified_paths";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModifiedKind {
    Created,
    Deleted,
}

/// Snapshot of recorded changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModificationSummary {
    pub created: Vec<String>,
    pub deleted: Vec<String>,
}

pub struct ModifiedPaths {
    table: PersistentTable<String, ModifiedKind>,
}

impl ModifiedPaths {
    /// Opens `<dir>/modified_paths.*`.
    pub fn open(dir: &Path, sync: bool) -> StoreResult<Self> {
        Ok(Self {
            table: PersistentTable::open(dir, TABLE_NAME, sync)?,
        })
    }

    /// A file or directory now exists at `path`.
    pub fn created(&self, path: &str) -> StoreResult<()> {
        if self.is_created(path) {
            return Ok(());
        }
        self.table.put(path.to_string(), ModifiedKind::Created)
    }

    /// `path` and anything beneath it no longer exist.
    pub fn deleted(&self, path: &str) -> StoreResult<()> {
        for (key, _) in self.subtree(path) {
            if key != path {
                self.table.remove(&key)?;
            }
        }
        self.table.put(path.to_string(), ModifiedKind::Deleted)
    }

    pub fn renamed(&self, old_path: &str, new_path: &str) -> StoreResult<()> {
        let moved: Vec<String> = self
            .subtree(old_path)
            .into_iter()
            .filter(|(p, kind)| *kind == ModifiedKind::Created && p != old_path)
            .map(|(p, _)| format!("{}{}", new_path, &p[old_path.len()..]))
            .collect();
        self.deleted(old_path)?;
        self.created(new_path)?;
        for p in moved {
            self.created(&p)?;
        }
        Ok(())
    }

    /// Hidden by a tombstone on the path or one of its ancestors.
    pub fn is_deleted(&self, path: &str) -> bool {
        if self.table.is_empty() {
            return false;
        }
        self.is_tombstone(path) || path::ancestors(path).any(|a| self.is_tombstone(a))
    }

    pub fn is_created(&self, path: &str) -> bool {
        self.table.get(&path.to_string()) == Some(ModifiedKind::Created)
    }

    /// Created paths directly beneath `dir`.
    pub fn created_children(&self, dir: &str) -> Vec<String> {
        self.table
            .entries()
            .into_iter()
            .filter(|(p, kind)| *kind == ModifiedKind::Created && path::is_child(p, dir))
            .map(|(p, _)| p)
            .collect()
    }

    pub fn summary(&self) -> ModificationSummary {
        let mut summary = ModificationSummary::default();
        for (p, kind) in self.table.entries() {
            match kind {
                ModifiedKind::Created => summary.created.push(p),
                ModifiedKind::Deleted => summary.deleted.push(p),
            }
        }
        summary
    }

    pub fn has_modifications(&self) -> bool {
        !self.table.is_empty()
    }

    /// Folds the journal into a snapshot.
    pub fn compact(&self) -> StoreResult<()> {
        self.table.compact()
    }

    fn is_tombstone(&self, path: &str) -> bool {
        self.table.get(&path.to_string()) == Some(ModifiedKind::Deleted)
    }

    /// `path` itself plus every recorded path beneath it.
    fn subtree(&self, root: &str) -> Vec<(String, ModifiedKind)> {
        self.table
            .entries()
            .into_iter()
            .filter(|(p, _)| p == root || path::is_descendant(p, root))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> ModifiedPaths {
        ModifiedPaths::open(dir.path(), false).unwrap()
    }

    #[test]
    fn test_delete_hides_subtree() {
        let dir = TempDir::new().unwrap();
        let modified = open(&dir);
        modified.deleted("src").unwrap();
        assert!(modified.is_deleted("src"));
        assert!(modified.is_deleted("src/deep/file.rs"));
        assert!(!modified.is_deleted("srcs"));
    }

    #[test]
    fn test_create_clears_tombstone() {
        let dir = TempDir::new().unwrap();
        let modified = open(&dir);
        modified.deleted("a.txt").unwrap();
        modified.created("a.txt").unwrap();
        assert!(!modified.is_deleted("a.txt"));
        assert!(modified.is_created("a.txt"));
    }

    #[test]
    fn test_rename_moves_created_children() {
        let dir = TempDir::new().unwrap();
        let modified = open(&dir);
        modified.created("dir").unwrap();
        modified.created("dir/new.txt").unwrap();
        modified.renamed("dir", "moved").unwrap();

        assert!(modified.is_deleted("dir"));
        assert!(modified.is_created("moved/new.txt"));
        assert!(!modified.is_created("dir/new.txt"));
        assert_eq!(modified.created_children("moved"), vec!["moved/new.txt"]);
    }

    #[test]
    fn test_create_rename_delete_nets_out() {
        let dir = TempDir::new().unwrap();
        let modified = open(&dir);
        modified.created("a").unwrap();
        modified.renamed("a", "b").unwrap();
        modified.deleted("b").unwrap();
        let summary = modified.summary();
        assert!(summary.created.is_empty());
        assert_eq!(summary.deleted, vec!["a", "b"]);
    }

    #[test]
    fn test_changes_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let modified = open(&dir);
            modified.deleted("src/a.rs").unwrap();
            modified.created("src/new.rs").unwrap();
        }
        let modified = open(&dir);
        assert!(modified.is_deleted("src/a.rs"));
        assert_eq!(modified.created_children("src"), vec!["src/new.rs"]);

        modified.compact().unwrap();
        drop(modified);
        assert!(open(&dir).is_deleted("src/a.rs"));
    }
}
