//! In-memory repository tree.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::object::ObjectId;
use crate::path::{self, PathError};
use crate::store::PlaceholderKind;

/// One path the repository projects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedEntry {
    pub path: String,
    pub kind: PlaceholderKind,
    /// [`ObjectId::NULL`] for directories.
    pub object_id: ObjectId,
    /// Known content length. `None` until a size lookup fills it.
    pub size: Option<u64>,
}

impl ProjectedEntry {
    pub fn is_directory(&self) -> bool {
        self.kind == PlaceholderKind::Directory
    }

    pub fn name(&self) -> &str {
        path::file_name(&self.path)
    }
}

/// Flat path map. Directories are implied by the files beneath them and may
/// also be added explicitly (empty directories). The root is always present.
#[derive(Default)]
pub struct Projection {
    entries: RwLock<BTreeMap<String, ProjectedEntry>>,
}

impl Projection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a projection from `(path, object id, size)` file entries.
    pub fn from_files<I, P>(files: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = (P, ObjectId, Option<u64>)>,
        P: AsRef<str>,
    {
        let projection = Self::new();
        for (path, id, size) in files {
            projection.add_file(path.as_ref(), id, size)?;
        }
        Ok(projection)
    }

    /// Adds or replaces a file, creating its parent directories.
    pub fn add_file(&self, raw: &str, object_id: ObjectId, size: Option<u64>) -> Result<(), PathError> {
        let path = path::normalize(raw)?;
        let mut entries = self.entries.write();
        insert_parents(&mut entries, &path);
        entries.insert(
            path.clone(),
            ProjectedEntry {
                path,
                kind: PlaceholderKind::File,
                object_id,
                size,
            },
        );
        Ok(())
    }

    pub fn add_directory(&self, raw: &str) -> Result<(), PathError> {
        let path = path::normalize(raw)?;
        if path.is_empty() {
            return Ok(());
        }
        let mut entries = self.entries.write();
        insert_parents(&mut entries, &path);
        entries.insert(path.clone(), directory(path));
        Ok(())
    }

    /// Removes a path and everything beneath it. Returns the number removed.
    pub fn remove(&self, path: &str) -> usize {
        let mut entries = self.entries.write();
        let doomed: Vec<String> = entries
            .keys()
            .filter(|k| k.as_str() == path || path::is_descendant(k, path))
            .cloned()
            .collect();
        for key in &doomed {
            entries.remove(key);
        }
        doomed.len()
    }

    /// Records a content length learned after construction.
    pub fn set_size(&self, path: &str, size: u64) {
        if let Some(entry) = self.entries.write().get_mut(path) {
            entry.size = Some(size);
        }
    }

    pub fn get(&self, path: &str) -> Option<ProjectedEntry> {
        if path.is_empty() {
            return Some(directory(String::new()));
        }
        self.entries.read().get(path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        path.is_empty() || self.entries.read().contains_key(path)
    }

    pub fn is_directory(&self, path: &str) -> bool {
        self.get(path).is_some_and(|e| e.is_directory())
    }

    /// Direct children of `dir`, in path order.
    pub fn children(&self, dir: &str) -> Vec<ProjectedEntry> {
        let entries = self.entries.read();
        let range: Box<dyn Iterator<Item = (&String, &ProjectedEntry)> + '_> = if dir.is_empty() {
            Box::new(entries.iter())
        } else {
            // '0' sorts immediately after '/'.
            Box::new(entries.range(format!("{}/", dir)..format!("{}0", dir)))
        };
        range
            .filter(|(k, _)| path::is_child(k, dir))
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Number of projected paths, excluding the root.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn directory(path: String) -> ProjectedEntry {
    ProjectedEntry {
        path,
        kind: PlaceholderKind::Directory,
        object_id: ObjectId::NULL,
        size: None,
    }
}

fn insert_parents(entries: &mut BTreeMap<String, ProjectedEntry>, path: &str) {
    for ancestor in path::ancestors(path) {
        if ancestor.is_empty() || entries.contains_key(ancestor) {
            continue;
        }
        entries.insert(ancestor.to_string(), directory(ancestor.to_string()));
    }
}
