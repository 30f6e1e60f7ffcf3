//! Permanent object store: adopted packs plus their indexes.
//!
//! Downloads land in `tmp/`. A pack is moved into `pack/` only after it has
//! been fully indexed and verified, so a reader never sees a pack without its
//! index. Leftover temp files from a crashed process are removed on open.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::{StoreError, StoreResult};
use crate::object::ObjectId;
use crate::pack::{self, IndexEntry, PackError, PackIndex, ResolvedObject};

#[derive(Debug, Clone)]
struct Location {
    pack_path: Arc<PathBuf>,
    entry: IndexEntry,
}

/// Local, indexed pack storage.
pub struct LocalObjectStore {
    pack_dir: PathBuf,
    tmp_dir: PathBuf,
    locations: DashMap<ObjectId, Location>,
    pack_count: AtomicU64,
    temp_counter: AtomicU64,
}

impl LocalObjectStore {
    /// Opens the store rooted at `root`, loading every adopted pack index.
    pub fn open(root: &Path) -> StoreResult<Self> {
        let pack_dir = root.join("pack");
        let tmp_dir = root.join("tmp");
        std::fs::create_dir_all(&pack_dir)?;
        std::fs::create_dir_all(&tmp_dir)?;

        for entry in std::fs::read_dir(&tmp_dir)? {
            let path = entry?.path();
            debug!(path = %path.display(), "Removing stale temp pack");
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove stale temp pack");
            }
        }

        let store = Self {
            pack_dir,
            tmp_dir,
            locations: DashMap::new(),
            pack_count: AtomicU64::new(0),
            temp_counter: AtomicU64::new(0),
        };

        for entry in std::fs::read_dir(&store.pack_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("pack") {
                continue;
            }
            let idx_path = path.with_extension("idx");
            if !idx_path.exists() {
                warn!(path = %path.display(), "Removing pack without index");
                std::fs::remove_file(&path)?;
                continue;
            }
            match PackIndex::load(&idx_path) {
                Ok(index) => store.register(path, &index),
                Err(e) => {
                    warn!(path = %idx_path.display(), error = %e, "Ignoring unreadable pack index");
                }
            }
        }

        info!(
            packs = store.pack_count(),
            objects = store.object_count(),
            "Opened local object store"
        );
        Ok(store)
    }

    fn register(&self, pack_path: PathBuf, index: &PackIndex) {
        let pack_path = Arc::new(pack_path);
        for entry in index.entries() {
            self.locations.entry(entry.id).or_insert_with(|| Location {
                pack_path: Arc::clone(&pack_path),
                entry: *entry,
            });
        }
        self.pack_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Directory holding downloads that await indexing.
    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    /// A fresh, unique path in the temp directory.
    pub fn temp_pack_path(&self, label: &str) -> PathBuf {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        self.tmp_dir
            .join(format!("{}-{}-{}.pack.tmp", label, std::process::id(), n))
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.locations.contains_key(id)
    }

    /// Size of a stored object without inflating it.
    pub fn object_size(&self, id: &ObjectId) -> Option<u64> {
        self.locations.get(id).map(|l| l.entry.size)
    }

    /// Inflates and resolves a stored object.
    pub fn read_object(&self, id: &ObjectId) -> StoreResult<ResolvedObject> {
        self.read_object_depth(id, 0)
    }

    fn read_object_depth(&self, id: &ObjectId, depth: usize) -> StoreResult<ResolvedObject> {
        if depth > pack::MAX_DELTA_DEPTH {
            return Err(StoreError::Pack(PackError::ChainTooDeep(0)));
        }
        let location = self
            .locations
            .get(id)
            .map(|l| l.value().clone())
            .ok_or(StoreError::ObjectNotFound(*id))?;
        let resolve = |base: &ObjectId| -> Result<ResolvedObject, PackError> {
            self.read_object_depth(base, depth + 1)
                .map_err(|_| PackError::UnresolvedBase(*base))
        };
        Ok(pack::read_object_at(
            &location.pack_path,
            location.entry.offset,
            &resolve,
        )?)
    }

    /// Verifies and indexes a downloaded pack.
    ///
    /// Thin-pack bases are taken from already adopted packs.
    pub fn index_temp_pack(&self, temp_path: &Path) -> StoreResult<PackIndex> {
        Ok(pack::index_pack_file(temp_path, |base| {
            self.read_object(base).ok()
        })?)
    }

    /// Moves an indexed temp pack into the permanent directory and makes its
    /// objects visible.
    pub fn adopt(&self, temp_path: &Path, index: &PackIndex) -> StoreResult<PathBuf> {
        let name = format!("pack-{}", index.pack_checksum.to_hex());
        let pack_path = self.pack_dir.join(format!("{}.pack", name));
        let idx_path = self.pack_dir.join(format!("{}.idx", name));

        if pack_path.exists() && idx_path.exists() {
            // Same content already adopted.
            self.discard(temp_path);
            return Ok(pack_path);
        }

        std::fs::rename(temp_path, &pack_path)?;
        index.save(&idx_path)?;
        self.register(pack_path.clone(), index);
        debug!(
            pack = %pack_path.display(),
            objects = index.len(),
            "Adopted pack"
        );
        Ok(pack_path)
    }

    /// Deletes a temp pack, ignoring absence.
    pub fn discard(&self, temp_path: &Path) {
        match std::fs::remove_file(temp_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %temp_path.display(), error = %e, "Failed to discard temp pack"),
        }
    }

    /// Number of adopted packs.
    pub fn pack_count(&self) -> u64 {
        self.pack_count.load(Ordering::Relaxed)
    }

    /// Number of addressable objects.
    pub fn object_count(&self) -> usize {
        self.locations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectKind;
    use crate::pack::PackBuilder;
    use tempfile::TempDir;

    fn write_temp(store: &LocalObjectStore, builder: PackBuilder) -> PathBuf {
        let path = store.temp_pack_path("test");
        std::fs::write(&path, builder.finish().unwrap()).unwrap();
        path
    }

    #[test]
    fn test_index_adopt_read() {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::open(dir.path()).unwrap();

        let mut builder = PackBuilder::new();
        let id = builder.add(ObjectKind::Blob, b"stored content");
        let temp = write_temp(&store, builder);

        let index = store.index_temp_pack(&temp).unwrap();
        assert!(!store.contains(&id));
        store.adopt(&temp, &index).unwrap();

        assert!(store.contains(&id));
        assert!(!temp.exists());
        assert_eq!(store.object_size(&id), Some(14));
        assert_eq!(store.read_object(&id).unwrap().data, b"stored content");
    }

    #[test]
    fn test_thin_pack_against_adopted_base() {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::open(dir.path()).unwrap();

        let base_body = b"common base text for both versions";
        let mut first = PackBuilder::new();
        let base = first.add(ObjectKind::Blob, base_body);
        let temp = write_temp(&store, first);
        let index = store.index_temp_pack(&temp).unwrap();
        store.adopt(&temp, &index).unwrap();

        let mut second = PackBuilder::new();
        let target =
            second.add_external_ref_delta(base, base_body, b"common base text, revised");
        let temp = write_temp(&store, second);
        let index = store.index_temp_pack(&temp).unwrap();
        store.adopt(&temp, &index).unwrap();

        assert_eq!(
            store.read_object(&target).unwrap().data,
            b"common base text, revised"
        );
    }

    #[test]
    fn test_reopen_loads_packs_and_clears_tmp() {
        let dir = TempDir::new().unwrap();
        let id;
        {
            let store = LocalObjectStore::open(dir.path()).unwrap();
            let mut builder = PackBuilder::new();
            id = builder.add(ObjectKind::Blob, b"durable");
            let temp = write_temp(&store, builder);
            let index = store.index_temp_pack(&temp).unwrap();
            store.adopt(&temp, &index).unwrap();
            std::fs::write(store.temp_pack_path("stale"), b"junk").unwrap();
        }

        let store = LocalObjectStore::open(dir.path()).unwrap();
        assert!(store.contains(&id));
        assert_eq!(store.pack_count(), 1);
        assert_eq!(std::fs::read_dir(store.tmp_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_read_missing_object() {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::open(dir.path()).unwrap();
        let id = ObjectId::hash_object(ObjectKind::Blob, b"nowhere");
        assert!(matches!(
            store.read_object(&id),
            Err(StoreError::ObjectNotFound(missing)) if missing == id
        ));
    }

    #[test]
    fn test_discard_removes_temp() {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::open(dir.path()).unwrap();
        let temp = store.temp_pack_path("bad");
        std::fs::write(&temp, b"not a pack").unwrap();
        assert!(store.index_temp_pack(&temp).is_err());
        store.discard(&temp);
        store.discard(&temp);
        assert!(!temp.exists());
    }
}
