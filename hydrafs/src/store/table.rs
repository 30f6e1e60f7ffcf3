//! Journaled key-value table.

use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::journal::Journal;
use super::{StoreError, StoreResult};

/// Journal length (in records) after which mutations trigger compaction.
pub const DEFAULT_COMPACT_THRESHOLD: usize = 4096;

#[derive(Serialize, Deserialize)]
enum TableOp<K, V> {
    Put(K, V),
    Remove(K),
}

/// A `BTreeMap` persisted as snapshot + journal.
///
/// Reads take a shared lock on the map. Writes append to the journal first
/// and apply to the map second, under the write lock, so the on-disk order of
/// operations matches the in-memory order.
pub struct PersistentTable<K, V> {
    name: String,
    snapshot_path: PathBuf,
    map: RwLock<BTreeMap<K, V>>,
    journal: Mutex<Journal<TableOp<K, V>>>,
    compact_threshold: usize,
}

impl<K, V> PersistentTable<K, V>
where
    K: Ord + Clone + Serialize + DeserializeOwned,
    V: Clone + Serialize + DeserializeOwned,
{
    /// Opens the table `<dir>/<name>.snap` + `<dir>/<name>.journal`.
    pub fn open(dir: &Path, name: &str, sync: bool) -> StoreResult<Self> {
        std::fs::create_dir_all(dir)?;
        let snapshot_path = dir.join(format!("{}.snap", name));
        let journal_path = dir.join(format!("{}.journal", name));

        let mut map: BTreeMap<K, V> = if snapshot_path.exists() {
            let file = std::fs::File::open(&snapshot_path)?;
            bincode::deserialize_from(BufReader::new(file)).map_err(|e| {
                StoreError::Encoding(format!("snapshot {}: {}", snapshot_path.display(), e))
            })?
        } else {
            BTreeMap::new()
        };

        let (journal, ops) = Journal::open(&journal_path, sync)?;
        let replayed = ops.len();
        for op in ops {
            match op {
                TableOp::Put(k, v) => {
                    map.insert(k, v);
                }
                TableOp::Remove(k) => {
                    map.remove(&k);
                }
            }
        }

        debug!(table = name, entries = map.len(), replayed, "Opened table");

        Ok(Self {
            name: name.to_string(),
            snapshot_path,
            map: RwLock::new(map),
            journal: Mutex::new(journal),
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
        })
    }

    /// Sets the journal length that triggers automatic compaction.
    pub fn with_compact_threshold(mut self, records: usize) -> Self {
        self.compact_threshold = records.max(1);
        self
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.map.read().get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.map.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Inserts or replaces a value.
    pub fn put(&self, key: K, value: V) -> StoreResult<()> {
        let mut journal = self.journal.lock();
        let mut map = self.map.write();
        journal.append(&TableOp::Put(key.clone(), value.clone()))?;
        map.insert(key, value);
        drop(map);
        self.maybe_compact(&mut journal)
    }

    /// Removes a key, returning the previous value.
    pub fn remove(&self, key: &K) -> StoreResult<Option<V>> {
        let mut journal = self.journal.lock();
        let mut map = self.map.write();
        if !map.contains_key(key) {
            return Ok(None);
        }
        journal.append(&TableOp::Remove(key.clone()))?;
        let previous = map.remove(key);
        drop(map);
        self.maybe_compact(&mut journal)?;
        Ok(previous)
    }

    /// Applies `update` to the current value (or `None`) and stores the
    /// result; `None` from the closure removes the key.
    pub fn update<F>(&self, key: &K, update: F) -> StoreResult<Option<V>>
    where
        F: FnOnce(Option<&V>) -> Option<V>,
    {
        let mut journal = self.journal.lock();
        let mut map = self.map.write();
        let next = update(map.get(key));
        match &next {
            Some(value) => {
                journal.append(&TableOp::Put(key.clone(), value.clone()))?;
                map.insert(key.clone(), value.clone());
            }
            None => {
                if map.contains_key(key) {
                    journal.append(&TableOp::Remove(key.clone()))?;
                    map.remove(key);
                }
            }
        }
        drop(map);
        self.maybe_compact(&mut journal)?;
        Ok(next)
    }

    /// Copies every entry, in key order.
    pub fn entries(&self) -> Vec<(K, V)> {
        self.map
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Copies the entries whose keys fall in `range`.
    pub fn range<R>(&self, range: R) -> Vec<(K, V)>
    where
        R: std::ops::RangeBounds<K>,
    {
        self.map
            .read()
            .range(range)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Writes a snapshot of the current map and truncates the journal.
    pub fn compact(&self) -> StoreResult<()> {
        let mut journal = self.journal.lock();
        self.compact_locked(&mut journal)
    }

    /// Journal records not yet folded into a snapshot.
    pub fn pending_records(&self) -> usize {
        self.journal.lock().record_count()
    }

    fn maybe_compact(&self, journal: &mut Journal<TableOp<K, V>>) -> StoreResult<()> {
        if journal.record_count() >= self.compact_threshold {
            self.compact_locked(journal)?;
        }
        Ok(())
    }

    fn compact_locked(&self, journal: &mut Journal<TableOp<K, V>>) -> StoreResult<()> {
        let temp_path = self.snapshot_path.with_extension("snap.tmp");
        {
            let map = self.map.read();
            let file = std::fs::File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            bincode::serialize_into(&mut writer, &*map)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        std::fs::rename(&temp_path, &self.snapshot_path)?;
        journal.truncate()?;
        debug!(table = %self.name, "Compacted table");
        Ok(())
    }
}
