//! In-process driver.
//!
//! Models the on-disk side of virtualization: placeholders, hydrated
//! content, and edits made by other processes. Used by the tests and on
//! hosts without a native projection driver.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use super::{
    DriverError, PlaceholderInfo, UpdateFailureReason, UpdateFlags, VirtualizationDriver,
    ERROR_ALREADY_INITIALIZED, ERROR_FILE_EXISTS, ERROR_NOT_READY,
};
use crate::path;

#[derive(Debug, Clone)]
struct DiskEntry {
    info: PlaceholderInfo,
    content: Option<Vec<u8>>,
    /// Written by something other than the provider.
    dirty: bool,
    read_only: bool,
}

#[derive(Default)]
pub struct MemoryDriver {
    entries: RwLock<BTreeMap<String, DiskEntry>>,
    negative: Mutex<BTreeSet<String>>,
    faults: Mutex<VecDeque<DriverError>>,
    root_provider: Mutex<Option<String>>,
    started: AtomicBool,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Provider id the root was converted for, if any.
    pub fn virtualization_root(&self) -> Option<String> {
        self.root_provider.lock().clone()
    }

    /// Fails the next primitive call with `error`.
    pub fn fail_next(&self, error: DriverError) {
        self.faults.lock().push_back(error);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.read().contains_key(path)
    }

    pub fn placeholder_info(&self, path: &str) -> Option<PlaceholderInfo> {
        self.entries.read().get(path).map(|e| e.info.clone())
    }

    /// Content on disk: hydrated or user-written bytes.
    pub fn read_disk(&self, path: &str) -> Option<Vec<u8>> {
        self.entries.read().get(path).and_then(|e| e.content.clone())
    }

    /// Records content the provider served for `path`.
    pub fn hydrate(&self, path: &str, content: &[u8]) {
        if let Some(entry) = self.entries.write().get_mut(path) {
            entry.content = Some(content.to_vec());
        }
    }

    /// Another process writes `content` to `path`.
    pub fn simulate_user_write(&self, path: &str, content: &[u8]) {
        let mut entries = self.entries.write();
        let entry = entries.entry(path.to_string()).or_insert_with(|| DiskEntry {
            info: PlaceholderInfo::file(String::new(), Vec::new(), 0),
            content: None,
            dirty: false,
            read_only: false,
        });
        entry.content = Some(content.to_vec());
        entry.info.size = content.len() as u64;
        entry.dirty = true;
    }

    pub fn set_read_only(&self, path: &str, read_only: bool) {
        if let Some(entry) = self.entries.write().get_mut(path) {
            entry.read_only = read_only;
        }
    }

    /// Caches a failed lookup of `path`.
    pub fn record_negative_lookup(&self, path: &str) {
        self.negative.lock().insert(path.to_string());
    }

    pub fn negative_cache_len(&self) -> usize {
        self.negative.lock().len()
    }

    fn check(&self) -> Result<(), DriverError> {
        if let Some(fault) = self.faults.lock().pop_front() {
            return Err(fault);
        }
        if !self.is_started() {
            return Err(DriverError::new(ERROR_NOT_READY, "driver not started"));
        }
        Ok(())
    }

    fn write_placeholder(&self, path: &str, info: &PlaceholderInfo) -> Result<(), DriverError> {
        self.check()?;
        let mut entries = self.entries.write();
        if entries.get(path).is_some_and(|e| e.dirty) {
            return Err(DriverError::new(
                ERROR_FILE_EXISTS,
                format!("{} exists and is not a placeholder", path),
            ));
        }
        entries.insert(
            path.to_string(),
            DiskEntry {
                info: info.clone(),
                content: None,
                dirty: false,
                read_only: false,
            },
        );
        self.negative.lock().remove(path);
        trace!(path, "Placeholder written");
        Ok(())
    }

    fn conflict(entry: &DiskEntry, flags: UpdateFlags) -> Option<UpdateFailureReason> {
        if entry.dirty && !flags.contains(UpdateFlags::ALLOW_DIRTY_DATA) {
            return Some(UpdateFailureReason::DirtyFile);
        }
        if entry.read_only && !flags.contains(UpdateFlags::ALLOW_READ_ONLY) {
            return Some(UpdateFailureReason::ReadOnly);
        }
        None
    }
}

impl VirtualizationDriver for MemoryDriver {
    fn convert_directory_to_virtualization_root(
        &self,
        provider_id: &str,
    ) -> Result<(), DriverError> {
        *self.root_provider.lock() = Some(provider_id.to_string());
        Ok(())
    }

    fn start(&self) -> Result<(), DriverError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(DriverError::new(ERROR_ALREADY_INITIALIZED, "driver already started"));
        }
        Ok(())
    }

    fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
    }

    fn write_placeholder_file(&self, path: &str, info: &PlaceholderInfo) -> Result<(), DriverError> {
        self.write_placeholder(path, info)
    }

    fn write_placeholder_directory(&self, path: &str, info: &PlaceholderInfo) -> Result<(), DriverError> {
        self.write_placeholder(path, info)
    }

    fn update_placeholder(
        &self,
        path: &str,
        info: &PlaceholderInfo,
        flags: UpdateFlags,
    ) -> Result<UpdateFailureReason, DriverError> {
        self.check()?;
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(path) else {
            return Ok(UpdateFailureReason::FileNotFound);
        };
        if let Some(reason) = Self::conflict(entry, flags) {
            return Ok(reason);
        }
        entry.info = info.clone();
        entry.content = None;
        entry.dirty = false;
        Ok(UpdateFailureReason::NoFailure)
    }

    fn delete_file(&self, path: &str, flags: UpdateFlags) -> Result<UpdateFailureReason, DriverError> {
        self.check()?;
        let mut entries = self.entries.write();
        let Some(entry) = entries.get(path) else {
            return Ok(UpdateFailureReason::FileNotFound);
        };
        if let Some(reason) = Self::conflict(entry, flags) {
            return Ok(reason);
        }
        entries.retain(|p, _| p != path && !path::is_descendant(p, path));
        Ok(UpdateFailureReason::NoFailure)
    }

    fn clear_negative_path_cache(&self) -> Result<u32, DriverError> {
        self.check()?;
        let mut negative = self.negative.lock();
        let count = negative.len() as u32;
        negative.clear();
        Ok(count)
    }
}
