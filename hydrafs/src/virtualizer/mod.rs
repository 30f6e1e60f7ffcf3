//! File system virtualizer.
//!
//! The single synchronous boundary the driver calls into. Reads consult the
//! placeholder index and block on the fetch pipeline; anything that mutates
//! persisted state because of a notification goes through the background
//! task queue.
//!
//! # Architecture
//!
//! ```text
//! driver threads ──► FileSystemVirtualizer ──┬─► PlaceholderIndex / BlobSizeCache (sync)
//!                                            ├─► ObjectFetchPipeline (block_on / spawn)
//!                                            └─► BackgroundTaskQueue.enqueue
//!                                                        │ worker thread
//!                                                        ▼
//!                                     TaskApplier ─► PlaceholderIndex, ModifiedPaths
//! ```
//!
//! The virtualizer owns a dedicated Tokio runtime. Driver callbacks are plain
//! threads and block on it, so the blocking methods must not be called from
//! inside another Tokio runtime.

mod applier;
mod error;
mod locks;
mod types;

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tokio::runtime::Runtime;
use tracing::{debug, info, instrument, warn};

use crate::config::{HydraConfig, VirtualizerConfig};
use crate::driver::{
    FileTimestamps, PlaceholderInfo, UpdateFailureReason, UpdateFlags, VirtualizationDriver,
};
use crate::object::ObjectId;
use crate::path;
use crate::pipeline::{FetchError, ObjectFetchPipeline, PrefetchSummary};
use crate::projection::{ModifiedPaths, Projection};
use crate::queue::{BackgroundTaskQueue, ConsistencyError, FileSystemTask, QueueStatus};
use crate::remote::RemoteObjectStore;
use crate::store::{BlobSizeCache, LocalObjectStore, PlaceholderEntry, PlaceholderIndex, PlaceholderState};
use crate::telemetry::{HydraMetrics, MetricsSnapshot};

pub use applier::TaskApplier;
pub use error::{VirtualizerError, VirtualizerResult};
pub use locks::PathLocks;
pub use types::{DirectoryItemInfo, FileContent, NotifyEvent, ReadCompletion, UpdateOutcome};

/// Counts reads handed off to the runtime so `stop` can drain them.
#[derive(Default)]
struct PendingReads {
    count: Mutex<usize>,
    idle: Condvar,
}

impl PendingReads {
    fn begin(&self) {
        *self.count.lock() += 1;
    }

    fn end(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    /// Returns false if reads are still pending at `deadline`.
    fn wait_idle(&self, deadline: Instant) -> bool {
        let mut count = self.count.lock();
        while *count > 0 {
            if self.idle.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }

    fn len(&self) -> usize {
        *self.count.lock()
    }
}

/// Answers driver callbacks for one virtualized working copy.
pub struct FileSystemVirtualizer {
    config: VirtualizerConfig,
    driver: Arc<dyn VirtualizationDriver>,
    projection: Arc<Projection>,
    modified: Arc<ModifiedPaths>,
    placeholders: Arc<PlaceholderIndex>,
    sizes: Arc<BlobSizeCache>,
    pipeline: ObjectFetchPipeline,
    queue: BackgroundTaskQueue,
    locks: PathLocks,
    pending: Arc<PendingReads>,
    metrics: Arc<HydraMetrics>,
    started: AtomicBool,
    // Dropped last so pending reads can finish during drop.
    runtime: Runtime,
}

impl FileSystemVirtualizer {
    /// Opens the persisted state under `config.state_dir` and starts the
    /// fetch pipeline. The driver is not touched until [`Self::start`].
    pub fn open(
        config: &HydraConfig,
        remote: Arc<dyn RemoteObjectStore>,
        driver: Arc<dyn VirtualizationDriver>,
        projection: Projection,
    ) -> VirtualizerResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.virtualizer.runtime_worker_threads.max(1))
            .thread_name("hydrafs-fetch")
            .enable_all()
            .build()
            .map_err(VirtualizerError::RuntimeCreation)?;

        let metrics = Arc::new(HydraMetrics::new());
        let tables_dir = config.tables_dir();
        let sync = config.virtualizer.sync_index;
        let placeholders = Arc::new(PlaceholderIndex::open(&tables_dir, sync)?);
        let modified = Arc::new(ModifiedPaths::open(&tables_dir, sync)?);
        let sizes = Arc::new(BlobSizeCache::open(&tables_dir, false)?);
        let store = Arc::new(LocalObjectStore::open(&config.objects_dir())?);
        let queue = BackgroundTaskQueue::open(
            &config.queue_dir(),
            config.queue.clone(),
            Arc::clone(&metrics),
        )?;

        let pipeline = {
            let _guard = runtime.enter();
            ObjectFetchPipeline::start(
                remote,
                store,
                Arc::clone(&sizes),
                config.fetch.clone(),
                Arc::clone(&metrics),
            )
        };

        info!(
            name = %config.name,
            state_dir = %config.state_dir.display(),
            projected = projection.len(),
            placeholders = placeholders.len(),
            local_changes = modified.has_modifications(),
            pending_tasks = queue.count(),
            "Opened virtualizer"
        );

        Ok(Self {
            config: config.virtualizer.clone(),
            driver,
            projection: Arc::new(projection),
            modified,
            placeholders,
            sizes,
            pipeline,
            queue,
            locks: PathLocks::default(),
            pending: Arc::new(PendingReads::default()),
            metrics,
            started: AtomicBool::new(false),
            runtime,
        })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Registers with the driver and starts applying queued tasks, replayed
    /// ones first.
    pub fn start(&self) -> VirtualizerResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(VirtualizerError::AlreadyStarted);
        }

        let applier = TaskApplier::new(
            Arc::clone(&self.placeholders),
            Arc::clone(&self.modified),
            Arc::clone(&self.projection),
        );
        let started = self.register(applier);
        if let Err(e) = started {
            self.started.store(false, Ordering::SeqCst);
            return Err(e);
        }
        info!(provider_id = %self.config.provider_id, "Virtualizer started");
        Ok(())
    }

    fn register(&self, applier: TaskApplier) -> VirtualizerResult<()> {
        self.driver
            .convert_directory_to_virtualization_root(&self.config.provider_id)?;
        self.driver.start()?;
        if let Err(e) = self.queue.start(applier) {
            self.driver.stop();
            return Err(e.into());
        }
        Ok(())
    }

    /// Stops the virtualizer.
    ///
    /// Pending reads get `stop_timeout` to finish; the rest are cancelled and
    /// complete with an error. The queue finishes its current batch and keeps
    /// the remaining tasks in its log. A stopped virtualizer is not restarted;
    /// open a new one over the same state directory.
    pub fn stop(&self) -> VirtualizerResult<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Err(VirtualizerError::NotStarted);
        }

        let deadline = Instant::now() + self.config.stop_timeout;
        if !self.pending.wait_idle(deadline) {
            warn!(
                pending = self.pending.len(),
                timeout_ms = self.config.stop_timeout.as_millis() as u64,
                "Cancelling reads still pending at stop"
            );
            self.pipeline.cancel();
            self.pending.wait_idle(Instant::now() + Duration::from_secs(1));
        }

        self.runtime.block_on(self.pipeline.shutdown());
        self.queue.shutdown();
        self.driver.stop();
        info!(metrics = %self.metrics.snapshot(), "Virtualizer stopped");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn require_started(&self) -> VirtualizerResult<()> {
        if self.is_started() {
            Ok(())
        } else {
            Err(VirtualizerError::NotStarted)
        }
    }

    // =========================================================================
    // Enumeration and metadata
    // =========================================================================

    /// Lists the children of `raw_path`. Never fetches content.
    #[instrument(level = "debug", skip(self))]
    pub fn enumerate_directory(&self, raw_path: &str) -> VirtualizerResult<Vec<DirectoryItemInfo>> {
        let dir = path::normalize(raw_path)?;

        let projected_dir = self.projection.is_directory(&dir) && !self.modified.is_deleted(&dir);
        let local_dir = self
            .placeholders
            .get(&dir)
            .is_some_and(|e| e.is_directory());
        if !projected_dir && !local_dir && !self.modified.is_created(&dir) {
            return Err(VirtualizerError::Enumeration(dir));
        }

        let mut items: BTreeMap<String, DirectoryItemInfo> = BTreeMap::new();

        for entry in self.projection.children(&dir) {
            if self.modified.is_deleted(&entry.path) {
                continue;
            }
            let size = if entry.is_directory() {
                0
            } else {
                entry
                    .size
                    .or_else(|| self.sizes.get(&entry.object_id))
                    .unwrap_or(0)
            };
            items.insert(
                entry.name().to_string(),
                DirectoryItemInfo {
                    name: entry.name().to_string(),
                    is_directory: entry.is_directory(),
                    size,
                    object_id: (!entry.is_directory()).then_some(entry.object_id),
                },
            );
        }

        // Placeholders carry the version actually on disk, which wins.
        for entry in self.placeholders.children_of(&dir) {
            let name = path::file_name(&entry.relative_path).to_string();
            items.insert(name.clone(), item_from_placeholder(name, &entry));
        }

        for created in self.modified.created_children(&dir) {
            let name = path::file_name(&created).to_string();
            items.entry(name.clone()).or_insert(DirectoryItemInfo {
                name,
                is_directory: false,
                size: 0,
                object_id: None,
            });
        }

        debug!(path = %dir, items = items.len(), "Enumerated directory");
        Ok(items.into_values().collect())
    }

    /// Placeholder metadata for `raw_path`, writing the placeholder on first
    /// access. File sizes come from the size cache or the remote size query.
    #[instrument(level = "debug", skip(self))]
    pub fn get_placeholder_info(&self, raw_path: &str) -> VirtualizerResult<PlaceholderInfo> {
        self.require_started()?;
        let rel = path::normalize(raw_path)?;

        if let Some(entry) = self.placeholders.get(&rel) {
            return Ok(self.info_for(&entry));
        }
        if self.modified.is_deleted(&rel) {
            return Err(VirtualizerError::NotProjected(rel));
        }
        let projected = self
            .projection
            .get(&rel)
            .ok_or_else(|| VirtualizerError::NotProjected(rel.clone()))?;

        if projected.is_directory() {
            self.write_placeholder_directory(&rel)?;
            return Ok(PlaceholderInfo::directory(self.config.provider_id.as_str()));
        }

        let size = match projected.size.or_else(|| self.sizes.get(&projected.object_id)) {
            Some(size) => size,
            None => self
                .runtime
                .block_on(self.pipeline.query_size(projected.object_id))?
                .ok_or(FetchError::Missing(projected.object_id))?,
        };
        self.projection.set_size(&rel, size);
        self.write_placeholder_file(&rel, size, projected.object_id)?;
        Ok(PlaceholderInfo::file(
            self.config.provider_id.as_str(),
            projected.object_id.as_bytes().to_vec(),
            size,
        ))
    }

    fn info_for(&self, entry: &PlaceholderEntry) -> PlaceholderInfo {
        if entry.is_directory() {
            PlaceholderInfo::directory(self.config.provider_id.as_str())
        } else {
            PlaceholderInfo::file(
                self.config.provider_id.as_str(),
                entry.content_version_id.clone(),
                entry.size,
            )
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Returns `range` of the file's content, fetching the object if needed.
    ///
    /// Without a completion the calling thread blocks until the object's batch
    /// finishes. With one the fetch runs on the virtualizer's runtime, this
    /// returns [`FileContent::Pending`], and the completion receives the bytes.
    pub fn get_file_content(
        &self,
        raw_path: &str,
        provider_id: &str,
        range: Range<u64>,
        completion: Option<ReadCompletion>,
    ) -> VirtualizerResult<FileContent> {
        self.require_started()?;
        if provider_id != self.config.provider_id {
            return Err(VirtualizerError::ProviderMismatch {
                expected: self.config.provider_id.clone(),
                actual: provider_id.to_string(),
            });
        }
        let rel = path::normalize(raw_path)?;
        let object_id = self.content_object(&rel)?;

        match completion {
            None => {
                let result = self.runtime.block_on(self.pipeline.fetch_object(object_id));
                match result {
                    Ok(bytes) => {
                        self.metrics.read_served();
                        Ok(FileContent::Data(slice(&bytes, &range)))
                    }
                    Err(e) => {
                        self.metrics.read_failed();
                        warn!(path = %rel, object_id = %object_id, error = %e, "Read failed");
                        Err(e.into())
                    }
                }
            }
            Some(completion) => {
                self.metrics.read_pending();
                self.pending.begin();
                let pipeline = self.pipeline.clone();
                let pending = Arc::clone(&self.pending);
                let metrics = Arc::clone(&self.metrics);
                self.runtime.spawn(async move {
                    let result = pipeline.fetch_object(object_id).await;
                    match result {
                        Ok(bytes) => {
                            metrics.read_served();
                            completion.complete(Ok(slice(&bytes, &range)));
                        }
                        Err(e) => {
                            metrics.read_failed();
                            warn!(path = %rel, object_id = %object_id, error = %e, "Pending read failed");
                            completion.complete(Err(e.into()));
                        }
                    }
                    pending.end();
                });
                Ok(FileContent::Pending)
            }
        }
    }

    fn content_object(&self, rel: &str) -> VirtualizerResult<ObjectId> {
        if let Some(entry) = self.placeholders.get(rel) {
            if entry.is_directory() {
                return Err(VirtualizerError::IsDirectory(rel.to_string()));
            }
            if entry.object_id.is_null() {
                return Err(VirtualizerError::NotProjected(rel.to_string()));
            }
            return Ok(entry.object_id);
        }
        match self.projection.get(rel) {
            Some(entry) if entry.is_directory() => Err(VirtualizerError::IsDirectory(rel.to_string())),
            Some(entry) if !self.modified.is_deleted(rel) => Ok(entry.object_id),
            _ => Err(VirtualizerError::NotProjected(rel.to_string())),
        }
    }

    /// Fetches the content of several projected files ahead of use.
    pub fn prefetch_paths(&self, raw_paths: &[&str]) -> VirtualizerResult<PrefetchSummary> {
        let mut ids = Vec::with_capacity(raw_paths.len());
        for raw in raw_paths {
            let rel = path::normalize(raw)?;
            ids.push(self.content_object(&rel)?);
        }
        Ok(self.runtime.block_on(self.pipeline.prefetch(&ids)))
    }

    // =========================================================================
    // Placeholder writes
    // =========================================================================

    /// Writes a file placeholder of `end_of_file` bytes mirroring `content_id`.
    pub fn write_placeholder_file(
        &self,
        raw_path: &str,
        end_of_file: u64,
        content_id: ObjectId,
    ) -> VirtualizerResult<()> {
        let rel = path::normalize(raw_path)?;
        let _guard = self.locks.lock(&rel);

        let info = PlaceholderInfo::file(
            self.config.provider_id.as_str(),
            content_id.as_bytes().to_vec(),
            end_of_file,
        );
        self.driver.write_placeholder_file(&rel, &info)?;
        self.placeholders
            .upsert(PlaceholderEntry::file(rel.as_str(), content_id, end_of_file))?;
        self.sizes.record(content_id, end_of_file)?;
        self.metrics.placeholder_written();
        debug!(path = %rel, object_id = %content_id, size = end_of_file, "Wrote file placeholder");
        Ok(())
    }

    pub fn write_placeholder_directory(&self, raw_path: &str) -> VirtualizerResult<()> {
        let rel = path::normalize(raw_path)?;
        let _guard = self.locks.lock(&rel);

        let info = PlaceholderInfo::directory(self.config.provider_id.as_str());
        self.driver.write_placeholder_directory(&rel, &info)?;
        self.placeholders.upsert(PlaceholderEntry::directory(rel.as_str()))?;
        self.metrics.placeholder_written();
        debug!(path = %rel, "Wrote directory placeholder");
        Ok(())
    }

    /// Moves the placeholder at `raw_path` to a new content version.
    ///
    /// Unchanged versions are a no-op. A file modified outside the provider
    /// is never overwritten unless `flags` allows dirty data; the outcome
    /// reports [`UpdateFailureReason::DirtyFile`] instead.
    pub fn update_placeholder_if_needed(
        &self,
        raw_path: &str,
        timestamps: FileTimestamps,
        size: u64,
        content_id: ObjectId,
        flags: UpdateFlags,
    ) -> VirtualizerResult<UpdateOutcome> {
        let rel = path::normalize(raw_path)?;
        let _guard = self.locks.lock(&rel);

        let Some(entry) = self.placeholders.get(&rel) else {
            return Ok(UpdateOutcome::unchanged(UpdateFailureReason::FileNotFound));
        };
        if entry.is_directory() {
            debug!(path = %rel, "Directories carry no content version; nothing to update");
            return Ok(UpdateOutcome::unchanged(UpdateFailureReason::NoFailure));
        }
        if entry.content_version_id.as_slice() == content_id.as_bytes() && entry.size == size {
            return Ok(UpdateOutcome::unchanged(UpdateFailureReason::NoFailure));
        }
        if entry.is_dirty() && !flags.contains(UpdateFlags::ALLOW_DIRTY_DATA) {
            self.metrics.dirty_conflict();
            warn!(path = %rel, "Not updating locally modified file");
            return Ok(UpdateOutcome::unchanged(UpdateFailureReason::DirtyFile));
        }

        let info = PlaceholderInfo::file(
            self.config.provider_id.as_str(),
            content_id.as_bytes().to_vec(),
            size,
        )
        .with_timestamps(timestamps);
        let reason = self.driver.update_placeholder(&rel, &info, flags)?;
        match reason {
            UpdateFailureReason::NoFailure => {
                self.placeholders
                    .upsert(PlaceholderEntry::file(rel.as_str(), content_id, size))?;
                self.sizes.record(content_id, size)?;
                debug!(path = %rel, object_id = %content_id, "Updated placeholder");
                Ok(UpdateOutcome::changed())
            }
            UpdateFailureReason::DirtyFile => {
                self.metrics.dirty_conflict();
                self.placeholders.set_state(&rel, PlaceholderState::Dirty)?;
                warn!(path = %rel, "Not updating locally modified file");
                Ok(UpdateOutcome::unchanged(reason))
            }
            other => Ok(UpdateOutcome::unchanged(other)),
        }
    }

    /// Deletes the placeholder at `raw_path` and its index entries.
    ///
    /// An absent path succeeds with reason `FileNotFound`. Locally modified
    /// files are refused with `DirtyFile` unless `flags` allows dirty data.
    pub fn delete_file(&self, raw_path: &str, flags: UpdateFlags) -> VirtualizerResult<UpdateOutcome> {
        let rel = path::normalize(raw_path)?;
        let _guard = self.locks.lock(&rel);

        let entry = self.placeholders.get(&rel);
        if entry.as_ref().is_some_and(|e| e.is_dirty())
            && !flags.contains(UpdateFlags::ALLOW_DIRTY_DATA)
        {
            self.metrics.dirty_conflict();
            return Ok(UpdateOutcome::unchanged(UpdateFailureReason::DirtyFile));
        }

        let reason = self.driver.delete_file(&rel, flags)?;
        match reason {
            UpdateFailureReason::NoFailure | UpdateFailureReason::FileNotFound => {
                let removed = self.placeholders.remove_subtree(&rel)?;
                debug!(path = %rel, removed, reason = ?reason, "Deleted placeholder");
                if reason == UpdateFailureReason::NoFailure || removed > 0 {
                    Ok(UpdateOutcome {
                        changed: true,
                        failure_reason: reason,
                    })
                } else {
                    Ok(UpdateOutcome::unchanged(reason))
                }
            }
            UpdateFailureReason::DirtyFile => {
                self.metrics.dirty_conflict();
                if entry.is_some() {
                    self.placeholders.set_state(&rel, PlaceholderState::Dirty)?;
                }
                Ok(UpdateOutcome::unchanged(reason))
            }
            other => Ok(UpdateOutcome::unchanged(other)),
        }
    }

    /// Drops the driver's negative path cache. Returns the number of entries
    /// dropped.
    pub fn clear_negative_path_cache(&self) -> VirtualizerResult<u32> {
        let count = self.driver.clear_negative_path_cache()?;
        debug!(count, "Cleared negative path cache");
        Ok(count)
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Queues the bookkeeping for a mutation the driver observed. Only a
    /// durable log append happens on the calling thread.
    pub fn on_notify(&self, event: NotifyEvent) -> VirtualizerResult<()> {
        if let Some(error) = self.queue.consistency_error() {
            return Err(VirtualizerError::Consistency(error));
        }

        let task = match &event {
            NotifyEvent::Created { path: p, is_directory } => {
                let rel = path::normalize(p)?;
                if *is_directory {
                    FileSystemTask::folder_created(rel)
                } else {
                    FileSystemTask::file_created(rel)
                }
            }
            NotifyEvent::Modified { path: p } => FileSystemTask::file_modified(path::normalize(p)?),
            NotifyEvent::Renamed { old_path, new_path } => {
                FileSystemTask::file_renamed(path::normalize(old_path)?, path::normalize(new_path)?)
            }
            NotifyEvent::Deleted { path: p, is_directory } => {
                let rel = path::normalize(p)?;
                if *is_directory {
                    FileSystemTask::folder_deleted(rel)
                } else {
                    FileSystemTask::file_deleted(rel)
                }
            }
            NotifyEvent::HardLinked { path: p } => {
                FileSystemTask::file_hard_linked(path::normalize(p)?)
            }
            NotifyEvent::Hydrated { path: p } => FileSystemTask::file_hydrated(path::normalize(p)?),
        };

        self.metrics.notification();
        let seq = {
            let _guards = match &task.old_path {
                Some(old) => self.locks.lock_pair(old, &task.path),
                None => vec![self.locks.lock(&task.path)],
            };
            self.queue.enqueue(task)?
        };
        debug!(seq, event = ?event, "Queued notification");
        Ok(())
    }

    // =========================================================================
    // Observability
    // =========================================================================

    /// The error that halted the task queue, if any.
    pub fn consistency_error(&self) -> Option<ConsistencyError> {
        self.queue.consistency_error()
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    /// Waits until every queued task has been applied or `timeout` passes.
    pub fn wait_for_tasks(&self, timeout: Duration) -> bool {
        self.queue.wait_until_empty(timeout)
    }

    pub fn pending_tasks(&self) -> usize {
        self.queue.count()
    }

    pub fn placeholders(&self) -> &PlaceholderIndex {
        &self.placeholders
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn modified_paths(&self) -> &ModifiedPaths {
        &self.modified
    }

    pub fn pipeline(&self) -> &ObjectFetchPipeline {
        &self.pipeline
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl Drop for FileSystemVirtualizer {
    fn drop(&mut self) {
        if self.is_started() {
            if let Err(e) = self.stop() {
                warn!(error = %e, "Failed to stop virtualizer on drop");
            }
        }
    }
}

fn item_from_placeholder(name: String, entry: &PlaceholderEntry) -> DirectoryItemInfo {
    DirectoryItemInfo {
        name,
        is_directory: entry.is_directory(),
        size: entry.size,
        object_id: (!entry.is_directory() && !entry.object_id.is_null()).then_some(entry.object_id),
    }
}

fn slice(bytes: &Bytes, range: &Range<u64>) -> Bytes {
    let len = bytes.len() as u64;
    let start = range.start.min(len) as usize;
    let end = range.end.clamp(range.start.min(len), len) as usize;
    bytes.slice(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_clamps_range() {
        let bytes = Bytes::from_static(b"0123456789");
        assert_eq!(&slice(&bytes, &(2..5))[..], b"234");
        assert_eq!(&slice(&bytes, &(8..100))[..], b"89");
        assert!(slice(&bytes, &(50..60)).is_empty());
        assert!(slice(&bytes, &(5..2)).is_empty());
    }

    #[test]
    fn test_pending_reads_drain() {
        let pending = PendingReads::default();
        pending.begin();
        assert!(!pending.wait_idle(Instant::now() + Duration::from_millis(10)));
        pending.end();
        assert!(pending.wait_idle(Instant::now()));
    }
}
