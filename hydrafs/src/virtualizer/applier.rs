//! Applies queued tasks to the placeholder index and local-change record.
//!
//! Every operation is phrased as "make the index reflect this", so applying a
//! task twice (after a crash replay or a batch retry) is harmless.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::object::ObjectId;
use crate::projection::{ModifiedPaths, Projection};
use crate::queue::{BackgroundTaskHandler, FileSystemTask, TaskError, TaskKind};
use crate::store::{PlaceholderEntry, PlaceholderIndex, PlaceholderState, StoreResult};

pub struct TaskApplier {
    placeholders: Arc<PlaceholderIndex>,
    modified: Arc<ModifiedPaths>,
    projection: Arc<Projection>,
    applied: usize,
}

impl TaskApplier {
    pub fn new(
        placeholders: Arc<PlaceholderIndex>,
        modified: Arc<ModifiedPaths>,
        projection: Arc<Projection>,
    ) -> Self {
        Self {
            placeholders,
            modified,
            projection,
            applied: 0,
        }
    }

    fn apply(&self, task: &FileSystemTask) -> StoreResult<()> {
        let path = task.path.as_str();
        match task.kind {
            TaskKind::FileCreated | TaskKind::FileHardLinked => {
                self.modified.created(path)?;
                self.ensure_local_file(path)?;
            }
            TaskKind::FolderCreated => {
                self.modified.created(path)?;
                if !self.placeholders.contains(path) {
                    self.placeholders.upsert(
                        PlaceholderEntry::directory(path).with_state(PlaceholderState::Hydrated),
                    )?;
                }
            }
            TaskKind::FileModified => {
                if !self.placeholders.set_state(path, PlaceholderState::Dirty)? {
                    self.ensure_local_file(path)?;
                }
            }
            TaskKind::FileRenamed => {
                if let Some(old_path) = task.old_path.as_deref() {
                    let was_directory = self
                        .placeholders
                        .get(old_path)
                        .map(|e| e.is_directory())
                        .unwrap_or_else(|| self.projection.is_directory(old_path));
                    self.placeholders.rename(old_path, path)?;
                    self.modified.renamed(old_path, path)?;
                    self.mark_moved_files_dirty(path)?;
                    if !self.placeholders.contains(path) {
                        let entry = if was_directory {
                            PlaceholderEntry::directory(path).with_state(PlaceholderState::Hydrated)
                        } else {
                            PlaceholderEntry::file(path, ObjectId::NULL, 0)
                                .with_state(PlaceholderState::Dirty)
                        };
                        self.placeholders.upsert(entry)?;
                    }
                }
            }
            TaskKind::FileDeleted | TaskKind::FolderDeleted => {
                let removed = self.placeholders.remove_subtree(path)?;
                self.modified.deleted(path)?;
                trace!(path, removed, "Removed deleted entries");
            }
            TaskKind::FileHydrated => {
                if self
                    .placeholders
                    .get(path)
                    .is_some_and(|e| e.state == PlaceholderState::Placeholder)
                {
                    self.placeholders.set_state(path, PlaceholderState::Hydrated)?;
                }
            }
            TaskKind::IndexUpdate => {
                trace!(path, "Index refresh requested");
            }
        }
        Ok(())
    }

    /// Files the user moved no longer mirror the repository at their new
    /// path, so updates must leave them alone.
    fn mark_moved_files_dirty(&self, path: &str) -> StoreResult<()> {
        let moved = self
            .placeholders
            .get(path)
            .into_iter()
            .chain(self.placeholders.descendants_of(path));
        for entry in moved {
            if !entry.is_directory() && !entry.is_dirty() {
                self.placeholders
                    .set_state(&entry.relative_path, PlaceholderState::Dirty)?;
            }
        }
        Ok(())
    }

    /// A file that exists only locally, tracked so it is never overwritten.
    fn ensure_local_file(&self, path: &str) -> StoreResult<()> {
        match self.placeholders.get(path) {
            Some(entry) if entry.is_dirty() => Ok(()),
            Some(_) => {
                self.placeholders.set_state(path, PlaceholderState::Dirty)?;
                Ok(())
            }
            None => self.placeholders.upsert(
                PlaceholderEntry::file(path, ObjectId::NULL, 0).with_state(PlaceholderState::Dirty),
            ),
        }
    }
}

impl BackgroundTaskHandler for TaskApplier {
    fn pre_batch(&mut self) -> Result<(), TaskError> {
        self.applied = 0;
        Ok(())
    }

    fn handle(&mut self, task: &FileSystemTask) -> Result<(), TaskError> {
        if task.kind == TaskKind::FileRenamed && task.old_path.is_none() {
            return Err(TaskError::permanent(format!(
                "rename of {} has no source path",
                task.path
            )));
        }
        self.apply(task)
            .map_err(|e| TaskError::transient(format!("{}: {}", task, e)))?;
        self.applied += 1;
        Ok(())
    }

    fn post_batch(&mut self) -> Result<(), TaskError> {
        debug!(
            applied = self.applied,
            entries = self.placeholders.len(),
            "Applied task batch"
        );
        Ok(())
    }

    fn on_batch_failed(&mut self, error: &TaskError) {
        debug!(applied = self.applied, error = %error, "Task batch aborted");
        self.applied = 0;
    }
}
