//! Deferred file system mutations.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    FileCreated,
    FolderCreated,
    /// Content changed outside the provider.
    FileModified,
    /// `old_path` holds the source.
    FileRenamed,
    FileDeleted,
    FolderDeleted,
    FileHardLinked,
    /// A placeholder's content was fully materialized.
    FileHydrated,
    IndexUpdate,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::FileCreated => "file-created",
            TaskKind::FolderCreated => "folder-created",
            TaskKind::FileModified => "file-modified",
            TaskKind::FileRenamed => "file-renamed",
            TaskKind::FileDeleted => "file-deleted",
            TaskKind::FolderDeleted => "folder-deleted",
            TaskKind::FileHardLinked => "file-hard-linked",
            TaskKind::FileHydrated => "file-hydrated",
            TaskKind::IndexUpdate => "index-update",
        }
    }
}

/// One queued mutation. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemTask {
    pub kind: TaskKind,
    pub path: String,
    pub old_path: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl FileSystemTask {
    pub fn new(kind: TaskKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            old_path: None,
            timestamp: Utc::now(),
        }
    }

    pub fn file_created(path: impl Into<String>) -> Self {
        Self::new(TaskKind::FileCreated, path)
    }

    pub fn folder_created(path: impl Into<String>) -> Self {
        Self::new(TaskKind::FolderCreated, path)
    }

    pub fn file_modified(path: impl Into<String>) -> Self {
        Self::new(TaskKind::FileModified, path)
    }

    pub fn file_renamed(old_path: impl Into<String>, new_path: impl Into<String>) -> Self {
        Self {
            old_path: Some(old_path.into()),
            ..Self::new(TaskKind::FileRenamed, new_path)
        }
    }

    pub fn file_deleted(path: impl Into<String>) -> Self {
        Self::new(TaskKind::FileDeleted, path)
    }

    pub fn folder_deleted(path: impl Into<String>) -> Self {
        Self::new(TaskKind::FolderDeleted, path)
    }

    pub fn file_hard_linked(path: impl Into<String>) -> Self {
        Self::new(TaskKind::FileHardLinked, path)
    }

    pub fn file_hydrated(path: impl Into<String>) -> Self {
        Self::new(TaskKind::FileHydrated, path)
    }

    pub fn index_update(path: impl Into<String>) -> Self {
        Self::new(TaskKind::IndexUpdate, path)
    }
}

impl fmt::Display for FileSystemTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.old_path {
            Some(old) => write!(f, "{} {} -> {}", self.kind.as_str(), old, self.path),
            None => write!(f, "{} {}", self.kind.as_str(), self.path),
        }
    }
}
