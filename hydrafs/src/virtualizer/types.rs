//! Callback inputs and outputs.

use std::fmt;

use bytes::Bytes;

use super::error::VirtualizerResult;
use crate::driver::UpdateFailureReason;
use crate::object::ObjectId;

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryItemInfo {
    pub name: String,
    pub is_directory: bool,
    /// Content length; 0 for directories and unknown sizes.
    pub size: u64,
    pub object_id: Option<ObjectId>,
}

/// Result of a content read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Data(Bytes),
    /// The read continues in the background and finishes through the
    /// caller's [`ReadCompletion`].
    Pending,
}

/// Driver-provided handle that finishes an asynchronous read.
pub struct ReadCompletion(Box<dyn FnOnce(VirtualizerResult<Bytes>) + Send>);

impl ReadCompletion {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(VirtualizerResult<Bytes>) + Send + 'static,
    {
        Self(Box::new(f))
    }

    pub fn complete(self, result: VirtualizerResult<Bytes>) {
        (self.0)(result)
    }
}

impl fmt::Debug for ReadCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReadCompletion")
    }
}

/// Result of an update or delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Whether anything on disk or in the index changed.
    pub changed: bool,
    pub failure_reason: UpdateFailureReason,
}

impl UpdateOutcome {
    pub fn changed() -> Self {
        Self {
            changed: true,
            failure_reason: UpdateFailureReason::NoFailure,
        }
    }

    pub fn unchanged(failure_reason: UpdateFailureReason) -> Self {
        Self {
            changed: false,
            failure_reason,
        }
    }

    /// `FileNotFound` counts as success: deleting an absent path is done.
    pub fn is_success(&self) -> bool {
        matches!(
            self.failure_reason,
            UpdateFailureReason::NoFailure | UpdateFailureReason::FileNotFound
        )
    }
}

/// Mutation observed by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyEvent {
    Created { path: String, is_directory: bool },
    Modified { path: String },
    Renamed { old_path: String, new_path: String },
    Deleted { path: String, is_directory: bool },
    HardLinked { path: String },
    Hydrated { path: String },
}
