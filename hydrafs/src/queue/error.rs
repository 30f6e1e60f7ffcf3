//! Queue errors.

use thiserror::Error;

use super::task::FileSystemTask;
use crate::store::StoreError;

/// Failure reported by a handler callback.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct TaskError {
    pub message: String,
    /// Worth retrying the batch.
    pub transient: bool,
}

impl TaskError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }
}

/// A task could not be applied within the retry budget.
///
/// The working copy and the index no longer agree; the queue stops.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("task '{task}' failed after {attempts} attempt(s): {message}")]
pub struct ConsistencyError {
    pub task: FileSystemTask,
    pub attempts: u32,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("task queue is shutting down")]
    ShuttingDown,

    #[error("task queue halted: {0}")]
    Halted(ConsistencyError),

    #[error("task queue worker already started")]
    AlreadyStarted,

    #[error("failed to spawn task queue worker: {0}")]
    Spawn(std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}
