//! Virtualizer errors.

use thiserror::Error;

use crate::driver::DriverError;
use crate::path::PathError;
use crate::pipeline::FetchError;
use crate::queue::{ConsistencyError, QueueError};
use crate::store::StoreError;

pub type VirtualizerResult<T> = Result<T, VirtualizerError>;

#[derive(Debug, Error)]
pub enum VirtualizerError {
    /// A driver primitive failed; surfaced to the driver verbatim.
    #[error(transparent)]
    Io(#[from] DriverError),

    #[error("invalid path: {0}")]
    Path(#[from] PathError),

    /// Enumeration of a path that is not a known directory.
    #[error("cannot enumerate {0:?}: not a virtualized directory")]
    Enumeration(String),

    #[error("path {0:?} is not projected")]
    NotProjected(String),

    #[error("path {0:?} is a directory")]
    IsDirectory(String),

    #[error("request for provider {actual:?}, this provider is {expected:?}")]
    ProviderMismatch { expected: String, actual: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Queue(QueueError),

    #[error(transparent)]
    Consistency(ConsistencyError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("virtualizer is not started")]
    NotStarted,

    #[error("virtualizer is already started")]
    AlreadyStarted,

    #[error("failed to create async runtime: {0}")]
    RuntimeCreation(std::io::Error),
}

impl From<QueueError> for VirtualizerError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Halted(consistency) => VirtualizerError::Consistency(consistency),
            other => VirtualizerError::Queue(other),
        }
    }
}
