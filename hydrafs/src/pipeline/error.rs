//! Fetch pipeline errors.

use thiserror::Error;

use crate::object::ObjectId;

/// Result type for fetch operations.
pub type FetchResult<T> = Result<T, FetchError>;

/// Terminal outcome of a failed fetch.
///
/// `Clone` because one batch failure is delivered to every caller attached
/// to any object in the batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The transfer failed and retries are exhausted (or the failure was permanent).
    #[error("transfer failed after {attempts} attempt(s): {message}")]
    Transfer { attempts: u32, message: String },

    /// The downloaded pack could not be verified or indexed.
    #[error("pack indexing failed: {0}")]
    Index(String),

    /// The remote's pack did not contain a requested object.
    #[error("object {0} missing from remote response")]
    Missing(ObjectId),

    /// The fetch was cancelled while in flight.
    #[error("fetch cancelled")]
    Cancelled,

    /// The pipeline no longer accepts requests.
    #[error("fetch pipeline is shutting down")]
    ShuttingDown,

    /// Reading or adopting local data failed.
    #[error("local object store error: {0}")]
    Store(String),
}
