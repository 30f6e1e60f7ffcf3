//! Remote object store boundary.
//!
//! The remote answers batched requests with a pack stream and reports success
//! or failure per batch, never per object. Implementations:
//!
//! - [`HttpObjectStore`]: the GVFS `objects` / `sizes` endpoints over reqwest
//! - [`MemoryRemoteStore`]: in-process store with fault injection, for tests
//!
//! # Dyn Compatibility
//!
//! Async methods return [`BoxFuture`] so the pipeline can hold an
//! `Arc<dyn RemoteObjectStore>`.

mod http;
mod memory;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use thiserror::Error;

use crate::object::ObjectId;

pub use http::HttpObjectStore;
pub use memory::{MemoryRemoteStore, RemoteFault};

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A failed transfer.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransferError {
    pub message: String,
    /// Worth retrying (network errors, 5xx, 429).
    pub transient: bool,
    /// HTTP status, when the failure came from a response.
    pub status: Option<u16>,
}

impl TransferError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
            status: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
            status: None,
        }
    }

    /// Classifies an HTTP status: 408, 429 and 5xx are transient.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let transient = status == 408 || status == 429 || (500..600).contains(&status);
        Self {
            message: message.into(),
            transient,
            status: Some(status),
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(e: std::io::Error) -> Self {
        TransferError::permanent(format!("local I/O error: {}", e))
    }
}

/// Remote content-addressed object store.
pub trait RemoteObjectStore: Send + Sync {
    /// Transfers the objects `ids` as one pack written to `dest`.
    ///
    /// Returns the number of bytes written. On error `dest` may hold a
    /// partial pack; the caller discards it.
    fn download_objects<'a>(
        &'a self,
        ids: &'a [ObjectId],
        dest: &'a Path,
    ) -> BoxFuture<'a, Result<u64, TransferError>>;

    /// Transfers a single commit (and whatever the remote bundles with it)
    /// as a pack written to `dest`.
    fn download_commit<'a>(
        &'a self,
        id: ObjectId,
        dest: &'a Path,
    ) -> BoxFuture<'a, Result<u64, TransferError>>;

    /// Looks up content lengths without transferring content.
    ///
    /// Unknown ids are omitted from the answer.
    fn query_sizes<'a>(
        &'a self,
        ids: &'a [ObjectId],
    ) -> BoxFuture<'a, Result<Vec<(ObjectId, u64)>, TransferError>>;

    /// Name for logs.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(TransferError::from_status(503, "busy").transient);
        assert!(TransferError::from_status(429, "slow down").transient);
        assert!(!TransferError::from_status(404, "gone").transient);
        assert_eq!(TransferError::from_status(401, "auth").status, Some(401));
    }
}
