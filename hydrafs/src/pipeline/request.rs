//! Pipeline work items.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::object::ObjectId;

/// Monotonic request id source, owned by one pipeline.
///
/// Ids only correlate log lines and order in-flight requests; deduplication
/// keys on object id.
#[derive(Debug)]
pub struct RequestCounter(AtomicU64);

impl RequestCounter {
    /// Counter whose first id is `first`.
    pub fn new(first: u64) -> Self {
        Self(AtomicU64::new(first))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RequestCounter {
    fn default() -> Self {
        Self::new(1)
    }
}

/// What a download transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadKind {
    /// The listed objects, batched.
    Objects,
    /// A single commit through the remote's commit endpoint.
    Commit,
}

/// One batch transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Unique ids in first-requested order.
    pub object_ids: Vec<ObjectId>,
    pub request_id: u64,
    pub kind: DownloadKind,
}

impl DownloadRequest {
    /// Batch of objects; duplicate ids are dropped, first occurrence wins.
    pub fn objects(ids: impl IntoIterator<Item = ObjectId>, request_id: u64) -> Self {
        let mut object_ids: Vec<ObjectId> = Vec::new();
        for id in ids {
            if !object_ids.contains(&id) {
                object_ids.push(id);
            }
        }
        Self {
            object_ids,
            request_id,
            kind: DownloadKind::Objects,
        }
    }

    /// Single-commit download.
    pub fn commit(id: ObjectId, request_id: u64) -> Self {
        Self {
            object_ids: vec![id],
            request_id,
            kind: DownloadKind::Commit,
        }
    }

    pub fn len(&self) -> usize {
        self.object_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.object_ids.is_empty()
    }
}

/// A downloaded pack awaiting indexing.
#[derive(Debug, Clone)]
pub struct IndexPackRequest {
    pub temp_pack_file: PathBuf,
    pub download_request: DownloadRequest,
}
