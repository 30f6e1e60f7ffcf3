//! In-process remote store with fault injection.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use super::{BoxFuture, RemoteObjectStore, TransferError};
use crate::object::{ObjectId, ObjectKind};
use crate::pack::PackBuilder;

/// A failure the next transfer will exhibit.
#[derive(Debug, Clone)]
pub enum RemoteFault {
    /// Fail before sending anything; retryable.
    Transient(String),
    /// Fail before sending anything; not retryable.
    Permanent(String),
    /// Write the first `bytes` of the pack, then fail as a dropped connection.
    DisconnectAfter { bytes: usize },
    /// Omit these ids from the pack even if requested.
    Omit(Vec<ObjectId>),
}

/// Remote store backed by a hash map.
///
/// Download counters let tests assert deduplication; the optional latency
/// keeps transfers in flight long enough for concurrent callers to attach.
#[derive(Default)]
pub struct MemoryRemoteStore {
    objects: RwLock<HashMap<ObjectId, (ObjectKind, Vec<u8>)>>,
    commit_bundles: RwLock<HashMap<ObjectId, Vec<ObjectId>>>,
    faults: Mutex<VecDeque<RemoteFault>>,
    latency: Mutex<Option<Duration>>,
    downloads: AtomicU64,
    objects_sent: AtomicU64,
    size_queries: AtomicU64,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every transfer by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock() = Some(latency);
        self
    }

    /// Stores an object and returns its id.
    pub fn insert(&self, kind: ObjectKind, body: &[u8]) -> ObjectId {
        let id = ObjectId::hash_object(kind, body);
        self.objects.write().insert(id, (kind, body.to_vec()));
        id
    }

    pub fn insert_blob(&self, body: &[u8]) -> ObjectId {
        self.insert(ObjectKind::Blob, body)
    }

    /// Stores a commit and the objects sent along with it on a commit download.
    pub fn insert_commit(&self, body: &[u8], bundled: Vec<ObjectId>) -> ObjectId {
        let id = self.insert(ObjectKind::Commit, body);
        self.commit_bundles.write().insert(id, bundled);
        id
    }

    /// Queues a fault for the next transfer. Faults are consumed in order.
    pub fn inject_fault(&self, fault: RemoteFault) {
        self.faults.lock().push_back(fault);
    }

    /// Number of download calls (objects and commits).
    pub fn download_count(&self) -> u64 {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Total objects written into packs.
    pub fn objects_sent(&self) -> u64 {
        self.objects_sent.load(Ordering::SeqCst)
    }

    pub fn size_query_count(&self) -> u64 {
        self.size_queries.load(Ordering::SeqCst)
    }

    async fn transfer(&self, ids: &[ObjectId], dest: &Path) -> Result<u64, TransferError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let fault = self.faults.lock().pop_front();
        let omit = match &fault {
            Some(RemoteFault::Transient(msg)) => return Err(TransferError::transient(msg.clone())),
            Some(RemoteFault::Permanent(msg)) => return Err(TransferError::permanent(msg.clone())),
            Some(RemoteFault::Omit(ids)) => ids.clone(),
            _ => Vec::new(),
        };

        let pack = {
            let objects = self.objects.read();
            let mut builder = PackBuilder::new();
            for id in ids {
                if omit.contains(id) || builder.contains(id) {
                    continue;
                }
                if let Some((kind, body)) = objects.get(id) {
                    builder.add(*kind, body);
                }
            }
            self.objects_sent
                .fetch_add(builder.len() as u64, Ordering::SeqCst);
            builder.finish()?
        };

        if let Some(RemoteFault::DisconnectAfter { bytes }) = fault {
            let cut = bytes.min(pack.len());
            tokio::fs::write(dest, &pack[..cut]).await?;
            return Err(TransferError::transient(format!(
                "connection reset after {} bytes",
                cut
            )));
        }

        tokio::fs::write(dest, &pack).await?;
        Ok(pack.len() as u64)
    }
}

impl RemoteObjectStore for MemoryRemoteStore {
    fn download_objects<'a>(
        &'a self,
        ids: &'a [ObjectId],
        dest: &'a Path,
    ) -> BoxFuture<'a, Result<u64, TransferError>> {
        Box::pin(self.transfer(ids, dest))
    }

    fn download_commit<'a>(
        &'a self,
        id: ObjectId,
        dest: &'a Path,
    ) -> BoxFuture<'a, Result<u64, TransferError>> {
        Box::pin(async move {
            let mut ids = vec![id];
            if let Some(bundled) = self.commit_bundles.read().get(&id) {
                ids.extend_from_slice(bundled);
            }
            self.transfer(&ids, dest).await
        })
    }

    fn query_sizes<'a>(
        &'a self,
        ids: &'a [ObjectId],
    ) -> BoxFuture<'a, Result<Vec<(ObjectId, u64)>, TransferError>> {
        Box::pin(async move {
            self.size_queries.fetch_add(1, Ordering::SeqCst);
            let objects = self.objects.read();
            Ok(ids
                .iter()
                .filter_map(|id| objects.get(id).map(|(_, body)| (*id, body.len() as u64)))
                .collect())
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}
