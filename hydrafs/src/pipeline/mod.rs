//! Object fetch pipeline.
//!
//! Turns object-id demand into locally indexed pack data with bounded
//! concurrency and at most one transfer per object at a time.
//!
//! # Architecture
//!
//! ```text
//! fetch_object(id) ─► content cache ─► local store ─► in-flight table
//!                                                          │ leader
//!                                                          ▼
//!                 batcher (batch_size / batch_window) ─► DownloadRequest
//!                                                          │ download permits
//!                                                          ▼
//!                 download_with_retry ─► temp pack ─► IndexPackRequest
//!                                                          │ index permits
//!                                                          ▼
//!                 index_and_adopt ─► pack/ ─► complete(id) for every id
//! ```
//!
//! A batch succeeds or fails as a unit: every caller attached to any of its
//! ids sees the same outcome, and a failed batch leaves nothing in `pack/`.

mod batcher;
mod download;
mod error;
mod indexer;
mod inflight;
mod request;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use moka::future::Cache;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::FetchConfig;
use crate::object::ObjectId;
use crate::remote::RemoteObjectStore;
use crate::store::{BlobSizeCache, LocalObjectStore, StoreError};
use crate::telemetry::HydraMetrics;

pub use error::{FetchError, FetchResult};
pub use inflight::{Attach, InFlightTable};
pub use request::{DownloadKind, DownloadRequest, IndexPackRequest, RequestCounter};

use inflight::wait;

/// Outcome of [`ObjectFetchPipeline::prefetch`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefetchSummary {
    /// Unique ids asked for.
    pub requested: usize,
    /// Ids that were already in the local store.
    pub already_present: usize,
    /// Ids transferred by this call (or by a fetch it joined).
    pub fetched: usize,
    pub failed: Vec<(ObjectId, FetchError)>,
}

impl PrefetchSummary {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub(crate) struct PipelineInner {
    remote: Arc<dyn RemoteObjectStore>,
    store: Arc<LocalObjectStore>,
    sizes: Arc<BlobSizeCache>,
    config: FetchConfig,
    metrics: Arc<HydraMetrics>,
    inflight: InFlightTable,
    content: Cache<ObjectId, Bytes>,
    requests: RequestCounter,
    download_permits: Semaphore,
    index_permits: Semaphore,
    cancel: CancellationToken,
    closed: AtomicBool,
    batch_tx: Mutex<Option<mpsc::UnboundedSender<ObjectId>>>,
    batcher: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to a running pipeline. Cheap to clone.
#[derive(Clone)]
pub struct ObjectFetchPipeline {
    inner: Arc<PipelineInner>,
}

impl ObjectFetchPipeline {
    /// Starts the pipeline. Must be called from within a Tokio runtime.
    pub fn start(
        remote: Arc<dyn RemoteObjectStore>,
        store: Arc<LocalObjectStore>,
        sizes: Arc<BlobSizeCache>,
        config: FetchConfig,
        metrics: Arc<HydraMetrics>,
    ) -> Self {
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();

        let content = Cache::builder()
            .weigher(|_id: &ObjectId, value: &Bytes| -> u32 {
                value.len().min(u32::MAX as usize) as u32
            })
            .max_capacity(config.content_cache_bytes)
            .build();

        info!(
            remote = remote.name(),
            batch_size = config.batch_size,
            download_parallelism = config.download_parallelism,
            index_parallelism = config.index_parallelism,
            "Starting object fetch pipeline"
        );

        let inner = Arc::new(PipelineInner {
            remote,
            store,
            sizes,
            download_permits: Semaphore::new(config.download_parallelism.max(1)),
            index_permits: Semaphore::new(config.index_parallelism.max(1)),
            config,
            metrics,
            inflight: InFlightTable::new(),
            content,
            requests: RequestCounter::default(),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            batch_tx: Mutex::new(Some(batch_tx)),
            batcher: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        });

        // The batcher holds a weak handle so dropping every pipeline handle
        // closes the channel and ends it.
        let weak: Weak<PipelineInner> = Arc::downgrade(&inner);
        let handle = tokio::spawn(batcher::run_batcher(
            batch_rx,
            inner.config.batch_size.max(1),
            inner.config.batch_window,
            inner.cancel.clone(),
            move |ids| {
                if let Some(inner) = weak.upgrade() {
                    let request = DownloadRequest::objects(ids, inner.requests.next());
                    spawn_request(&inner, request);
                }
            },
        ));
        *inner.batcher.lock() = Some(handle);

        Self { inner }
    }

    pub fn store(&self) -> &Arc<LocalObjectStore> {
        &self.inner.store
    }

    pub fn sizes(&self) -> &Arc<BlobSizeCache> {
        &self.inner.sizes
    }

    pub fn metrics(&self) -> &Arc<HydraMetrics> {
        &self.inner.metrics
    }

    /// Returns the body of object `id`, transferring it if needed.
    pub async fn fetch_object(&self, id: ObjectId) -> FetchResult<Bytes> {
        if let Some(bytes) = self.inner.content.get(&id).await {
            self.inner.metrics.content_cache_hit();
            return Ok(bytes);
        }
        self.inner.metrics.content_cache_miss();

        if !self.inner.store.contains(&id) {
            self.ensure_local(id).await?;
        }
        self.load(id).await
    }

    /// Makes `ids` local without reading them. Ids are coalesced into
    /// batches by the batcher like any other demand.
    pub async fn prefetch(&self, ids: &[ObjectId]) -> PrefetchSummary {
        let mut unique: Vec<ObjectId> = Vec::with_capacity(ids.len());
        for id in ids {
            if !unique.contains(id) {
                unique.push(*id);
            }
        }

        let mut summary = PrefetchSummary {
            requested: unique.len(),
            ..Default::default()
        };

        let missing: Vec<ObjectId> = unique
            .into_iter()
            .filter(|id| {
                let present = self.inner.store.contains(id);
                if present {
                    summary.already_present += 1;
                }
                !present
            })
            .collect();

        let results =
            futures::future::join_all(missing.iter().map(|id| self.ensure_local(*id))).await;
        for (id, result) in missing.into_iter().zip(results) {
            match result {
                Ok(()) => summary.fetched += 1,
                Err(e) => summary.failed.push((id, e)),
            }
        }

        debug!(
            requested = summary.requested,
            already_present = summary.already_present,
            fetched = summary.fetched,
            failed = summary.failed.len(),
            "Prefetch finished"
        );
        summary
    }

    /// Downloads a single commit through the remote's commit endpoint and
    /// returns its body.
    pub async fn fetch_commit(&self, id: ObjectId) -> FetchResult<Bytes> {
        if !self.inner.store.contains(&id) {
            self.check_open()?;
            let rx = match self.inner.inflight.attach(id) {
                Attach::Follower(rx) => {
                    self.inner.metrics.dedup_join();
                    rx
                }
                Attach::Leader(rx) => {
                    if self.inner.store.contains(&id) {
                        self.inner.inflight.complete(&id, Ok(()));
                    } else {
                        let request = DownloadRequest::commit(id, self.inner.requests.next());
                        spawn_request(&self.inner, request);
                    }
                    rx
                }
            };
            self.wait_cancellable(rx).await?;
        }
        self.load(id).await
    }

    /// Content length of `id`: size cache, then local store, then the
    /// remote's size query. Remote answers are cached.
    pub async fn query_size(&self, id: ObjectId) -> FetchResult<Option<u64>> {
        if let Some(size) = self.inner.sizes.get(&id) {
            return Ok(Some(size));
        }
        if let Some(size) = self.inner.store.object_size(&id) {
            return Ok(Some(size));
        }

        let answer = self
            .inner
            .remote
            .query_sizes(std::slice::from_ref(&id))
            .await
            .map_err(|e| FetchError::Transfer {
                attempts: 1,
                message: e.message,
            })?;

        let size = answer
            .into_iter()
            .find(|(answered, _)| *answered == id)
            .map(|(_, size)| size);
        if let Some(size) = size {
            self.inner
                .sizes
                .record(id, size)
                .map_err(|e| FetchError::Store(e.to_string()))?;
        }
        Ok(size)
    }

    /// Number of object ids with a transfer in flight.
    pub fn in_flight_count(&self) -> usize {
        self.inner.inflight.len()
    }

    /// Cancels all in-flight work. Every attached caller receives
    /// [`FetchError::Cancelled`]; later calls fail with `ShuttingDown`.
    pub fn cancel(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.cancel.cancel();
        self.inner.inflight.fail_all(FetchError::Cancelled);
        info!("Object fetch pipeline cancelled");
    }

    /// Stops accepting demand and waits for queued and running batches.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.batch_tx.lock().take();

        let batcher = self.inner.batcher.lock().take();
        if let Some(batcher) = batcher {
            if let Err(e) = batcher.await {
                warn!(error = %e, "Batcher task failed");
            }
        }

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Download task failed");
            }
        }
        info!("Object fetch pipeline stopped");
    }

    fn check_open(&self) -> FetchResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            Err(FetchError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    async fn ensure_local(&self, id: ObjectId) -> FetchResult<()> {
        self.check_open()?;
        let rx = match self.inner.inflight.attach(id) {
            Attach::Follower(rx) => {
                self.inner.metrics.dedup_join();
                rx
            }
            Attach::Leader(rx) => {
                // The previous fetch of this id may have completed between
                // the caller's store check and attach.
                if self.inner.store.contains(&id) {
                    self.inner.inflight.complete(&id, Ok(()));
                } else {
                    let sent = self
                        .inner
                        .batch_tx
                        .lock()
                        .as_ref()
                        .map(|tx| tx.send(id).is_ok())
                        .unwrap_or(false);
                    if !sent {
                        self.inner
                            .inflight
                            .complete(&id, Err(FetchError::ShuttingDown));
                    }
                }
                rx
            }
        };
        self.wait_cancellable(rx).await
    }

    async fn wait_cancellable(
        &self,
        rx: tokio::sync::broadcast::Receiver<FetchResult<()>>,
    ) -> FetchResult<()> {
        tokio::select! {
            result = wait(rx) => result,
            _ = self.inner.cancel.cancelled() => Err(FetchError::Cancelled),
        }
    }

    async fn load(&self, id: ObjectId) -> FetchResult<Bytes> {
        let store = Arc::clone(&self.inner.store);
        self.inner
            .content
            .try_get_with(id, async move {
                let read = tokio::task::spawn_blocking(move || store.read_object(&id))
                    .await
                    .map_err(|e| FetchError::Store(format!("read task failed: {}", e)))?;
                match read {
                    Ok(object) => Ok(Bytes::from(object.data)),
                    Err(StoreError::ObjectNotFound(missing)) => Err(FetchError::Missing(missing)),
                    Err(e) => Err(FetchError::Store(e.to_string())),
                }
            })
            .await
            .map_err(|e: Arc<FetchError>| (*e).clone())
    }
}

fn spawn_request(inner: &Arc<PipelineInner>, request: DownloadRequest) {
    let handle = tokio::spawn(run_request(Arc::clone(inner), request));
    let mut tasks = inner.tasks.lock();
    tasks.retain(|t| !t.is_finished());
    tasks.push(handle);
}

async fn run_request(inner: Arc<PipelineInner>, request: DownloadRequest) {
    let result = transfer_and_index(&inner, &request).await;
    if let Err(e) = &result {
        warn!(
            request_id = request.request_id,
            batch_len = request.len(),
            error = %e,
            "Batch failed"
        );
    }
    for id in &request.object_ids {
        inner.inflight.complete(id, result.clone());
    }
}

async fn transfer_and_index(inner: &PipelineInner, request: &DownloadRequest) -> FetchResult<()> {
    let temp = {
        let _permit = inner
            .download_permits
            .acquire()
            .await
            .map_err(|_| FetchError::ShuttingDown)?;
        download::download_with_retry(inner, request).await?
    };

    let index_request = IndexPackRequest {
        temp_pack_file: temp,
        download_request: request.clone(),
    };
    tokio::select! {
        result = indexer::index_and_adopt(inner, index_request.clone()) => result.map(|_| ()),
        _ = inner.cancel.cancelled() => {
            inner.store.discard(&index_request.temp_pack_file);
            Err(FetchError::Cancelled)
        }
    }
}
