//! Indexing stage: verify a temp pack, then adopt or discard it.

use std::sync::Arc;

use tracing::{debug, warn};

use super::error::{FetchError, FetchResult};
use super::request::{DownloadKind, IndexPackRequest};
use super::PipelineInner;
use crate::object::ObjectKind;
use crate::pack::PackIndex;

/// Indexes the pack, checks that every required object is present, and
/// moves it into the permanent store. The temp file is gone on return,
/// whatever the outcome.
pub async fn index_and_adopt(
    inner: &PipelineInner,
    request: IndexPackRequest,
) -> FetchResult<PackIndex> {
    let _permit = inner
        .index_permits
        .acquire()
        .await
        .map_err(|_| FetchError::ShuttingDown)?;

    let store = Arc::clone(&inner.store);
    let sizes = Arc::clone(&inner.sizes);
    let temp = request.temp_pack_file.clone();
    // Commit downloads may bundle extra objects; only the commit is required.
    let required = match request.download_request.kind {
        DownloadKind::Objects => request.download_request.object_ids.clone(),
        DownloadKind::Commit => request.download_request.object_ids[..1].to_vec(),
    };

    let joined = tokio::task::spawn_blocking(move || -> FetchResult<PackIndex> {
        let index = match store.index_temp_pack(&temp) {
            Ok(index) => index,
            Err(e) => {
                store.discard(&temp);
                return Err(FetchError::Index(e.to_string()));
            }
        };

        if let Some(missing) = required
            .iter()
            .find(|id| !index.contains(id) && !store.contains(id))
        {
            store.discard(&temp);
            return Err(FetchError::Missing(*missing));
        }

        if let Err(e) = store.adopt(&temp, &index) {
            store.discard(&temp);
            return Err(FetchError::Store(e.to_string()));
        }

        let blob_sizes = index
            .entries()
            .iter()
            .filter(|e| e.kind == ObjectKind::Blob)
            .map(|e| (e.id, e.size));
        if let Err(e) = sizes.record_all(blob_sizes) {
            warn!(error = %e, "Failed to record blob sizes");
        }
        Ok(index)
    })
    .await;

    let index = match joined {
        Ok(result) => result?,
        Err(e) => {
            inner.store.discard(&request.temp_pack_file);
            return Err(FetchError::Index(format!("indexing task failed: {}", e)));
        }
    };

    inner.metrics.pack_adopted();
    debug!(
        request_id = request.download_request.request_id,
        objects = index.len(),
        "Pack indexed and adopted"
    );
    Ok(index)
}
