//! Download stage: one batch into one temp pack, with retry.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::error::{FetchError, FetchResult};
use super::request::{DownloadKind, DownloadRequest};
use super::PipelineInner;
use crate::remote::TransferError;

async fn transfer(
    inner: &PipelineInner,
    request: &DownloadRequest,
    dest: &Path,
) -> Result<u64, TransferError> {
    let call = async {
        match request.kind {
            DownloadKind::Objects => inner.remote.download_objects(&request.object_ids, dest).await,
            DownloadKind::Commit => inner.remote.download_commit(request.object_ids[0], dest).await,
        }
    };
    match tokio::time::timeout(inner.config.request_timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(TransferError::transient(format!(
            "request timed out after {:?}",
            inner.config.request_timeout
        ))),
    }
}

/// Transfers `request` into a temp pack and returns its path.
///
/// Transient failures are retried per the configured policy. Every failed
/// attempt's temp file is removed, so on error nothing is left behind.
pub async fn download_with_retry(
    inner: &PipelineInner,
    request: &DownloadRequest,
) -> FetchResult<PathBuf> {
    inner.metrics.download_started(request.len());
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let temp = inner
            .store
            .temp_pack_path(&format!("req{}", request.request_id));

        let result = tokio::select! {
            _ = inner.cancel.cancelled() => {
                inner.store.discard(&temp);
                return Err(FetchError::Cancelled);
            }
            r = transfer(inner, request, &temp) => r,
        };

        let error = match result {
            Ok(bytes) => {
                debug!(
                    request_id = request.request_id,
                    batch_len = request.len(),
                    bytes,
                    attempt,
                    "Batch downloaded"
                );
                inner.metrics.download_completed(bytes);
                return Ok(temp);
            }
            Err(e) => e,
        };

        inner.store.discard(&temp);

        let delay = if error.transient {
            inner.config.retry.delay_for_attempt(attempt)
        } else {
            None
        };
        let Some(delay) = delay else {
            warn!(
                request_id = request.request_id,
                batch_len = request.len(),
                attempt,
                error = %error,
                "Batch download failed"
            );
            inner.metrics.download_failed();
            return Err(FetchError::Transfer {
                attempts: attempt,
                message: error.message,
            });
        };

        warn!(
            request_id = request.request_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying batch download"
        );
        inner.metrics.download_retried();

        tokio::select! {
            _ = inner.cancel.cancelled() => return Err(FetchError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
