//! GVFS-protocol object store over HTTP.
//!
//! ```text
//! POST {base}/gvfs/objects   {"commitDepth":1,"objectIds":[...]}  -> pack stream
//! POST {base}/gvfs/sizes     ["<id>", ...]                         -> [{"Id","Size"}]
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{BoxFuture, RemoteObjectStore, TransferError};
use crate::object::ObjectId;

/// Default timeout for HTTP requests in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

const PACK_MEDIA_TYPE: &str = "application/x-git-packfile";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ObjectsRequest {
    commit_depth: u32,
    object_ids: Vec<String>,
}

#[derive(Deserialize)]
struct SizeResponse {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Size")]
    size: u64,
}

/// reqwest-backed [`RemoteObjectStore`].
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpObjectStore {
    /// Creates a store for `base_url` with the default request timeout.
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransferError> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Creates a store with a custom request timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransferError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransferError::permanent(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/gvfs/{}", self.base_url, endpoint)
    }

    async fn post_pack(
        &self,
        ids: &[ObjectId],
        commit_depth: u32,
        dest: &Path,
    ) -> Result<u64, TransferError> {
        let body = serde_json::to_vec(&ObjectsRequest {
            commit_depth,
            object_ids: ids.iter().map(ObjectId::to_hex).collect(),
        })
        .map_err(|e| TransferError::permanent(e.to_string()))?;

        let mut response = self
            .client
            .post(self.url("objects"))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::ACCEPT, PACK_MEDIA_TYPE)
            .body(body)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::from_status(
                status.as_u16(),
                format!("objects request failed with status {}", status),
            ));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(classify)? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        debug!(bytes = written, objects = ids.len(), "Pack transfer complete");
        Ok(written)
    }
}

fn classify(e: reqwest::Error) -> TransferError {
    match e.status() {
        Some(status) => TransferError::from_status(status.as_u16(), e.to_string()),
        // Connect failures, timeouts and dropped bodies are all worth retrying.
        None => TransferError::transient(e.to_string()),
    }
}

impl RemoteObjectStore for HttpObjectStore {
    fn download_objects<'a>(
        &'a self,
        ids: &'a [ObjectId],
        dest: &'a Path,
    ) -> BoxFuture<'a, Result<u64, TransferError>> {
        Box::pin(self.post_pack(ids, 1, dest))
    }

    fn download_commit<'a>(
        &'a self,
        id: ObjectId,
        dest: &'a Path,
    ) -> BoxFuture<'a, Result<u64, TransferError>> {
        Box::pin(async move { self.post_pack(&[id], 1, dest).await })
    }

    fn query_sizes<'a>(
        &'a self,
        ids: &'a [ObjectId],
    ) -> BoxFuture<'a, Result<Vec<(ObjectId, u64)>, TransferError>> {
        Box::pin(async move {
            let hex: Vec<String> = ids.iter().map(ObjectId::to_hex).collect();
            let body = serde_json::to_vec(&hex).map_err(|e| TransferError::permanent(e.to_string()))?;
            let response = self
                .client
                .post(self.url("sizes"))
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await
                .map_err(classify)?;

            let status = response.status();
            if !status.is_success() {
                return Err(TransferError::from_status(
                    status.as_u16(),
                    format!("sizes request failed with status {}", status),
                ));
            }

            let bytes = response.bytes().await.map_err(classify)?;
            let sizes: Vec<SizeResponse> = serde_json::from_slice(&bytes)
                .map_err(|e| TransferError::permanent(format!("bad sizes response: {}", e)))?;
            sizes
                .into_iter()
                .map(|s| {
                    ObjectId::from_hex(&s.id)
                        .map(|id| (id, s.size))
                        .map_err(|e| TransferError::permanent(e.to_string()))
                })
                .collect()
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let store = HttpObjectStore::new("https://example.invalid/repo/").unwrap();
        assert_eq!(store.url("objects"), "https://example.invalid/repo/gvfs/objects");
    }

    #[test]
    fn test_objects_request_shape() {
        let id = ObjectId::hash_object(crate::object::ObjectKind::Blob, b"x");
        let json = serde_json::to_string(&ObjectsRequest {
            commit_depth: 1,
            object_ids: vec![id.to_hex()],
        })
        .unwrap();
        assert_eq!(
            json,
            format!("{{\"commitDepth\":1,\"objectIds\":[\"{}\"]}}", id.to_hex())
        );
    }

    #[test]
    fn test_size_response_parsing() {
        let parsed: Vec<SizeResponse> =
            serde_json::from_str(r#"[{"Id":"e69de29bb2d1d6434b8b29ae775ad8c2e48c5391","Size":0}]"#)
                .unwrap();
        assert_eq!(parsed[0].size, 0);
    }
}
