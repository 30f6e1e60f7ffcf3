//! Batch atomicity and retry behaviour of the fetch pipeline.
//!
//! Run with: `cargo test --test pipeline_integration`

use std::sync::Arc;
use std::time::Duration;

use hydrafs::config::FetchConfig;
use hydrafs::object::ObjectId;
use hydrafs::pipeline::{FetchError, ObjectFetchPipeline};
use hydrafs::policy::RetryPolicy;
use hydrafs::remote::{MemoryRemoteStore, RemoteFault};
use hydrafs::store::{BlobSizeCache, LocalObjectStore};
use hydrafs::telemetry::HydraMetrics;
use tempfile::TempDir;

fn start(dir: &TempDir, remote: Arc<MemoryRemoteStore>, retry: RetryPolicy) -> ObjectFetchPipeline {
    let store = Arc::new(LocalObjectStore::open(&dir.path().join("objects")).unwrap());
    let sizes = Arc::new(BlobSizeCache::open(&dir.path().join("tables"), false).unwrap());
    ObjectFetchPipeline::start(
        remote,
        store,
        sizes,
        FetchConfig::default()
            .with_batch_window(Duration::from_millis(20))
            .with_retry(retry),
        Arc::new(HydraMetrics::new()),
    )
}

fn three_blobs(remote: &MemoryRemoteStore) -> Vec<ObjectId> {
    vec![
        remote.insert_blob(b"sha1 body"),
        remote.insert_blob(b"sha2 body"),
        remote.insert_blob(b"sha3 body"),
    ]
}

#[tokio::test]
async fn test_interrupted_batch_fails_every_object() {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(MemoryRemoteStore::new());
    let ids = three_blobs(&remote);
    remote.inject_fault(RemoteFault::DisconnectAfter { bytes: 2 });
    let pipeline = start(&dir, remote.clone(), RetryPolicy::None);

    let results =
        futures::future::join_all(ids.iter().map(|id| pipeline.fetch_object(*id))).await;

    assert_eq!(remote.download_count(), 1);
    let errors: Vec<FetchError> = results.into_iter().map(|r| r.unwrap_err()).collect();
    assert!(matches!(errors[0], FetchError::Transfer { attempts: 1, .. }));
    assert!(errors.iter().all(|e| *e == errors[0]));

    assert_eq!(pipeline.store().pack_count(), 0);
    assert_eq!(pipeline.store().object_count(), 0);
    let leftovers = std::fs::read_dir(pipeline.store().tmp_dir()).unwrap().count();
    assert_eq!(leftovers, 0);
    assert_eq!(pipeline.in_flight_count(), 0);
}

#[tokio::test]
async fn test_interrupted_batch_is_retried_whole() {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(MemoryRemoteStore::new());
    let ids = three_blobs(&remote);
    remote.inject_fault(RemoteFault::DisconnectAfter { bytes: 2 });
    let pipeline = start(
        &dir,
        remote.clone(),
        RetryPolicy::fixed(3, Duration::from_millis(1)),
    );

    let summary = pipeline.prefetch(&ids).await;
    assert!(summary.is_complete());
    assert_eq!(summary.fetched, 3);
    assert_eq!(remote.download_count(), 2);
    assert_eq!(pipeline.store().pack_count(), 1);
    assert_eq!(pipeline.metrics().snapshot().batch_retries, 1);
}

#[tokio::test]
async fn test_adopted_packs_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(MemoryRemoteStore::new());
    let ids = three_blobs(&remote);
    {
        let pipeline = start(&dir, remote.clone(), RetryPolicy::None);
        assert!(pipeline.prefetch(&ids).await.is_complete());
        pipeline.shutdown().await;
    }

    let pipeline = start(&dir, remote.clone(), RetryPolicy::None);
    for id in &ids {
        assert!(pipeline.store().contains(id));
    }
    assert_eq!(&pipeline.fetch_object(ids[1]).await.unwrap()[..], b"sha2 body");
    assert_eq!(remote.download_count(), 1);
    assert_eq!(pipeline.sizes().get(&ids[0]), Some(9));
}
