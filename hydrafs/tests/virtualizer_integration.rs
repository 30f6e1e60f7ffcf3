//! End-to-end tests of the virtualizer over the in-memory driver and remote.
//!
//! Run with: `cargo test --test virtualizer_integration`

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use hydrafs::config::{FetchConfig, HydraConfig, QueueConfig, VirtualizerConfig};
use hydrafs::driver::{FileTimestamps, MemoryDriver, UpdateFailureReason, UpdateFlags};
use hydrafs::object::ObjectId;
use hydrafs::pipeline::FetchError;
use hydrafs::policy::RetryPolicy;
use hydrafs::projection::Projection;
use hydrafs::remote::MemoryRemoteStore;
use hydrafs::virtualizer::{
    FileContent, FileSystemVirtualizer, NotifyEvent, ReadCompletion, VirtualizerError,
};
use tempfile::TempDir;

const PROVIDER: &str = "hydrafs";

// ============================================================================
// Helper Functions
// ============================================================================

// Field order matters: the virtualizer stops before the state directory goes.
struct Harness {
    virtualizer: FileSystemVirtualizer,
    remote: Arc<MemoryRemoteStore>,
    driver: Arc<MemoryDriver>,
    _dir: TempDir,
}

fn config(dir: &TempDir) -> HydraConfig {
    HydraConfig::new("test", dir.path())
        .with_fetch(
            FetchConfig::default()
                .with_batch_window(Duration::from_millis(2))
                .with_retry(RetryPolicy::fixed(2, Duration::from_millis(1))),
        )
        .with_queue(
            QueueConfig::default()
                .with_sync_on_enqueue(false)
                .with_retry(RetryPolicy::fixed(2, Duration::from_millis(1))),
        )
        .with_virtualizer(
            VirtualizerConfig::default()
                .with_provider_id(PROVIDER)
                .with_stop_timeout(Duration::from_millis(50)),
        )
}

fn harness(remote: MemoryRemoteStore, projection: Projection) -> Harness {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(remote);
    let driver = Arc::new(MemoryDriver::new());
    let virtualizer =
        FileSystemVirtualizer::open(&config(&dir), remote.clone(), driver.clone(), projection)
            .unwrap();
    virtualizer.start().unwrap();
    Harness {
        virtualizer,
        remote,
        driver,
        _dir: dir,
    }
}

fn read_all(h: &Harness, path: &str, len: u64) -> Vec<u8> {
    match h
        .virtualizer
        .get_file_content(path, PROVIDER, 0..len, None)
        .unwrap()
    {
        FileContent::Data(bytes) => bytes.to_vec(),
        FileContent::Pending => panic!("blocking read returned Pending"),
    }
}

fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// ============================================================================
// Reads
// ============================================================================

#[test]
fn test_read_round_trip_then_cache_hit() {
    let remote = MemoryRemoteStore::new();
    let content = body(100);
    let id = remote.insert_blob(&content);
    let h = harness(remote, Projection::from_files([("src/data.bin", id, Some(100))]).unwrap());

    h.virtualizer.write_placeholder_file("src/data.bin", 100, id).unwrap();

    assert_eq!(read_all(&h, "src/data.bin", 100), content);
    assert_eq!(read_all(&h, "src/data.bin", 100), content);
    assert_eq!(h.remote.download_count(), 1);
    assert!(h.virtualizer.metrics().content_cache_hits >= 1);
}

#[test]
fn test_partial_range_read() {
    let remote = MemoryRemoteStore::new();
    let id = remote.insert_blob(b"hello, virtual world");
    let h = harness(remote, Projection::from_files([("greeting.txt", id, None)]).unwrap());

    let content = h
        .virtualizer
        .get_file_content("greeting.txt", PROVIDER, 7..14, None)
        .unwrap();
    assert_eq!(content, FileContent::Data(bytes::Bytes::from_static(b"virtual")));
}

#[test]
fn test_concurrent_reads_trigger_one_download() {
    let remote = MemoryRemoteStore::new().with_latency(Duration::from_millis(100));
    let content = body(4096);
    let id = remote.insert_blob(&content);
    let h = harness(remote, Projection::from_files([("big.bin", id, Some(4096))]).unwrap());

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| read_all(&h, "big.bin", 4096)))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), content);
        }
    });

    assert_eq!(h.remote.download_count(), 1);
}

#[test]
fn test_pending_read_completes_through_callback() {
    let remote = MemoryRemoteStore::new().with_latency(Duration::from_millis(20));
    let id = remote.insert_blob(b"async body");
    let h = harness(remote, Projection::from_files([("a.txt", id, None)]).unwrap());

    let (tx, rx) = mpsc::channel();
    let content = h
        .virtualizer
        .get_file_content(
            "a.txt",
            PROVIDER,
            0..10,
            Some(ReadCompletion::new(move |result| {
                tx.send(result.map(|b| b.to_vec()).map_err(|e| e.to_string()))
                    .unwrap();
            })),
        )
        .unwrap();

    assert_eq!(content, FileContent::Pending);
    let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(result.unwrap(), b"async body");
}

#[test]
fn test_unavailable_object_is_a_read_failure() {
    let remote = MemoryRemoteStore::new();
    let missing = ObjectId::hash_object(hydrafs::object::ObjectKind::Blob, b"gone");
    let h = harness(remote, Projection::from_files([("gone.txt", missing, Some(4))]).unwrap());

    let err = h
        .virtualizer
        .get_file_content("gone.txt", PROVIDER, 0..4, None)
        .unwrap_err();
    assert!(matches!(err, VirtualizerError::Fetch(FetchError::Missing(id)) if id == missing));
    assert_eq!(h.virtualizer.metrics().reads_failed, 1);
    assert!(!h.virtualizer.placeholders().contains("gone.txt"));
}

#[test]
fn test_wrong_provider_is_rejected() {
    let remote = MemoryRemoteStore::new();
    let id = remote.insert_blob(b"x");
    let h = harness(remote, Projection::from_files([("x", id, None)]).unwrap());

    assert!(matches!(
        h.virtualizer.get_file_content("x", "someone-else", 0..1, None),
        Err(VirtualizerError::ProviderMismatch { .. })
    ));
}

#[test]
fn test_stop_cancels_slow_pending_reads() {
    let remote = MemoryRemoteStore::new().with_latency(Duration::from_secs(5));
    let id = remote.insert_blob(b"slow");
    let h = harness(remote, Projection::from_files([("slow.txt", id, None)]).unwrap());

    let (tx, rx) = mpsc::channel();
    h.virtualizer
        .get_file_content(
            "slow.txt",
            PROVIDER,
            0..4,
            Some(ReadCompletion::new(move |result| {
                let _ = tx.send(result.is_err());
            })),
        )
        .unwrap();

    h.virtualizer.stop().unwrap();
    assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());
}

// ============================================================================
// Placeholders
// ============================================================================

#[test]
fn test_placeholder_info_queries_remote_size_once() {
    let remote = MemoryRemoteStore::new();
    let id = remote.insert_blob(&body(321));
    let h = harness(remote, Projection::from_files([("lib/mod.rs", id, None)]).unwrap());

    let info = h.virtualizer.get_placeholder_info("lib/mod.rs").unwrap();
    assert_eq!(info.size, 321);
    assert_eq!(info.content_id, id.as_bytes().to_vec());
    assert!(h.driver.contains("lib/mod.rs"));

    h.virtualizer.get_placeholder_info("lib/mod.rs").unwrap();
    assert_eq!(h.remote.size_query_count(), 1);
    assert_eq!(h.remote.download_count(), 0);
}

#[test]
fn test_dirty_file_is_never_overwritten() {
    let remote = MemoryRemoteStore::new();
    let v1 = remote.insert_blob(b"version one");
    let v2 = remote.insert_blob(b"version two!");
    let h = harness(remote, Projection::from_files([("notes.txt", v1, Some(11))]).unwrap());

    h.virtualizer.write_placeholder_file("notes.txt", 11, v1).unwrap();
    h.driver.simulate_user_write("notes.txt", b"my local edits");

    let outcome = h
        .virtualizer
        .update_placeholder_if_needed("notes.txt", FileTimestamps::default(), 12, v2, UpdateFlags::NONE)
        .unwrap();
    assert_eq!(outcome.failure_reason, UpdateFailureReason::DirtyFile);
    assert!(!outcome.changed);
    assert_eq!(h.driver.read_disk("notes.txt").unwrap(), b"my local edits");
    assert!(h.virtualizer.placeholders().get("notes.txt").unwrap().is_dirty());

    // Once the index knows, the driver is not even asked.
    let outcome = h
        .virtualizer
        .delete_file("notes.txt", UpdateFlags::NONE)
        .unwrap();
    assert_eq!(outcome.failure_reason, UpdateFailureReason::DirtyFile);
    assert_eq!(h.driver.read_disk("notes.txt").unwrap(), b"my local edits");
}

#[test]
fn test_update_moves_clean_placeholder_to_new_version() {
    let remote = MemoryRemoteStore::new();
    let v1 = remote.insert_blob(b"one");
    let v2 = remote.insert_blob(b"two!");
    let h = harness(remote, Projection::from_files([("f", v1, Some(3))]).unwrap());

    h.virtualizer.write_placeholder_file("f", 3, v1).unwrap();
    let unchanged = h
        .virtualizer
        .update_placeholder_if_needed("f", FileTimestamps::default(), 3, v1, UpdateFlags::NONE)
        .unwrap();
    assert!(!unchanged.changed);
    assert_eq!(unchanged.failure_reason, UpdateFailureReason::NoFailure);

    let updated = h
        .virtualizer
        .update_placeholder_if_needed("f", FileTimestamps::default(), 4, v2, UpdateFlags::NONE)
        .unwrap();
    assert!(updated.changed);
    assert_eq!(h.virtualizer.placeholders().get("f").unwrap().object_id, v2);
    assert_eq!(read_all(&h, "f", 4), b"two!");
}

#[test]
fn test_update_leaves_directories_alone() {
    let remote = MemoryRemoteStore::new();
    let id = remote.insert_blob(b"not a directory");
    let h = harness(remote, Projection::new());

    h.virtualizer.write_placeholder_directory("docs").unwrap();
    let outcome = h
        .virtualizer
        .update_placeholder_if_needed("docs", FileTimestamps::default(), 15, id, UpdateFlags::NONE)
        .unwrap();

    assert!(!outcome.changed);
    assert_eq!(outcome.failure_reason, UpdateFailureReason::NoFailure);
    assert!(h.virtualizer.placeholders().get("docs").unwrap().is_directory());
    assert!(h.driver.placeholder_info("docs").unwrap().is_directory);
}

#[test]
fn test_delete_is_idempotent() {
    let remote = MemoryRemoteStore::new();
    let id = remote.insert_blob(b"bye");
    let h = harness(remote, Projection::from_files([("tmp/bye.txt", id, Some(3))]).unwrap());

    h.virtualizer.write_placeholder_file("tmp/bye.txt", 3, id).unwrap();
    let first = h.virtualizer.delete_file("tmp/bye.txt", UpdateFlags::NONE).unwrap();
    assert!(first.is_success());
    assert!(first.changed);

    let second = h.virtualizer.delete_file("tmp/bye.txt", UpdateFlags::NONE).unwrap();
    assert!(second.is_success());
    assert_eq!(second.failure_reason, UpdateFailureReason::FileNotFound);

    let never = h.virtualizer.delete_file("never/existed", UpdateFlags::NONE).unwrap();
    assert!(never.is_success());
}

#[test]
fn test_clear_negative_path_cache() {
    let h = harness(MemoryRemoteStore::new(), Projection::new());
    h.driver.record_negative_lookup("missing.txt");
    assert_eq!(h.virtualizer.clear_negative_path_cache().unwrap(), 1);
}

// ============================================================================
// Enumeration and notifications
// ============================================================================

#[test]
fn test_enumeration_merges_projection_and_local_changes() {
    let remote = MemoryRemoteStore::new();
    let a = remote.insert_blob(b"a");
    let b = remote.insert_blob(b"b");
    let h = harness(
        remote,
        Projection::from_files([("src/a.rs", a, Some(1)), ("src/b.rs", b, Some(1))]).unwrap(),
    );

    h.virtualizer
        .on_notify(NotifyEvent::Deleted {
            path: "src/a.rs".into(),
            is_directory: false,
        })
        .unwrap();
    h.virtualizer
        .on_notify(NotifyEvent::Created {
            path: "src/new.rs".into(),
            is_directory: false,
        })
        .unwrap();
    assert!(h.virtualizer.wait_for_tasks(Duration::from_secs(5)));

    let names: Vec<String> = h
        .virtualizer
        .enumerate_directory("src")
        .unwrap()
        .into_iter()
        .map(|i| i.name)
        .collect();
    assert_eq!(names, vec!["b.rs", "new.rs"]);
    assert_eq!(h.remote.download_count(), 0);
}

#[test]
fn test_enumerating_unknown_path_fails() {
    let h = harness(MemoryRemoteStore::new(), Projection::new());
    assert!(matches!(
        h.virtualizer.enumerate_directory("nope"),
        Err(VirtualizerError::Enumeration(_))
    ));
}

#[test]
fn test_create_rename_delete_leaves_no_entries() {
    let h = harness(MemoryRemoteStore::new(), Projection::new());

    for event in [
        NotifyEvent::Created {
            path: "a".into(),
            is_directory: false,
        },
        NotifyEvent::Renamed {
            old_path: "a".into(),
            new_path: "b".into(),
        },
        NotifyEvent::Deleted {
            path: "b".into(),
            is_directory: false,
        },
    ] {
        h.virtualizer.on_notify(event).unwrap();
    }

    assert!(h.virtualizer.wait_for_tasks(Duration::from_secs(5)));
    assert!(!h.virtualizer.placeholders().contains("a"));
    assert!(!h.virtualizer.placeholders().contains("b"));
    assert_eq!(h.virtualizer.metrics().tasks_applied, 3);
}

#[test]
fn test_queued_notifications_survive_restart() {
    let dir = TempDir::new().unwrap();
    {
        let virtualizer = FileSystemVirtualizer::open(
            &config(&dir),
            Arc::new(MemoryRemoteStore::new()),
            Arc::new(MemoryDriver::new()),
            Projection::new(),
        )
        .unwrap();
        // Never started: tasks are logged but not applied.
        virtualizer
            .on_notify(NotifyEvent::Created {
                path: "kept.txt".into(),
                is_directory: false,
            })
            .unwrap();
        assert_eq!(virtualizer.pending_tasks(), 1);
    }

    let virtualizer = FileSystemVirtualizer::open(
        &config(&dir),
        Arc::new(MemoryRemoteStore::new()),
        Arc::new(MemoryDriver::new()),
        Projection::new(),
    )
    .unwrap();
    virtualizer.start().unwrap();
    assert!(virtualizer.wait_for_tasks(Duration::from_secs(5)));
    assert!(virtualizer.placeholders().get("kept.txt").unwrap().is_dirty());
}

#[test]
fn test_local_deletes_survive_restart() {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(MemoryRemoteStore::new());
    let a = remote.insert_blob(b"a");
    let b = remote.insert_blob(b"b");
    let projection = || {
        Projection::from_files([("src/a.rs", a, Some(1)), ("src/b.rs", b, Some(1))]).unwrap()
    };
    let names = |v: &FileSystemVirtualizer| -> Vec<String> {
        v.enumerate_directory("src")
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect()
    };

    {
        let virtualizer = FileSystemVirtualizer::open(
            &config(&dir),
            remote.clone(),
            Arc::new(MemoryDriver::new()),
            projection(),
        )
        .unwrap();
        virtualizer.start().unwrap();
        virtualizer
            .on_notify(NotifyEvent::Deleted {
                path: "src/a.rs".into(),
                is_directory: false,
            })
            .unwrap();
        assert!(virtualizer.wait_for_tasks(Duration::from_secs(5)));
        assert_eq!(names(&virtualizer), vec!["b.rs"]);
        virtualizer.stop().unwrap();
    }

    let virtualizer = FileSystemVirtualizer::open(
        &config(&dir),
        remote.clone(),
        Arc::new(MemoryDriver::new()),
        projection(),
    )
    .unwrap();
    virtualizer.start().unwrap();

    assert_eq!(virtualizer.pending_tasks(), 0);
    assert_eq!(names(&virtualizer), vec!["b.rs"]);
    assert!(matches!(
        virtualizer.get_placeholder_info("src/a.rs"),
        Err(VirtualizerError::NotProjected(_))
    ));
    assert!(!virtualizer.placeholders().contains("src/a.rs"));
}
