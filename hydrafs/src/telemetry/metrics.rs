//! Atomic counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use super::snapshot::MetricsSnapshot;

/// Counters shared by every component of a virtualization instance.
#[derive(Debug)]
pub struct HydraMetrics {
    started_at: Instant,

    // Fetch pipeline
    batches_started: AtomicU64,
    batches_downloaded: AtomicU64,
    batches_failed: AtomicU64,
    batch_retries: AtomicU64,
    objects_requested: AtomicU64,
    dedup_joins: AtomicU64,
    bytes_downloaded: AtomicU64,
    packs_adopted: AtomicU64,
    content_cache_hits: AtomicU64,
    content_cache_misses: AtomicU64,

    // Virtualizer
    reads_served: AtomicU64,
    reads_pending: AtomicU64,
    reads_failed: AtomicU64,
    placeholders_written: AtomicU64,
    dirty_conflicts: AtomicU64,
    notifications: AtomicU64,

    // Queue
    tasks_enqueued: AtomicU64,
    tasks_applied: AtomicU64,
    task_batch_retries: AtomicU64,
    consistency_errors: AtomicU64,
}

impl Default for HydraMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl HydraMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            batches_started: AtomicU64::new(0),
            batches_downloaded: AtomicU64::new(0),
            batches_failed: AtomicU64::new(0),
            batch_retries: AtomicU64::new(0),
            objects_requested: AtomicU64::new(0),
            dedup_joins: AtomicU64::new(0),
            bytes_downloaded: AtomicU64::new(0),
            packs_adopted: AtomicU64::new(0),
            content_cache_hits: AtomicU64::new(0),
            content_cache_misses: AtomicU64::new(0),
            reads_served: AtomicU64::new(0),
            reads_pending: AtomicU64::new(0),
            reads_failed: AtomicU64::new(0),
            placeholders_written: AtomicU64::new(0),
            dirty_conflicts: AtomicU64::new(0),
            notifications: AtomicU64::new(0),
            tasks_enqueued: AtomicU64::new(0),
            tasks_applied: AtomicU64::new(0),
            task_batch_retries: AtomicU64::new(0),
            consistency_errors: AtomicU64::new(0),
        }
    }

    // =========================================================================
    // Fetch pipeline
    // =========================================================================

    /// A batch of `objects` ids entered the download stage.
    pub fn download_started(&self, objects: usize) {
        self.batches_started.fetch_add(1, Ordering::Relaxed);
        self.objects_requested
            .fetch_add(objects as u64, Ordering::Relaxed);
    }

    pub fn download_completed(&self, bytes: u64) {
        self.batches_downloaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn download_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn download_retried(&self) {
        self.batch_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// A request attached to an in-flight fetch instead of starting one.
    pub fn dedup_join(&self) {
        self.dedup_joins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pack_adopted(&self) {
        self.packs_adopted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn content_cache_hit(&self) {
        self.content_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn content_cache_miss(&self) {
        self.content_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    // =========================================================================
    // Virtualizer
    // =========================================================================

    pub fn read_served(&self) {
        self.reads_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read_pending(&self) {
        self.reads_pending.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read_failed(&self) {
        self.reads_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn placeholder_written(&self) {
        self.placeholders_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dirty_conflict(&self) {
        self.dirty_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notification(&self) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }

    // =========================================================================
    // Queue
    // =========================================================================

    pub fn task_enqueued(&self) {
        self.tasks_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tasks_applied(&self, count: usize) {
        self.tasks_applied.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn task_batch_retried(&self) {
        self.task_batch_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn consistency_error(&self) {
        self.consistency_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime: self.started_at.elapsed(),
            batches_started: self.batches_started.load(Ordering::Relaxed),
            batches_downloaded: self.batches_downloaded.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            batch_retries: self.batch_retries.load(Ordering::Relaxed),
            objects_requested: self.objects_requested.load(Ordering::Relaxed),
            dedup_joins: self.dedup_joins.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            packs_adopted: self.packs_adopted.load(Ordering::Relaxed),
            content_cache_hits: self.content_cache_hits.load(Ordering::Relaxed),
            content_cache_misses: self.content_cache_misses.load(Ordering::Relaxed),
            reads_served: self.reads_served.load(Ordering::Relaxed),
            reads_pending: self.reads_pending.load(Ordering::Relaxed),
            reads_failed: self.reads_failed.load(Ordering::Relaxed),
            placeholders_written: self.placeholders_written.load(Ordering::Relaxed),
            dirty_conflicts: self.dirty_conflicts.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
            tasks_enqueued: self.tasks_enqueued.load(Ordering::Relaxed),
            tasks_applied: self.tasks_applied.load(Ordering::Relaxed),
            task_batch_retries: self.task_batch_retries.load(Ordering::Relaxed),
            consistency_errors: self.consistency_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = HydraMetrics::new();
        metrics.download_started(5);
        metrics.download_started(2);
        metrics.download_retried();
        metrics.dedup_join();
        metrics.tasks_applied(3);
        metrics.tasks_applied(4);

        let snap = metrics.snapshot();
        assert_eq!(snap.batches_started, 2);
        assert_eq!(snap.objects_requested, 7);
        assert_eq!(snap.batch_retries, 1);
        assert_eq!(snap.dedup_joins, 1);
        assert_eq!(snap.tasks_applied, 7);
    }
}
