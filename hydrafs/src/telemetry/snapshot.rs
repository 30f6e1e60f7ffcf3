//! Point-in-time metrics.

use std::fmt;
use std::time::Duration;

/// Copy of every [`super::HydraMetrics`] counter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub uptime: Duration,
    pub batches_started: u64,
    pub batches_downloaded: u64,
    pub batches_failed: u64,
    pub batch_retries: u64,
    pub objects_requested: u64,
    pub dedup_joins: u64,
    pub bytes_downloaded: u64,
    pub packs_adopted: u64,
    pub content_cache_hits: u64,
    pub content_cache_misses: u64,
    pub reads_served: u64,
    pub reads_pending: u64,
    pub reads_failed: u64,
    pub placeholders_written: u64,
    pub dirty_conflicts: u64,
    pub notifications: u64,
    pub tasks_enqueued: u64,
    pub tasks_applied: u64,
    pub task_batch_retries: u64,
    pub consistency_errors: u64,
}

impl MetricsSnapshot {
    /// Fraction of content reads served from memory, 0.0 when idle.
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.content_cache_hits + self.content_cache_misses;
        if total == 0 {
            0.0
        } else {
            self.content_cache_hits as f64 / total as f64
        }
    }

    /// Download throughput over the instance lifetime.
    pub fn bytes_per_second(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.bytes_downloaded as f64 / secs
        }
    }

    /// Tasks accepted but not yet applied.
    pub fn tasks_outstanding(&self) -> u64 {
        self.tasks_enqueued.saturating_sub(self.tasks_applied)
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batches {}/{} ok ({} failed, {} retries), {} bytes, {} dedup joins, \
             cache hit {:.0}%, reads {} ({} pending, {} failed), tasks {}/{} applied, \
             {} consistency errors",
            self.batches_downloaded,
            self.batches_started,
            self.batches_failed,
            self.batch_retries,
            self.bytes_downloaded,
            self.dedup_joins,
            self.cache_hit_rate() * 100.0,
            self.reads_served,
            self.reads_pending,
            self.reads_failed,
            self.tasks_applied,
            self.tasks_enqueued,
            self.consistency_errors
        )
    }
}
