//! Runtime telemetry.
//!
//! Lock-free atomic counters updated from the driver callbacks, the fetch
//! pipeline, and the queue worker, read as a point-in-time snapshot.
//!
//! # Architecture
//!
//! ```text
//! Virtualizer ─┐
//! Pipeline ────┼──► HydraMetrics ─────► MetricsSnapshot ─────► logs / callers
//! Queue worker ┘    (atomic counters)   (point-in-time copy)
//! ```
//!
//! # Example
//!
//! ```
//! use hydrafs::telemetry::HydraMetrics;
//!
//! let metrics = HydraMetrics::new();
//! metrics.download_started(3);
//! metrics.download_completed(4096);
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.batches_downloaded, 1);
//! assert_eq!(snapshot.bytes_downloaded, 4096);
//! ```

mod metrics;
mod snapshot;

pub use metrics::HydraMetrics;
pub use snapshot::MetricsSnapshot;
