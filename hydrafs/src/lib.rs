//! HydraFS - lazily-hydrated virtual working copy for very large repositories.
//!
//! Files and directories appear to exist in full, but their bodies are fetched
//! from a remote object store only when first read. Local mutations reported by
//! the filesystem driver are reconciled into the repository's placeholder
//! index asynchronously, off the filesystem hot path.
//!
//! # Architecture
//!
//! ```text
//!  driver callbacks
//!        │
//!        ▼
//! ┌──────────────────────┐  sync reads   ┌──────────────────┐
//! │ FileSystemVirtualizer├──────────────►│ PlaceholderIndex │
//! │                      ├──────────────►│ BlobSizeCache    │
//! │                      │               └──────────────────┘
//! │                      │ blocking fetch ┌─────────────────────┐
//! │                      ├───────────────►│ ObjectFetchPipeline │──► RemoteObjectStore
//! │                      │                └─────────┬───────────┘
//! │                      │ enqueue                  ▼
//! │                      ├──────────────►┌──────────────────────┐
//! └──────────▲───────────┘               │ BackgroundTaskQueue  │
//!            └───── worker applies ──────┴──────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use hydrafs::config::HydraConfig;
//! use hydrafs::virtualizer::FileSystemVirtualizer;
//!
//! let config = HydraConfig::load(Path::new("hydrafs.ini"))?;
//! let virtualizer = FileSystemVirtualizer::open(&config, remote, driver, projection)?;
//! virtualizer.start()?;
//!
//! let items = virtualizer.enumerate_directory("src")?;
//! ```

pub mod config;
pub mod driver;
pub mod logging;
pub mod object;
pub mod pack;
pub mod path;
pub mod pipeline;
pub mod policy;
pub mod projection;
pub mod queue;
pub mod remote;
pub mod store;
pub mod telemetry;
pub mod virtualizer;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
