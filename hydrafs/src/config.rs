//! Configuration for a virtualization instance.
//!
//! `HydraConfig` combines every component config. It is built in code with
//! `with_*` methods or loaded from an INI file:
//!
//! ```text
//! [repository]
//! name = monorepo
//! state_dir = /var/lib/hydrafs/monorepo
//! remote_url = https://git.example.com/monorepo
//!
//! [fetch]
//! batch_size = 64
//! batch_window_ms = 5
//! download_parallelism = 4
//! index_parallelism = 2
//! max_attempts = 4
//! content_cache_mb = 256
//! request_timeout_secs = 300
//!
//! [queue]
//! max_batch_size = 256
//! max_attempts = 3
//! retry_delay_ms = 250
//! sync_on_enqueue = true
//! idle_poll_ms = 500
//!
//! [virtualizer]
//! provider_id = 7f3c...
//! stop_timeout_secs = 10
//! runtime_worker_threads = 4
//! sync_index = true
//!
//! [logging]
//! directive = hydrafs=info
//! log_dir = /var/log/hydrafs
//! ```
//!
//! Missing keys keep their defaults.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::policy::RetryPolicy;

// =============================================================================
// Defaults
// =============================================================================

/// Object ids per download batch.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// How long the batcher waits for more ids before sending a partial batch.
pub const DEFAULT_BATCH_WINDOW_MS: u64 = 5;

/// Concurrent batch downloads.
pub const DEFAULT_DOWNLOAD_PARALLELISM: usize = 4;

/// Concurrent pack indexing jobs.
pub const DEFAULT_INDEX_PARALLELISM: usize = 2;

/// Attempts per batch download, including the first.
pub const DEFAULT_FETCH_ATTEMPTS: u32 = 4;

/// Hydrated content kept in memory (256 MiB).
pub const DEFAULT_CONTENT_CACHE_BYTES: u64 = 256 * 1024 * 1024;

/// Remote request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Tasks handed to the handler per pre/post cycle.
pub const DEFAULT_QUEUE_BATCH_SIZE: usize = 256;

/// Attempts per task batch, including the first.
pub const DEFAULT_QUEUE_ATTEMPTS: u32 = 3;

/// Delay between task batch attempts.
pub const DEFAULT_QUEUE_RETRY_DELAY_MS: u64 = 250;

/// Worker wake-up interval when idle.
pub const DEFAULT_IDLE_POLL_MS: u64 = 500;

/// Time `stop()` waits for pending reads.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

/// Worker threads of the virtualizer's runtime.
pub const DEFAULT_RUNTIME_WORKER_THREADS: usize = 4;

/// Default log filter.
pub const DEFAULT_LOG_DIRECTIVE: &str = "hydrafs=info";

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid value {value:?} for [{section}] {key}")]
    Invalid {
        section: String,
        key: String,
        value: String,
    },

    #[error("no state directory configured and no home directory found")]
    NoStateDir,
}

// =============================================================================
// Sections
// =============================================================================

/// Object fetch pipeline settings.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchConfig {
    pub batch_size: usize,
    pub batch_window: Duration,
    pub download_parallelism: usize,
    pub index_parallelism: usize,
    pub retry: RetryPolicy,
    pub content_cache_bytes: u64,
    pub request_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_window: Duration::from_millis(DEFAULT_BATCH_WINDOW_MS),
            download_parallelism: DEFAULT_DOWNLOAD_PARALLELISM,
            index_parallelism: DEFAULT_INDEX_PARALLELISM,
            retry: RetryPolicy::exponential(DEFAULT_FETCH_ATTEMPTS),
            content_cache_bytes: DEFAULT_CONTENT_CACHE_BYTES,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl FetchConfig {
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_batch_window(mut self, window: Duration) -> Self {
        self.batch_window = window;
        self
    }

    pub fn with_download_parallelism(mut self, n: usize) -> Self {
        self.download_parallelism = n.max(1);
        self
    }

    pub fn with_index_parallelism(mut self, n: usize) -> Self {
        self.index_parallelism = n.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_content_cache_bytes(mut self, bytes: u64) -> Self {
        self.content_cache_bytes = bytes;
        self
    }
}

/// Background task queue settings.
#[derive(Clone, Debug, PartialEq)]
pub struct QueueConfig {
    pub max_batch_size: usize,
    pub retry: RetryPolicy,
    /// `fsync` the task log on every enqueue.
    pub sync_on_enqueue: bool,
    pub idle_poll: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_QUEUE_BATCH_SIZE,
            retry: RetryPolicy::fixed(
                DEFAULT_QUEUE_ATTEMPTS,
                Duration::from_millis(DEFAULT_QUEUE_RETRY_DELAY_MS),
            ),
            sync_on_enqueue: true,
            idle_poll: Duration::from_millis(DEFAULT_IDLE_POLL_MS),
        }
    }
}

impl QueueConfig {
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sync_on_enqueue(mut self, sync: bool) -> Self {
        self.sync_on_enqueue = sync;
        self
    }
}

/// Driver-facing settings.
#[derive(Clone, Debug, PartialEq)]
pub struct VirtualizerConfig {
    /// Identifies this provider instance to the driver; reads carrying a
    /// different id are rejected.
    pub provider_id: String,
    pub stop_timeout: Duration,
    pub runtime_worker_threads: usize,
    /// `fsync` every write to the placeholder index and local-change table.
    /// The blob size cache is never synced: sizes of immutable objects can
    /// be asked for again, so losing its tail costs only a size query.
    pub sync_index: bool,
}

impl Default for VirtualizerConfig {
    fn default() -> Self {
        Self {
            provider_id: "hydrafs".to_string(),
            stop_timeout: Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS),
            runtime_worker_threads: DEFAULT_RUNTIME_WORKER_THREADS,
            sync_index: true,
        }
    }
}

impl VirtualizerConfig {
    pub fn with_provider_id(mut self, id: impl Into<String>) -> Self {
        self.provider_id = id.into();
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn with_runtime_worker_threads(mut self, n: usize) -> Self {
        self.runtime_worker_threads = n.max(1);
        self
    }

    pub fn with_sync_index(mut self, sync: bool) -> Self {
        self.sync_index = sync;
        self
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub directive: String,
    /// Directory for the daily rolling log file; stderr only when `None`.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directive: DEFAULT_LOG_DIRECTIVE.to_string(),
            log_dir: None,
        }
    }
}

// =============================================================================
// HydraConfig
// =============================================================================

/// Top-level configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct HydraConfig {
    /// Repository name, used for the default state directory.
    pub name: String,
    /// Root for all persisted state.
    pub state_dir: PathBuf,
    /// Base URL of the remote object store, if any.
    pub remote_url: Option<String>,
    pub fetch: FetchConfig,
    pub queue: QueueConfig,
    pub virtualizer: VirtualizerConfig,
    pub logging: LoggingConfig,
}

impl HydraConfig {
    /// Configuration with defaults and the given state directory.
    pub fn new(name: impl Into<String>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            state_dir: state_dir.into(),
            remote_url: None,
            fetch: FetchConfig::default(),
            queue: QueueConfig::default(),
            virtualizer: VirtualizerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Configuration rooted at `~/.hydrafs/<name>`.
    pub fn for_repository(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        let state_dir = default_state_dir(&name).ok_or(ConfigError::NoStateDir)?;
        Ok(Self::new(name, state_dir))
    }

    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote_url = Some(url.into());
        self
    }

    pub fn with_fetch(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_virtualizer(mut self, virtualizer: VirtualizerConfig) -> Self {
        self.virtualizer = virtualizer;
        self
    }

    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Directory holding the placeholder and blob-size tables.
    pub fn tables_dir(&self) -> PathBuf {
        self.state_dir.join("tables")
    }

    /// Directory holding the task log and checkpoint.
    pub fn queue_dir(&self) -> PathBuf {
        self.state_dir.join("queue")
    }

    /// Root of the local object store.
    pub fn objects_dir(&self) -> PathBuf {
        self.state_dir.join("objects")
    }

    /// Loads an INI file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ini_str(&text)
    }

    /// Parses INI text.
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let reader = IniReader { ini: &ini };

        let name = reader
            .string("repository", "name")
            .unwrap_or_else(|| "default".to_string());
        let state_dir = match reader.string("repository", "state_dir") {
            Some(dir) => PathBuf::from(dir),
            None => default_state_dir(&name).ok_or(ConfigError::NoStateDir)?,
        };
        let mut config = Self::new(name, state_dir);
        config.remote_url = reader.string("repository", "remote_url");

        let fetch = &mut config.fetch;
        if let Some(v) = reader.parse::<usize>("fetch", "batch_size")? {
            fetch.batch_size = v.max(1);
        }
        if let Some(v) = reader.parse::<u64>("fetch", "batch_window_ms")? {
            fetch.batch_window = Duration::from_millis(v);
        }
        if let Some(v) = reader.parse::<usize>("fetch", "download_parallelism")? {
            fetch.download_parallelism = v.max(1);
        }
        if let Some(v) = reader.parse::<usize>("fetch", "index_parallelism")? {
            fetch.index_parallelism = v.max(1);
        }
        if let Some(v) = reader.parse::<u32>("fetch", "max_attempts")? {
            fetch.retry = fetch.retry.clone().with_max_attempts(v);
        }
        if let Some(v) = reader.parse::<u64>("fetch", "content_cache_mb")? {
            fetch.content_cache_bytes = v * 1024 * 1024;
        }
        if let Some(v) = reader.parse::<u64>("fetch", "request_timeout_secs")? {
            fetch.request_timeout = Duration::from_secs(v);
        }

        let queue = &mut config.queue;
        if let Some(v) = reader.parse::<usize>("queue", "max_batch_size")? {
            queue.max_batch_size = v.max(1);
        }
        let attempts = reader.parse::<u32>("queue", "max_attempts")?;
        let delay = reader.parse::<u64>("queue", "retry_delay_ms")?;
        if attempts.is_some() || delay.is_some() {
            queue.retry = RetryPolicy::fixed(
                attempts.unwrap_or(DEFAULT_QUEUE_ATTEMPTS),
                Duration::from_millis(delay.unwrap_or(DEFAULT_QUEUE_RETRY_DELAY_MS)),
            );
        }
        if let Some(v) = reader.boolean("queue", "sync_on_enqueue")? {
            queue.sync_on_enqueue = v;
        }
        if let Some(v) = reader.parse::<u64>("queue", "idle_poll_ms")? {
            queue.idle_poll = Duration::from_millis(v);
        }

        let virtualizer = &mut config.virtualizer;
        if let Some(v) = reader.string("virtualizer", "provider_id") {
            virtualizer.provider_id = v;
        }
        if let Some(v) = reader.parse::<u64>("virtualizer", "stop_timeout_secs")? {
            virtualizer.stop_timeout = Duration::from_secs(v);
        }
        if let Some(v) = reader.parse::<usize>("virtualizer", "runtime_worker_threads")? {
            virtualizer.runtime_worker_threads = v.max(1);
        }
        if let Some(v) = reader.boolean("virtualizer", "sync_index")? {
            virtualizer.sync_index = v;
        }

        if let Some(v) = reader.string("logging", "directive") {
            config.logging.directive = v;
        }
        config.logging.log_dir = reader.string("logging", "log_dir").map(PathBuf::from);

        Ok(config)
    }
}

/// `~/.hydrafs/<name>`.
pub fn default_state_dir(name: &str) -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".hydrafs").join(name))
}

struct IniReader<'a> {
    ini: &'a Ini,
}

impl IniReader<'_> {
    fn string(&self, section: &str, key: &str) -> Option<String> {
        self.ini
            .section(Some(section))
            .and_then(|s| s.get(key))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, section: &str, key: &str) -> Result<Option<T>, ConfigError> {
        match self.string(section, key) {
            None => Ok(None),
            Some(value) => value.parse().map(Some).map_err(|_| ConfigError::Invalid {
                section: section.to_string(),
                key: key.to_string(),
                value,
            }),
        }
    }

    fn boolean(&self, section: &str, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.string(section, key) {
            None => Ok(None),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Ok(Some(true)),
                "false" | "no" | "0" | "off" => Ok(Some(false)),
                _ => Err(ConfigError::Invalid {
                    section: section.to_string(),
                    key: key.to_string(),
                    value,
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = HydraConfig::new("repo", "/tmp/state");
        assert_eq!(config.fetch.batch_size, 64);
        assert_eq!(config.fetch.retry.max_attempts(), 4);
        assert_eq!(config.queue.retry.max_attempts(), 3);
        assert!(config.queue.sync_on_enqueue);
        assert_eq!(config.tables_dir(), PathBuf::from("/tmp/state/tables"));
    }

    #[test]
    fn test_parse_full_file() {
        let text = r#"
[repository]
name = mono
state_dir = /srv/mono
remote_url = https://example.invalid/mono

[fetch]
batch_size = 16
batch_window_ms = 20
max_attempts = 2
content_cache_mb = 8

[queue]
max_batch_size = 10
max_attempts = 5
sync_on_enqueue = no

[virtualizer]
provider_id = abc
stop_timeout_secs = 3
sync_index = false

[logging]
directive = hydrafs=debug
"#;
        let config = HydraConfig::from_ini_str(text).unwrap();
        assert_eq!(config.name, "mono");
        assert_eq!(config.state_dir, PathBuf::from("/srv/mono"));
        assert_eq!(config.remote_url.as_deref(), Some("https://example.invalid/mono"));
        assert_eq!(config.fetch.batch_size, 16);
        assert_eq!(config.fetch.batch_window, Duration::from_millis(20));
        assert_eq!(config.fetch.retry.max_attempts(), 2);
        assert_eq!(config.fetch.content_cache_bytes, 8 * 1024 * 1024);
        assert_eq!(config.queue.max_batch_size, 10);
        assert_eq!(config.queue.retry.max_attempts(), 5);
        assert!(!config.queue.sync_on_enqueue);
        assert_eq!(config.virtualizer.provider_id, "abc");
        assert_eq!(config.virtualizer.stop_timeout, Duration::from_secs(3));
        assert!(!config.virtualizer.sync_index);
        assert_eq!(config.logging.directive, "hydrafs=debug");
    }

    #[test]
    fn test_invalid_value_names_key() {
        let text = "[repository]\nstate_dir = /x\n[fetch]\nbatch_size = lots\n";
        match HydraConfig::from_ini_str(text) {
            Err(ConfigError::Invalid { section, key, value }) => {
                assert_eq!(section, "fetch");
                assert_eq!(key, "batch_size");
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            HydraConfig::load(&dir.path().join("none.ini")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hydrafs.ini");
        std::fs::write(&path, "[repository]\nstate_dir = /data\n").unwrap();
        let config = HydraConfig::load(&path).unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/data"));
        assert_eq!(config.fetch, FetchConfig::default());
    }
}
