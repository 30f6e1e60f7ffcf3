//! Durable background task queue.
//!
//! Driver notifications become [`FileSystemTask`]s that are appended to a
//! durable log and applied later, in enqueue order, by one worker thread.
//!
//! ```text
//! enqueue ──► TaskLog (fsync) ──► worker: pre_batch
//!                                         handle(task) ... in FIFO order
//!                                         post_batch
//!                                         checkpoint(last seq)
//! ```
//!
//! Delivery is at-least-once: tasks not yet checkpointed when the process
//! dies are replayed on the next open. A batch that keeps failing after the
//! retry policy is exhausted halts the queue with a [`ConsistencyError`];
//! the tasks stay in the log.

mod error;
mod handler;
mod log;
mod task;

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::telemetry::HydraMetrics;

pub use error::{ConsistencyError, QueueError, TaskError};
pub use handler::{BackgroundTaskHandler, CallbackHandler};
pub use log::{LoggedTask, TaskLog};
pub use task::{FileSystemTask, TaskKind};

/// Worker lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    NotStarted,
    Running,
    /// Stopped by a consistency error.
    Halted,
    Stopped,
}

struct State {
    log: TaskLog,
    status: QueueStatus,
    accepting: bool,
    stop: bool,
    halted: Option<ConsistencyError>,
}

struct Shared {
    state: Mutex<State>,
    /// Signalled on enqueue and on stop.
    work: Condvar,
    /// Signalled after each checkpoint and when the worker exits.
    progress: Condvar,
    config: QueueConfig,
    metrics: Arc<HydraMetrics>,
}

/// Ordered, crash-recoverable queue of deferred mutations.
pub struct BackgroundTaskQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundTaskQueue {
    /// Opens the task log under `dir`. Unapplied tasks from a previous run
    /// are queued ahead of anything enqueued now.
    pub fn open(
        dir: &Path,
        config: QueueConfig,
        metrics: Arc<HydraMetrics>,
    ) -> Result<Self, QueueError> {
        let log = TaskLog::open(dir, config.sync_on_enqueue)?;
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    log,
                    status: QueueStatus::NotStarted,
                    accepting: true,
                    stop: false,
                    halted: None,
                }),
                work: Condvar::new(),
                progress: Condvar::new(),
                config,
                metrics,
            }),
            worker: Mutex::new(None),
        })
    }

    /// Durably appends `task`. Returns its sequence number.
    pub fn enqueue(&self, task: FileSystemTask) -> Result<u64, QueueError> {
        let mut state = self.shared.state.lock();
        if let Some(halted) = &state.halted {
            return Err(QueueError::Halted(halted.clone()));
        }
        if !state.accepting {
            return Err(QueueError::ShuttingDown);
        }
        let seq = state.log.append(task)?;
        drop(state);

        self.shared.work.notify_one();
        self.shared.metrics.task_enqueued();
        Ok(seq)
    }

    /// Starts the worker thread with `handler`.
    pub fn start<H: BackgroundTaskHandler>(&self, handler: H) -> Result<(), QueueError> {
        let mut worker = self.worker.lock();
        {
            let mut state = self.shared.state.lock();
            if let Some(halted) = &state.halted {
                return Err(QueueError::Halted(halted.clone()));
            }
            if state.status != QueueStatus::NotStarted {
                return Err(QueueError::AlreadyStarted);
            }
            state.status = QueueStatus::Running;
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("hydrafs-tasks".to_string())
            .spawn(move || run_worker(shared, handler));
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                info!(pending = self.count(), "Background task queue started");
                Ok(())
            }
            Err(e) => {
                self.shared.state.lock().status = QueueStatus::NotStarted;
                Err(QueueError::Spawn(e))
            }
        }
    }

    /// Stops accepting tasks, lets the current batch finish, and joins the
    /// worker. Unapplied tasks remain in the log.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.accepting = false;
            state.stop = true;
        }
        self.shared.work.notify_all();

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Background task worker panicked");
            }
        }

        let mut state = self.shared.state.lock();
        if state.status != QueueStatus::Halted {
            state.status = QueueStatus::Stopped;
        }
        debug!(pending = state.log.len(), "Background task queue shut down");
    }

    /// Waits until the log is empty, the queue halts, or `timeout` passes.
    /// Returns whether the log is empty.
    pub fn wait_until_empty(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !state.log.is_empty() && state.status == QueueStatus::Running {
            if self
                .shared
                .progress
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }
        state.log.is_empty()
    }

    /// Tasks enqueued but not yet applied.
    pub fn count(&self) -> usize {
        self.shared.state.lock().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().log.is_empty()
    }

    pub fn status(&self) -> QueueStatus {
        self.shared.state.lock().status
    }

    pub fn consistency_error(&self) -> Option<ConsistencyError> {
        self.shared.state.lock().halted.clone()
    }
}

impl Drop for BackgroundTaskQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// =============================================================================
// Worker
// =============================================================================

fn run_worker<H: BackgroundTaskHandler>(shared: Arc<Shared>, mut handler: H) {
    loop {
        let batch = {
            let mut state = shared.state.lock();
            while state.log.is_empty() && !state.stop {
                shared
                    .work
                    .wait_for(&mut state, shared.config.idle_poll);
            }
            if state.stop {
                break;
            }
            state.log.peek_batch(shared.config.max_batch_size.max(1))
        };

        let Some(last_seq) = batch.last().map(|r| r.seq) else {
            continue;
        };

        let outcome = apply_with_retry(&shared, &mut handler, &batch);

        let mut state = shared.state.lock();
        let halt = match outcome {
            Ok(()) => match state.log.checkpoint(last_seq) {
                Ok(()) => {
                    shared.metrics.tasks_applied(batch.len());
                    debug!(tasks = batch.len(), checkpoint = last_seq, "Task batch applied");
                    None
                }
                Err(e) => Some(ConsistencyError {
                    task: batch[batch.len() - 1].task.clone(),
                    attempts: 1,
                    message: format!("failed to checkpoint task log: {}", e),
                }),
            },
            Err(consistency) => Some(consistency),
        };

        if let Some(consistency) = halt {
            error!(
                task = %consistency.task,
                attempts = consistency.attempts,
                error = %consistency.message,
                "Background task failed permanently; halting task queue"
            );
            shared.metrics.consistency_error();
            state.status = QueueStatus::Halted;
            state.accepting = false;
            state.halted = Some(consistency);
            shared.progress.notify_all();
            return;
        }
        shared.progress.notify_all();
    }
    shared.progress.notify_all();
}

/// Runs one pre / per-task / post cycle, retrying the whole batch per the
/// queue's policy.
fn apply_with_retry<H: BackgroundTaskHandler>(
    shared: &Shared,
    handler: &mut H,
    batch: &[LoggedTask],
) -> Result<(), ConsistencyError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let (failed_at, error) = match apply_once(handler, batch) {
            Ok(()) => return Ok(()),
            Err(failure) => failure,
        };

        handler.on_batch_failed(&error);
        let task = &batch[failed_at].task;

        let delay = if error.transient {
            shared.config.retry.delay_for_attempt(attempt)
        } else {
            None
        };
        let Some(delay) = delay else {
            return Err(ConsistencyError {
                task: task.clone(),
                attempts: attempt,
                message: error.message,
            });
        };

        warn!(
            task = %task,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying task batch"
        );
        shared.metrics.task_batch_retried();
        thread::sleep(delay);
    }
}

/// On failure returns the index of the task to blame with the error.
fn apply_once<H: BackgroundTaskHandler>(
    handler: &mut H,
    batch: &[LoggedTask],
) -> Result<(), (usize, TaskError)> {
    handler.pre_batch().map_err(|e| (0, e))?;
    for (i, record) in batch.iter().enumerate() {
        handler.handle(&record.task).map_err(|e| (i, e))?;
    }
    handler.post_batch().map_err(|e| (batch.len() - 1, e))
}
