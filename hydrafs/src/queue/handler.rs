//! Callbacks the queue worker drives.

use super::error::TaskError;
use super::task::FileSystemTask;

/// Applies queued tasks.
///
/// The worker calls `pre_batch` once, `handle` for each task in enqueue
/// order, then `post_batch` once. Only after `post_batch` succeeds are the
/// tasks removed from the log. Any error aborts the batch, `on_batch_failed`
/// runs, and the whole batch is retried, so `handle` must be idempotent.
pub trait BackgroundTaskHandler: Send + 'static {
    fn pre_batch(&mut self) -> Result<(), TaskError> {
        Ok(())
    }

    fn handle(&mut self, task: &FileSystemTask) -> Result<(), TaskError>;

    fn post_batch(&mut self) -> Result<(), TaskError> {
        Ok(())
    }

    /// Undo whatever a partially applied batch left behind.
    fn on_batch_failed(&mut self, _error: &TaskError) {}
}

type Hook = Box<dyn FnMut() -> Result<(), TaskError> + Send>;
type PerTask = Box<dyn FnMut(&FileSystemTask) -> Result<(), TaskError> + Send>;

/// Handler built from closures.
pub struct CallbackHandler {
    pre: Hook,
    per_task: PerTask,
    post: Hook,
}

impl CallbackHandler {
    pub fn new<Pre, Per, Post>(pre: Pre, per_task: Per, post: Post) -> Self
    where
        Pre: FnMut() -> Result<(), TaskError> + Send + 'static,
        Per: FnMut(&FileSystemTask) -> Result<(), TaskError> + Send + 'static,
        Post: FnMut() -> Result<(), TaskError> + Send + 'static,
    {
        Self {
            pre: Box::new(pre),
            per_task: Box::new(per_task),
            post: Box::new(post),
        }
    }

    /// Handler with no-op batch hooks.
    pub fn per_task<Per>(per_task: Per) -> Self
    where
        Per: FnMut(&FileSystemTask) -> Result<(), TaskError> + Send + 'static,
    {
        Self::new(|| Ok(()), per_task, || Ok(()))
    }
}

impl BackgroundTaskHandler for CallbackHandler {
    fn pre_batch(&mut self) -> Result<(), TaskError> {
        (self.pre)()
    }

    fn handle(&mut self, task: &FileSystemTask) -> Result<(), TaskError> {
        (self.per_task)(task)
    }

    fn post_batch(&mut self) -> Result<(), TaskError> {
        (self.post)()
    }
}
