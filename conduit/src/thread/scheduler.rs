use std::fmt;
use std::sync::Arc;

use conduit_api::errors::ConduitError;
use conduit_api::types::ConduitResult;
use tracing::debug;

use super::core::Thread;
use super::task::ThreadTask;

/// Picks the thread a task should run on, or `None` when there is none.
pub type ThreadSelector<T> = Arc<dyn Fn(&ThreadTask<T>, &ThreadScheduler<T>) -> Option<Arc<Thread<T>>> + Send + Sync>;

/// Invoked with the task id and its thread once the task has settled.
pub type CompletionCallback<T> = Arc<dyn Fn(&str, &Arc<Thread<T>>) + Send + Sync>;

/// Matches tasks to threads.
///
/// The scheduler owns no threads and holds no queue: whether an
/// unavailable thread means waiting, retrying or failing is entirely the
/// selector's policy. A selector that returns `None` fails the task with
/// `NoRunnableThread`.
pub struct ThreadScheduler<T> {
    selector: ThreadSelector<T>,
    on_complete: CompletionCallback<T>,
}

impl<T> fmt::Debug for ThreadScheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadScheduler").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> ThreadScheduler<T> {
    pub fn new<S, C>(selector: S, on_complete: C) -> Self
    where
        S: Fn(&ThreadTask<T>, &ThreadScheduler<T>) -> Option<Arc<Thread<T>>> + Send + Sync + 'static,
        C: Fn(&str, &Arc<Thread<T>>) + Send + Sync + 'static,
    {
        Self {
            selector: Arc::new(selector),
            on_complete: Arc::new(on_complete),
        }
    }

    /// Runs `task` on the thread chosen by the selector.
    ///
    /// The completion callback runs after the task settles, whether it
    /// succeeded or failed, and before the outcome is returned. It does not
    /// run when the chosen thread refuses the task.
    pub async fn run(&self, task: ThreadTask<T>) -> ConduitResult<T> {
        let thread = (self.selector)(&task, self).ok_or(ConduitError::NoRunnableThread)?;
        let task_id = task.id().to_string();
        debug!(task_id = %task_id, thread_id = %thread.id(), "task scheduled");

        let running = thread.try_run(task)?;
        let outcome = running.await;
        (self.on_complete)(&task_id, &thread);
        outcome
    }
}
