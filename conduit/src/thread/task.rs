use std::fmt;
use std::future::Future;
use std::sync::Arc;

use conduit_api::errors::ConduitError;
use conduit_api::types::BoxedFuture;

use super::core::Thread;
use super::factory::random_id;
use crate::config::DEFAULT_ID_LENGTH;

type TaskDelegate<T, C> = Box<dyn FnOnce(C) -> BoxedFuture<'static, anyhow::Result<T>> + Send>;

/// An inert unit of work: an id plus a delegate that receives its execution
/// context only when the task is run. Running consumes the task.
pub struct Task<T, C> {
    id: String,
    delegate: TaskDelegate<T, C>,
}

impl<T, C> fmt::Debug for Task<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("id", &self.id).finish()
    }
}

impl<T, C> Task<T, C>
where
    T: Send + 'static,
    C: Send + 'static,
{
    /// Creates a task with a random id.
    pub fn new<F, Fut>(delegate: F) -> Self
    where
        F: FnOnce(C) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::with_id(random_id(DEFAULT_ID_LENGTH), delegate)
    }

    pub fn with_id<F, Fut>(id: impl Into<String>, delegate: F) -> Self
    where
        F: FnOnce(C) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            id: id.into(),
            delegate: Box::new(move |ctx| Box::pin(delegate(ctx))),
        }
    }

    /// Creates a task whose delegate completes without suspending.
    pub fn from_sync<F>(delegate: F) -> Self
    where
        F: FnOnce(C) -> anyhow::Result<T> + Send + 'static,
    {
        Self::new(move |ctx| std::future::ready(delegate(ctx)))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn run(self, ctx: C) -> anyhow::Result<T> {
        (self.delegate)(ctx).await
    }
}

/// What a task receives when it runs on a [`Thread`].
pub struct ThreadExecutionContext<T> {
    pub thread: Arc<Thread<T>>,
}

impl<T> Clone for ThreadExecutionContext<T> {
    fn clone(&self) -> Self {
        Self {
            thread: Arc::clone(&self.thread),
        }
    }
}

impl<T> fmt::Debug for ThreadExecutionContext<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadExecutionContext")
            .field("thread", &self.thread.id())
            .finish()
    }
}

/// A task that runs on a [`Thread`].
pub type ThreadTask<T> = Task<T, ThreadExecutionContext<T>>;

/// Maps a delegate error into the library error.
///
/// Errors that already are a `ConduitError` (for example from a remote call
/// made inside the delegate) come back out as themselves.
pub(crate) fn task_error(err: anyhow::Error) -> ConduitError {
    match err.downcast::<ConduitError>() {
        Ok(conduit) => conduit,
        Err(other) => ConduitError::Other(other),
    }
}
