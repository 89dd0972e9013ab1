use std::future::Future;
use std::sync::Arc;

use conduit_api::types::{BoxedFuture, ConduitResult};

use super::scheduler::ThreadScheduler;
use super::task::{Task, ThreadExecutionContext};

/// Turns `delegate` into a function whose every call runs as a fresh task
/// on `scheduler`.
///
/// The returned function closes over the call's arguments; call sites see
/// no scheduling detail beyond the `ConduitResult`.
///
/// ```rust,no_run
/// use conduit::thread::{create_thread_pool, create_thread_scheduler, threadify};
///
/// # async fn demo() -> conduit_api::ConduitResult<()> {
/// let pool = create_thread_pool::<u64>(2);
/// let square = threadify(|_ctx, n: u64| async move { anyhow::Ok(n * n) }, create_thread_scheduler(pool));
/// assert_eq!(square(7).await?, 49);
/// # Ok(())
/// # }
/// ```
pub fn threadify<T, A, F, Fut>(
    delegate: F,
    scheduler: Arc<ThreadScheduler<T>>,
) -> impl Fn(A) -> BoxedFuture<'static, ConduitResult<T>> + Clone + Send + Sync + 'static
where
    T: Send + 'static,
    A: Send + 'static,
    F: Fn(ThreadExecutionContext<T>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let delegate = Arc::new(delegate);

    move |args: A| -> BoxedFuture<'static, ConduitResult<T>> {
        let delegate = Arc::clone(&delegate);
        let scheduler = Arc::clone(&scheduler);
        let task = Task::new(move |ctx| delegate(ctx, args));
        Box::pin(async move { scheduler.run(task).await })
    }
}
