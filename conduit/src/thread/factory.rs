use std::future::Future;
use std::sync::Arc;

use uuid::Uuid;

use super::core::Thread;
use super::pool::{ResizableThreadPool, ThreadManager};
use super::scheduler::ThreadScheduler;
use super::task::Task;
use crate::config::{ThreadPoolConfig, DEFAULT_ID_LENGTH};

/// Random lowercase hex id of `len` characters.
pub fn random_id(len: usize) -> String {
    let mut id = String::with_capacity(len);
    while id.len() < len {
        id.push_str(&Uuid::new_v4().simple().to_string());
    }
    id.truncate(len);
    id
}

pub fn create_task<T, C, F, Fut>(delegate: F) -> Task<T, C>
where
    T: Send + 'static,
    C: Send + 'static,
    F: FnOnce(C) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Task::new(delegate)
}

pub fn create_thread<T>() -> Arc<Thread<T>> {
    create_thread_with_id(random_id(DEFAULT_ID_LENGTH))
}

pub fn create_thread_with_id<T>(id: impl Into<String>) -> Arc<Thread<T>> {
    Arc::new(Thread::new(id))
}

/// A pool of `size` initialized threads.
pub fn create_thread_pool<T: 'static>(size: usize) -> Arc<ResizableThreadPool<T>> {
    create_thread_pool_with(ThreadPoolConfig {
        initial_size: size,
        ..Default::default()
    })
}

pub fn create_thread_pool_with<T: 'static>(config: ThreadPoolConfig) -> Arc<ResizableThreadPool<T>> {
    let id_length = config.id_length;
    let pool = ResizableThreadPool::new(move || create_thread_with_id(random_id(id_length)));
    pool.resize(config.initial_size);
    Arc::new(pool)
}

/// A scheduler that runs each task on the manager's first runnable thread
/// and does nothing on completion.
pub fn create_thread_scheduler<T, M>(manager: Arc<M>) -> Arc<ThreadScheduler<T>>
where
    T: Send + 'static,
    M: ThreadManager<T> + ?Sized + 'static,
{
    Arc::new(ThreadScheduler::new(
        move |_task, _scheduler| manager.get_runnable_thread(),
        |_task_id, _thread| {},
    ))
}
