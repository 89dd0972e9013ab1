use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::core::Thread;

/// Source of runnable threads for a scheduler.
pub trait ThreadManager<T>: Send + Sync {
    fn get_runnable_thread(&self) -> Option<Arc<Thread<T>>>;
}

pub type ThreadFactory<T> = Box<dyn Fn() -> Arc<Thread<T>> + Send + Sync>;

/// An ordered set of threads that grows and shrinks on demand.
pub struct ResizableThreadPool<T> {
    threads: Mutex<Vec<Arc<Thread<T>>>>,
    factory: ThreadFactory<T>,
}

impl<T> fmt::Debug for ResizableThreadPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResizableThreadPool")
            .field("threads", &*self.lock_threads())
            .finish()
    }
}

impl<T> ResizableThreadPool<T> {
    /// Creates an empty pool; `factory` builds each thread added by `resize`.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Arc<Thread<T>> + Send + Sync + 'static,
    {
        Self {
            threads: Mutex::new(Vec::new()),
            factory: Box::new(factory),
        }
    }

    fn lock_threads(&self) -> MutexGuard<'_, Vec<Arc<Thread<T>>>> {
        self.threads.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Brings the pool to `size` live threads.
    ///
    /// Threads that are already dead are dropped first. Growing builds new
    /// threads with the factory and initializes them. Shrinking kills idle
    /// threads before busy ones, newest first; a running thread is only
    /// killed when there are not enough idle threads to remove, and it is
    /// left to finish its task.
    pub fn resize(&self, size: usize) {
        let mut threads = self.lock_threads();
        let before = threads.len();
        threads.retain(|thread| thread.is_alive());

        while threads.len() < size {
            let thread = (self.factory)();
            thread.init();
            threads.push(thread);
        }

        let mut excess = threads.len().saturating_sub(size);
        for idle_pass in [true, false] {
            let mut index = threads.len();
            while excess > 0 && index > 0 {
                index -= 1;
                if threads[index].can_run() == idle_pass {
                    let thread = threads.remove(index);
                    thread.kill();
                    excess -= 1;
                }
            }
        }

        debug!(before, after = threads.len(), requested = size, "thread pool resized");
    }

    /// Snapshot of the pool's threads in order.
    pub fn threads(&self) -> Vec<Arc<Thread<T>>> {
        self.lock_threads().clone()
    }

    pub fn size(&self) -> usize {
        self.lock_threads().len()
    }
}

impl<T> ThreadManager<T> for ResizableThreadPool<T> {
    /// The first thread that can run and is not locked.
    fn get_runnable_thread(&self) -> Option<Arc<Thread<T>>> {
        self.lock_threads()
            .iter()
            .find(|thread| thread.can_run() && !thread.is_locked())
            .cloned()
    }
}
