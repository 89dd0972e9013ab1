use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use conduit_api::errors::ConduitError;
use conduit_api::events::{Event, EventRegistry, ListenerHandle};
use conduit_api::types::{BoxedFuture, ConduitResult};

use super::task::{task_error, ThreadExecutionContext, ThreadTask};
use crate::log_thread;

type Payload = Arc<dyn Any + Send + Sync>;

/// Notifications raised by a [`Thread`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadEvent {
    /// The thread was locked or unlocked.
    LockStatusUpdate { thread_id: String, locked: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadEventKind {
    LockStatusUpdate,
}

impl Event for ThreadEvent {
    type Kind = ThreadEventKind;

    fn kind(&self) -> ThreadEventKind {
        match self {
            ThreadEvent::LockStatusUpdate { .. } => ThreadEventKind::LockStatusUpdate,
        }
    }
}

/// A logical execution slot that runs at most one task at a time.
///
/// ## States
/// - created: not initialized, not alive
/// - `init()`: alive and eligible for scheduling
/// - `run(task)`: running until the task settles
/// - `kill()`: terminal; the thread is never alive again
///
/// Locking is orthogonal to the above. A locked thread is still alive and
/// may still run tasks; schedulers decide whether to skip it.
pub struct Thread<T> {
    id: String,
    initialized: AtomicBool,
    alive: AtomicBool,
    running: AtomicBool,
    locked: AtomicBool,
    /// Guards `locked` transitions as well as the payload
    lock_data: Mutex<Option<Payload>>,
    metadata: Mutex<Option<Payload>>,
    current_task: Mutex<Option<String>>,
    events: EventRegistry<ThreadEvent>,
    _result: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for Thread<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .field("running", &self.is_running())
            .field("locked", &self.is_locked())
            .finish()
    }
}

fn guard<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<T> Thread<T> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            initialized: AtomicBool::new(false),
            alive: AtomicBool::new(false),
            running: AtomicBool::new(false),
            locked: AtomicBool::new(false),
            lock_data: Mutex::new(None),
            metadata: Mutex::new(None),
            current_task: Mutex::new(None),
            events: EventRegistry::new(),
            _result: PhantomData,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn init(&self) {
        self.initialized.store(true, Ordering::SeqCst);
        self.alive.store(true, Ordering::SeqCst);
        log_thread!(self.id, "initialized");
    }

    /// Ends eligibility permanently. A task already running is left to
    /// finish; `is_running` is not cleared here.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
        log_thread!(self.id, "killed", running = self.is_running());
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && self.is_initialized()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn can_run(&self) -> bool {
        self.is_alive() && !self.is_running()
    }

    /// Id of the task currently running, if any.
    pub fn current_task_id(&self) -> Option<String> {
        guard(&self.current_task).clone()
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    /// Locks the thread with `data`.
    ///
    /// Locking an already locked thread does nothing: the first lock's data
    /// is kept and no event is raised.
    pub fn lock<L>(&self, data: L) -> &Self
    where
        L: Any + Send + Sync,
    {
        self.set_locked(true, Some(Arc::new(data)));
        self
    }

    /// Locks the thread without attaching data.
    pub fn lock_empty(&self) -> &Self {
        self.set_locked(true, None);
        self
    }

    /// Unlocks the thread and drops its lock data. No-op when unlocked.
    pub fn unlock(&self) -> &Self {
        self.set_locked(false, None);
        self
    }

    fn set_locked(&self, locked: bool, data: Option<Payload>) {
        {
            let mut slot = guard(&self.lock_data);
            if self.is_locked() == locked {
                return;
            }
            *slot = data;
            self.locked.store(locked, Ordering::SeqCst);
        }

        let event = if locked { "locked" } else { "unlocked" };
        log_thread!(self.id, event);
        self.events.emit(&ThreadEvent::LockStatusUpdate {
            thread_id: self.id.clone(),
            locked,
        });
    }

    /// The data passed to `lock`, if it is of type `L`.
    pub fn get_lock_handle<L>(&self) -> Option<Arc<L>>
    where
        L: Any + Send + Sync,
    {
        let data = guard(&self.lock_data).clone()?;
        data.downcast::<L>().ok()
    }

    /// Attaches caller-defined bookkeeping data, replacing any previous value.
    pub fn set_metadata<M>(&self, metadata: M) -> &Self
    where
        M: Any + Send + Sync,
    {
        *guard(&self.metadata) = Some(Arc::new(metadata));
        self
    }

    pub fn clear_metadata(&self) -> &Self {
        *guard(&self.metadata) = None;
        self
    }

    pub fn get_metadata<M>(&self) -> Option<Arc<M>>
    where
        M: Any + Send + Sync,
    {
        let metadata = guard(&self.metadata).clone()?;
        metadata.downcast::<M>().ok()
    }

    pub fn on_lock_status_update<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&ThreadEvent) + Send + Sync + 'static,
    {
        self.events.on(ThreadEventKind::LockStatusUpdate, listener)
    }

    pub fn off_lock_status_update(&self, handle: ListenerHandle) -> bool {
        self.events.off(handle)
    }
}

/// Clears the running flag when the task future completes or is dropped.
struct RunningGuard<T> {
    thread: Arc<Thread<T>>,
}

impl<T> Drop for RunningGuard<T> {
    fn drop(&mut self) {
        guard(&self.thread.current_task).take();
        self.thread.running.store(false, Ordering::SeqCst);
        log_thread!(self.thread.id, "idle");
    }
}

impl<T: Send + 'static> Thread<T> {
    /// Claims the thread for `task` and returns the future that runs it.
    ///
    /// The claim is made before this returns: a thread that is dead or
    /// already running rejects the task here with `ThreadNotRunnable`.
    pub fn try_run(self: &Arc<Self>, task: ThreadTask<T>) -> ConduitResult<BoxedFuture<'static, ConduitResult<T>>> {
        if !self.is_alive()
            || self
                .running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
        {
            return Err(ConduitError::ThreadNotRunnable(self.id.clone()));
        }

        let running = RunningGuard {
            thread: Arc::clone(self),
        };
        *guard(&self.current_task) = Some(task.id().to_string());
        log_thread!(self.id, "running", task_id = task.id());

        let ctx = ThreadExecutionContext {
            thread: Arc::clone(self),
        };
        Ok(Box::pin(async move {
            let _running = running;
            task.run(ctx).await.map_err(task_error)
        }))
    }

    /// Runs `task` on this thread.
    ///
    /// The runnable check happens when `run` is called, not when the
    /// returned future is first polled, so a second `run` issued before the
    /// first completes is rejected even if neither has been awaited yet.
    /// Delegate errors are returned unchanged.
    pub fn run(self: &Arc<Self>, task: ThreadTask<T>) -> BoxedFuture<'static, ConduitResult<T>> {
        match self.try_run(task) {
            Ok(running) => running,
            Err(err) => Box::pin(std::future::ready(Err(err))),
        }
    }
}
