//! # Context Pool
//!
//! Supervises a set of contexts and brokers single-caller-at-a-time
//! delegated work to them.
//!
//! ## Lifecycle of a Context
//! 1. `add_context` registers listeners and posts `connect`
//! 2. the context replies `ready`; `add_context` resolves with its metadata
//! 3. `delegate_work` reserves it (`is_done = false`) for exactly one call
//! 4. on `exit(0)` it is removed and all of its listeners are detached;
//!    a nonzero exit is handed to the configured [`ExitPolicy`]
//!
//! ## Reservation
//! Selection is a first-fit linear scan; there is no load balancing and no
//! queue. When every context is busy `delegate_work` fails immediately with
//! `NoFreeContexts`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use conduit_api::context::{Context, ContextEvent, ContextEventKind, ContextRef};
use conduit_api::errors::ConduitError;
use conduit_api::message::{new_call_id, ContextMessage};
use conduit_api::types::ConduitResult;

use crate::call::{dispatch_call, PendingCall, Settlement};
use crate::config::{ContextPoolConfig, ExitPolicy};
use crate::logging::forward_remote_log;
use crate::{log_context, log_error};

/// Receives every inbound message of every pooled context.
pub type MessageHandler = Arc<dyn Fn(&ContextMessage, &ContextRef) + Send + Sync>;

/// Stop mechanism for pooled contexts (terminate a thread, kill a process).
#[async_trait]
pub trait ContextStopper: Send + Sync + fmt::Debug {
    async fn stop_context(&self, context: &ContextRef) -> ConduitResult<()>;
}

/// Asks the context to stop itself by posting `{type:"stop"}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StopMessageStopper;

#[async_trait]
impl ContextStopper for StopMessageStopper {
    async fn stop_context(&self, context: &ContextRef) -> ConduitResult<()> {
        context.post_message(ContextMessage::Stop)
    }
}

#[derive(Debug)]
struct ContextState {
    is_done: AtomicBool,
    is_ready: AtomicBool,
}

/// Lifecycle record of one pooled context.
///
/// Clones share state with the pool's record, so `is_done` / `is_ready`
/// observed through a clone are always current.
#[derive(Clone)]
pub struct ContextMetadata {
    id: Uuid,
    state: Arc<ContextState>,
    context: Weak<dyn Context>,
}

impl fmt::Debug for ContextMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextMetadata")
            .field("id", &self.id)
            .field("is_done", &self.is_done())
            .field("is_ready", &self.is_ready())
            .finish()
    }
}

impl ContextMetadata {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// `true` while the context is free to take a call.
    pub fn is_done(&self) -> bool {
        self.state.is_done.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready.load(Ordering::SeqCst)
    }

    /// The context, if it is still alive.
    pub fn context(&self) -> Option<ContextRef> {
        self.context.upgrade()
    }
}

struct PoolEntry {
    metadata: ContextMetadata,
    context: ContextRef,
}

/// Pool of contexts.
pub struct ContextPool {
    contexts: Mutex<Vec<PoolEntry>>,
    message_handler: RwLock<Option<MessageHandler>>,
    stopper: Arc<dyn ContextStopper>,
    config: ContextPoolConfig,
}

impl fmt::Debug for ContextPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextPool")
            .field("contexts", &self.contexts_count())
            .field("stopper", &self.stopper)
            .field("config", &self.config)
            .finish()
    }
}

impl ContextPool {
    /// Create a new pool
    ///
    /// # Arguments
    /// * `stopper` - How `cleanup` stops each context
    /// * `config` - Optional pool configuration
    pub fn new(stopper: Arc<dyn ContextStopper>, config: Option<ContextPoolConfig>) -> Arc<Self> {
        Arc::new(Self {
            contexts: Mutex::new(Vec::new()),
            message_handler: RwLock::new(None),
            stopper,
            config: config.unwrap_or_default(),
        })
    }

    /// A pool that stops contexts with a `stop` message.
    pub fn with_stop_messages(config: Option<ContextPoolConfig>) -> Arc<Self> {
        Self::new(Arc::new(StopMessageStopper), config)
    }

    fn contexts(&self) -> MutexGuard<'_, Vec<PoolEntry>> {
        self.contexts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replaces the handler that receives every inbound message.
    pub fn set_message_handler<F>(&self, handler: F)
    where
        F: Fn(&ContextMessage, &ContextRef) + Send + Sync + 'static,
    {
        *self.message_handler.write().unwrap_or_else(|p| p.into_inner()) = Some(Arc::new(handler));
    }

    /// Starts supervising `context` and waits for its `ready` reply.
    ///
    /// No timeout is applied here. If the context exits before replying,
    /// this fails with `ContextClosed`.
    pub async fn add_context(self: &Arc<Self>, context: ContextRef) -> ConduitResult<ContextMetadata> {
        let metadata = ContextMetadata {
            id: Uuid::new_v4(),
            state: Arc::new(ContextState {
                is_done: AtomicBool::new(true),
                is_ready: AtomicBool::new(false),
            }),
            context: Arc::downgrade(&context),
        };
        let id = metadata.id;

        self.contexts().push(PoolEntry {
            metadata: metadata.clone(),
            context: Arc::clone(&context),
        });
        context.set_max_listeners(self.config.max_listeners);
        log_context!(id, "added");

        // Registered on the raw registry so that a transport which starts
        // delivering on its first `on` cannot emit the exit before this
        // listener exists.
        let pool = Arc::downgrade(self);
        context.listeners().once(ContextEventKind::Exit, move |event: &ContextEvent| {
            if let (ContextEvent::Exit(code), Some(pool)) = (event, pool.upgrade()) {
                pool.handle_exit(id, *code);
            }
        });

        let (ready_tx, ready_rx) = oneshot::channel();
        let ready_tx = Mutex::new(Some(ready_tx));
        let pool = Arc::downgrade(self);
        let weak_context = Arc::downgrade(&context);
        let ready_metadata = metadata.clone();

        context.on(
            ContextEventKind::Message,
            Box::new(move |event| {
                let ContextEvent::Message(msg) = event else {
                    return;
                };

                match msg {
                    ContextMessage::Log { level, text } => forward_remote_log(&id.to_string(), *level, text),
                    ContextMessage::Ready => {
                        ready_metadata.state.is_ready.store(true, Ordering::SeqCst);
                        if let Some(tx) = ready_tx.lock().unwrap_or_else(|p| p.into_inner()).take() {
                            log_context!(id, "ready");
                            let _ = tx.send(ready_metadata.clone());
                        }
                    }
                    _ => {}
                }

                if let (Some(pool), Some(context)) = (pool.upgrade(), weak_context.upgrade()) {
                    pool.forward(msg, &context);
                }
            }),
        );

        if let Err(err) = context.post_message(ContextMessage::Connect) {
            warn!(context_id = %id, error = %err, "connect handshake could not be sent");
            self.remove(id);
            return Err(err);
        }

        ready_rx.await.map_err(|_| ConduitError::ContextClosed)
    }

    fn forward(&self, msg: &ContextMessage, context: &ContextRef) {
        let handler = self.message_handler.read().unwrap_or_else(|p| p.into_inner()).clone();
        if let Some(handler) = handler {
            handler(msg, context);
        }
    }

    fn handle_exit(&self, id: Uuid, code: i32) {
        if code != 0 {
            self.escalate(ConduitError::ContextExited(code));
        }
        log_context!(id, "exited", code);
        self.remove(id);
    }

    fn escalate(&self, fatal: ConduitError) {
        match &self.config.exit_policy {
            ExitPolicy::Abort => {
                log_error!(fatal, "unrecoverable context failure, terminating process");
                let code = match fatal {
                    ConduitError::ContextExited(code) => code,
                    _ => 1,
                };
                std::process::exit(code);
            }
            ExitPolicy::Notify(handler) => handler(fatal),
        }
    }

    /// Drops the context from the pool and detaches all of its listeners.
    fn remove(&self, id: Uuid) {
        let removed = {
            let mut contexts = self.contexts();
            contexts
                .iter()
                .position(|entry| entry.metadata.id == id)
                .map(|index| contexts.remove(index))
        };

        if let Some(entry) = removed {
            entry.context.remove_all_listeners();
            debug!(context_id = %id, "context removed from pool");
        }
    }

    /// Number of contexts currently managed.
    pub fn contexts_count(&self) -> usize {
        self.contexts().len()
    }

    /// Number of contexts not serving a call.
    pub fn free_contexts_count(&self) -> usize {
        self.contexts().iter().filter(|entry| entry.metadata.is_done()).count()
    }

    /// Snapshot of the metadata of every managed context.
    pub fn contexts_metadata(&self) -> Vec<ContextMetadata> {
        self.contexts().iter().map(|entry| entry.metadata.clone()).collect()
    }

    fn reserve_free_context(&self) -> Option<(ContextMetadata, ContextRef)> {
        self.contexts().iter().find_map(|entry| {
            entry
                .metadata
                .state
                .is_done
                .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                .ok()
                .map(|_| (entry.metadata.clone(), Arc::clone(&entry.context)))
        })
    }

    /// Sends `data` to the first free context as a `start` envelope.
    ///
    /// The reservation happens before this returns: with every context busy
    /// it fails immediately with `NoFreeContexts`. The context is released
    /// when its `result` (or `failure`) envelope arrives. A transport error
    /// rejects the call but leaves the context reserved, since its state is
    /// unknown.
    pub fn delegate_work(&self, data: Value) -> ConduitResult<PendingCall> {
        let (metadata, context) = self.reserve_free_context().ok_or(ConduitError::NoFreeContexts)?;
        let state = Arc::clone(&metadata.state);
        let call_id = new_call_id();
        debug!(context_id = %metadata.id, call_id = %call_id, "delegating work");

        dispatch_call(&context, call_id, data, move |settlement| {
            if settlement != Settlement::TransportError {
                state.is_done.store(true, Ordering::SeqCst);
            }
        })
    }

    /// Typed convenience over [`ContextPool::delegate_work`].
    pub async fn delegate<A, R>(&self, data: &A) -> ConduitResult<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let pending = self.delegate_work(serde_json::to_value(data)?)?;
        Ok(serde_json::from_value(pending.await?)?)
    }

    /// Stops every managed context through the pool's stopper.
    ///
    /// All contexts are attempted; the first failure is returned.
    pub async fn cleanup(&self) -> ConduitResult<()> {
        let contexts: Vec<(Uuid, ContextRef)> = self
            .contexts()
            .iter()
            .map(|entry| (entry.metadata.id, Arc::clone(&entry.context)))
            .collect();

        let mut first_error = None;
        for (id, context) in contexts {
            if let Err(err) = self.stopper.stop_context(&context).await {
                warn!(context_id = %id, error = %err, "failed to stop context");
                first_error.get_or_insert(err);
            } else {
                log_context!(id, "stop requested");
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
