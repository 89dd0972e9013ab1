//! # Context Portal
//!
//! A symmetric call-by-name bridge over one context boundary. The same
//! program text runs on both sides; the role chosen at construction decides
//! whether a registration exposes a local implementation or returns a proxy.
//!
//! | Registration | Main side | Child side |
//! |---|---|---|
//! | `portal_to_child(f)` | proxy through the pool | registers `f`, local handle |
//! | `portal_to_main(f)` | registers `f`, local handle | proxy through the parent context |
//!
//! Functions are named `fn0`, `fn1`, … in registration order from a counter
//! shared by both directions, so both sides must register the same functions
//! in the same order.
//!
//! Every call envelope carries the portal id as `bridgeId`; envelopes from
//! another portal sharing the channel are ignored.

mod function;
mod registry;

pub use function::{decode_args, encode_args, RemoteFunction};
pub use registry::FunctionRegistry;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use conduit_api::context::{Context, ContextEvent, ContextEventKind, ContextRef};
use conduit_api::events::ListenerHandle;
use conduit_api::errors::ConduitError;
use conduit_api::message::{CallData, ContextMessage, LogLevel};
use conduit_api::types::{BoxedFuture, ConduitResult};

use crate::logging::forward_remote_log;
use crate::pool::ContextPool;
use function::into_remote_fn;

type StopHandler = Arc<dyn Fn() + Send + Sync>;

/// Which side of the boundary a portal lives on.
#[derive(Debug, Clone)]
pub enum Role {
    /// The owner side, holding the pool of children.
    Main(Arc<ContextPool>),
    /// The child side, holding its channel to the owner.
    Child(ContextRef),
}

/// Call-by-name bridge between the main side and its children.
pub struct ContextPortal {
    portal_id: String,
    role: Role,
    child_fns: FunctionRegistry,
    main_fns: FunctionRegistry,
    next_fn_id: AtomicUsize,
    initialized: AtomicBool,
    stop_handler: Mutex<Option<StopHandler>>,
    stop_requested: watch::Sender<bool>,
    /// Child-side dispatch listener; it owns a strong reference to the portal
    child_listener: Mutex<Option<ListenerHandle>>,
}

impl fmt::Debug for ContextPortal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextPortal")
            .field("portal_id", &self.portal_id)
            .field("main", &self.is_main())
            .field("child_fns", &self.child_fns)
            .field("main_fns", &self.main_fns)
            .finish()
    }
}

impl ContextPortal {
    fn with_role(portal_id: impl Into<String>, role: Role) -> Arc<Self> {
        let (stop_requested, _) = watch::channel(false);
        Arc::new(Self {
            portal_id: portal_id.into(),
            role,
            child_fns: FunctionRegistry::new(),
            main_fns: FunctionRegistry::new(),
            next_fn_id: AtomicUsize::new(0),
            initialized: AtomicBool::new(false),
            stop_handler: Mutex::new(None),
            stop_requested,
            child_listener: Mutex::new(None),
        })
    }

    /// Main-side portal over `pool`.
    pub fn main(portal_id: impl Into<String>, pool: Arc<ContextPool>) -> Arc<Self> {
        Self::with_role(portal_id, Role::Main(pool))
    }

    /// Child-side portal over the channel to the owner.
    ///
    /// Once initialized, the portal is kept alive by its listener on
    /// `context` until a `stop` envelope arrives, so callers need not hold
    /// on to the returned handle.
    pub fn child(portal_id: impl Into<String>, context: ContextRef) -> Arc<Self> {
        Self::with_role(portal_id, Role::Child(context))
    }

    pub fn portal_id(&self) -> &str {
        &self.portal_id
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn is_main(&self) -> bool {
        matches!(self.role, Role::Main(_))
    }

    /// Installs the inbound dispatch. Only the first call has an effect.
    ///
    /// On the main side this takes over the pool's message handler. On the
    /// child side it answers `connect` with `ready` and dispatches `start`
    /// envelopes to the child registry. A `stop` runs the stop handler and
    /// ends child-side dispatch.
    pub fn init(self: &Arc<Self>) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            warn!(portal_id = %self.portal_id, "portal already initialized");
            return;
        }

        match &self.role {
            Role::Main(pool) => {
                let portal = Arc::downgrade(self);
                pool.set_message_handler(move |msg, context| {
                    if let Some(portal) = portal.upgrade() {
                        portal.dispatch(&portal.main_fns, msg, context);
                    }
                });
            }
            Role::Child(context) => {
                let portal = Arc::clone(self);
                let handle = context.on(
                    ContextEventKind::Message,
                    Box::new(move |event| {
                        if let ContextEvent::Message(msg) = event {
                            portal.handle_child_message(msg);
                        }
                    }),
                );
                *self.child_listener.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
                // A stop delivered before the handle was stored could not detach it.
                if self.is_stop_requested() {
                    self.detach_child_listener();
                }
            }
        }
        debug!(portal_id = %self.portal_id, main = self.is_main(), "portal initialized");
    }

    fn handle_child_message(&self, msg: &ContextMessage) {
        let Role::Child(context) = &self.role else {
            return;
        };
        match msg {
            ContextMessage::Connect => {
                if let Err(err) = context.post_message(ContextMessage::Ready) {
                    warn!(portal_id = %self.portal_id, error = %err, "could not answer connect");
                }
            }
            ContextMessage::Stop => {
                self.request_stop();
                self.detach_child_listener();
            }
            ContextMessage::Start { .. } => self.dispatch(&self.child_fns, msg, context),
            _ => {}
        }
    }

    /// Drops the dispatch listener and with it the listener's hold on the
    /// portal. Calls already running still deliver their replies.
    fn detach_child_listener(&self) {
        let handle = self.child_listener.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let (Some(handle), Role::Child(context)) = (handle, &self.role) {
            context.off(handle);
            debug!(portal_id = %self.portal_id, "child dispatch detached");
        }
    }

    fn request_stop(&self) {
        debug!(portal_id = %self.portal_id, "stop requested");
        self.stop_requested.send_replace(true);
        let handler = self.stop_handler.lock().unwrap_or_else(|p| p.into_inner()).clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    /// Runs the named function for a `start` envelope and posts the reply
    /// on `context`.
    fn dispatch(&self, registry: &FunctionRegistry, msg: &ContextMessage, context: &ContextRef) {
        let ContextMessage::Start { call_id, data } = msg else {
            return;
        };
        let Some(call) = CallData::from_value(data) else {
            trace!(call_id = %call_id, "start envelope is not a portal call");
            return;
        };
        if call.bridge_id != self.portal_id {
            trace!(call_id = %call_id, bridge_id = %call.bridge_id, "ignoring call for another portal");
            return;
        }

        let Some(function) = registry.get(&call.function) else {
            let err = ConduitError::FunctionNotFound(call.function.clone());
            warn!(portal_id = %self.portal_id, call_id = %call_id, error = %err, "rejecting call");
            reply(
                context,
                ContextMessage::Failure {
                    call_id: call_id.clone(),
                    error: err.to_string(),
                },
            );
            return;
        };

        let call_id = call_id.clone();
        let Ok(runtime) = Handle::try_current() else {
            reply(
                context,
                ContextMessage::Failure {
                    call_id,
                    error: "no async runtime to run the call on".to_string(),
                },
            );
            return;
        };

        crate::log_call!(call.function, call_id, "dispatching");
        let args = call.args;
        let target: Weak<dyn Context> = Arc::downgrade(context);
        runtime.spawn(async move {
            let outcome = function(args).await;
            let Some(context) = target.upgrade() else {
                debug!(call_id = %call_id, "context dropped before the reply");
                return;
            };
            let envelope = match outcome {
                Ok(result) => ContextMessage::Result { call_id, result },
                Err(err) => ContextMessage::Failure {
                    call_id,
                    error: err.to_string(),
                },
            };
            reply(&context, envelope);
        });
    }

    fn next_name(&self) -> String {
        format!("fn{}", self.next_fn_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Exposes `function` on the child side.
    ///
    /// Returns a proxy on the main side and a direct handle on the child side.
    pub fn portal_to_child<A, R, F, Fut, E>(&self, function: F) -> RemoteFunction<A, R>
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        let name = self.next_name();
        match &self.role {
            Role::Main(pool) => RemoteFunction::via_pool(name, Arc::clone(pool), self.portal_id.clone()),
            Role::Child(_) => {
                let function = into_remote_fn(function);
                self.child_fns.register(name.clone(), Arc::clone(&function));
                RemoteFunction::local(name, function)
            }
        }
    }

    /// Exposes `function` on the main side.
    ///
    /// Returns a direct handle on the main side and a proxy through the
    /// parent context on the child side.
    pub fn portal_to_main<A, R, F, Fut, E>(&self, function: F) -> RemoteFunction<A, R>
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        let name = self.next_name();
        match &self.role {
            Role::Main(_) => {
                let function = into_remote_fn(function);
                self.main_fns.register(name.clone(), Arc::clone(&function));
                RemoteFunction::local(name, function)
            }
            Role::Child(context) => RemoteFunction::via_parent(name, Arc::clone(context), self.portal_id.clone()),
        }
    }

    /// Runs `function` on the main side only.
    pub fn entry_point<T, F>(&self, function: F) -> Option<T>
    where
        F: FnOnce() -> T,
    {
        self.is_main().then(function)
    }

    /// Wraps `function` so that calling it on the child side fails with
    /// `NotMainContext` instead of running it.
    pub fn assert_on_main<A, R, F, Fut>(
        &self,
        function: F,
    ) -> impl Fn(A) -> BoxedFuture<'static, ConduitResult<R>> + Clone + Send + Sync + use<A, R, F, Fut>
    where
        A: Send + 'static,
        R: Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ConduitResult<R>> + Send + 'static,
    {
        let is_main = self.is_main();
        let portal_id = self.portal_id.clone();
        let function = Arc::new(function);

        move |args: A| -> BoxedFuture<'static, ConduitResult<R>> {
            if !is_main {
                warn!(portal_id = %portal_id, "main-only function invoked on child side");
                return Box::pin(async { Err(ConduitError::NotMainContext) });
            }
            Box::pin(function(args))
        }
    }

    /// Applies `function` to every item, at most `contexts_count()` (at
    /// least one) at a time. Results keep input order; the first error
    /// aborts the whole map.
    pub async fn map<T, U, F, Fut>(&self, items: impl IntoIterator<Item = T>, mut function: F) -> ConduitResult<Vec<U>>
    where
        F: FnMut(T, usize) -> Fut,
        Fut: Future<Output = ConduitResult<U>>,
    {
        let limit = self.contexts_count().max(1);
        stream::iter(items.into_iter().enumerate().map(move |(index, item)| function(item, index)))
            .buffered(limit)
            .try_collect()
            .await
    }

    /// Number of pooled contexts; always 0 on the child side.
    pub fn contexts_count(&self) -> usize {
        match &self.role {
            Role::Main(pool) => pool.contexts_count(),
            Role::Child(_) => 0,
        }
    }

    /// Stops every pooled context. No-op on the child side.
    pub async fn cleanup(&self) -> ConduitResult<()> {
        match &self.role {
            Role::Main(pool) => pool.cleanup().await,
            Role::Child(_) => Ok(()),
        }
    }

    /// Sets the child-side handler run when the owner posts `stop`.
    pub fn on_stop<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.stop_handler.lock().unwrap_or_else(|p| p.into_inner()) = Some(Arc::new(handler));
    }

    /// Completes once a `stop` envelope has been received.
    pub async fn stopped(&self) {
        let mut requested = self.stop_requested.subscribe();
        // The sender lives in `self`, so the channel cannot close while
        // this borrow is held.
        let _ = requested.wait_for(|stop| *stop).await;
    }

    pub fn is_stop_requested(&self) -> bool {
        *self.stop_requested.borrow()
    }

    /// Emits a diagnostic line. The child side forwards it to the owner's
    /// logger; the main side logs it directly.
    pub fn log(&self, level: LogLevel, text: impl Into<String>) -> ConduitResult<()> {
        let text = text.into();
        match &self.role {
            Role::Main(_) => {
                forward_remote_log(&self.portal_id, level, &text);
                Ok(())
            }
            Role::Child(context) => context.post_message(ContextMessage::Log { level, text }),
        }
    }

    /// Names registered for execution on the child side.
    pub fn child_function_names(&self) -> Vec<String> {
        self.child_fns.names()
    }

    /// Names registered for execution on the main side.
    pub fn main_function_names(&self) -> Vec<String> {
        self.main_fns.names()
    }
}

fn reply(context: &ContextRef, envelope: ContextMessage) {
    let kind = envelope.type_name();
    if let Err(err) = context.post_message(envelope) {
        warn!(kind, error = %err, "could not post reply");
    }
}
