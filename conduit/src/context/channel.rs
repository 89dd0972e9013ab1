use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use flume::{Receiver, Sender};
use tokio::runtime::Handle;
use tracing::{debug, error, trace};

use conduit_api::context::{Context, ContextEvent, ContextEventKind};
use conduit_api::errors::ConduitError;
use conduit_api::events::{EventRegistry, ListenerHandle};
use conduit_api::message::ContextMessage;
use conduit_api::types::ConduitResult;

/// What travels over the underlying flume channel.
#[derive(Debug)]
enum Signal {
    Message(ContextMessage),
    Error(String),
    Exit(i32),
}

impl From<Signal> for ContextEvent {
    fn from(signal: Signal) -> Self {
        match signal {
            Signal::Message(msg) => ContextEvent::Message(msg),
            Signal::Error(err) => ContextEvent::Error(err),
            Signal::Exit(code) => ContextEvent::Exit(code),
        }
    }
}

/// One end of an in-process duplex message channel.
///
/// Messages posted on one end are raised as `Message` events on the other
/// end, in send order, by a pump task. The pump starts on the runtime that
/// is current when the first listener registers, so messages sent before
/// the receiving side is listening are buffered rather than lost.
///
/// `exit` and `fail` are the remote-side lifecycle signals: they raise
/// `Exit` / `Error` events on the peer.
pub struct ChannelContext {
    /// Name used in logs
    name: String,

    /// Sending half towards the peer
    outbound: Sender<Signal>,

    /// Receiving half; taken by the pump when it starts
    inbound: Mutex<Option<Receiver<Signal>>>,

    /// Listeners for events arriving on this end
    registry: Arc<EventRegistry<ContextEvent>>,

    /// Set once this end has signalled exit
    closed: AtomicBool,
}

impl fmt::Debug for ChannelContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelContext")
            .field("name", &self.name)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .field("listeners", &self.registry.listener_count())
            .finish()
    }
}

/// Creates a connected pair of contexts: `(main_end, child_end)`.
pub fn channel_pair(name: &str) -> (Arc<ChannelContext>, Arc<ChannelContext>) {
    let (to_child, from_main) = flume::unbounded();
    let (to_main, from_child) = flume::unbounded();

    let main_end = ChannelContext::new(format!("{name}/main"), to_child, from_child);
    let child_end = ChannelContext::new(format!("{name}/child"), to_main, from_main);

    (Arc::new(main_end), Arc::new(child_end))
}

impl ChannelContext {
    fn new(name: String, outbound: Sender<Signal>, inbound: Receiver<Signal>) -> Self {
        Self {
            name,
            outbound,
            inbound: Mutex::new(Some(inbound)),
            registry: Arc::new(EventRegistry::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Signals the peer that this side has terminated with `code`.
    ///
    /// Terminal: later posts from this end fail with `ContextClosed`.
    pub fn exit(&self, code: i32) -> ConduitResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(ConduitError::ContextClosed);
        }
        debug!(context = %self.name, code, "signalling exit");
        self.send(Signal::Exit(code))
    }

    /// Raises an `Error` event on the peer.
    pub fn fail(&self, error: impl Into<String>) -> ConduitResult<()> {
        self.send(Signal::Error(error.into()))
    }

    fn send(&self, signal: Signal) -> ConduitResult<()> {
        self.outbound.send(signal).map_err(|_| ConduitError::ContextClosed)
    }

    fn ensure_pump(&self) {
        let mut slot = self.inbound.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_none() {
            return;
        }

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                error!(context = %self.name, "no tokio runtime; inbound messages stay buffered");
                return;
            }
        };

        if let Some(receiver) = slot.take() {
            let registry = Arc::clone(&self.registry);
            let name = self.name.clone();
            handle.spawn(Self::pump(name, receiver, registry));
        }
    }

    async fn pump(name: String, receiver: Receiver<Signal>, registry: Arc<EventRegistry<ContextEvent>>) {
        trace!(context = %name, "pump started");
        while let Ok(signal) = receiver.recv_async().await {
            let terminal = matches!(signal, Signal::Exit(_));
            registry.emit(&ContextEvent::from(signal));
            if terminal {
                break;
            }
        }
        trace!(context = %name, "pump stopped");
    }
}

impl Context for ChannelContext {
    fn post_message(&self, msg: ContextMessage) -> ConduitResult<()> {
        if self.is_closed() {
            return Err(ConduitError::ContextClosed);
        }
        trace!(context = %self.name, kind = msg.type_name(), "post");
        self.send(Signal::Message(msg))
    }

    fn listeners(&self) -> &EventRegistry<ContextEvent> {
        &self.registry
    }

    fn on(
        &self,
        kind: ContextEventKind,
        listener: Box<dyn Fn(&ContextEvent) + Send + Sync>,
    ) -> ListenerHandle {
        let handle = self.registry.on(kind, listener);
        self.ensure_pump();
        handle
    }

    fn once(
        &self,
        kind: ContextEventKind,
        listener: Box<dyn Fn(&ContextEvent) + Send + Sync>,
    ) -> ListenerHandle {
        let handle = self.registry.once(kind, listener);
        self.ensure_pump();
        handle
    }
}
