//! # Context Contract
//!
//! A [`Context`] is an opaque bidirectional channel to an independent
//! execution unit: a worker thread, a subprocess, a socket peer. The
//! framework only assumes ordered delivery of one message at a time and a
//! terminal exit signal carrying a status code.
//!
//! ## Events
//!
//! - `Message(msg)`: an inbound [`ContextMessage`]
//! - `Error(text)`: the transport failed; outstanding calls are rejected
//! - `Exit(code)`: terminal; `0` is graceful, anything else is fatal

use std::fmt::Debug;
use std::sync::Arc;

use crate::events::{Event, EventRegistry, ListenerHandle};
use crate::message::ContextMessage;
use crate::types::ConduitResult;

/// Lifecycle notification raised by a context.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextEvent {
    Message(ContextMessage),
    Error(String),
    Exit(i32),
}

/// Routing key for [`ContextEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextEventKind {
    Message,
    Error,
    Exit,
}

impl Event for ContextEvent {
    type Kind = ContextEventKind;

    fn kind(&self) -> ContextEventKind {
        match self {
            ContextEvent::Message(_) => ContextEventKind::Message,
            ContextEvent::Error(_) => ContextEventKind::Error,
            ContextEvent::Exit(_) => ContextEventKind::Exit,
        }
    }
}

/// Shared handle to any context implementation.
pub type ContextRef = Arc<dyn Context>;

/// Message channel to a peer execution unit.
///
/// Implementors supply `post_message` and the listener registry; the
/// listener methods have default implementations on top of it. Transports
/// that need to react to the first registration (for example to start
/// delivering buffered messages) override `on` / `once`.
pub trait Context: Send + Sync + Debug {
    /// Sends one message to the peer.
    fn post_message(&self, msg: ContextMessage) -> ConduitResult<()>;

    /// The registry that inbound events are dispatched through.
    fn listeners(&self) -> &EventRegistry<ContextEvent>;

    fn on(
        &self,
        kind: ContextEventKind,
        listener: Box<dyn Fn(&ContextEvent) + Send + Sync>,
    ) -> ListenerHandle {
        self.listeners().on(kind, listener)
    }

    fn once(
        &self,
        kind: ContextEventKind,
        listener: Box<dyn Fn(&ContextEvent) + Send + Sync>,
    ) -> ListenerHandle {
        self.listeners().once(kind, listener)
    }

    fn off(&self, handle: ListenerHandle) -> bool {
        self.listeners().off(handle)
    }

    fn remove_all_listeners(&self) {
        self.listeners().remove_all()
    }

    fn set_max_listeners(&self, max: usize) {
        self.listeners().set_max_listeners(max)
    }

    fn listener_count(&self) -> usize {
        self.listeners().listener_count()
    }
}
