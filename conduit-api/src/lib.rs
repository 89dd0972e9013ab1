//! # Conduit API
//!
//! Contracts for cross-context task distribution and remote function calls.
//! This crate holds everything that both sides of a context boundary must
//! agree on, with no runtime attached:
//!
//! - **Context**: the message-channel trait every transport implements
//! - **Events**: the observer registry contexts and threads notify through
//! - **Messages**: the JSON envelopes of the wire protocol
//! - **Errors**: the error type shared by pools, portals and threads
//!
//! The `conduit` crate provides the transports, the context pool, the portal
//! and the thread/task layer built on these contracts.
//!
//! ## Module Organization
//!
//! - [`context`]: `Context` trait and its lifecycle events
//! - [`events`]: listener registry with de-registration handles
//! - [`message`]: wire envelopes and call payloads
//! - [`errors`]: error types
//! - [`types`]: common type aliases

pub mod context;
pub mod errors;
pub mod events;
pub mod message;
pub mod types;

pub use context::{Context, ContextEvent, ContextEventKind, ContextRef};
pub use errors::ConduitError;
pub use events::{Event, EventRegistry, ListenerHandle};
pub use message::{CallData, ContextMessage, LogLevel};
pub use types::{BoxedFuture, ConduitResult, RemoteFn};
