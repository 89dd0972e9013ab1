//! # Conduit Error Types
//!
//! This module defines the single error type shared by every layer of the
//! framework: context pools, portals and the thread/task layer.
//!
//! ## Error Classes
//!
//! - Capacity exhaustion: `NoFreeContexts`, `NoRunnableThread`
//! - Protocol violations: `FunctionNotFound`, `RemoteCall`
//! - Context lifecycle: `ContextError`, `ContextExited`, `ContextClosed`, `CallAbandoned`
//! - Misuse: `ThreadNotRunnable`, `NotMainContext`
//! - Layered deadlines: `Timeout`
//!
//! ## Usage Example
//!
//! ```rust
//! use conduit_api::errors::ConduitError;
//!
//! fn describe(error: &ConduitError) -> &'static str {
//!     match error {
//!         ConduitError::NoFreeContexts => "all contexts are busy, queue and retry",
//!         ConduitError::ThreadNotRunnable(_) => "check can_run() first",
//!         _ => "unexpected failure",
//!     }
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

/// Core error type for context pools, portals and threads.
#[derive(Error, Debug)]
pub enum ConduitError {
    /// Every context in the pool is serving a delegated call.
    ///
    /// Returned synchronously by `delegate_work`; it is never retried
    /// internally. Callers needing backpressure must queue externally.
    #[error("No free contexts")]
    NoFreeContexts,

    /// A call named a function that is not registered on the receiving side.
    ///
    /// # Parameters
    /// * String - The requested function name
    #[error("Function {0} not found in API")]
    FunctionNotFound(String),

    /// The remote function ran and failed.
    ///
    /// # Parameters
    /// * String - The error text reported by the remote side
    #[error("Remote call failed: {0}")]
    RemoteCall(String),

    /// The context raised an `error` event while a call was outstanding.
    #[error("Context error: {0}")]
    ContextError(String),

    /// The context exited with a nonzero status code.
    ///
    /// This is the fatal condition handed to the pool's exit policy.
    #[error("Context exited with code {0}")]
    ContextExited(i32),

    /// The channel to the context is closed.
    #[error("Context channel is closed")]
    ContextClosed,

    /// The context was removed from its pool while the call was in flight.
    #[error("Call abandoned before a result arrived")]
    CallAbandoned,

    /// `run` was called on a thread that is dead or already running.
    ///
    /// # Parameters
    /// * String - The thread id
    #[error("Thread {0} is not able to run task.")]
    ThreadNotRunnable(String),

    /// The scheduler's selector found no thread for the task.
    #[error("No runnable thread available")]
    NoRunnableThread,

    /// A main-only function was invoked on the child side of a portal.
    #[error("Not in main context")]
    NotMainContext,

    /// A layered deadline expired before the operation finished.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Arguments or results could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Catch-all for user supplied errors.
    ///
    /// Task delegates and portal functions return `anyhow` errors; they pass
    /// through this variant without being rewrapped.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ConduitError {
    /// Whether this error means the process can no longer trust the context.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConduitError::ContextExited(code) if *code != 0)
    }
}
