use std::fmt;
use std::sync::Arc;

use conduit_api::errors::ConduitError;

/// Length of generated thread and task ids.
pub const DEFAULT_ID_LENGTH: usize = 8;

/// Listener cap applied to every context added to a pool.
pub const DEFAULT_CONTEXT_MAX_LISTENERS: usize = 32;

// --- Configuration Enums ---

/// What a pool does when one of its contexts exits with a nonzero code.
///
/// In-flight call state for that context cannot be reconstructed, so the
/// condition is never silently recovered from.
#[derive(Clone, Default)]
pub enum ExitPolicy {
    /// Log at error level and terminate the process with the exit code.
    #[default]
    Abort,
    /// Hand the fatal error to an embedder supplied handler instead.
    Notify(Arc<dyn Fn(ConduitError) + Send + Sync>),
}

impl ExitPolicy {
    /// Convenience constructor for [`ExitPolicy::Notify`].
    pub fn notify<F>(handler: F) -> Self
    where
        F: Fn(ConduitError) + Send + Sync + 'static,
    {
        ExitPolicy::Notify(Arc::new(handler))
    }
}

impl fmt::Debug for ExitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitPolicy::Abort => f.write_str("Abort"),
            ExitPolicy::Notify(_) => f.write_str("Notify(<handler>)"),
        }
    }
}

// --- Pool Configuration ---

/// Configuration for a `ContextPool`.
#[derive(Clone, Debug)]
pub struct ContextPoolConfig {
    /// Listener cap set on each context when it is added
    pub max_listeners: usize,

    /// Escalation for nonzero context exits
    pub exit_policy: ExitPolicy,
}

impl Default for ContextPoolConfig {
    fn default() -> Self {
        Self {
            max_listeners: DEFAULT_CONTEXT_MAX_LISTENERS,
            exit_policy: ExitPolicy::Abort,
        }
    }
}

/// Configuration for a `ResizableThreadPool` built by `create_thread_pool_with`.
#[derive(Clone, Debug)]
pub struct ThreadPoolConfig {
    /// Number of threads created and initialized up front
    pub initial_size: usize,

    /// Length of generated thread ids
    pub id_length: usize,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            initial_size: num_cpus::get(),
            id_length: DEFAULT_ID_LENGTH,
        }
    }
}
