// Conduit
//
// Cross-context task distribution and remote function calls on tokio.
//
// - `context`: concrete transports (in-process channels, worker threads)
// - `pool`: supervision of a set of contexts and exclusive call dispatch
// - `portal`: call-by-name bridge between the main side and its children
// - `thread`: logical execution slots, tasks, scheduling and `threadify`
//
// The contracts these build on (the `Context` trait, wire envelopes, the
// error type) live in `conduit-api` and are re-exported here.

pub mod call;
pub mod config;
pub mod context;
pub mod logging;
pub mod pool;
pub mod portal;
pub mod thread;

pub use conduit_api::*;

pub use call::{dispatch_call, PendingCall, Settlement};
pub use config::{ContextPoolConfig, ExitPolicy, ThreadPoolConfig};
pub use context::{channel_pair, spawn_worker, ChannelContext, WorkerHandle};
pub use pool::{ContextMetadata, ContextPool, ContextStopper, MessageHandler, StopMessageStopper};
pub use portal::{ContextPortal, RemoteFunction, Role};
pub use thread::{
    create_task, create_thread, create_thread_pool, create_thread_scheduler, threadify, ResizableThreadPool, Task,
    Thread, ThreadExecutionContext, ThreadManager, ThreadScheduler, ThreadTask,
};
