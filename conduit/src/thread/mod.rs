//! # Thread Layer
//!
//! Logical execution slots and the tasks that run on them. A [`Thread`] here
//! is not an OS thread: it is a stateful slot that admits one task at a
//! time, on whatever runtime drives the returned futures.
//!
//! ## Module Organization
//!
//! - `core`: [`Thread`] state machine, locking and metadata
//! - `task`: [`Task`] and the execution context handed to it
//! - `scheduler`: [`ThreadScheduler`] with pluggable selection
//! - `pool`: [`ResizableThreadPool`] and the [`ThreadManager`] trait
//! - `factory`: constructors with generated ids
//! - `threadify`: adapter from plain async functions to scheduled tasks

mod core;
mod factory;
mod pool;
mod scheduler;
mod task;
mod threadify;

pub use self::core::{Thread, ThreadEvent, ThreadEventKind};
pub use factory::{
    create_task, create_thread, create_thread_pool, create_thread_pool_with, create_thread_scheduler,
    create_thread_with_id, random_id,
};
pub use pool::{ResizableThreadPool, ThreadFactory, ThreadManager};
pub use scheduler::{CompletionCallback, ThreadScheduler, ThreadSelector};
pub use task::{Task, ThreadExecutionContext, ThreadTask};
pub use threadify::threadify;
