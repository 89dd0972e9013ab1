//! # Context Transports
//!
//! Concrete implementations of the `Context` contract.
//!
//! - [`channel`]: in-process duplex channel built on flume
//! - [`worker`]: a context backed by a dedicated OS thread with its own runtime

pub mod channel;
pub mod worker;

pub use channel::{channel_pair, ChannelContext};
pub use worker::{spawn_worker, WorkerHandle, WORKER_FAILURE_CODE};
