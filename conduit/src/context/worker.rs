//! # Worker Thread Contexts
//!
//! A worker is a dedicated OS thread running its own single-threaded tokio
//! runtime. The owner talks to it only through the main end of a
//! [`channel_pair`]; the child closure receives the child end.
//!
//! ## Exit Codes
//! - child future returns `Ok(())`: exit code `0`
//! - child future returns `Err(_)`: exit code `1`
//! - child panics or its runtime cannot be built: exit code `1`

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::anyhow;
use tracing::{error, info};

use conduit_api::types::ConduitResult;

use crate::log_error;

use super::channel::{channel_pair, ChannelContext};

/// Exit code reported when the child fails or panics.
pub const WORKER_FAILURE_CODE: i32 = 1;

/// Owner-side handle to a spawned worker.
pub struct WorkerHandle {
    context: Arc<ChannelContext>,
    thread: Option<JoinHandle<()>>,
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("context", &self.context)
            .field("joined", &self.thread.is_none())
            .finish()
    }
}

impl WorkerHandle {
    /// The owner's end of the worker channel.
    pub fn context(&self) -> Arc<ChannelContext> {
        Arc::clone(&self.context)
    }

    /// Blocks until the worker thread has finished.
    pub fn join(mut self) -> ConduitResult<()> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| anyhow!("worker thread {} panicked outside its runtime", self.context.name()).into()),
            None => Ok(()),
        }
    }
}

/// Spawns `child` on a new OS thread and returns the owner-side handle.
///
/// The child's exit is reported to the owner as an `Exit` event on the
/// returned context once the child future completes.
pub fn spawn_worker<F, Fut>(name: &str, child: F) -> ConduitResult<WorkerHandle>
where
    F: FnOnce(Arc<ChannelContext>) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + 'static,
{
    let (main_end, child_end) = channel_pair(name);
    let thread_name = format!("conduit-worker-{name}");

    let thread = std::thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            let code = worker_thread_main(&thread_name, Arc::clone(&child_end), child);
            if let Err(err) = child_end.exit(code) {
                error!(worker = %thread_name, error = %err, "failed to report worker exit");
            }
        })
        .map_err(|err| anyhow!("failed to spawn worker thread: {err}"))?;

    Ok(WorkerHandle {
        context: main_end,
        thread: Some(thread),
    })
}

fn worker_thread_main<F, Fut>(name: &str, context: Arc<ChannelContext>, child: F) -> i32
where
    F: FnOnce(Arc<ChannelContext>) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(worker = %name, error = %err, "failed to build worker runtime");
            return WORKER_FAILURE_CODE;
        }
    };

    info!(worker = %name, "worker started");
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| runtime.block_on(child(context))));

    match outcome {
        Ok(Ok(())) => {
            info!(worker = %name, "worker finished");
            0
        }
        Ok(Err(err)) => {
            log_error!(err, worker = %name, "worker failed");
            WORKER_FAILURE_CODE
        }
        Err(panic_error) => {
            let reason = match panic_error.downcast::<String>() {
                Ok(text) => *text,
                Err(other) => match other.downcast::<&'static str>() {
                    Ok(text) => (*text).to_string(),
                    Err(_) => "<non-string panic>".to_string(),
                },
            };
            error!(worker = %name, reason = %reason, "worker panicked");
            WORKER_FAILURE_CODE
        }
    }
}
