//! Runs two worker threads behind a portal and fans work out to them.
//!
//! ```text
//! RUST_LOG=debug cargo run --example worker_portal
//! ```

use std::sync::Arc;

use conduit::context::{spawn_worker, ChannelContext};
use conduit::logging;
use conduit::pool::ContextPool;
use conduit::portal::{ContextPortal, RemoteFunction};
use conduit::thread::{create_thread_pool, create_thread_scheduler, threadify};
use conduit_api::message::LogLevel;
use tracing::info;

const PORTAL_ID: &str = "worker-portal-demo";

async fn checksum(text: String) -> anyhow::Result<u32> {
    Ok(text.bytes().fold(0u32, |sum, byte| sum.rotate_left(5) ^ u32::from(byte)))
}

async fn report(line: String) -> anyhow::Result<()> {
    info!(target: "worker_portal", "child says: {line}");
    Ok(())
}

/// Both sides register the same functions in the same order.
fn register(portal: &ContextPortal) -> (RemoteFunction<String, u32>, RemoteFunction<String, ()>) {
    (portal.portal_to_child(checksum), portal.portal_to_main(report))
}

async fn child_main(context: Arc<ChannelContext>) -> anyhow::Result<()> {
    let portal = ContextPortal::child(PORTAL_ID, context);
    let (_, report) = register(&portal);
    portal.init();

    portal.log(LogLevel::Info, "worker online")?;
    report.call("ready for input".to_string()).await?;
    portal.stopped().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_development();

    let pool = ContextPool::with_stop_messages(None);
    let portal = ContextPortal::main(PORTAL_ID, Arc::clone(&pool));
    let (remote_checksum, _) = register(&portal);
    portal.init();

    let workers = ["w0", "w1"]
        .into_iter()
        .map(|name| spawn_worker(name, child_main))
        .collect::<Result<Vec<_>, _>>()?;
    for worker in &workers {
        pool.add_context(worker.context()).await?;
    }

    let inputs = ["alpha", "beta", "gamma", "delta", "epsilon"].map(String::from);
    let sums = portal
        .map(inputs.clone(), |text, _| {
            let remote_checksum = remote_checksum.clone();
            async move { remote_checksum.call(text).await }
        })
        .await?;
    for (text, sum) in inputs.iter().zip(&sums) {
        info!("{text:>8} -> {sum:#010x}");
    }

    // The same work through the in-process thread layer.
    let threads = create_thread_pool::<u32>(2);
    let local_checksum = threadify(|_ctx, text: String| checksum(text), create_thread_scheduler(threads));
    assert_eq!(local_checksum("alpha".to_string()).await?, sums[0]);

    portal.cleanup().await?;
    for worker in workers {
        worker.join()?;
    }
    Ok(())
}
