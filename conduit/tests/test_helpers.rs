#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use conduit::config::{ContextPoolConfig, ExitPolicy};
use conduit::context::ChannelContext;
use conduit::pool::{ContextMetadata, ContextPool};
use conduit_api::context::{Context, ContextEvent, ContextEventKind, ContextRef};
use conduit_api::errors::ConduitError;
use conduit_api::message::ContextMessage;

/// Upper bound for any single awaited step in these tests
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Short window used to assert that something does NOT happen
pub const QUIET_PERIOD: Duration = Duration::from_millis(100);

/// Awaits `future`, failing the test instead of hanging.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(TEST_TIMEOUT, future)
        .await
        .expect("test step timed out")
}

/// Polls `condition` until it holds or the test timeout expires.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

/// A pool that records fatal exits instead of terminating the test process.
pub fn recording_pool() -> (Arc<ContextPool>, Arc<Mutex<Vec<String>>>) {
    let fatal = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&fatal);
    let config = ContextPoolConfig {
        exit_policy: ExitPolicy::notify(move |err: ConduitError| sink.lock().unwrap().push(err.to_string())),
        ..Default::default()
    };
    (ContextPool::with_stop_messages(Some(config)), fatal)
}

/// Makes `child` behave like a well-behaved remote: `connect` is answered
/// with `ready` and every `start` with the outcome of `handler`.
pub fn spawn_responder<H>(child: &Arc<ChannelContext>, handler: H)
where
    H: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
{
    let weak = Arc::downgrade(child);
    child.on(
        ContextEventKind::Message,
        Box::new(move |event| {
            let (ContextEvent::Message(msg), Some(child)) = (event, weak.upgrade()) else {
                return;
            };
            let reply = match msg {
                ContextMessage::Connect => ContextMessage::Ready,
                ContextMessage::Start { call_id, data } => match handler(data.clone()) {
                    Ok(result) => ContextMessage::Result {
                        call_id: call_id.clone(),
                        result,
                    },
                    Err(error) => ContextMessage::Failure {
                        call_id: call_id.clone(),
                        error,
                    },
                },
                _ => return,
            };
            child.post_message(reply).unwrap();
        }),
    );
}

/// Routes everything `context` receives into a channel the test reads from.
pub fn capture_messages(context: &ContextRef) -> mpsc::UnboundedReceiver<ContextMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    context.on(
        ContextEventKind::Message,
        Box::new(move |event| {
            if let ContextEvent::Message(msg) = event {
                let _ = tx.send(msg.clone());
            }
        }),
    );
    rx
}

/// Adds `main` to `pool` while the test plays the remote side by hand.
///
/// Returns the metadata and the stream of messages the remote receives
/// after the handshake.
pub async fn connect_manual(
    pool: &Arc<ContextPool>,
    main: Arc<ChannelContext>,
    child: &Arc<ChannelContext>,
) -> (ContextMetadata, mpsc::UnboundedReceiver<ContextMessage>) {
    let child_ref: ContextRef = child.clone();
    let mut inbox = capture_messages(&child_ref);

    let adding = {
        let pool = Arc::clone(pool);
        tokio::spawn(async move { pool.add_context(main).await })
    };

    assert_eq!(within(inbox.recv()).await, Some(ContextMessage::Connect));
    child.post_message(ContextMessage::Ready).unwrap();

    let metadata = within(adding).await.unwrap().unwrap();
    (metadata, inbox)
}

/// Next `start` envelope seen by a manually driven remote.
pub async fn next_start(inbox: &mut mpsc::UnboundedReceiver<ContextMessage>) -> (String, Value) {
    loop {
        match within(inbox.recv()).await {
            Some(ContextMessage::Start { call_id, data }) => return (call_id, data),
            Some(_) => continue,
            None => panic!("remote inbox closed"),
        }
    }
}
