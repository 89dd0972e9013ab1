//! # Call Correlation
//!
//! A remote call is a `start` envelope plus a pair of listeners on the
//! target context: one waiting for the `result` / `failure` envelope with
//! the same call id, one waiting for a transport `error` event. Whichever
//! fires first settles the call; both listeners are then removed, so later
//! messages with the same id are ignored.
//!
//! If the context drops its listeners before anything arrives (for example
//! because it exited and was removed from its pool), the call fails with
//! `CallAbandoned` instead of hanging.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::trace;

use conduit_api::context::{Context, ContextEvent, ContextEventKind, ContextRef};
use conduit_api::errors::ConduitError;
use conduit_api::events::ListenerHandle;
use conduit_api::message::ContextMessage;
use conduit_api::types::ConduitResult;

/// How a call was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// A `result` or `failure` envelope with the call id arrived.
    Replied,
    /// The context raised an `error` event.
    TransportError,
    /// Posting the `start` envelope failed.
    NotSent,
}

type SettleHook = Box<dyn FnOnce(Settlement) + Send>;

struct CallSlot {
    call_id: String,
    reply: Mutex<Option<oneshot::Sender<ConduitResult<Value>>>>,
    handles: Mutex<Vec<ListenerHandle>>,
    on_settle: Mutex<Option<SettleHook>>,
    context: Weak<dyn Context>,
}

impl CallSlot {
    /// Settles at most once; later attempts are no-ops.
    fn settle(&self, settlement: Settlement, outcome: ConduitResult<Value>) {
        let Some(reply) = self.reply.lock().unwrap_or_else(|p| p.into_inner()).take() else {
            return;
        };

        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(|p| p.into_inner()));
        if let Some(context) = self.context.upgrade() {
            for handle in handles {
                context.off(handle);
            }
        }

        if let Some(hook) = self.on_settle.lock().unwrap_or_else(|p| p.into_inner()).take() {
            hook(settlement);
        }

        trace!(call_id = %self.call_id, ?settlement, "call settled");
        // The caller may have stopped waiting; that is not an error here.
        let _ = reply.send(outcome);
    }
}

/// The caller's side of an outstanding remote call.
pub struct PendingCall {
    call_id: String,
    receiver: oneshot::Receiver<ConduitResult<Value>>,
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall").field("call_id", &self.call_id).finish()
    }
}

impl PendingCall {
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Waits for the reply, failing with `Timeout` after `deadline`.
    ///
    /// The deadline is layered on top of the call: the target context stays
    /// reserved until its reply actually arrives.
    pub async fn with_timeout(self, deadline: Duration) -> ConduitResult<Value> {
        match tokio::time::timeout(deadline, self).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ConduitError::Timeout(deadline)),
        }
    }
}

impl Future for PendingCall {
    type Output = ConduitResult<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(ConduitError::CallAbandoned)))
    }
}

/// Posts `{type:"start", callId, data}` on `context` and returns the
/// pending reply.
///
/// `on_settle` runs exactly once, before the caller observes the outcome.
/// If the post itself fails the call is settled with [`Settlement::NotSent`]
/// and the post error is returned.
pub fn dispatch_call<S>(context: &ContextRef, call_id: String, data: Value, on_settle: S) -> ConduitResult<PendingCall>
where
    S: FnOnce(Settlement) + Send + 'static,
{
    let (reply, receiver) = oneshot::channel();
    let slot = Arc::new(CallSlot {
        call_id: call_id.clone(),
        reply: Mutex::new(Some(reply)),
        handles: Mutex::new(Vec::with_capacity(2)),
        on_settle: Mutex::new(Some(Box::new(on_settle))),
        context: Arc::downgrade(context),
    });

    let message_slot = Arc::clone(&slot);
    let message_handle = context.on(
        ContextEventKind::Message,
        Box::new(move |event| {
            let ContextEvent::Message(msg) = event else {
                return;
            };
            match msg {
                ContextMessage::Result { call_id, result } if *call_id == message_slot.call_id => {
                    message_slot.settle(Settlement::Replied, Ok(result.clone()));
                }
                ContextMessage::Failure { call_id, error } if *call_id == message_slot.call_id => {
                    message_slot.settle(Settlement::Replied, Err(ConduitError::RemoteCall(error.clone())));
                }
                _ => {}
            }
        }),
    );

    let error_slot = Arc::clone(&slot);
    let error_handle = context.once(
        ContextEventKind::Error,
        Box::new(move |event| {
            if let ContextEvent::Error(error) = event {
                error_slot.settle(Settlement::TransportError, Err(ConduitError::ContextError(error.clone())));
            }
        }),
    );

    slot.handles
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .extend([message_handle, error_handle]);

    trace!(call_id = %call_id, "posting start");
    if let Err(err) = context.post_message(ContextMessage::Start {
        call_id: call_id.clone(),
        data,
    }) {
        slot.settle(Settlement::NotSent, Err(ConduitError::ContextClosed));
        return Err(err);
    }

    Ok(PendingCall { call_id, receiver })
}
