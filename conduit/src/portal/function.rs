//! Typed handles for portal functions and the JSON argument codec.
//!
//! Arguments travel as the `args` array of a call envelope. A tuple
//! argument type maps element-wise onto that array (`(21,)` ↔ `[21]`,
//! `("a", 2)` ↔ `["a", 2]`), `()` maps to `[]`, and any other type is sent
//! as a single-element array.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use conduit_api::context::ContextRef;
use conduit_api::errors::ConduitError;
use conduit_api::message::{new_call_id, CallData};
use conduit_api::types::{BoxedFuture, ConduitResult, RemoteFn};

use crate::call::dispatch_call;
use crate::log_call;
use crate::pool::ContextPool;

/// Encodes an argument value into the `args` array.
pub fn encode_args<A: Serialize>(args: &A) -> ConduitResult<Vec<Value>> {
    Ok(match serde_json::to_value(args)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        single => vec![single],
    })
}

/// Decodes the `args` array back into the argument type.
pub fn decode_args<A: DeserializeOwned>(args: Vec<Value>) -> ConduitResult<A> {
    let array_error = match serde_json::from_value(Value::Array(args.clone())) {
        Ok(decoded) => return Ok(decoded),
        Err(err) => err,
    };
    match args.len() {
        0 => serde_json::from_value(Value::Null).map_err(|_| array_error.into()),
        1 => serde_json::from_value(args[0].clone()).map_err(|_| array_error.into()),
        _ => Err(array_error.into()),
    }
}

/// Wraps a typed async function as a registry entry.
pub(crate) fn into_remote_fn<A, R, F, Fut, E>(function: F) -> RemoteFn
where
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    E: Into<anyhow::Error> + Send + 'static,
{
    Arc::new(move |args: Vec<Value>| -> BoxedFuture<'static, ConduitResult<Value>> {
        let started = decode_args::<A>(args).map(&function);
        Box::pin(async move {
            let output = started?.await.map_err(|err| ConduitError::Other(err.into()))?;
            Ok(serde_json::to_value(output)?)
        })
    })
}

#[derive(Clone)]
enum Target {
    /// The implementation lives on this side
    Local(RemoteFn),
    /// Main side calling into a child through the pool
    Pool { pool: Arc<ContextPool>, bridge_id: String },
    /// Child side calling into main through its own context
    Parent { context: ContextRef, bridge_id: String },
}

/// Handle returned by `portal_to_child` / `portal_to_main`.
///
/// Whether the call runs locally or is proxied across the boundary is
/// decided when the handle is created; the call site is the same either
/// way.
pub struct RemoteFunction<A, R> {
    name: String,
    target: Target,
    _signature: PhantomData<fn(A) -> R>,
}

impl<A, R> Clone for RemoteFunction<A, R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            target: self.target.clone(),
            _signature: PhantomData,
        }
    }
}

impl<A, R> fmt::Debug for RemoteFunction<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFunction")
            .field("name", &self.name)
            .field("proxy", &self.is_proxy())
            .finish()
    }
}

impl<A, R> RemoteFunction<A, R> {
    pub(crate) fn local(name: String, function: RemoteFn) -> Self {
        Self { name, target: Target::Local(function), _signature: PhantomData }
    }

    pub(crate) fn via_pool(name: String, pool: Arc<ContextPool>, bridge_id: String) -> Self {
        Self { name, target: Target::Pool { pool, bridge_id }, _signature: PhantomData }
    }

    pub(crate) fn via_parent(name: String, context: ContextRef, bridge_id: String) -> Self {
        Self { name, target: Target::Parent { context, bridge_id }, _signature: PhantomData }
    }

    /// The exported name, `fn<N>`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `true` when calls cross the context boundary.
    pub fn is_proxy(&self) -> bool {
        !matches!(self.target, Target::Local(_))
    }
}

impl<A, R> RemoteFunction<A, R>
where
    A: Serialize,
    R: DeserializeOwned,
{
    pub async fn call(&self, args: A) -> ConduitResult<R> {
        let args = encode_args(&args)?;

        let value = match &self.target {
            Target::Local(function) => function(args).await?,
            Target::Pool { pool, bridge_id } => {
                let pending = pool.delegate_work(CallData::new(&self.name, args, bridge_id).to_value())?;
                log_call!(self.name, pending.call_id(), "delegated to child");
                pending.await?
            }
            Target::Parent { context, bridge_id } => {
                let call_id = new_call_id();
                log_call!(self.name, call_id, "calling main");
                let data = CallData::new(&self.name, args, bridge_id).to_value();
                dispatch_call(context, call_id, data, |_| {})?.await?
            }
        };

        Ok(serde_json::from_value(value)?)
    }
}
