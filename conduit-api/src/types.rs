use crate::errors::ConduitError;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

// Type aliases for common types
pub type ConduitResult<T> = Result<T, ConduitError>;
pub type BoxedFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A registered function as stored in a portal registry: JSON arguments in,
/// JSON result out.
pub type RemoteFn = Arc<dyn Fn(Vec<Value>) -> BoxedFuture<'static, ConduitResult<Value>> + Send + Sync>;
