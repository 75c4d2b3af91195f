//! The single function contract every stage wraps: `(context) -> result`.
//!
//! The wrapped handler's arguments travel inside [`crate::context::RequestContext`]
//! rather than as a separate parameter, so every stage sees an identical call
//! shape and composition is just function wrapping, not a growing argument list.

use crate::context::RequestContext;
use crate::error::Error;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The business result of one invocation, represented as JSON so the core never
/// needs to know the handler's concrete return type. Idempotent replay and cache
/// hits deserialize back into this same representation.
pub type HandlerResult = std::result::Result<serde_json::Value, Error>;

/// A boxed, clonable handler: `(RequestContext) -> Future<Output = HandlerResult>`.
pub type HandlerFn = Arc<dyn Fn(RequestContext) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// A stage wraps an inner handler and returns a new handler, composing via plain
/// function wrapping rather than dynamic dispatch over an inheritance hierarchy.
pub trait Stage: Send + Sync {
    fn wrap(&self, inner: HandlerFn) -> HandlerFn;
}
