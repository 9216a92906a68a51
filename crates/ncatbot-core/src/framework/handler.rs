//! Event handlers.
//!
//! A [`Handler`] is a named callable taking the shared [`Envelope`]. Handlers
//! come in two flavours:
//!
//! - **async** handlers return a future and are awaited on the publishing task;
//! - **blocking** handlers are plain functions run on tokio's blocking pool so
//!   they never stall the runtime.
//!
//! The name is what the bus uses as the tie-breaker when ordering handlers of
//! equal priority, and what shows up in logs and recorded failures. It
//! defaults to the type name of the wrapped callable.
//!
//! # Example
//!
//! ```rust,ignore
//! let greet = Handler::new(|env: Arc<Envelope>| async move {
//!     Ok(serde_json::json!(format!("hello from {}", env.topic())))
//! })
//! .named("greet");
//! ```

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::foundation::envelope::Envelope;
use crate::foundation::error::{BoxError, HandlerError};

/// What a handler returns: a JSON result or a boxed error.
pub type HandlerResult = Result<Value, BoxError>;

/// Boxed future returned by async handlers.
pub type HandlerFuture = BoxFuture<'static, HandlerResult>;

type AsyncFn = dyn Fn(Arc<Envelope>) -> HandlerFuture + Send + Sync;
type BlockingFn = dyn Fn(Arc<Envelope>) -> HandlerResult + Send + Sync;

#[derive(Clone)]
enum HandlerKind {
    Async(Arc<AsyncFn>),
    Blocking(Arc<BlockingFn>),
}

/// A named, cloneable event handler.
#[derive(Clone)]
pub struct Handler {
    name: Arc<str>,
    kind: HandlerKind,
}

impl Handler {
    /// Wraps an async callable.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<Envelope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            name: Arc::from(std::any::type_name::<F>()),
            kind: HandlerKind::Async(Arc::new(move |env| f(env).boxed())),
        }
    }

    /// Wraps a synchronous callable that will run on the blocking pool.
    pub fn blocking<F>(f: F) -> Self
    where
        F: Fn(Arc<Envelope>) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(std::any::type_name::<F>()),
            kind: HandlerKind::Blocking(Arc::new(f)),
        }
    }

    /// Overrides the handler name.
    pub fn named(mut self, name: impl AsRef<str>) -> Self {
        self.name = Arc::from(name.as_ref());
        self
    }

    /// The handler name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this handler runs on the blocking pool.
    pub fn is_blocking(&self) -> bool {
        matches!(self.kind, HandlerKind::Blocking(_))
    }

    /// Runs the handler once, turning errors and panics into [`HandlerError`].
    ///
    /// Timeouts are applied by the caller.
    pub(crate) async fn invoke(&self, envelope: Arc<Envelope>) -> Result<Value, HandlerError> {
        match &self.kind {
            HandlerKind::Async(f) => {
                let fut = f(envelope);
                match AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(HandlerError::failed(&self.name, e)),
                    Err(panic) => Err(HandlerError::panicked(&self.name, panic.as_ref())),
                }
            }
            HandlerKind::Blocking(f) => {
                let f = Arc::clone(f);
                match tokio::task::spawn_blocking(move || f(envelope)).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(HandlerError::failed(&self.name, e)),
                    Err(join_err) if join_err.is_panic() => {
                        let panic = join_err.into_panic();
                        Err(HandlerError::panicked(&self.name, panic.as_ref()))
                    }
                    Err(join_err) => Err(HandlerError::failed(&self.name, Box::new(join_err))),
                }
            }
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("blocking", &self.is_blocking())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_async_handler_value() {
        let h = Handler::new(|_env| async { HandlerResult::Ok(Value::from("a")) }).named("h");
        let out = h.invoke(Envelope::shared("t", ())).await;
        assert_eq!(out.unwrap(), Value::from("a"));
        assert_eq!(h.name(), "h");
        assert!(!h.is_blocking());
    }

    #[tokio::test]
    async fn test_async_handler_panic_is_caught() {
        let h = Handler::new(|_env| async {
            if true {
                panic!("boom");
            }
            HandlerResult::Ok(Value::Null)
        })
        .named("panicky");

        let err = h.invoke(Envelope::shared("t", ())).await.unwrap_err();
        assert!(matches!(err, HandlerError::Panicked { ref message, .. } if message == "boom"));
        assert_eq!(err.handler_name(), "panicky");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_blocking_handler_error() {
        let h = Handler::blocking(|_env| Err("nope".into())).named("sync");
        assert!(h.is_blocking());

        let err = h.invoke(Envelope::shared("t", ())).await.unwrap_err();
        assert!(matches!(err, HandlerError::Failed { .. }));
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_default_name_is_type_name() {
        fn my_handler(_env: Arc<Envelope>) -> HandlerResult {
            Ok(Value::Null)
        }
        let h = Handler::blocking(my_handler);
        assert!(h.name().ends_with("my_handler"));
    }
}
