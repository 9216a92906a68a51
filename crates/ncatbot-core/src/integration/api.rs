//! The bot API handle.
//!
//! [`BotApi`] is what the start calls hand back to the embedder and what the
//! dispatcher passes to the [`EventParser`](crate::EventParser). It wraps the
//! transport's [`ApiSender`] and adds a blocking entry point that goes
//! through the [`AsyncRunner`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use crate::foundation::error::{ApiError, ApiResult};
use crate::runner::AsyncRunner;

/// Transport-side mechanism for issuing an API call.
#[async_trait]
pub trait ApiSender: Send + Sync {
    /// Sends `action` with `params` and returns the response data.
    async fn send(&self, action: &str, params: Value) -> ApiResult<Value>;
}

/// Sender used before a transport is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisconnectedSender;

#[async_trait]
impl ApiSender for DisconnectedSender {
    async fn send(&self, _action: &str, _params: Value) -> ApiResult<Value> {
        Err(ApiError::NotConnected)
    }
}

/// Cloneable handle for calling the bot API.
#[derive(Clone)]
pub struct BotApi {
    sender: Arc<dyn ApiSender>,
    runner: Option<AsyncRunner>,
}

impl BotApi {
    pub fn new(sender: Arc<dyn ApiSender>) -> Self {
        Self {
            sender,
            runner: None,
        }
    }

    /// An API handle whose every call fails with [`ApiError::NotConnected`].
    pub fn disconnected() -> Self {
        Self::new(Arc::new(DisconnectedSender))
    }

    /// Uses `runner` for blocking calls instead of the process-wide one.
    pub fn with_runner(mut self, runner: AsyncRunner) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Calls `action` asynchronously.
    pub async fn call_api(&self, action: &str, params: Value) -> ApiResult<Value> {
        trace!(action, "Calling bot API");
        self.sender.send(action, params).await
    }

    /// Calls `action` from synchronous code, blocking the current thread.
    pub fn call_api_blocking(
        &self,
        action: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> ApiResult<Value> {
        let runner = match &self.runner {
            Some(runner) => runner.clone(),
            None => AsyncRunner::get_instance()?,
        };
        let api = self.clone();
        let action = action.to_string();
        runner.run(async move { api.call_api(&action, params).await }, timeout)?
    }
}

impl fmt::Debug for BotApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotApi").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl ApiSender for Recorder {
        async fn send(&self, action: &str, params: Value) -> ApiResult<Value> {
            self.calls.lock().push((action.to_string(), params));
            Ok(json!({ "message_id": 7 }))
        }
    }

    #[tokio::test]
    async fn test_call_api_forwards_to_sender() {
        let recorder = Arc::new(Recorder::default());
        let api = BotApi::new(recorder.clone());

        let data = api
            .call_api("send_private_msg", json!({ "user_id": 1 }))
            .await
            .unwrap();

        assert_eq!(data["message_id"], 7);
        assert_eq!(recorder.calls.lock()[0].0, "send_private_msg");
    }

    #[test]
    fn test_call_api_blocking() {
        let recorder = Arc::new(Recorder::default());
        let api = BotApi::new(recorder.clone()).with_runner(AsyncRunner::new().unwrap());

        let data = api
            .call_api_blocking("get_login_info", json!({}), Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(data["message_id"], 7);
        assert_eq!(recorder.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_disconnected_api() {
        let err = BotApi::disconnected()
            .call_api("anything", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotConnected));
    }
}
