//! Collaborator seams towards the protocol transport and service layer.
//!
//! ```text
//! Services ──▶ Transport ──raw JSON──▶ EventDispatcher ──▶ EventBus
//!                 ▲
//!                 └── ApiSender ◀── BotApi
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::foundation::error::BoxError;
use crate::framework::dispatcher::EventDispatcher;
use crate::integration::api::ApiSender;

/// The always-async protocol connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hands over the dispatcher that receives every inbound payload.
    fn set_event_dispatcher(&self, dispatcher: Arc<EventDispatcher>);

    /// Mechanism used by [`BotApi`](crate::BotApi) to send requests.
    fn api_sender(&self) -> Arc<dyn ApiSender>;

    /// Receives payloads until the connection ends or the task is cancelled.
    async fn listen(&self) -> Result<(), BoxError>;
}

/// The service layer owning the transport.
#[async_trait]
pub trait Services: Send + Sync {
    async fn load_all(&self) -> Result<(), BoxError>;

    async fn close_all(&self) -> Result<(), BoxError>;

    fn transport(&self) -> Arc<dyn Transport>;

    fn set_debug_mode(&self, debug: bool);

    /// Test mode means no external process and no real connection.
    fn set_test_mode(&self, test: bool);
}
