//! # NcatBot Core
//!
//! The event core of the NcatBot framework: a priority- and pattern-aware
//! publish/subscribe bus, the dispatcher feeding it from the protocol
//! transport, and a blocking bridge into async code.
//!
//! ## Architecture Layers
//!
//! ### Foundation Layer
//!
//! - **Envelope**: the record carried through one publish ([`Envelope`])
//! - **Errors**: what handlers, parsers and the runner can fail with
//!
//! ### Framework Layer
//!
//! - **Handlers**: async or blocking callables over an envelope ([`Handler`])
//! - **Event bus**: ordered, pattern-matched delivery ([`EventBus`])
//! - **Registry**: typed registration with filters ([`EventRegistry`])
//! - **Dispatcher**: raw payload to published envelope ([`EventDispatcher`])
//!
//! ### Integration Layer
//!
//! - **Collaborators**: [`Transport`], [`Services`], [`EventParser`]
//! - **API**: the [`BotApi`] handle over the transport's [`ApiSender`]
//!
//! ## Data Flow
//!
//! ```text
//! ┌───────────┐  raw JSON  ┌─────────────────┐  Envelope  ┌──────────┐
//! │ Transport │───────────▶│ EventDispatcher │───────────▶│ EventBus │──▶ handlers
//! └───────────┘            └─────────────────┘            └──────────┘
//!                                  │ EventParser
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use ncatbot_core::{Envelope, EventBus, Handler};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = EventBus::new();
//!     bus.subscribe("t", Handler::new(|_| async { Ok(json!("a")) }).named("h1"), 10)
//!         .unwrap();
//!     bus.subscribe("t", Handler::new(|_| async { Ok(json!("b")) }).named("h2"), 1)
//!         .unwrap();
//!
//!     let results = bus.publish(Envelope::shared("t", ())).await;
//!     assert_eq!(results, vec![json!("a"), json!("b")]);
//! }
//! ```

// Architectural layers
pub mod foundation;
pub mod framework;
pub mod integration;
pub mod runner;

// Re-export foundation types
pub use foundation::{
    ApiError, ApiResult, BoxError, BusError, BusResult, Envelope, HandlerError,
    HandlerTimeoutError, ParseError, ParseResult, Payload, RunnerError, RunnerResult,
    ThreadsafePublishError, panic_message,
};

// Re-export framework types
pub use framework::{
    DEFAULT_HANDLER_TIMEOUT, DEFAULT_PUBLISH_WAIT, EventBus, EventCategory, EventDispatcher,
    EventFilter, EventRegistry, Handler, HandlerFuture, HandlerResult, OwnerMeta, REGEX_PREFIX,
    SubscribeOptions, TOPIC_NAMESPACE, parse_event_category,
};

// Re-export integration types
pub use integration::{ApiSender, BotApi, DisconnectedSender, EventParser, Services, Transport};

pub use runner::{AsyncRunner, run_sync, run_sync_with};

/// Prelude for common imports.
pub mod prelude {
    pub use super::foundation::*;
    pub use super::framework::{
        EventBus, EventCategory, EventRegistry, Handler, HandlerResult, OwnerMeta,
        SubscribeOptions,
    };
    pub use super::integration::{BotApi, EventParser};
    pub use super::runner::{AsyncRunner, run_sync, run_sync_with};
}
