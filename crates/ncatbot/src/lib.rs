//! # NcatBot
//!
//! A QQ bot framework driving a NapCat connection through an ordered,
//! pattern-matched event bus.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐     ┌────────────┐     ┌──────────┐
//! │ Transport │────▶│ Dispatcher │────▶│ EventBus │──▶ handlers (priority order)
//! └───────────┘     └────────────┘     └──────────┘
//!       ▲                 │ parser          ▲
//!       │                 ▼                 │
//!   Services ◀──── LifecycleManager ────▶ plugins
//! ```
//!
//! - **Core** ([`core`]): envelope, bus, registry, dispatcher, `AsyncRunner`
//! - **Runtime** ([`runtime`]): lifecycle, plugins, configuration, logging
//! - **OneBot** ([`onebot`]): typed OneBot v11 events and their parser
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ncatbot::prelude::*;
//!
//! fn main() {
//!     let client = BotClient::builder(services, Arc::new(OneBotParser::new()))
//!         .init_logging(true)
//!         .build()
//!         .expect("valid configuration");
//!
//!     client
//!         .registry()
//!         .on_group_message(|event: Arc<MessageEvent>| async move {
//!             event.reply(&event.plain_text()).await?;
//!             Ok(())
//!         })
//!         .expect("subscribed");
//!
//!     client.run(StartOptions::new().bot_uin(10001));
//! }
//! ```
//!
//! ## Features
//!
//! - `onebot` *(default)*: OneBot v11 adapter
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use ncatbot_core as core;
#[cfg(feature = "onebot")]
pub use ncatbot_adapter_onebot as onebot;
pub use ncatbot_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use ncatbot::prelude::*;
/// ```
pub mod prelude {
    // Entry point
    pub use ncatbot_runtime::{
        BotClient, LifecycleError, LifecycleState, NcatConfig, Plugin, PluginContext,
        StartOptions,
    };

    // Event system
    pub use ncatbot_core::{
        BotApi, BoxError, Envelope, EventBus, EventCategory, EventRegistry, Handler,
        HandlerResult, SubscribeOptions,
    };

    // Collaborators to implement
    pub use ncatbot_core::{ApiSender, EventParser, Services, Transport};

    #[cfg(feature = "onebot")]
    pub use ncatbot_adapter_onebot::{
        MessageEvent, MetaEvent, NoticeEvent, OneBotApi, OneBotParser, OneBotRegistryExt,
        RequestEvent,
    };

    pub use std::sync::Arc;
}
