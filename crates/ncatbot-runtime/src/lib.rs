//! NcatBot Runtime - lifecycle and orchestration for the NcatBot framework.
//!
//! This crate provides:
//! - The [`LifecycleManager`] with its blocking, async and thread start modes
//! - Plugin loading (`Plugin`, `PluginLoader`)
//! - The [`BotClient`] facade
//! - Configuration loading (figment) and logging setup (tracing-subscriber)
//!
//! ```rust,ignore
//! use ncatbot_runtime::{BotClient, StartOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = BotClient::builder(services, parser).build()?;
//!     let api = client.run_backend_async(StartOptions::new().mock(true)).await?;
//!     api.call_api("get_login_info", serde_json::json!({})).await?;
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod plugin;

// Re-exports
pub use client::{BotClient, BotClientBuilder};
pub use config::{ConfigError, ConfigLoader, ConfigResult, NcatConfig};
pub use error::{LifecycleError, LifecycleResult, PluginError, PluginResult};
pub use lifecycle::{
    BACKEND_THREAD_NAME, LifecycleManager, LifecycleState, ProcessLauncher, START_OPTION_KEYS,
    StartOptions,
};
pub use logging::{LoggingBuilder, SpanEvents};
pub use plugin::{Plugin, PluginContext, PluginLoadState, PluginLoader};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use super::{BotClient, LifecycleError, NcatConfig, Plugin, PluginContext, StartOptions};
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
