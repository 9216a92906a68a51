//! Configuration module for the NcatBot runtime.
//!
//! Layered loading through figment, the start-option update path and
//! validation of the resulting [`NcatConfig`].

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    DEFAULT_BOT_UIN, DEFAULT_ROOT, DEFAULT_WEBUI_TOKEN, DEFAULT_WS_TOKEN, EventBusConfig,
    LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, NapCatConfig, NcatConfig,
    PluginConfig, SpanEventConfig, ensure_uin, is_strong_token, resolve_key,
};
pub use validation::validate_config;
