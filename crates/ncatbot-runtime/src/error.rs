//! Runtime error types.

use ncatbot_core::{BoxError, BusError};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by the lifecycle calls.
///
/// A failure before the bot became ready is returned exactly as the main
/// task produced it.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// Bad start option or configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The external protocol process could not be launched.
    #[error("Failed to launch NapCat: {0}")]
    Launch(#[source] BoxError),

    #[error("Service layer failed: {0}")]
    Service(#[source] BoxError),

    /// `listen()` ended with an error.
    #[error("Transport failed: {0}")]
    Transport(#[source] BoxError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// Building a runtime or spawning the backend thread failed.
    #[error("Runtime setup failed: {0}")]
    Runtime(#[from] std::io::Error),

    /// The main task finished before signalling ready without an error.
    #[error("Bot stopped before it became ready")]
    StartupAborted,

    /// A start call raced another start that has not finished.
    #[error("Bot is already starting")]
    AlreadyStarting,

    /// `run`/`try_run` was called from inside a tokio runtime.
    #[error("Blocking start called from within an async runtime; use run_backend_async")]
    NestedRuntime,

    /// The main task was cancelled by `shutdown`, `bot_exit` or Ctrl-C.
    #[error("Bot was cancelled")]
    Cancelled,

    #[error("Main task panicked: {0}")]
    Panicked(String),

    /// The backend thread ended without reporting a result.
    #[error("Backend thread exited unexpectedly")]
    BackendExited,
}

impl LifecycleError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Plugin loader errors.
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Plugin '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Plugin '{plugin}' depends on missing plugin '{dependency}'")]
    MissingDependency { plugin: String, dependency: String },

    /// Names of the plugins taking part in the cycle.
    #[error("Circular dependency among plugins: {}", .0.join(", "))]
    CircularDependency(Vec<String>),

    #[error("Plugin '{plugin}' failed to load: {source}")]
    LoadFailed {
        plugin: String,
        #[source]
        source: BoxError,
    },

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Result type for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;
