//! Unified error types for the NcatBot core.
//!
//! Every public entry point of the bus and the dispatcher recovers handler and
//! parser failures locally; the types below are what gets *recorded* (on an
//! [`Envelope`](crate::Envelope)) or returned from the few fallible calls
//! (`subscribe`, the thread-safe publish helpers, the async runner).

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Boxed dynamic error used at collaborator seams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// =============================================================================
// Handler Errors
// =============================================================================

/// A handler did not finish within its timeout.
#[derive(Debug, Clone, Error)]
#[error("handler '{handler}' from {owner} timed out after {timeout:?}")]
pub struct HandlerTimeoutError {
    /// Name of the owner (usually a plugin) that registered the handler.
    pub owner: String,
    /// Name of the handler.
    pub handler: String,
    /// The timeout that elapsed.
    pub timeout: Duration,
}

/// A failure recorded on an envelope while publishing it.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// The handler exceeded its timeout.
    #[error(transparent)]
    Timeout(#[from] HandlerTimeoutError),

    /// The handler returned an error.
    #[error("handler '{handler}' failed: {error}")]
    Failed {
        /// Name of the failing handler.
        handler: String,
        /// The error it returned.
        error: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// The handler panicked.
    #[error("handler '{handler}' panicked: {message}")]
    Panicked {
        /// Name of the panicking handler.
        handler: String,
        /// The panic message, if it was a string.
        message: String,
    },
}

impl HandlerError {
    /// Name of the handler this failure belongs to.
    pub fn handler_name(&self) -> &str {
        match self {
            Self::Timeout(e) => &e.handler,
            Self::Failed { handler, .. } | Self::Panicked { handler, .. } => handler,
        }
    }

    /// Returns the timeout details if this is a timeout.
    pub fn as_timeout(&self) -> Option<&HandlerTimeoutError> {
        match self {
            Self::Timeout(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn failed(handler: &str, error: BoxError) -> Self {
        Self::Failed {
            handler: handler.to_string(),
            error: Arc::from(error),
        }
    }

    pub(crate) fn panicked(handler: &str, payload: &(dyn std::any::Any + Send)) -> Self {
        Self::Panicked {
            handler: handler.to_string(),
            message: panic_message(payload),
        }
    }
}

/// Best-effort extraction of a panic payload's message.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// =============================================================================
// Bus Errors
// =============================================================================

/// Errors returned by [`EventBus`](crate::EventBus) registration.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// A `re:` pattern did not compile.
    #[error("invalid regex pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The pattern text without the `re:` tag.
        pattern: String,
        /// Compiler message.
        reason: String,
    },
}

/// Why a cross-thread publish produced no results.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThreadsafePublishError {
    /// The bus is not bound to a runtime.
    #[error("event bus is not bound to a runtime")]
    NotBound,
    /// The publish did not finish in time.
    #[error("publish timed out after {0:?}")]
    Timeout(Duration),
    /// The runtime dropped or aborted the publish task.
    #[error("publish task was aborted before completion")]
    Aborted,
}

// =============================================================================
// Parse Errors
// =============================================================================

/// Errors produced by an [`EventParser`](crate::EventParser).
#[derive(Debug, Error)]
pub enum ParseError {
    /// The payload is malformed or of an unknown shape.
    #[error("invalid event payload: {0}")]
    Invalid(String),

    /// The parser itself failed.
    #[error("event parser failure: {0}")]
    Internal(BoxError),
}

impl ParseError {
    /// Creates an invalid-payload error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid(reason.into())
    }
}

impl From<serde_json::Error> for ParseError {
    fn from(err: serde_json::Error) -> Self {
        Self::Invalid(err.to_string())
    }
}

// =============================================================================
// API Errors
// =============================================================================

/// Error type for API calls.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The bot is not connected.
    #[error("bot is not connected")]
    NotConnected,
    /// The API call timed out.
    #[error("API call timed out")]
    Timeout,
    /// The API returned an error.
    #[error("API error ({retcode}): {message}")]
    ApiError { retcode: i64, message: String },
    /// Failed to serialize/deserialize.
    #[error("serialization error: {0}")]
    SerializationError(String),
    /// The blocking bridge failed.
    #[error(transparent)]
    Runner(#[from] RunnerError),
    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

// =============================================================================
// Runner Errors
// =============================================================================

/// Errors returned by [`AsyncRunner`](crate::AsyncRunner).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunnerError {
    /// The background runtime did not come up within the startup window.
    #[error("async runner failed to start: {0}")]
    StartupFailed(String),
    /// The submitted future did not complete in time.
    #[error("async runner call timed out after {0:?}")]
    Timeout(Duration),
    /// The runner was shut down before the future completed.
    #[error("async runner is not running")]
    NotRunning,
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for bus registration.
pub type BusResult<T> = Result<T, BusError>;

/// Result type for event parsing.
pub type ParseResult<T> = Result<T, ParseError>;

/// Result type for API calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type for runner calls.
pub type RunnerResult<T> = Result<T, RunnerError>;
