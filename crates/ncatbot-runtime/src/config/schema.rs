//! Configuration schema definitions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use ncatbot_core::{DEFAULT_HANDLER_TIMEOUT, DEFAULT_PUBLISH_WAIT};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::error::{ConfigError, ConfigResult};

/// Placeholder QQ number shipped in the default configuration.
pub const DEFAULT_BOT_UIN: &str = "123456";
pub const DEFAULT_ROOT: &str = "123456";
pub const DEFAULT_WS_TOKEN: &str = "napcat_ws";
pub const DEFAULT_WEBUI_TOKEN: &str = "napcat_webui";

const TOKEN_SPECIAL_CHARS: &str = "-_.~!()*";
const TOKEN_MIN_LEN: usize = 12;
const LISTEN_ALL: &str = "0.0.0.0";

/// Short keys accepted by [`NcatConfig::update_value`] and the start options.
const KEY_ALIASES: &[(&str, &str)] = &[
    ("ws_uri", "napcat.ws_uri"),
    ("ws_token", "napcat.ws_token"),
    ("ws_listen_ip", "napcat.ws_listen_ip"),
    ("webui_uri", "napcat.webui_uri"),
    ("webui_token", "napcat.webui_token"),
    ("enable_webui", "napcat.enable_webui"),
    ("remote_mode", "napcat.remote_mode"),
    ("plugins_dir", "plugin.plugins_dir"),
    ("plugin_blacklist", "plugin.plugin_blacklist"),
    ("load_plugin", "plugin.load_plugin"),
];

/// Root configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NcatConfig {
    /// QQ number of the bot account.
    #[serde(deserialize_with = "deserialize_uin")]
    pub bot_uin: String,

    /// QQ number of the administrator.
    #[serde(deserialize_with = "deserialize_uin")]
    pub root: String,

    /// Verbose mode; also implied by mock starts.
    pub debug: bool,

    pub napcat: NapCatConfig,
    pub plugin: PluginConfig,
    pub event_bus: EventBusConfig,
    pub logging: LoggingConfig,
}

impl Default for NcatConfig {
    fn default() -> Self {
        Self {
            bot_uin: DEFAULT_BOT_UIN.to_string(),
            root: DEFAULT_ROOT.to_string(),
            debug: false,
            napcat: NapCatConfig::default(),
            plugin: PluginConfig::default(),
            event_bus: EventBusConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Accepts both `"123"` and `123`.
fn deserialize_uin<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Uin {
        Text(String),
        Number(u64),
    }

    Ok(match Uin::deserialize(deserializer)? {
        Uin::Text(text) => text,
        Uin::Number(number) => number.to_string(),
    })
}

/// Settings of the NapCat protocol process and its connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NapCatConfig {
    pub ws_uri: String,
    pub ws_token: String,
    /// Address the NapCat websocket server binds to.
    pub ws_listen_ip: String,
    pub webui_uri: String,
    pub webui_token: String,
    pub enable_webui: bool,
    /// NapCat runs elsewhere; never launch it locally.
    pub remote_mode: bool,
}

impl Default for NapCatConfig {
    fn default() -> Self {
        Self {
            ws_uri: "ws://localhost:3001".to_string(),
            ws_token: DEFAULT_WS_TOKEN.to_string(),
            ws_listen_ip: "localhost".to_string(),
            webui_uri: "http://localhost:6099".to_string(),
            webui_token: DEFAULT_WEBUI_TOKEN.to_string(),
            enable_webui: true,
            remote_mode: false,
        }
    }
}

impl NapCatConfig {
    /// Host part of `ws_uri`.
    pub fn ws_host(&self) -> &str {
        let rest = self
            .ws_uri
            .split_once("://")
            .map_or(self.ws_uri.as_str(), |(_, rest)| rest);
        rest.split(['/', ':']).next().unwrap_or_default()
    }

    /// Port part of `ws_uri`, if one is given.
    pub fn ws_port(&self) -> Option<u16> {
        let rest = self
            .ws_uri
            .split_once("://")
            .map_or(self.ws_uri.as_str(), |(_, rest)| rest);
        let authority = rest.split('/').next()?;
        authority.rsplit_once(':')?.1.parse().ok()
    }

    /// Whether NapCat is expected on this machine.
    pub fn is_local(&self) -> bool {
        !self.remote_mode && matches!(self.ws_host(), "localhost" | "127.0.0.1")
    }

    fn normalize(&mut self) {
        if !(self.ws_uri.starts_with("ws://") || self.ws_uri.starts_with("wss://")) {
            self.ws_uri = format!("ws://{}", self.ws_uri);
        }
        if !(self.webui_uri.starts_with("http://") || self.webui_uri.starts_with("https://")) {
            self.webui_uri = format!("http://{}", self.webui_uri);
        }
    }
}

/// Plugin discovery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    pub plugins_dir: PathBuf,
    /// Plugin names never loaded from the external set.
    pub plugin_blacklist: Vec<String>,
    /// Load external plugins on start. Built-ins always load.
    pub load_plugin: bool,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            plugins_dir: PathBuf::from("plugins"),
            plugin_blacklist: Vec::new(),
            load_plugin: false,
        }
    }
}

/// Event bus tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Per-handler timeout applied when a subscription sets none.
    pub handler_timeout_secs: f64,
    /// Default wait of blocking cross-thread publishes.
    pub publish_wait_secs: f64,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            handler_timeout_secs: DEFAULT_HANDLER_TIMEOUT.as_secs_f64(),
            publish_wait_secs: DEFAULT_PUBLISH_WAIT.as_secs_f64(),
        }
    }
}

impl EventBusConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.handler_timeout_secs).unwrap_or(DEFAULT_HANDLER_TIMEOUT)
    }

    pub fn publish_wait(&self) -> Duration {
        Duration::try_from_secs_f64(self.publish_wait_secs).unwrap_or(DEFAULT_PUBLISH_WAIT)
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Logging configuration consumed by [`crate::logging::init_from_config`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Target file when `output = "file"`.
    pub file_path: Option<PathBuf>,
    pub rotation: LogRotation,
    pub thread_ids: bool,
    /// Include file names and line numbers.
    pub file_location: bool,
    /// Per-module levels, e.g. `ncatbot_core = "debug"`.
    pub filters: HashMap<String, LogLevel>,
    pub span_events: SpanEventConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::default(),
            output: LogOutput::default(),
            file_path: None,
            rotation: LogRotation::default(),
            thread_ids: false,
            file_location: false,
            filters: HashMap::new(),
            span_events: SpanEventConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    #[cfg(feature = "json-log")]
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// How often the log file rolls over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Never,
    Minutely,
    Hourly,
    #[default]
    Daily,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

// =============================================================================
// Checks and updates
// =============================================================================

/// Whether `token` is acceptable for an exposed endpoint.
///
/// At least 12 characters with a digit, a lowercase letter, an uppercase
/// letter and one of `-_.~!()*`.
pub fn is_strong_token(token: &str) -> bool {
    token.chars().count() >= TOKEN_MIN_LEN
        && token.chars().any(|c| c.is_ascii_digit())
        && token.chars().any(|c| c.is_ascii_lowercase())
        && token.chars().any(|c| c.is_ascii_uppercase())
        && token.chars().any(|c| TOKEN_SPECIAL_CHARS.contains(c))
}

/// Rejects QQ numbers containing anything but digits.
pub fn ensure_uin(uin: &str) -> ConfigResult<()> {
    if uin.is_empty() || !uin.chars().all(|c| c.is_ascii_digit()) {
        return Err(ConfigError::InvalidUin(uin.to_string()));
    }
    Ok(())
}

/// Resolves a short key to its dotted path.
pub fn resolve_key(key: &str) -> &str {
    KEY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map_or(key, |(_, path)| path)
}

impl NcatConfig {
    pub fn is_default_uin(&self) -> bool {
        self.bot_uin == DEFAULT_BOT_UIN
    }

    pub fn is_default_root(&self) -> bool {
        self.root == DEFAULT_ROOT
    }

    /// Non-fatal problems worth a warning at startup.
    pub fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.napcat.ws_listen_ip == LISTEN_ALL && !is_strong_token(&self.napcat.ws_token) {
            issues.push(format!(
                "ws_token is weak while NapCat listens on {LISTEN_ALL}"
            ));
        }
        if self.napcat.enable_webui && !is_strong_token(&self.napcat.webui_token) {
            issues.push("webui_token is weak while the WebUI is enabled".to_string());
        }
        if self.is_default_uin() {
            issues.push("bot uin not configured".to_string());
        }
        if self.is_default_root() {
            issues.push("root not configured".to_string());
        }
        issues
    }

    /// Adds missing URI schemes.
    pub fn normalize(&mut self) {
        self.napcat.normalize();
    }

    /// Sets one value by direct key (`debug`), dotted path
    /// (`napcat.ws_uri`) or alias (`ws_uri`).
    ///
    /// The new value must have the JSON type of the current one; QQ numbers
    /// may also be given as integers.
    pub fn update_value(&mut self, key: &str, value: &Value) -> ConfigResult<()> {
        let path = resolve_key(key);
        let mut tree =
            serde_json::to_value(&*self).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        let slot = path
            .split('.')
            .try_fold(&mut tree, |node, segment| node.get_mut(segment))
            .ok_or_else(|| ConfigError::UnknownOption(key.to_string()))?;

        *slot = coerce(key, path, slot, value)?;

        let mut updated: NcatConfig = serde_json::from_value(tree)
            .map_err(|e| ConfigError::invalid_value(key, e.to_string()))?;
        updated.normalize();
        *self = updated;
        Ok(())
    }
}

fn coerce(key: &str, path: &str, current: &Value, new: &Value) -> ConfigResult<Value> {
    if matches!(path, "bot_uin" | "root") {
        let uin = match new {
            Value::String(text) => text.clone(),
            Value::Number(number) => number.to_string(),
            other => {
                return Err(ConfigError::invalid_value(
                    key,
                    format!("expected a QQ number, got {}", kind(other)),
                ));
            }
        };
        ensure_uin(&uin)?;
        return Ok(Value::String(uin));
    }

    if current.is_null() || kind(current) == kind(new) {
        Ok(new.clone())
    } else {
        Err(ConfigError::invalid_value(
            key,
            format!("expected {}, got {}", kind(current), kind(new)),
        ))
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
