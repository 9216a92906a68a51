//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{EventBusConfig, LogOutput, LoggingConfig, NapCatConfig, NcatConfig, ensure_uin};

/// Validates the entire configuration.
///
/// Hard errors only; soft problems are reported by [`NcatConfig::issues`].
pub fn validate_config(config: &NcatConfig) -> ConfigResult<()> {
    ensure_uin(&config.bot_uin)?;
    ensure_uin(&config.root)?;
    validate_napcat_config(&config.napcat)?;
    validate_event_bus_config(&config.event_bus)?;
    validate_logging_config(&config.logging)?;

    if config.plugin.plugins_dir.as_os_str().is_empty() {
        return Err(ConfigError::validation("plugins_dir cannot be empty"));
    }

    Ok(())
}

fn validate_napcat_config(napcat: &NapCatConfig) -> ConfigResult<()> {
    validate_url(&napcat.ws_uri, "ws")?;
    validate_url(&napcat.webui_uri, "http")?;

    if napcat.ws_listen_ip.is_empty() {
        return Err(ConfigError::validation("ws_listen_ip cannot be empty"));
    }

    Ok(())
}

fn validate_event_bus_config(event_bus: &EventBusConfig) -> ConfigResult<()> {
    if !(event_bus.handler_timeout_secs > 0.0 && event_bus.handler_timeout_secs.is_finite()) {
        return Err(ConfigError::validation(
            "Handler timeout must be a positive number of seconds",
        ));
    }

    if !(event_bus.publish_wait_secs > 0.0 && event_bus.publish_wait_secs.is_finite()) {
        return Err(ConfigError::validation(
            "Publish wait must be a positive number of seconds",
        ));
    }

    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "File log output requires logging.file_path",
        ));
    }
    Ok(())
}

/// Validates a URL.
fn validate_url(url: &str, expected_scheme: &str) -> ConfigResult<()> {
    let valid_schemes = match expected_scheme {
        "ws" => ["ws://", "wss://"],
        "http" => ["http://", "https://"],
        _ => return Err(ConfigError::validation("Unknown URL scheme type")),
    };

    let Some(scheme) = valid_schemes.iter().find(|s| url.starts_with(*s)) else {
        return Err(ConfigError::invalid_url(
            url,
            format!("URL must start with one of: {valid_schemes:?}"),
        ));
    };

    if url.len() == scheme.len() {
        return Err(ConfigError::invalid_url(url, "missing host"));
    }

    Ok(())
}
