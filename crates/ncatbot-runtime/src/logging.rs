//! `tracing-subscriber` setup.
//!
//! [`init_from_config`] is what the client calls when asked to install
//! logging; [`LoggingBuilder`] is there for binaries that want to pick
//! settings by hand, e.g. `LoggingBuilder::new().directive("ncatbot_core=debug").init()`.
//! `RUST_LOG`, when set, replaces the base level but not the directives.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::warn;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::{LogFormat, LogOutput, LogRotation, LoggingConfig, SpanEventConfig};

const DEFAULT_LOG_FILE: &str = "ncatbot.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpanEvents {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

impl SpanEvents {
    pub const NONE: Self = Self {
        new: false,
        enter: false,
        exit: false,
        close: false,
    };

    /// Creation and close only.
    pub const LIFECYCLE: Self = Self {
        new: true,
        enter: false,
        exit: false,
        close: true,
    };

    pub const FULL: Self = Self {
        new: true,
        enter: true,
        exit: true,
        close: true,
    };

    fn to_fmt_span(self) -> FmtSpan {
        [
            (self.new, FmtSpan::NEW),
            (self.enter, FmtSpan::ENTER),
            (self.exit, FmtSpan::EXIT),
            (self.close, FmtSpan::CLOSE),
        ]
        .into_iter()
        .filter(|(on, _)| *on)
        .fold(FmtSpan::NONE, |acc, (_, span)| acc | span)
    }
}

impl From<&SpanEventConfig> for SpanEvents {
    fn from(config: &SpanEventConfig) -> Self {
        Self {
            new: config.new,
            enter: config.enter,
            exit: config.exit,
            close: config.close,
        }
    }
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Never => Rotation::NEVER,
            LogRotation::Minutely => Rotation::MINUTELY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
        }
    }
}

/// Installs the subscriber described by `config`. An earlier subscriber stays.
pub fn init_from_config(config: &LoggingConfig) {
    let _ = LoggingBuilder::from_config(config).try_init();
}

#[derive(Debug)]
pub struct LoggingBuilder {
    directives: Vec<String>,
    level: Option<tracing::Level>,
    span_events: SpanEvents,
    format: LogFormat,
    output: LogOutput,
    show_target: bool,
    show_threads: bool,
    show_location: bool,
    file_path: Option<PathBuf>,
    rotation: LogRotation,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self {
            directives: Vec::new(),
            level: None,
            span_events: SpanEvents::NONE,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            show_target: true,
            show_threads: false,
            show_location: false,
            file_path: None,
            rotation: LogRotation::Daily,
        }
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        Self {
            directives: config
                .filters
                .iter()
                .map(|(module, level)| format!("{module}={}", level.as_str()))
                .collect(),
            level: Some(config.level.to_tracing_level()),
            span_events: SpanEvents::from(&config.span_events),
            format: config.format,
            output: config.output,
            show_target: true,
            show_threads: config.thread_ids,
            show_location: config.file_location,
            file_path: config.file_path.clone(),
            rotation: config.rotation,
        }
    }

    pub fn with_level(mut self, level: tracing::Level) -> Self {
        self.level = Some(level);
        self
    }

    /// e.g. `ncatbot_runtime=trace`; unparsable directives are skipped.
    pub fn directive(mut self, directive: &str) -> Self {
        self.directives.push(directive.to_string());
        self
    }

    pub fn span_events(mut self, events: SpanEvents) -> Self {
        self.span_events = events;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.show_target = enabled;
        self
    }

    /// Thread names and ids; the backend and runner threads are named.
    pub fn with_thread_ids(mut self, enabled: bool) -> Self {
        self.show_threads = enabled;
        self
    }

    /// Source file and line.
    pub fn with_file(mut self, enabled: bool) -> Self {
        self.show_location = enabled;
        self
    }

    /// Only read when `output` is [`LogOutput::File`].
    pub fn file_path(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    pub fn rotation(mut self, rotation: LogRotation) -> Self {
        self.rotation = rotation;
        self
    }

    fn build_filter(&self) -> EnvFilter {
        let base = self
            .level
            .unwrap_or(tracing::Level::INFO)
            .to_string()
            .to_lowercase();
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base));
        self.directives
            .iter()
            .filter_map(|directive| directive.parse().ok())
            .fold(filter, EnvFilter::add_directive)
    }

    /// Writer plus whether it takes ANSI colours. `None` when file output has
    /// no path and stdout stands in.
    fn writer(&self) -> Option<(BoxMakeWriter, bool)> {
        match (self.output, &self.file_path) {
            (LogOutput::Stdout, _) => Some((BoxMakeWriter::new(std::io::stdout), true)),
            (LogOutput::Stderr, _) => Some((BoxMakeWriter::new(std::io::stderr), true)),
            (LogOutput::File, Some(path)) => {
                Some((BoxMakeWriter::new(self.file_appender(path)), false))
            }
            (LogOutput::File, None) => None,
        }
    }

    fn file_appender(&self, path: &Path) -> RollingFileAppender {
        RollingFileAppender::new(
            self.rotation.into(),
            path.parent().unwrap_or_else(|| Path::new(".")),
            path.file_name()
                .unwrap_or_else(|| OsStr::new(DEFAULT_LOG_FILE)),
        )
    }

    fn fmt_layer(&self, writer: BoxMakeWriter, ansi: bool) -> BoxedLayer {
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_span_events(self.span_events.to_fmt_span())
            .with_target(self.show_target)
            .with_thread_ids(self.show_threads)
            .with_thread_names(self.show_threads)
            .with_file(self.show_location)
            .with_line_number(self.show_location);

        match self.format {
            #[cfg(feature = "json-log")]
            LogFormat::Json => layer.json().boxed(),
            LogFormat::Compact => layer.compact().boxed(),
            LogFormat::Full => layer.boxed(),
            LogFormat::Pretty => layer.pretty().boxed(),
        }
    }

    pub fn init(self) {
        let _ = self.try_init();
    }

    /// Fails if a global subscriber is already set.
    pub fn try_init(self) -> Result<(), TryInitError> {
        let writer = self.writer();
        let fell_back = writer.is_none();
        let (writer, ansi) =
            writer.unwrap_or_else(|| (BoxMakeWriter::new(std::io::stdout), true));

        tracing_subscriber::registry()
            .with(self.fmt_layer(writer, ansi))
            .with(self.build_filter())
            .try_init()?;

        if fell_back {
            warn!("File output requested but no file path configured, using stdout");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_from_config() {
        let config = LoggingConfig {
            level: LogLevel::Debug,
            thread_ids: true,
            filters: HashMap::from([("ncatbot_core".to_string(), LogLevel::Trace)]),
            span_events: SpanEventConfig {
                new: true,
                close: true,
                ..Default::default()
            },
            ..Default::default()
        };

        let builder = LoggingBuilder::from_config(&config);
        assert_eq!(builder.level, Some(tracing::Level::DEBUG));
        assert_eq!(builder.directives, vec!["ncatbot_core=trace".to_string()]);
        assert_eq!(builder.span_events, SpanEvents::LIFECYCLE);
        assert!(builder.show_threads);
        assert!(!builder.show_location);
    }

    #[test]
    fn test_span_events_flags() {
        assert_eq!(SpanEvents::NONE.to_fmt_span(), FmtSpan::NONE);
        assert_eq!(
            SpanEvents::LIFECYCLE.to_fmt_span(),
            FmtSpan::NEW | FmtSpan::CLOSE
        );
        assert_eq!(SpanEvents::FULL.to_fmt_span(), FmtSpan::FULL);
    }

    #[test]
    fn test_file_output_needs_path() {
        let builder = LoggingBuilder::new().output(LogOutput::File);
        assert!(builder.writer().is_none());

        let builder = builder.file_path(std::env::temp_dir().join("ncatbot-logging-test.log"));
        assert!(matches!(builder.writer(), Some((_, false))));
        assert!(matches!(
            LoggingBuilder::new().output(LogOutput::Stderr).writer(),
            Some((_, true))
        ));
    }

    #[test]
    fn test_rotation_mapping() {
        assert_eq!(Rotation::from(LogRotation::Daily), Rotation::DAILY);
        assert_eq!(Rotation::from(LogRotation::Never), Rotation::NEVER);
    }
}
