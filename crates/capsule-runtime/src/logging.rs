//! Logging setup over `tracing-subscriber`.
//!
//! Normally driven by the `[logging]` section of the configuration:
//!
//! ```rust,ignore
//! use capsule_runtime::config::ConfigLoader;
//! use capsule_runtime::logging;
//!
//! let config = ConfigLoader::new().load()?;
//! logging::init_from_config(&config.logging);
//! ```
//!
//! Hosts that skip the config layer use the builder directly:
//!
//! ```rust,ignore
//! use capsule_runtime::logging::LoggingBuilder;
//! use tracing_subscriber::fmt::format::FmtSpan;
//!
//! LoggingBuilder::new()
//!     .directive("capsule_framework=debug")
//!     .span_events(FmtSpan::NEW | FmtSpan::CLOSE)
//!     .init();
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::warn;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::{LogFormat, LogOutput, LogRotation, LoggingConfig, SpanEventConfig};

/// Installs the global subscriber described by `config`.  A subscriber that
/// is already installed wins.
pub fn init_from_config(config: &LoggingConfig) {
    let _ = LoggingBuilder::from_config(config).try_init();
}

fn span_flags(config: &SpanEventConfig) -> FmtSpan {
    [
        (config.new, FmtSpan::NEW),
        (config.enter, FmtSpan::ENTER),
        (config.exit, FmtSpan::EXIT),
        (config.close, FmtSpan::CLOSE),
    ]
    .into_iter()
    .filter(|(on, _)| *on)
    .fold(FmtSpan::NONE, |flags, (_, flag)| flags | flag)
}

// =============================================================================
// LoggingBuilder
// =============================================================================

/// Assembles the filter, the format layer and the writer.
///
/// `RUST_LOG`, when set, replaces the base level; directives added with
/// [`LoggingBuilder::directive`] are applied on top.
#[derive(Debug)]
pub struct LoggingBuilder {
    directives: Vec<String>,
    level: Option<tracing::Level>,
    span_events: FmtSpan,
    format: LogFormat,
    output: LogOutput,
    with_target: bool,
    with_thread_ids: bool,
    with_file_location: bool,
    file_path: Option<PathBuf>,
    rotation: LogRotation,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingBuilder {
    /// Compact output on stdout at `info`, targets shown.
    pub fn new() -> Self {
        Self {
            directives: Vec::new(),
            level: None,
            span_events: FmtSpan::NONE,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            with_target: true,
            with_thread_ids: false,
            with_file_location: false,
            file_path: None,
            rotation: LogRotation::default(),
        }
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        let mut filters: Vec<_> = config.filters.iter().collect();
        filters.sort_by(|a, b| a.0.cmp(b.0));

        Self {
            directives: filters
                .into_iter()
                .map(|(module, level)| format!("{module}={}", level.as_str()))
                .collect(),
            level: Some(config.level.to_tracing_level()),
            span_events: span_flags(&config.span_events),
            format: config.format,
            output: config.output,
            with_thread_ids: config.thread_ids,
            with_file_location: config.file_location,
            file_path: config.file_path.clone(),
            rotation: config.rotation,
            ..Self::new()
        }
    }

    pub fn with_level(mut self, level: tracing::Level) -> Self {
        self.level = Some(level);
        self
    }

    /// Adds a directive such as `capsule_framework=trace`.  Directives that
    /// do not parse are skipped.
    pub fn directive(mut self, directive: &str) -> Self {
        self.directives.push(directive.to_string());
        self
    }

    pub fn span_events(mut self, events: FmtSpan) -> Self {
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
        self.with_target = enabled;
        self
    }

    pub fn with_thread_ids(mut self, enabled: bool) -> Self {
        self.with_thread_ids = enabled;
        self
    }

    /// Prints source file and line with each event.
    pub fn with_file_location(mut self, enabled: bool) -> Self {
        self.with_file_location = enabled;
        self
    }

    /// Log file for [`LogOutput::File`].
    pub fn file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn rotation(mut self, rotation: LogRotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Directives added so far, in order.
    pub fn directives(&self) -> &[String] {
        &self.directives
    }

    fn build_filter(&self) -> EnvFilter {
        let base = self
            .level
            .unwrap_or(tracing::Level::INFO)
            .to_string()
            .to_lowercase();
        let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base));
        for directive in &self.directives {
            if let Ok(d) = directive.parse() {
                filter = filter.add_directive(d);
            }
        }
        filter
    }

    /// The writer for the configured output.  The flag is set when file
    /// output was asked for without a path and stdout is used instead.
    fn build_writer(&self) -> (BoxMakeWriter, bool) {
        match (self.output, &self.file_path) {
            (LogOutput::Stdout, _) => (BoxMakeWriter::new(std::io::stdout), false),
            (LogOutput::Stderr, _) => (BoxMakeWriter::new(std::io::stderr), false),
            (LogOutput::File, Some(path)) => {
                let dir = path.parent().unwrap_or_else(|| Path::new("."));
                let name = path.file_name().unwrap_or_else(|| OsStr::new("capsule.log"));
                let appender = match self.rotation {
                    LogRotation::Never => tracing_appender::rolling::never(dir, name),
                    LogRotation::Hourly => tracing_appender::rolling::hourly(dir, name),
                    LogRotation::Daily => tracing_appender::rolling::daily(dir, name),
                };
                (BoxMakeWriter::new(appender), false)
            }
            (LogOutput::File, None) => (BoxMakeWriter::new(std::io::stdout), true),
        }
    }

    fn build_layer(&self, writer: BoxMakeWriter) -> Box<dyn Layer<Registry> + Send + Sync> {
        macro_rules! decorate {
            ($layer:expr) => {
                $layer
                    .with_writer(writer)
                    .with_span_events(self.span_events.clone())
                    .with_target(self.with_target)
                    .with_thread_ids(self.with_thread_ids)
                    .with_file(self.with_file_location)
                    .with_line_number(self.with_file_location)
                    .boxed()
            };
        }

        match self.format {
            LogFormat::Compact => decorate!(fmt::layer().compact()),
            LogFormat::Pretty => decorate!(fmt::layer().pretty()),
            #[cfg(feature = "json-log")]
            LogFormat::Json => decorate!(fmt::layer().json()),
            #[cfg(not(feature = "json-log"))]
            LogFormat::Json => decorate!(fmt::layer()),
            LogFormat::Full => decorate!(fmt::layer()),
        }
    }

    /// Installs the subscriber, ignoring one that is already installed.
    pub fn init(self) {
        let _ = self.try_init();
    }

    /// Installs the subscriber, failing if another one is already installed.
    pub fn try_init(self) -> Result<(), TryInitError> {
        let (writer, fell_back) = self.build_writer();
        let layer = self.build_layer(writer);
        tracing_subscriber::registry()
            .with(layer)
            .with(self.build_filter())
            .try_init()?;
        if fell_back {
            warn!("File output requested but no file path configured, fell back to stdout");
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
    fn test_span_flags() {
        assert_eq!(span_flags(&SpanEventConfig::default()), FmtSpan::NONE);
        let all = SpanEventConfig {
            new: true,
            enter: true,
            exit: true,
            close: true,
        };
        assert_eq!(span_flags(&all), FmtSpan::FULL);
    }

    #[test]
    fn test_from_config() {
        let config = LoggingConfig {
            level: LogLevel::Debug,
            format: LogFormat::Pretty,
            thread_ids: true,
            filters: HashMap::from([
                ("capsule_framework".to_string(), LogLevel::Trace),
                ("capsule_core".to_string(), LogLevel::Warn),
            ]),
            span_events: SpanEventConfig {
                new: true,
                close: true,
                ..Default::default()
            },
            ..Default::default()
        };

        let builder = LoggingBuilder::from_config(&config);
        assert_eq!(builder.level, Some(tracing::Level::DEBUG));
        assert_eq!(builder.format, LogFormat::Pretty);
        assert_eq!(builder.span_events, FmtSpan::NEW | FmtSpan::CLOSE);
        assert!(builder.with_thread_ids);
        assert!(builder.with_target);
        assert_eq!(
            builder.directives(),
            ["capsule_core=warn", "capsule_framework=trace"]
        );
    }

    #[test]
    fn test_file_output_without_path_falls_back() {
        let builder = LoggingBuilder::new().output(LogOutput::File);
        assert!(builder.build_writer().1);
        let builder = builder.file_path(std::env::temp_dir().join("capsule-test.log"));
        assert!(!builder.build_writer().1);
    }
}
