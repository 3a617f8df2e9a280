//! Configuration schema definitions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use capsule_core::Properties;
use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CapsuleConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Settings handed to the framework builder.
    #[serde(default)]
    pub framework: FrameworkConfig,

    /// Plugins to install when the runtime starts, in order.
    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
}

// =============================================================================
// Framework
// =============================================================================

/// Framework construction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkConfig {
    /// Base directory for plugin data roots.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Extra framework properties, visible to plugins through
    /// `PluginContext::property`.
    #[serde(default)]
    pub properties: Properties,

    /// Where queued listeners are drained.
    #[serde(default)]
    pub queued_delivery: QueuedDelivery,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            properties: Properties::new(),
            queued_delivery: QueuedDelivery::default(),
        }
    }
}

fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("capsule"))
        .unwrap_or_else(|| PathBuf::from("capsule-data"))
}

/// Executor for queued listener delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuedDelivery {
    /// Drain queues on tasks of the surrounding tokio runtime.
    #[default]
    Runtime,
    /// Drain each queue on a dedicated OS thread.
    Thread,
}

/// A plugin the runtime installs on startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginEntry {
    /// Location handed to the plugin loader.
    pub location: String,

    /// Start the plugin after installing it.
    #[serde(default = "default_start")]
    pub start: bool,
}

impl PluginEntry {
    /// An entry that is installed and started.
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            start: true,
        }
    }

    /// An entry that is only installed.
    pub fn installed(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            start: false,
        }
    }
}

fn default_start() -> bool {
    true
}

// =============================================================================
// Logging
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Global log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Output destination.
    #[serde(default)]
    pub output: LogOutput,

    /// Log file path, required when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// How the log file is rotated.
    #[serde(default)]
    pub rotation: LogRotation,

    /// Include thread ids.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line.
    #[serde(default)]
    pub file_location: bool,

    /// Span lifecycle events to log.
    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Per-module level overrides, e.g. `capsule_framework = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            file_path: None,
            rotation: LogRotation::default(),
            thread_ids: false,
            file_location: false,
            span_events: SpanEventConfig::default(),
            filters: HashMap::new(),
        }
    }
}

/// Log level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
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
    /// Returns the lowercase name used in filter directives.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Converts to the `tracing` level.
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

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line compact output.
    #[default]
    Compact,
    /// Default `tracing-subscriber` format.
    Full,
    /// Multi-line human readable output.
    Pretty,
    /// Newline-delimited JSON (needs the `json-log` feature, otherwise
    /// falls back to `Full`).
    Json,
}

/// Log output destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Log file rotation policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}
