//! Configuration for a Capsule process.
//!
//! Settings are layered with figment: built-in defaults, then
//! `capsule.{profile}.toml` / `capsule.toml` (or YAML), then `CAPSULE_*`
//! environment variables, then programmatic overrides.

mod error;
mod loader;
mod schema;
mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile};
pub use schema::{
    CapsuleConfig, FrameworkConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig,
    PluginEntry, QueuedDelivery, SpanEventConfig,
};
pub use validation::validate_config;
