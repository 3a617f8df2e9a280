//! Capsule Runtime - process orchestration for the Capsule plugin framework.
//!
//! This crate provides:
//! - Layered configuration with figment (`capsule.toml`, `CAPSULE_*` variables)
//! - Logging setup over `tracing-subscriber` ([`LoggingBuilder`])
//! - [`CapsuleRuntime`], which builds a framework from configuration,
//!   installs and starts the configured plugins and runs until a shutdown
//!   signal arrives
//!
//! ```rust,ignore
//! use capsule_runtime::CapsuleRuntime;
//!
//! #[tokio::main]
//! async fn main() -> capsule_runtime::RuntimeResult<()> {
//!     let mut runtime = CapsuleRuntime::new();
//!     runtime.register_plugin("static:greeter", GREETER);
//!     runtime.run().await
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

// Re-exports
pub use config::{
    CapsuleConfig, ConfigError, ConfigLoader, ConfigResult, FrameworkConfig, LoggingConfig,
    PluginEntry, Profile,
};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::LoggingBuilder;
pub use runtime::{CapsuleRuntime, RuntimeBuilder, RuntimeStats};

// Re-export tracing for use by plugin crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides the commonly used logging macros:
/// - `trace!`, `debug!`, `info!`, `warn!`, `error!`
/// - `span`, `event`
/// - `instrument` attribute
/// - `Level` for span creation
pub mod prelude {
    pub use tracing::{Level, debug, error, event, info, instrument, span, trace, warn};
}
