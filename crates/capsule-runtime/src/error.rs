//! Runtime error types.

use capsule_core::FrameworkError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The framework rejected an operation.
    #[error("Framework error: {0}")]
    Framework(#[from] FrameworkError),

    /// A configured plugin could not be installed or started.
    #[error("Plugin {location} failed: {source}")]
    Plugin {
        location: String,
        #[source]
        source: FrameworkError,
    },

    /// `start` was called while the framework is running.
    #[error("Runtime is already running")]
    AlreadyRunning,

    /// Installing the shutdown signal handler failed.
    #[error("Failed to listen for shutdown signals: {0}")]
    Signal(#[from] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
