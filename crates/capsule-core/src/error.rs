//! Unified error types for the Capsule framework.
//!
//! Every fallible operation on a plugin context, the service registry or the
//! listener registry returns a [`FrameworkResult`].  "Nothing matched" is never
//! an error: lookups return empty lists or invalid references instead, so a
//! caller can always tell a malformed request from an empty result.

use thiserror::Error;

use crate::plugin::PluginId;

/// Boxed error type used for failures raised by plugin code (activators,
/// listeners, service factories).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// =============================================================================
// Filter Errors
// =============================================================================

/// A filter expression could not be parsed.
///
/// Returned instead of a non-matching filter so that a typo in a filter is
/// never mistaken for "no service available".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid filter {filter:?} at offset {position}: {message}")]
pub struct FilterError {
    /// The full expression that failed to parse.
    pub filter: String,
    /// Byte offset of the offending character.
    pub position: usize,
    /// What the parser expected or found.
    pub message: String,
}

// =============================================================================
// Install Errors
// =============================================================================

/// Errors reported by a plugin loader.
///
/// The framework treats these as opaque: it only forwards them to the caller
/// of `install_plugin`.
#[derive(Debug, Error)]
pub enum InstallError {
    /// No plugin image exists at the requested location.
    #[error("no plugin available at location '{0}'")]
    NotFound(String),

    /// The plugin image could not be read.
    #[error("failed to read plugin image from '{location}': {source}")]
    Read {
        /// Location being installed.
        location: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The image was read but the loader refused it.
    #[error("plugin at '{location}' was rejected: {reason}")]
    Rejected {
        /// Location being installed.
        location: String,
        /// Why the loader refused the image.
        reason: String,
    },
}

impl InstallError {
    /// Creates a rejection error.
    pub fn rejected(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            location: location.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Framework Errors
// =============================================================================

/// Errors returned by plugin-context, registry and lifecycle operations.
#[derive(Debug, Error)]
pub enum FrameworkError {
    /// The plugin context has been invalidated because its plugin stopped.
    #[error("this plugin context is no longer valid")]
    InvalidContext,

    /// Malformed input: empty type-name list, invalid service reference,
    /// unsupported delivery mode.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A filter expression could not be parsed.
    #[error(transparent)]
    FilterSyntax(#[from] FilterError),

    /// The plugin loader failed.
    #[error("plugin installation failed: {0}")]
    Install(#[from] InstallError),

    /// The operation is not allowed in the current lifecycle state.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A plugin activator failed to start.
    #[error("activator of plugin {plugin} failed: {source}")]
    Activator {
        /// Plugin whose activator failed.
        plugin: PluginId,
        /// The activator's error.
        #[source]
        source: BoxError,
    },

    /// An I/O failure inside the framework itself.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameworkError {
    /// Creates an invalid-argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Creates an illegal-state error.
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }
}

/// Result type for framework operations.
pub type FrameworkResult<T> = Result<T, FrameworkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_error_display() {
        let err = FilterError {
            filter: "(bad".to_string(),
            position: 4,
            message: "unexpected end of filter".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid filter \"(bad\" at offset 4: unexpected end of filter"
        );
    }

    #[test]
    fn test_filter_error_converts() {
        let err: FrameworkError = FilterError {
            filter: "x".to_string(),
            position: 0,
            message: "expected '('".to_string(),
        }
        .into();
        assert!(matches!(err, FrameworkError::FilterSyntax(_)));
    }
}
