//! Event types fanned out by the [`ListenerRegistry`](crate::listeners::ListenerRegistry).
//!
//! Three categories exist, each with its own listener trait:
//!
//! | Event | Fired when | Listener |
//! |-------|-----------|----------|
//! | [`PluginEvent`] | a plugin changes lifecycle state | [`PluginListener`](crate::listener::PluginListener) |
//! | [`ServiceEvent`] | a service is registered, modified or unregistered | [`ServiceListener`](crate::listener::ServiceListener) |
//! | [`FrameworkEvent`] | the framework starts, stops or reports a problem | [`FrameworkListener`](crate::listener::FrameworkListener) |

use std::fmt;
use std::sync::Arc;

use capsule_core::PluginId;

use crate::plugin::Plugin;
use crate::service::ServiceReference;

// =============================================================================
// Plugin events
// =============================================================================

/// What happened to a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginEventKind {
    /// The plugin was installed.
    Installed,
    /// The plugin was resolved and may now be started.
    Resolved,
    /// The plugin's activator is about to start.
    Starting,
    /// The plugin is active.
    Started,
    /// The plugin's activator is about to stop.
    Stopping,
    /// The plugin stopped and is resolved again.
    Stopped,
    /// The plugin was uninstalled.
    Uninstalled,
}

/// A plugin lifecycle transition.
#[derive(Clone)]
pub struct PluginEvent {
    kind: PluginEventKind,
    plugin: Arc<Plugin>,
}

impl PluginEvent {
    /// Creates a plugin event.
    pub fn new(kind: PluginEventKind, plugin: Arc<Plugin>) -> Self {
        Self { kind, plugin }
    }

    /// The transition.
    pub fn kind(&self) -> PluginEventKind {
        self.kind
    }

    /// The plugin that changed.
    pub fn plugin(&self) -> &Arc<Plugin> {
        &self.plugin
    }
}

impl fmt::Debug for PluginEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginEvent")
            .field("kind", &self.kind)
            .field("plugin_id", &self.plugin.id())
            .field("symbolic_name", &self.plugin.symbolic_name())
            .finish()
    }
}

// =============================================================================
// Service events
// =============================================================================

/// What happened to a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceEventKind {
    /// The service was registered.
    Registered,
    /// The service's properties changed and still match the listener's filter.
    Modified,
    /// The service's properties changed and no longer match the listener's
    /// filter (they matched before the change).
    ModifiedEndMatch,
    /// The service is being unregistered; its reference still resolves while
    /// listeners run.
    Unregistering,
}

/// A service registry change.
#[derive(Debug, Clone)]
pub struct ServiceEvent {
    kind: ServiceEventKind,
    reference: ServiceReference,
}

impl ServiceEvent {
    /// Creates a service event.
    pub fn new(kind: ServiceEventKind, reference: ServiceReference) -> Self {
        Self { kind, reference }
    }

    /// The change.
    pub fn kind(&self) -> ServiceEventKind {
        self.kind
    }

    /// Reference to the affected service.
    pub fn reference(&self) -> &ServiceReference {
        &self.reference
    }

    pub(crate) fn with_kind(&self, kind: ServiceEventKind) -> Self {
        Self {
            kind,
            reference: self.reference.clone(),
        }
    }
}

// =============================================================================
// Framework events
// =============================================================================

/// What the framework is reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameworkEventKind {
    /// The framework finished initialisation.
    Started,
    /// A plugin failed (activator error, service factory error).
    Error,
    /// A non-fatal problem.
    Warning,
    /// Informational message.
    Info,
    /// The framework shut down.
    Stopped,
}

/// A framework-wide notification.
#[derive(Debug, Clone)]
pub struct FrameworkEvent {
    kind: FrameworkEventKind,
    plugin: Option<PluginId>,
    message: Option<String>,
}

impl FrameworkEvent {
    /// Creates an event without a plugin or message.
    pub fn new(kind: FrameworkEventKind) -> Self {
        Self {
            kind,
            plugin: None,
            message: None,
        }
    }

    /// Creates an error event attributed to `plugin`.
    pub fn error(plugin: PluginId, message: impl Into<String>) -> Self {
        Self {
            kind: FrameworkEventKind::Error,
            plugin: Some(plugin),
            message: Some(message.into()),
        }
    }

    /// Creates a warning event attributed to `plugin`.
    pub fn warning(plugin: PluginId, message: impl Into<String>) -> Self {
        Self {
            kind: FrameworkEventKind::Warning,
            plugin: Some(plugin),
            message: Some(message.into()),
        }
    }

    /// The kind of notification.
    pub fn kind(&self) -> FrameworkEventKind {
        self.kind
    }

    /// The plugin the event is about, if any.
    pub fn plugin(&self) -> Option<PluginId> {
        self.plugin
    }

    /// Human-readable detail, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}
