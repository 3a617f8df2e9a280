//! # Capsule Framework
//!
//! The dynamic core of the Capsule plugin framework.
//!
//! This layer provides:
//! - Plugin lifecycle management (install, start, stop, uninstall)
//! - [`PluginContext`], the per-activation handle plugins use to reach the
//!   framework, invalidated when the plugin stops
//! - [`ServiceRegistry`] with type-name and filter lookup, ranking order,
//!   per-plugin usage counting and service factories
//! - [`ListenerRegistry`] delivering plugin, service and framework events
//!   directly or through per-listener FIFO queues
//! - The loader and storage boundaries ([`PluginLoader`], [`StorageResolver`])
//!   with an in-process [`StaticLoader`] and the [`FsStorage`] layout
//!
//! Leaf types (properties, filters, identifiers, errors) live in
//! `capsule-core` and are re-exported here for convenience.

pub mod context;
pub mod event;
pub mod framework;
pub mod listener;
pub mod listeners;
pub mod plugin;
pub mod service;
pub mod storage;

pub use context::PluginContext;
pub use event::{
    FrameworkEvent, FrameworkEventKind, PluginEvent, PluginEventKind, ServiceEvent,
    ServiceEventKind,
};
pub use framework::{
    FrameworkBuilder, FrameworkContext, FrameworkState, SYSTEM_PLUGIN_LOCATION, SYSTEM_PLUGIN_NAME,
};
pub use listener::{
    FrameworkListener, ListenerResult, ListenerToken, PluginListener, ServiceListener,
    framework_listener, plugin_listener, service_listener,
};
pub use listeners::{ListenerRegistry, ListenerStats};
pub use plugin::{
    LoadedPlugin, PLUGIN_API_VERSION, Plugin, PluginActivator, PluginDescriptor, PluginLoader,
    StaticLoader,
};
pub use service::{
    ServiceFactory, ServiceObject, ServiceReference, ServiceRegistration, ServiceRegistry,
    downcast_service, service_object,
};
pub use storage::{FsStorage, StorageResolver};

pub use capsule_core::{
    BoxError, DeliveryMode, Filter, FrameworkError, FrameworkResult, InstallError, PluginId,
    PluginState, Properties, PropertyValue, ServiceId, keys,
};
