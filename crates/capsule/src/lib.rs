//! # Capsule
//!
//! A dynamic plugin framework for Rust.
//!
//! ## Overview
//!
//! Plugins are installed, started, stopped and uninstalled while the host
//! keeps running. An active plugin reaches the framework only through its
//! [`PluginContext`](framework::PluginContext), which becomes invalid the
//! moment the plugin stops. Plugins cooperate by publishing services into a
//! shared registry and looking them up by type name and filter, and they
//! observe each other through plugin, service and framework events.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐     ┌──────────────────────────────────────────────┐
//! │    Runtime    │────▶│ FrameworkContext                             │
//! │ (config, log) │     │  ├─ PluginTable    install / start / stop    │
//! └───────────────┘     │  ├─ ServiceRegistry  register / find / get   │
//!                       │  └─ ListenerRegistry direct + queued events  │
//!                       └──────────────┬───────────────────────────────┘
//!                                      │ one PluginContext per activation
//!                    ┌─────────────────┼─────────────────┐
//!                    ▼                 ▼                 ▼
//!               Plugin "a"        Plugin "b"        Plugin ...
//! ```
//!
//! - **Core** (`capsule-core`): properties, filters, identifiers, errors
//! - **Framework** (`capsule-framework`): lifecycle, registry, events
//! - **Runtime** (`capsule-runtime`): configuration, logging, process driver
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use capsule::prelude::*;
//!
//! struct Hello;
//!
//! impl PluginActivator for Hello {
//!     fn start(&self, context: &Arc<PluginContext>) -> Result<(), BoxError> {
//!         context.register_service(
//!             &["greeting"],
//!             service_object(Arc::new("hello".to_string())),
//!             Properties::new(),
//!         )?;
//!         Ok(())
//!     }
//! }
//!
//! fn hello() -> Box<dyn PluginActivator> {
//!     Box::new(Hello)
//! }
//!
//! const HELLO: PluginDescriptor = PluginDescriptor::new("demo.hello", "1.0.0", hello);
//!
//! #[tokio::main]
//! async fn main() -> RuntimeResult<()> {
//!     CapsuleRuntime::builder()
//!         .plugin("static:hello", HELLO)
//!         .build()?
//!         .run()
//!         .await
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` (default): load `capsule.toml`
//! - `yaml-config`: load `capsule.yaml`
//! - `json-log`: JSON log output

pub use capsule_core as core;
pub use capsule_framework as framework;
pub use capsule_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use capsule::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    // Runtime - main entry point
    pub use capsule_runtime::{CapsuleRuntime, RuntimeError, RuntimeResult};

    // Plugin authoring
    pub use capsule_framework::{
        BoxError, Plugin, PluginActivator, PluginContext, PluginDescriptor, PluginId,
        PluginState,
    };

    // Services
    pub use capsule_framework::{
        Properties, PropertyValue, ServiceFactory, ServiceObject, ServiceReference,
        ServiceRegistration, downcast_service, keys, service_object,
    };

    // Events
    pub use capsule_framework::{
        DeliveryMode, FrameworkEvent, FrameworkEventKind, PluginEvent, PluginEventKind,
        ServiceEvent, ServiceEventKind, framework_listener, plugin_listener, service_listener,
    };

    // Errors
    pub use capsule_framework::{FrameworkError, FrameworkResult};

    // Logging macros
    pub use capsule_runtime::prelude::*;
}
