//! The service layer: registrations, references and the registry.
//!
//! Plugins publish services under one or more type names together with a
//! [`Properties`](capsule_core::Properties) map.  Consumers look services up
//! by type name and filter, receive a [`ServiceReference`], and exchange it
//! for the service object with
//! [`PluginContext::get_service`](crate::context::PluginContext::get_service).
//!
//! # Service objects
//!
//! A service object is type-erased as [`ServiceObject`].  The convention is to
//! store an `Arc<T>` where `T` is the type consumers ask for, usually a trait
//! object:
//!
//! ```rust,ignore
//! let greeter: Arc<dyn Greeter> = Arc::new(EnglishGreeter);
//! ctx.register_service(&["greeter"], service_object(greeter), Properties::new())?;
//!
//! // consumer side
//! let reference = ctx.service_reference("greeter")?;
//! let greeter = ctx.get_service_as::<dyn Greeter>(&reference)?;
//! ```

mod registration;
mod registry;

use std::any::Any;
use std::sync::Arc;

use capsule_core::BoxError;

use crate::plugin::Plugin;

pub(crate) use registration::ServiceSource;
pub use registration::{ServiceReference, ServiceRegistration};
pub use registry::ServiceRegistry;

/// Type-erased service object.
pub type ServiceObject = Arc<dyn Any + Send + Sync>;

/// Erases `service` into a [`ServiceObject`] that [`downcast_service`] can
/// recover as `Arc<T>`.
pub fn service_object<T>(service: Arc<T>) -> ServiceObject
where
    T: ?Sized + Send + Sync + 'static,
{
    Arc::new(service)
}

/// Recovers the `Arc<T>` stored by [`service_object`].
pub fn downcast_service<T>(object: &ServiceObject) -> Option<Arc<T>>
where
    T: ?Sized + Send + Sync + 'static,
{
    object.downcast_ref::<Arc<T>>().cloned()
}

// ─── ServiceFactory ───────────────────────────────────────────────────────────

/// Produces a separate service object for each consuming plugin.
///
/// The framework calls [`get_service`](ServiceFactory::get_service) the first
/// time a plugin acquires the service and caches the result for that plugin
/// until its usage count drops back to zero, at which point
/// [`unget_service`](ServiceFactory::unget_service) is called with the same
/// object.
pub trait ServiceFactory: Send + Sync + 'static {
    /// Creates the service object for `plugin`.
    fn get_service(
        &self,
        plugin: &Arc<Plugin>,
        registration: &ServiceRegistration,
    ) -> Result<ServiceObject, BoxError>;

    /// Releases an object previously returned for `plugin`.
    fn unget_service(
        &self,
        plugin: &Arc<Plugin>,
        registration: &ServiceRegistration,
        service: &ServiceObject,
    ) {
        let _ = (plugin, registration, service);
    }
}
