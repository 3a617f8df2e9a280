//! A plugin's handle onto the framework.
//!
//! One context is created each time a plugin starts and is handed to its
//! activator.  Through it the plugin registers and consumes services,
//! subscribes to events, installs other plugins and reaches its private data
//! directory.
//!
//! When the plugin stops the context is **invalidated**, not dropped: plugin
//! code may still hold the `Arc`, but every operation on it now fails with
//! [`FrameworkError::InvalidContext`].  Invalidation takes the state's write
//! lock, so it is visible to every thread once `stop` returns.  Operations
//! that insert state (service registration, listener subscription) hold the
//! read lock while they do so, and service acquisition re-checks validity
//! under the registration's binding lock before counting a use.  Nothing registered through a context can
//! therefore outlive the plugin's activation.
//!
//! [`get_plugin_by_id`](PluginContext::get_plugin_by_id) is the one operation
//! that skips the validity check.

use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, warn};

use capsule_core::{
    DeliveryMode, Filter, FrameworkError, FrameworkResult, PluginId, Properties, PropertyValue,
};

use crate::framework::FrameworkContext;
use crate::listener::{FrameworkListener, ListenerToken, PluginListener, ServiceListener};
use crate::plugin::Plugin;
use crate::service::{
    ServiceFactory, ServiceObject, ServiceReference, ServiceRegistration, ServiceSource,
    downcast_service,
};

enum ContextState {
    Valid(Weak<Plugin>),
    Invalidated,
}

/// The framework as seen by one activation of one plugin.
pub struct PluginContext {
    plugin_id: PluginId,
    framework: Weak<FrameworkContext>,
    state: RwLock<ContextState>,
}

impl PluginContext {
    pub(crate) fn new(plugin: &Arc<Plugin>, framework: Weak<FrameworkContext>) -> Self {
        Self {
            plugin_id: plugin.id(),
            framework,
            state: RwLock::new(ContextState::Valid(Arc::downgrade(plugin))),
        }
    }

    /// Runs `f` with the validity read guard held.
    fn with_valid<R>(
        &self,
        f: impl FnOnce(&Arc<Plugin>, &Arc<FrameworkContext>) -> FrameworkResult<R>,
    ) -> FrameworkResult<R> {
        let state = self.state.read_recursive();
        let ContextState::Valid(plugin) = &*state else {
            return Err(FrameworkError::InvalidContext);
        };
        let plugin = plugin.upgrade().ok_or(FrameworkError::InvalidContext)?;
        let framework = self.framework.upgrade().ok_or(FrameworkError::InvalidContext)?;
        f(&plugin, &framework)
    }

    /// Checks validity and returns the plugin and framework without keeping
    /// the guard, for operations that call out to listeners.
    fn check_valid(&self) -> FrameworkResult<(Arc<Plugin>, Arc<FrameworkContext>)> {
        self.with_valid(|plugin, framework| Ok((Arc::clone(plugin), Arc::clone(framework))))
    }

    pub(crate) fn invalidate(&self) {
        *self.state.write() = ContextState::Invalidated;
        debug!(plugin_id = %self.plugin_id, "Plugin context invalidated");
    }

    /// Returns `false` once the owning plugin has stopped.
    pub fn is_valid(&self) -> bool {
        matches!(*self.state.read_recursive(), ContextState::Valid(_))
    }

    // ─── Framework and plugins ────────────────────────────────────────────────

    /// A framework property, e.g. `capsule.framework.version`.
    pub fn property(&self, key: &str) -> FrameworkResult<Option<PropertyValue>> {
        self.with_valid(|_, fw| Ok(fw.properties().get(key).cloned()))
    }

    /// The plugin owning this context.
    pub fn plugin(&self) -> FrameworkResult<Arc<Plugin>> {
        self.with_valid(|plugin, _| Ok(Arc::clone(plugin)))
    }

    /// Looks up an installed plugin by id.
    ///
    /// Unlike every other operation this does not check that the context is
    /// still valid; it only needs the framework to be alive.
    pub fn get_plugin_by_id(&self, id: PluginId) -> Option<Arc<Plugin>> {
        self.framework.upgrade()?.plugin(id)
    }

    /// All installed plugins, in id order.
    pub fn plugins(&self) -> FrameworkResult<Vec<Arc<Plugin>>> {
        self.with_valid(|_, fw| Ok(fw.plugins().all()))
    }

    /// Installs the plugin at `location`, or returns the plugin already
    /// installed from there.
    pub fn install_plugin(
        &self,
        location: &str,
        stream: Option<&mut dyn Read>,
    ) -> FrameworkResult<Arc<Plugin>> {
        let (_, fw) = self.check_valid()?;
        fw.install_plugin(location, stream)
    }

    /// Path of `name` inside the plugin's data directory.
    ///
    /// The directory is created on first use.  If that fails a warning is
    /// logged and the path is returned anyway.
    pub fn data_file(&self, name: &str) -> FrameworkResult<PathBuf> {
        self.with_valid(|plugin, _| {
            let root = plugin.data_root();
            if let Err(e) = std::fs::create_dir_all(root) {
                warn!(
                    plugin_id = %plugin.id(),
                    path = %root.display(),
                    error = %e,
                    "Could not create plugin data directory"
                );
            }
            Ok(root.join(name))
        })
    }

    // ─── Services ─────────────────────────────────────────────────────────────

    /// Publishes `service` under `type_names`.
    ///
    /// Service listeners receive `Registered` before this returns.
    pub fn register_service(
        &self,
        type_names: &[&str],
        service: ServiceObject,
        properties: Properties,
    ) -> FrameworkResult<ServiceRegistration> {
        self.register(type_names, ServiceSource::Shared(service), properties)
    }

    /// Publishes a factory that produces a separate object per consuming
    /// plugin.
    pub fn register_service_factory(
        &self,
        type_names: &[&str],
        factory: Arc<dyn ServiceFactory>,
        properties: Properties,
    ) -> FrameworkResult<ServiceRegistration> {
        self.register(type_names, ServiceSource::Factory(factory), properties)
    }

    fn register(
        &self,
        type_names: &[&str],
        source: ServiceSource,
        properties: Properties,
    ) -> FrameworkResult<ServiceRegistration> {
        let (registration, fw) = self.with_valid(|plugin, fw| {
            let registration = fw.services().insert(plugin.id(), type_names, source, properties)?;
            Ok((registration, Arc::clone(fw)))
        })?;
        fw.services().announce(&registration);
        Ok(registration)
    }

    /// References to services registered under `type_name` (any type if
    /// empty) whose properties match `filter` (all if empty), best first.
    pub fn service_references(
        &self,
        type_name: &str,
        filter: &str,
    ) -> FrameworkResult<Vec<ServiceReference>> {
        self.with_valid(|_, fw| {
            let filter = Filter::parse_optional(filter)?;
            let type_name = (!type_name.is_empty()).then_some(type_name);
            Ok(fw.services().find(type_name, filter.as_ref()))
        })
    }

    /// The best service registered under `type_name`, or an invalid
    /// reference if there is none.
    pub fn service_reference(&self, type_name: &str) -> FrameworkResult<ServiceReference> {
        self.with_valid(|_, fw| Ok(fw.services().find_best(type_name)))
    }

    /// Acquires the service behind `reference`, incrementing this plugin's
    /// usage count.  Returns `None` if the service is gone.
    pub fn get_service(&self, reference: &ServiceReference) -> FrameworkResult<Option<ServiceObject>> {
        let (plugin, fw) = self.check_valid()?;
        // Checked again under the binding lock; a stop racing this call must
        // not find the binding missing and then have it appear.
        fw.services().get_service(&plugin, reference, || self.is_valid())
    }

    /// Typed [`get_service`](Self::get_service).
    ///
    /// Fails with `InvalidArgument` if the service object is not an `Arc<T>`;
    /// the acquisition is released in that case.
    pub fn get_service_as<T>(&self, reference: &ServiceReference) -> FrameworkResult<Option<Arc<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let Some(object) = self.get_service(reference)? else {
            return Ok(None);
        };
        match downcast_service::<T>(&object) {
            Some(service) => Ok(Some(service)),
            None => {
                self.unget_service(reference)?;
                Err(FrameworkError::invalid_argument(format!(
                    "service {:?} is not a {}",
                    reference.service_id(),
                    std::any::type_name::<T>()
                )))
            }
        }
    }

    /// Releases one acquisition of `reference`.  Returns `false` if this
    /// plugin did not hold it.
    pub fn unget_service(&self, reference: &ServiceReference) -> FrameworkResult<bool> {
        let (plugin, fw) = self.check_valid()?;
        Ok(fw.services().unget_service(&plugin, reference))
    }

    // ─── Listeners ────────────────────────────────────────────────────────────

    /// Subscribes to plugin events.
    ///
    /// `Direct` and `BlockingQueued` deliver synchronously, `Queued`
    /// asynchronously; `Auto` is rejected with `InvalidArgument`.
    pub fn connect_plugin_listener(
        &self,
        listener: Arc<dyn PluginListener>,
        mode: DeliveryMode,
    ) -> FrameworkResult<ListenerToken> {
        self.with_valid(|plugin, fw| fw.listeners().add_plugin_listener(plugin.id(), listener, mode))
    }

    /// Removes a plugin-event subscription made through this plugin.  Returns
    /// `false` if the token is unknown or belongs to another plugin.
    pub fn disconnect_plugin_listener(&self, token: ListenerToken) -> FrameworkResult<bool> {
        self.with_valid(|plugin, fw| {
            Ok(fw.listeners().remove_plugin_listener(plugin.id(), token))
        })
    }

    /// Subscribes to framework events; delivery modes as for
    /// [`connect_plugin_listener`](Self::connect_plugin_listener).
    pub fn connect_framework_listener(
        &self,
        listener: Arc<dyn FrameworkListener>,
        mode: DeliveryMode,
    ) -> FrameworkResult<ListenerToken> {
        self.with_valid(|plugin, fw| {
            fw.listeners()
                .add_framework_listener(plugin.id(), listener, mode)
        })
    }

    /// Removes a framework-event subscription.
    pub fn disconnect_framework_listener(&self, token: ListenerToken) -> FrameworkResult<bool> {
        self.with_valid(|plugin, fw| {
            Ok(fw.listeners().remove_framework_listener(plugin.id(), token))
        })
    }

    /// Subscribes to service events whose service matches `filter` (all
    /// services if empty).  Service events are always delivered directly.
    pub fn connect_service_listener(
        &self,
        listener: Arc<dyn ServiceListener>,
        filter: &str,
    ) -> FrameworkResult<ListenerToken> {
        self.with_valid(|plugin, fw| {
            let filter = Filter::parse_optional(filter)?;
            Ok(fw.listeners().add_service_listener(plugin.id(), listener, filter))
        })
    }

    /// Removes a service-event subscription.
    pub fn disconnect_service_listener(&self, token: ListenerToken) -> FrameworkResult<bool> {
        self.with_valid(|plugin, fw| {
            Ok(fw.listeners().remove_service_listener(plugin.id(), token))
        })
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin_id", &self.plugin_id)
            .field("valid", &self.is_valid())
            .finish()
    }
}
