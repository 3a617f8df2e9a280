//! [`ServiceRegistration`] and [`ServiceReference`].

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex, RwLock};

use capsule_core::{FrameworkError, FrameworkResult, PluginId, Properties, PropertyValue, ServiceId};

use super::{ServiceFactory, ServiceObject, ServiceRegistry};
use crate::plugin::Plugin;

// ─── Internal state ───────────────────────────────────────────────────────────

pub(crate) enum ServiceSource {
    Shared(ServiceObject),
    Factory(Arc<dyn ServiceFactory>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RegistrationState {
    Registered,
    Unregistering,
    Unregistered,
}

/// One consuming plugin's binding to a registration.
pub(crate) struct Usage {
    pub(crate) count: usize,
    pub(crate) object: ServiceObject,
    pub(crate) plugin: Weak<Plugin>,
}

pub(crate) struct Bindings {
    pub(crate) state: RegistrationState,
    pub(crate) usage: HashMap<PluginId, Usage>,
}

/// Shared state behind a registration and all references to it.
pub(crate) struct RegistrationInner {
    pub(crate) id: ServiceId,
    pub(crate) plugin: PluginId,
    pub(crate) type_names: Vec<String>,
    pub(crate) ranking: i64,
    pub(crate) source: ServiceSource,
    pub(crate) properties: RwLock<Properties>,
    pub(crate) bindings: Mutex<Bindings>,
    /// Held while one of this registration's events is dispatched, so
    /// listeners see `Registered`, `Modified` and `Unregistering` in the
    /// order the state changed.  Reentrant for listeners that modify or
    /// unregister the service from inside a callback.
    pub(crate) events: ReentrantMutex<()>,
}

impl RegistrationInner {
    pub(crate) fn new(
        id: ServiceId,
        plugin: PluginId,
        type_names: Vec<String>,
        ranking: i64,
        source: ServiceSource,
        properties: Properties,
    ) -> Self {
        Self {
            id,
            plugin,
            type_names,
            ranking,
            source,
            properties: RwLock::new(properties),
            bindings: Mutex::new(Bindings {
                state: RegistrationState::Registered,
                usage: HashMap::new(),
            }),
            events: ReentrantMutex::new(()),
        }
    }

    pub(crate) fn state(&self) -> RegistrationState {
        self.bindings.lock().state
    }
}

// =============================================================================
// ServiceReference
// =============================================================================

/// Consumer-side handle to a registered service.
///
/// References are cheap to clone.  Two references are equal when they point
/// at the same registration, and they sort by precedence: highest
/// `service.ranking` first, then lowest service id.  The default value is an
/// invalid reference that points at nothing; it is what
/// [`PluginContext::service_reference`](crate::context::PluginContext::service_reference)
/// returns when no service matches.
#[derive(Clone, Default)]
pub struct ServiceReference {
    inner: Option<Arc<RegistrationInner>>,
}

impl ServiceReference {
    pub(crate) fn new(inner: Arc<RegistrationInner>) -> Self {
        Self { inner: Some(inner) }
    }

    pub(crate) fn inner(&self) -> Option<&Arc<RegistrationInner>> {
        self.inner.as_ref()
    }

    /// Returns `false` for the default (empty) reference.
    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    /// Returns `true` while the service can still be obtained, i.e. until its
    /// unregistration has completed.
    pub fn is_available(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.state() != RegistrationState::Unregistered)
    }

    /// The registration's service id.
    pub fn service_id(&self) -> Option<ServiceId> {
        self.inner.as_ref().map(|inner| inner.id)
    }

    /// The plugin that registered the service.
    pub fn plugin_id(&self) -> Option<PluginId> {
        self.inner.as_ref().map(|inner| inner.plugin)
    }

    /// Type names the service was registered under.
    pub fn type_names(&self) -> &[String] {
        self.inner
            .as_ref()
            .map(|inner| inner.type_names.as_slice())
            .unwrap_or_default()
    }

    /// The immutable ranking (`0` for an invalid reference).
    pub fn ranking(&self) -> i64 {
        self.inner.as_ref().map_or(0, |inner| inner.ranking)
    }

    /// Looks up one property, case-insensitively.
    pub fn property(&self, key: &str) -> Option<PropertyValue> {
        let inner = self.inner.as_ref()?;
        inner.properties.read().get(key).cloned()
    }

    /// Snapshot of all properties.
    pub fn properties(&self) -> Properties {
        self.inner
            .as_ref()
            .map(|inner| inner.properties.read().clone())
            .unwrap_or_default()
    }

    /// Property keys with their original spelling.
    pub fn property_keys(&self) -> Vec<String> {
        self.inner
            .as_ref()
            .map(|inner| inner.properties.read().keys().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Plugins currently holding the service.
    pub fn using_plugins(&self) -> Vec<PluginId> {
        let Some(inner) = &self.inner else {
            return Vec::new();
        };
        let mut ids: Vec<PluginId> = inner.bindings.lock().usage.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Outstanding `get_service` calls by `plugin`.
    pub fn usage_count(&self, plugin: PluginId) -> usize {
        self.inner.as_ref().map_or(0, |inner| {
            inner
                .bindings
                .lock()
                .usage
                .get(&plugin)
                .map_or(0, |usage| usage.count)
        })
    }
}

impl PartialEq for ServiceReference {
    fn eq(&self, other: &Self) -> bool {
        self.service_id() == other.service_id()
    }
}

impl Eq for ServiceReference {}

impl Hash for ServiceReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.service_id().hash(state);
    }
}

impl Ord for ServiceReference {
    /// Precedence order: higher ranking first, then lower id.  Invalid
    /// references sort last.
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.inner, &other.inner) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => b.ranking.cmp(&a.ranking).then(a.id.cmp(&b.id)),
        }
    }
}

impl PartialOrd for ServiceReference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            None => f.write_str("ServiceReference(invalid)"),
            Some(inner) => f
                .debug_struct("ServiceReference")
                .field("id", &inner.id)
                .field("types", &inner.type_names)
                .field("ranking", &inner.ranking)
                .field("plugin", &inner.plugin)
                .finish(),
        }
    }
}

// =============================================================================
// ServiceRegistration
// =============================================================================

/// Provider-side handle returned by `register_service`.
///
/// The registering plugin uses it to update the service's properties or to
/// withdraw the service.  Services still registered when their plugin stops
/// are unregistered by the framework.
#[derive(Clone)]
pub struct ServiceRegistration {
    inner: Arc<RegistrationInner>,
    registry: Weak<ServiceRegistry>,
}

impl ServiceRegistration {
    pub(crate) fn new(inner: Arc<RegistrationInner>, registry: Weak<ServiceRegistry>) -> Self {
        Self { inner, registry }
    }

    /// A reference to this registration.
    pub fn reference(&self) -> ServiceReference {
        ServiceReference::new(Arc::clone(&self.inner))
    }

    /// The registration's service id.
    pub fn service_id(&self) -> ServiceId {
        self.inner.id
    }

    /// The plugin that registered the service.
    pub fn plugin_id(&self) -> PluginId {
        self.inner.plugin
    }

    /// Replaces the service's properties and fires `Modified`.
    ///
    /// Framework-owned keys (`service.id`, `objectclass`, `service.ranking`,
    /// `service.plugin.id`) keep their current values whatever `properties`
    /// contains.
    pub fn set_properties(&self, properties: Properties) -> FrameworkResult<()> {
        self.registry()?.set_properties(&self.inner, properties)
    }

    /// Withdraws the service.  Fails with `IllegalState` if it was already
    /// unregistered.
    pub fn unregister(&self) -> FrameworkResult<()> {
        self.registry()?.unregister(&self.inner)
    }

    fn registry(&self) -> FrameworkResult<Arc<ServiceRegistry>> {
        self.registry
            .upgrade()
            .ok_or_else(|| FrameworkError::illegal_state("the service registry has been dropped"))
    }
}

impl fmt::Debug for ServiceRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistration")
            .field("id", &self.inner.id)
            .field("types", &self.inner.type_names)
            .field("state", &self.inner.state())
            .finish()
    }
}
