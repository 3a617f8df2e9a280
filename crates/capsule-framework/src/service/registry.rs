//! The framework's table of published services.
//!
//! Registrations live in an id-ordered map plus a type-name index, both
//! behind a single `RwLock`.  Each registration additionally owns a small
//! mutex over its per-plugin usage bindings, so consumers of different
//! services never contend with each other.
//!
//! Lock order is registry state → registration bindings → registration
//! properties.  No lock is held while listeners or service factories run.

use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use capsule_core::{
    Filter, FrameworkError, FrameworkResult, PluginId, Properties, PropertyValue, ServiceId, keys,
};

use super::registration::{RegistrationInner, RegistrationState, Usage};
use super::{ServiceFactory, ServiceObject, ServiceReference, ServiceRegistration, ServiceSource};
use crate::event::{FrameworkEvent, ServiceEvent, ServiceEventKind};
use crate::listeners::ListenerRegistry;
use crate::plugin::Plugin;

#[derive(Default)]
struct RegistryState {
    services: BTreeMap<ServiceId, Arc<RegistrationInner>>,
    by_type: HashMap<String, Vec<ServiceId>>,
}

/// Table of every registered service.
pub struct ServiceRegistry {
    me: Weak<ServiceRegistry>,
    state: RwLock<RegistryState>,
    next_id: AtomicU64,
    listeners: Arc<ListenerRegistry>,
}

impl ServiceRegistry {
    /// Creates an empty registry that reports changes to `listeners`.
    pub fn new(listeners: Arc<ListenerRegistry>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            state: RwLock::new(RegistryState::default()),
            next_id: AtomicU64::new(1),
            listeners,
        })
    }

    // ─── Registration ─────────────────────────────────────────────────────────

    /// Registers a shared service object.
    pub fn register(
        &self,
        plugin: PluginId,
        type_names: &[&str],
        service: ServiceObject,
        properties: Properties,
    ) -> FrameworkResult<ServiceRegistration> {
        self.insert_and_announce(plugin, type_names, ServiceSource::Shared(service), properties)
    }

    /// Registers a factory that creates one service object per consumer.
    pub fn register_factory(
        &self,
        plugin: PluginId,
        type_names: &[&str],
        factory: Arc<dyn ServiceFactory>,
        properties: Properties,
    ) -> FrameworkResult<ServiceRegistration> {
        self.insert_and_announce(plugin, type_names, ServiceSource::Factory(factory), properties)
    }

    fn insert_and_announce(
        &self,
        plugin: PluginId,
        type_names: &[&str],
        source: ServiceSource,
        properties: Properties,
    ) -> FrameworkResult<ServiceRegistration> {
        let registration = self.insert(plugin, type_names, source, properties)?;
        self.announce(&registration);
        Ok(registration)
    }

    /// Adds a registration to the indexes without notifying listeners.
    pub(crate) fn insert(
        &self,
        plugin: PluginId,
        type_names: &[&str],
        source: ServiceSource,
        properties: Properties,
    ) -> FrameworkResult<ServiceRegistration> {
        if type_names.is_empty() {
            return Err(FrameworkError::invalid_argument(
                "a service must be registered under at least one type name",
            ));
        }
        let mut types: Vec<String> = Vec::with_capacity(type_names.len());
        for name in type_names {
            let name = name.trim();
            if name.is_empty() {
                return Err(FrameworkError::invalid_argument("service type names must not be empty"));
            }
            if !types.iter().any(|t| t == name) {
                types.push(name.to_string());
            }
        }

        let ranking = match properties.get(keys::SERVICE_RANKING) {
            None => 0,
            Some(value) => value.as_i64().ok_or_else(|| {
                FrameworkError::invalid_argument(format!(
                    "{} must be an integer, got {value}",
                    keys::SERVICE_RANKING
                ))
            })?,
        };

        let mut props: Properties = properties
            .iter()
            .filter(|(key, _)| !keys::is_framework_owned(key))
            .map(|(key, value)| (key, value.clone()))
            .collect();

        let inner = {
            let mut state = self.state.write();
            let id = ServiceId(self.next_id.fetch_add(1, Ordering::Relaxed));
            props.insert(keys::SERVICE_ID, id.0);
            props.insert(
                keys::OBJECTCLASS,
                PropertyValue::List(types.iter().map(|t| PropertyValue::String(t.clone())).collect()),
            );
            props.insert(keys::SERVICE_RANKING, ranking);
            props.insert(keys::SERVICE_PLUGIN_ID, plugin.0);

            let inner = Arc::new(RegistrationInner::new(id, plugin, types, ranking, source, props));
            state.services.insert(id, Arc::clone(&inner));
            for name in &inner.type_names {
                state.by_type.entry(name.clone()).or_default().push(id);
            }
            inner
        };

        info!(
            service_id = %inner.id,
            plugin_id = %plugin,
            types = ?inner.type_names,
            ranking,
            "Service registered"
        );

        Ok(ServiceRegistration::new(inner, self.me.clone()))
    }

    /// Fires `Registered` for a fresh registration, unless it was already
    /// withdrawn in the meantime.
    ///
    /// A concurrent `unregister` waits until this dispatch has finished.
    pub(crate) fn announce(&self, registration: &ServiceRegistration) {
        let reference = registration.reference();
        let Some(inner) = reference.inner() else {
            return;
        };
        let _order = inner.events.lock();
        if inner.state() != RegistrationState::Registered {
            return;
        }
        self.listeners.service_changed(
            &ServiceEvent::new(ServiceEventKind::Registered, reference.clone()),
            None,
        );
    }

    // ─── Lookup ───────────────────────────────────────────────────────────────

    /// Returns every registered service published under `type_name` (any
    /// type when `None`) whose properties satisfy `filter`, best first.
    pub fn find(&self, type_name: Option<&str>, filter: Option<&Filter>) -> Vec<ServiceReference> {
        let mut found: Vec<ServiceReference> = {
            let state = self.state.read();
            let matches = |inner: &Arc<RegistrationInner>| {
                filter.is_none_or(|f| f.matches(&inner.properties.read()))
            };
            match type_name {
                Some(name) => state
                    .by_type
                    .get(name)
                    .into_iter()
                    .flatten()
                    .filter_map(|id| state.services.get(id))
                    .filter(|inner| matches(inner))
                    .map(|inner| ServiceReference::new(Arc::clone(inner)))
                    .collect(),
                None => state
                    .services
                    .values()
                    .filter(|inner| matches(inner))
                    .map(|inner| ServiceReference::new(Arc::clone(inner)))
                    .collect(),
            }
        };
        found.sort();
        found
    }

    /// The best service published under `type_name`, or an invalid
    /// reference when there is none.
    pub fn find_best(&self, type_name: &str) -> ServiceReference {
        self.find(Some(type_name), None)
            .into_iter()
            .next()
            .unwrap_or_default()
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.state.read().services.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.state.read().services.is_empty()
    }

    // ─── Usage ────────────────────────────────────────────────────────────────

    /// Acquires the service behind `reference` for `consumer`.
    ///
    /// `consumer_valid` is evaluated with the registration's binding lock
    /// held, immediately before the usage count changes; if it returns
    /// `false` nothing is bound and the call fails with `InvalidContext`.
    /// Returns `Ok(None)` if the service has been unregistered or its factory
    /// failed.  Every successful call must be paired with
    /// [`unget_service`](Self::unget_service).
    pub fn get_service(
        &self,
        consumer: &Arc<Plugin>,
        reference: &ServiceReference,
        consumer_valid: impl Fn() -> bool,
    ) -> FrameworkResult<Option<ServiceObject>> {
        let inner = reference
            .inner()
            .ok_or_else(|| FrameworkError::invalid_argument("invalid (default) service reference"))?;
        let consumer_id = consumer.id();

        let factory = {
            let mut bindings = inner.bindings.lock();
            if !consumer_valid() {
                return Err(FrameworkError::InvalidContext);
            }
            if bindings.state == RegistrationState::Unregistered {
                return Ok(None);
            }
            if let Some(usage) = bindings.usage.get_mut(&consumer_id) {
                usage.count += 1;
                return Ok(Some(Arc::clone(&usage.object)));
            }
            match &inner.source {
                ServiceSource::Shared(object) => {
                    bindings.usage.insert(
                        consumer_id,
                        Usage {
                            count: 1,
                            object: Arc::clone(object),
                            plugin: Arc::downgrade(consumer),
                        },
                    );
                    debug!(service_id = %inner.id, plugin_id = %consumer_id, "Service bound");
                    return Ok(Some(Arc::clone(object)));
                }
                ServiceSource::Factory(factory) => Arc::clone(factory),
            }
        };

        // Factory path: produce the object without holding the bindings lock.
        let registration = ServiceRegistration::new(Arc::clone(inner), self.me.clone());
        let produced = panic::catch_unwind(AssertUnwindSafe(|| {
            factory.get_service(consumer, &registration)
        }));
        let object = match produced {
            Ok(Ok(object)) => object,
            Ok(Err(e)) => {
                self.report_factory_failure(inner, consumer_id, &e.to_string());
                return Ok(None);
            }
            Err(_) => {
                self.report_factory_failure(inner, consumer_id, "service factory panicked");
                return Ok(None);
            }
        };

        enum Outcome {
            Bound(ServiceObject),
            Raced(ServiceObject),
            Gone,
            Rejected,
        }
        let outcome = {
            let mut bindings = inner.bindings.lock();
            if !consumer_valid() {
                Outcome::Rejected
            } else if bindings.state == RegistrationState::Unregistered {
                Outcome::Gone
            } else if let Some(usage) = bindings.usage.get_mut(&consumer_id) {
                usage.count += 1;
                Outcome::Raced(Arc::clone(&usage.object))
            } else {
                bindings.usage.insert(
                    consumer_id,
                    Usage {
                        count: 1,
                        object: Arc::clone(&object),
                        plugin: Arc::downgrade(consumer),
                    },
                );
                Outcome::Bound(Arc::clone(&object))
            }
        };

        match outcome {
            Outcome::Bound(bound) => {
                debug!(service_id = %inner.id, plugin_id = %consumer_id, "Factory service bound");
                Ok(Some(bound))
            }
            Outcome::Raced(existing) => {
                factory.unget_service(consumer, &registration, &object);
                Ok(Some(existing))
            }
            Outcome::Gone => {
                factory.unget_service(consumer, &registration, &object);
                Ok(None)
            }
            Outcome::Rejected => {
                debug!(
                    service_id = %inner.id,
                    plugin_id = %consumer_id,
                    "Consumer stopped while factory ran"
                );
                factory.unget_service(consumer, &registration, &object);
                Err(FrameworkError::InvalidContext)
            }
        }
    }

    /// Releases one acquisition of `reference` by `consumer`.
    ///
    /// Returns `false` if `consumer` does not hold the service.  The binding
    /// is dropped when the count reaches zero.
    pub fn unget_service(&self, consumer: &Arc<Plugin>, reference: &ServiceReference) -> bool {
        let Some(inner) = reference.inner() else {
            return false;
        };
        let consumer_id = consumer.id();
        let released = {
            let mut bindings = inner.bindings.lock();
            let Some(usage) = bindings.usage.get_mut(&consumer_id) else {
                return false;
            };
            usage.count -= 1;
            if usage.count > 0 {
                return true;
            }
            bindings.usage.remove(&consumer_id)
        };
        if let Some(usage) = released {
            debug!(service_id = %inner.id, plugin_id = %consumer_id, "Service unbound");
            self.release_binding(inner, consumer, &usage.object);
        }
        true
    }

    fn release_binding(&self, inner: &Arc<RegistrationInner>, consumer: &Arc<Plugin>, object: &ServiceObject) {
        if let ServiceSource::Factory(factory) = &inner.source {
            let registration = ServiceRegistration::new(Arc::clone(inner), self.me.clone());
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                factory.unget_service(consumer, &registration, object)
            }));
            if result.is_err() {
                self.report_factory_failure(inner, consumer.id(), "service factory panicked in unget_service");
            }
        }
    }

    fn report_factory_failure(&self, inner: &RegistrationInner, consumer: PluginId, message: &str) {
        warn!(
            service_id = %inner.id,
            plugin_id = %consumer,
            error = %message,
            "Service factory failed"
        );
        self.listeners.framework_event(&FrameworkEvent::error(
            inner.plugin,
            format!("service factory for service {} failed: {message}", inner.id),
        ));
    }

    // ─── Modification ─────────────────────────────────────────────────────────

    pub(crate) fn set_properties(
        &self,
        inner: &Arc<RegistrationInner>,
        properties: Properties,
    ) -> FrameworkResult<()> {
        let _order = inner.events.lock();
        let previous = {
            let bindings = inner.bindings.lock();
            if bindings.state != RegistrationState::Registered {
                return Err(FrameworkError::illegal_state(format!(
                    "service {} is not registered",
                    inner.id
                )));
            }
            let mut current = inner.properties.write();
            let mut next: Properties = properties
                .iter()
                .filter(|(key, _)| !keys::is_framework_owned(key))
                .map(|(key, value)| (key, value.clone()))
                .collect();
            for key in [
                keys::SERVICE_ID,
                keys::OBJECTCLASS,
                keys::SERVICE_RANKING,
                keys::SERVICE_PLUGIN_ID,
            ] {
                if let Some(value) = current.get(key) {
                    next.insert(key, value.clone());
                }
            }
            drop(bindings);
            std::mem::replace(&mut *current, next)
        };

        debug!(service_id = %inner.id, "Service properties modified");
        let reference = ServiceReference::new(Arc::clone(inner));
        self.listeners.service_changed(
            &ServiceEvent::new(ServiceEventKind::Modified, reference),
            Some(&previous),
        );
        Ok(())
    }

    // ─── Unregistration ───────────────────────────────────────────────────────

    pub(crate) fn unregister(&self, inner: &Arc<RegistrationInner>) -> FrameworkResult<()> {
        let order = inner.events.lock();
        {
            let mut state = self.state.write();
            {
                let mut bindings = inner.bindings.lock();
                if bindings.state != RegistrationState::Registered {
                    return Err(FrameworkError::illegal_state(format!(
                        "service {} is already unregistered",
                        inner.id
                    )));
                }
                bindings.state = RegistrationState::Unregistering;
            }
            state.services.remove(&inner.id);
            for name in &inner.type_names {
                if let Some(ids) = state.by_type.get_mut(name) {
                    ids.retain(|id| *id != inner.id);
                    if ids.is_empty() {
                        state.by_type.remove(name);
                    }
                }
            }
        }

        // Consumers can still obtain the object while they are notified.
        let reference = ServiceReference::new(Arc::clone(inner));
        self.listeners
            .service_changed(&ServiceEvent::new(ServiceEventKind::Unregistering, reference), None);
        drop(order);

        let released: Vec<(PluginId, Usage)> = {
            let mut bindings = inner.bindings.lock();
            bindings.state = RegistrationState::Unregistered;
            bindings.usage.drain().collect()
        };
        for (_, usage) in &released {
            if let Some(consumer) = usage.plugin.upgrade() {
                self.release_binding(inner, &consumer, &usage.object);
            }
        }

        info!(
            service_id = %inner.id,
            plugin_id = %inner.plugin,
            released = released.len(),
            "Service unregistered"
        );
        Ok(())
    }

    // ─── Plugin teardown ──────────────────────────────────────────────────────

    /// References to every service registered by `plugin`.
    pub fn registered_by(&self, plugin: PluginId) -> Vec<ServiceReference> {
        self.state
            .read()
            .services
            .values()
            .filter(|inner| inner.plugin == plugin)
            .map(|inner| ServiceReference::new(Arc::clone(inner)))
            .collect()
    }

    /// References to every registered service `plugin` currently holds.
    pub fn in_use_by(&self, plugin: PluginId) -> Vec<ServiceReference> {
        self.state
            .read()
            .services
            .values()
            .filter(|inner| inner.bindings.lock().usage.contains_key(&plugin))
            .map(|inner| ServiceReference::new(Arc::clone(inner)))
            .collect()
    }

    /// Unregisters every service registered by `plugin`.
    pub fn unregister_all_of(&self, plugin: PluginId) {
        for reference in self.registered_by(plugin) {
            if let Some(inner) = reference.inner() {
                // Another thread may have won the race; that is fine.
                if let Err(e) = self.unregister(inner) {
                    debug!(service_id = %inner.id, error = %e, "Skipped unregistration");
                }
            }
        }
    }

    /// Drops every binding `consumer` holds, whatever its usage count.
    pub fn release_all_used_by(&self, consumer: &Arc<Plugin>) {
        let consumer_id = consumer.id();
        let candidates: Vec<Arc<RegistrationInner>> =
            self.state.read().services.values().cloned().collect();
        for inner in candidates {
            let released = inner.bindings.lock().usage.remove(&consumer_id);
            if let Some(usage) = released {
                debug!(
                    service_id = %inner.id,
                    plugin_id = %consumer_id,
                    count = usage.count,
                    "Released service held by stopping plugin"
                );
                self.release_binding(&inner, consumer, &usage.object);
            }
        }
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.len())
            .finish()
    }
}
