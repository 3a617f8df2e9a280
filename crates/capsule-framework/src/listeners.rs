//! Listener subscriptions and event fan-out.
//!
//! [`ListenerRegistry`] owns every subscription for the three event
//! categories and delivers events under two disciplines:
//!
//! - **Direct** (also used for `BlockingQueued`): the listener runs on the
//!   thread that fired the event, in subscription order, before the firing
//!   call returns.
//! - **Queued**: the event is pushed onto a per-subscription FIFO channel and
//!   a background delivery task calls the listener later.  The task is a
//!   tokio task when the framework was built with a runtime handle, otherwise
//!   a dedicated thread.
//!
//! Service listeners are always direct and carry an optional [`Filter`]
//! that is evaluated against the service's properties at dispatch time.
//!
//! Every delivery is isolated: a listener that returns an error or panics is
//! logged and skipped, and the remaining listeners still run.  No lock is
//! held while listener code runs, so listeners may call back into the
//! framework.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use capsule_core::{DeliveryMode, Filter, FrameworkError, FrameworkResult, PluginId, Properties};

use crate::event::{FrameworkEvent, PluginEvent, ServiceEvent, ServiceEventKind};
use crate::listener::{
    FrameworkListener, ListenerResult, ListenerToken, PluginListener, ServiceListener, receiver_id,
};

type Sink<E> = Arc<dyn Fn(&E) -> ListenerResult + Send + Sync>;

// ─── Subscription records ─────────────────────────────────────────────────────

enum Route<E> {
    Direct(Sink<E>),
    Queued(mpsc::UnboundedSender<E>),
}

impl<E> Clone for Route<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Direct(sink) => Self::Direct(Arc::clone(sink)),
            Self::Queued(tx) => Self::Queued(tx.clone()),
        }
    }
}

struct Subscription<E> {
    token: ListenerToken,
    owner: PluginId,
    receiver: usize,
    route: Route<E>,
}

struct ServiceSubscription {
    token: ListenerToken,
    owner: PluginId,
    receiver: usize,
    listener: Arc<dyn ServiceListener>,
    filter: Option<Arc<Filter>>,
}

/// Number of live subscriptions per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    /// Plugin-event subscriptions.
    pub plugin: usize,
    /// Service-event subscriptions.
    pub service: usize,
    /// Framework-event subscriptions.
    pub framework: usize,
}

// =============================================================================
// ListenerRegistry
// =============================================================================

/// Owner of all listener subscriptions.
///
/// Mutations take a short write lock on the affected category; dispatch
/// snapshots the subscriber list under a read lock and releases it before
/// calling any listener.
pub struct ListenerRegistry {
    plugin: RwLock<Vec<Subscription<PluginEvent>>>,
    framework: RwLock<Vec<Subscription<FrameworkEvent>>>,
    service: RwLock<Vec<ServiceSubscription>>,
    next_token: AtomicU64,
    /// Runtime that drives queued delivery; threads are used when absent.
    runtime: Option<Handle>,
}

impl ListenerRegistry {
    /// Creates an empty registry.  Queued deliveries run on `runtime` when
    /// given, otherwise each queued subscription gets its own thread.
    pub fn new(runtime: Option<Handle>) -> Self {
        Self {
            plugin: RwLock::new(Vec::new()),
            framework: RwLock::new(Vec::new()),
            service: RwLock::new(Vec::new()),
            next_token: AtomicU64::new(1),
            runtime,
        }
    }

    fn next_token(&self) -> ListenerToken {
        ListenerToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    // ─── Connect ──────────────────────────────────────────────────────────────

    /// Subscribes `listener` to plugin events on behalf of `owner`.
    pub fn add_plugin_listener(
        &self,
        owner: PluginId,
        listener: Arc<dyn PluginListener>,
        mode: DeliveryMode,
    ) -> FrameworkResult<ListenerToken> {
        let receiver = receiver_id(&listener);
        let sink: Sink<PluginEvent> = Arc::new(move |event| listener.on_plugin_event(event));
        self.add_subscription(&self.plugin, "plugin", owner, receiver, sink, mode)
    }

    /// Subscribes `listener` to framework events on behalf of `owner`.
    pub fn add_framework_listener(
        &self,
        owner: PluginId,
        listener: Arc<dyn FrameworkListener>,
        mode: DeliveryMode,
    ) -> FrameworkResult<ListenerToken> {
        let receiver = receiver_id(&listener);
        let sink: Sink<FrameworkEvent> =
            Arc::new(move |event| listener.on_framework_event(event));
        self.add_subscription(&self.framework, "framework", owner, receiver, sink, mode)
    }

    /// Subscribes `listener` to service events matching `filter`.
    ///
    /// Connecting an already-subscribed listener replaces its filter and
    /// returns the existing token.
    pub fn add_service_listener(
        &self,
        owner: PluginId,
        listener: Arc<dyn ServiceListener>,
        filter: Option<Filter>,
    ) -> ListenerToken {
        let receiver = receiver_id(&listener);
        let filter = filter.map(Arc::new);
        let mut subs = self.service.write();
        if let Some(existing) = subs.iter_mut().find(|s| s.receiver == receiver) {
            debug!(listener = %existing.token, "Service listener re-connected, filter replaced");
            existing.filter = filter;
            return existing.token;
        }
        let token = self.next_token();
        subs.push(ServiceSubscription {
            token,
            owner,
            receiver,
            listener,
            filter,
        });
        debug!(plugin_id = %owner, listener = %token, "Service listener connected");
        token
    }

    fn add_subscription<E: Clone + Send + 'static>(
        &self,
        list: &RwLock<Vec<Subscription<E>>>,
        category: &'static str,
        owner: PluginId,
        receiver: usize,
        sink: Sink<E>,
        mode: DeliveryMode,
    ) -> FrameworkResult<ListenerToken> {
        let queued = match mode {
            DeliveryMode::Direct | DeliveryMode::BlockingQueued => false,
            DeliveryMode::Queued => true,
            DeliveryMode::Auto => {
                return Err(FrameworkError::invalid_argument(
                    "only Direct, Queued or BlockingQueued delivery is allowed for listeners",
                ));
            }
        };

        let mut subs = list.write();
        if let Some(existing) = subs.iter().find(|s| s.receiver == receiver) {
            debug!(category, listener = %existing.token, "Listener already connected");
            return Ok(existing.token);
        }

        let token = self.next_token();
        let route = if queued {
            Route::Queued(self.spawn_queue(category, token, sink)?)
        } else {
            Route::Direct(sink)
        };
        subs.push(Subscription {
            token,
            owner,
            receiver,
            route,
        });
        debug!(category, plugin_id = %owner, listener = %token, mode = %mode, "Listener connected");
        Ok(token)
    }

    /// Starts the delivery task for a queued subscription and returns the
    /// sending half of its FIFO.
    fn spawn_queue<E: Send + 'static>(
        &self,
        category: &'static str,
        token: ListenerToken,
        sink: Sink<E>,
    ) -> FrameworkResult<mpsc::UnboundedSender<E>> {
        let (tx, mut rx) = mpsc::unbounded_channel::<E>();
        match &self.runtime {
            Some(handle) => {
                handle.spawn(async move {
                    while let Some(event) = rx.recv().await {
                        deliver(category, token, || sink(&event));
                    }
                    trace!(category, listener = %token, "Queued delivery task finished");
                });
            }
            None => {
                std::thread::Builder::new()
                    .name(format!("capsule-{category}-listener-{}", token.0))
                    .spawn(move || {
                        while let Some(event) = rx.blocking_recv() {
                            deliver(category, token, || sink(&event));
                        }
                        trace!(category, listener = %token, "Queued delivery thread finished");
                    })?;
            }
        }
        Ok(tx)
    }

    // ─── Disconnect ───────────────────────────────────────────────────────────

    /// Removes a plugin-event subscription held by `owner`.  Returns `false`
    /// if `owner` has no such subscription; that is not an error.
    pub fn remove_plugin_listener(&self, owner: PluginId, token: ListenerToken) -> bool {
        remove_token(&mut self.plugin.write(), owner, token, |s| (s.owner, s.token))
    }

    /// Removes a framework-event subscription held by `owner`.  Idempotent.
    pub fn remove_framework_listener(&self, owner: PluginId, token: ListenerToken) -> bool {
        remove_token(&mut self.framework.write(), owner, token, |s| (s.owner, s.token))
    }

    /// Removes a service-event subscription held by `owner`.  Idempotent.
    pub fn remove_service_listener(&self, owner: PluginId, token: ListenerToken) -> bool {
        remove_token(&mut self.service.write(), owner, token, |s| (s.owner, s.token))
    }

    /// Removes every subscription owned by `owner`.  Called when a plugin
    /// stops.
    pub fn remove_all_of(&self, owner: PluginId) {
        let mut removed = 0;
        {
            let mut subs = self.plugin.write();
            let before = subs.len();
            subs.retain(|s| s.owner != owner);
            removed += before - subs.len();
        }
        {
            let mut subs = self.framework.write();
            let before = subs.len();
            subs.retain(|s| s.owner != owner);
            removed += before - subs.len();
        }
        {
            let mut subs = self.service.write();
            let before = subs.len();
            subs.retain(|s| s.owner != owner);
            removed += before - subs.len();
        }
        if removed > 0 {
            debug!(plugin_id = %owner, removed, "Removed listeners of stopped plugin");
        }
    }

    /// Drops every subscription, closing all queued channels.
    pub fn clear(&self) {
        self.plugin.write().clear();
        self.framework.write().clear();
        self.service.write().clear();
    }

    /// Live subscription counts.
    pub fn stats(&self) -> ListenerStats {
        ListenerStats {
            plugin: self.plugin.read().len(),
            service: self.service.read().len(),
            framework: self.framework.read().len(),
        }
    }

    // ─── Dispatch ─────────────────────────────────────────────────────────────

    /// Delivers a plugin event to every plugin listener.
    pub fn plugin_changed(&self, event: &PluginEvent) {
        trace!(kind = ?event.kind(), plugin_id = %event.plugin().id(), "Dispatching plugin event");
        fan_out(&self.plugin, "plugin", event);
    }

    /// Delivers a framework event to every framework listener.
    pub fn framework_event(&self, event: &FrameworkEvent) {
        trace!(kind = ?event.kind(), "Dispatching framework event");
        fan_out(&self.framework, "framework", event);
    }

    /// Delivers a service event to every service listener whose filter
    /// matches the service's current properties.
    ///
    /// For [`ServiceEventKind::Modified`], `previous` holds the properties
    /// before the change; listeners that matched them but not the new ones
    /// receive [`ServiceEventKind::ModifiedEndMatch`] instead.
    pub fn service_changed(&self, event: &ServiceEvent, previous: Option<&Properties>) {
        let subs: Vec<(ListenerToken, Arc<dyn ServiceListener>, Option<Arc<Filter>>)> = self
            .service
            .read()
            .iter()
            .map(|s| (s.token, Arc::clone(&s.listener), s.filter.clone()))
            .collect();
        if subs.is_empty() {
            return;
        }

        let current = event.reference().properties();
        trace!(
            kind = ?event.kind(),
            service_id = ?event.reference().service_id(),
            listeners = subs.len(),
            "Dispatching service event"
        );

        for (token, listener, filter) in subs {
            let Some(filter) = filter else {
                deliver("service", token, || listener.on_service_event(event));
                continue;
            };
            if filter.matches(&current) {
                deliver("service", token, || listener.on_service_event(event));
            } else if event.kind() == ServiceEventKind::Modified
                && previous.is_some_and(|p| filter.matches(p))
            {
                let end_match = event.with_kind(ServiceEventKind::ModifiedEndMatch);
                deliver("service", token, || listener.on_service_event(&end_match));
            }
        }
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("stats", &self.stats())
            .field("queued_on_runtime", &self.runtime.is_some())
            .finish()
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

// Subscriptions of other plugins are never touched, even for a known token.
fn remove_token<T>(
    list: &mut Vec<T>,
    owner: PluginId,
    token: ListenerToken,
    key: impl Fn(&T) -> (PluginId, ListenerToken),
) -> bool {
    let before = list.len();
    list.retain(|s| key(s) != (owner, token));
    let removed = list.len() != before;
    if removed {
        debug!(plugin_id = %owner, listener = %token, "Listener disconnected");
    } else {
        trace!(plugin_id = %owner, listener = %token, "Disconnect of unknown listener ignored");
    }
    removed
}

fn fan_out<E: Clone>(list: &RwLock<Vec<Subscription<E>>>, category: &'static str, event: &E) {
    let routes: Vec<(ListenerToken, Route<E>)> = list
        .read()
        .iter()
        .map(|s| (s.token, s.route.clone()))
        .collect();

    for (token, route) in routes {
        match route {
            Route::Direct(sink) => deliver(category, token, || sink(event)),
            Route::Queued(tx) => {
                if tx.send(event.clone()).is_err() {
                    debug!(category, listener = %token, "Queued listener has shut down, event dropped");
                }
            }
        }
    }
}

/// Runs one listener callback, containing errors and panics.
fn deliver(category: &'static str, token: ListenerToken, f: impl FnOnce() -> ListenerResult) {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(category, listener = %token, error = %e, "Listener returned an error");
        }
        Err(_) => {
            error!(category, listener = %token, "Listener panicked during event delivery");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::FrameworkEventKind;
    use crate::listener::{framework_listener, plugin_listener, service_listener};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_framework_listener(counter: &Arc<AtomicUsize>) -> Arc<dyn FrameworkListener> {
        let counter = Arc::clone(counter);
        framework_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_direct_delivery_is_synchronous() {
        let registry = ListenerRegistry::new(None);
        let counter = Arc::new(AtomicUsize::new(0));
        registry
            .add_framework_listener(
                PluginId(1),
                counting_framework_listener(&counter),
                DeliveryMode::Direct,
            )
            .unwrap();

        registry.framework_event(&FrameworkEvent::new(FrameworkEventKind::Info));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_auto_mode_rejected() {
        let registry = ListenerRegistry::new(None);
        let counter = Arc::new(AtomicUsize::new(0));
        let result = registry.add_framework_listener(
            PluginId(1),
            counting_framework_listener(&counter),
            DeliveryMode::Auto,
        );
        assert!(matches!(result, Err(FrameworkError::InvalidArgument(_))));
        assert_eq!(registry.stats().framework, 0);
    }

    #[test]
    fn test_duplicate_receiver_returns_same_token() {
        let registry = ListenerRegistry::new(None);
        let counter = Arc::new(AtomicUsize::new(0));
        let listener = counting_framework_listener(&counter);
        let a = registry
            .add_framework_listener(PluginId(1), Arc::clone(&listener), DeliveryMode::Direct)
            .unwrap();
        let b = registry
            .add_framework_listener(PluginId(1), listener, DeliveryMode::BlockingQueued)
            .unwrap();
        assert_eq!(a, b);

        registry.framework_event(&FrameworkEvent::new(FrameworkEventKind::Info));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_listener_does_not_block_others() {
        let registry = ListenerRegistry::new(None);
        let counter = Arc::new(AtomicUsize::new(0));
        registry
            .add_framework_listener(
                PluginId(1),
                framework_listener(|_| Err("boom".into())),
                DeliveryMode::Direct,
            )
            .unwrap();
        registry
            .add_framework_listener(
                PluginId(1),
                framework_listener(|_| panic!("listener bug")),
                DeliveryMode::Direct,
            )
            .unwrap();
        registry
            .add_framework_listener(
                PluginId(1),
                counting_framework_listener(&counter),
                DeliveryMode::Direct,
            )
            .unwrap();

        registry.framework_event(&FrameworkEvent::new(FrameworkEventKind::Info));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = ListenerRegistry::new(None);
        let token = registry.add_service_listener(
            PluginId(1),
            service_listener(|_| Ok(())),
            None,
        );
        assert!(registry.remove_service_listener(PluginId(1), token));
        assert!(!registry.remove_service_listener(PluginId(1), token));
        assert_eq!(registry.stats().service, 0);
    }

    #[test]
    fn test_remove_requires_owner() {
        let registry = ListenerRegistry::new(None);
        let token = registry
            .add_plugin_listener(PluginId(1), plugin_listener(|_| Ok(())), DeliveryMode::Direct)
            .unwrap();
        assert!(!registry.remove_plugin_listener(PluginId(2), token));
        assert_eq!(registry.stats().plugin, 1);
        assert!(registry.remove_plugin_listener(PluginId(1), token));
        assert_eq!(registry.stats().plugin, 0);
    }

    #[test]
    fn test_remove_all_of_owner() {
        let registry = ListenerRegistry::new(None);
        let counter = Arc::new(AtomicUsize::new(0));
        registry
            .add_framework_listener(
                PluginId(1),
                counting_framework_listener(&counter),
                DeliveryMode::Direct,
            )
            .unwrap();
        registry.add_service_listener(PluginId(1), service_listener(|_| Ok(())), None);
        registry.add_service_listener(PluginId(2), service_listener(|_| Ok(())), None);

        registry.remove_all_of(PluginId(1));
        assert_eq!(
            registry.stats(),
            ListenerStats {
                plugin: 0,
                service: 1,
                framework: 0
            }
        );
    }

    #[test]
    fn test_queued_delivery_on_thread_preserves_order() {
        let registry = ListenerRegistry::new(None);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry
            .add_framework_listener(
                PluginId(1),
                framework_listener(move |event| {
                    sink.lock().push(event.message().unwrap_or_default().to_string());
                    Ok(())
                }),
                DeliveryMode::Queued,
            )
            .unwrap();

        for i in 0..20 {
            registry.framework_event(&FrameworkEvent::warning(PluginId(1), i.to_string()));
        }

        let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        for _ in 0..200 {
            if seen.lock().len() == expected.len() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(*seen.lock(), expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_queued_delivery_on_runtime() {
        let registry = ListenerRegistry::new(Some(Handle::current()));
        let counter = Arc::new(AtomicUsize::new(0));
        registry
            .add_framework_listener(
                PluginId(1),
                counting_framework_listener(&counter),
                DeliveryMode::Queued,
            )
            .unwrap();

        registry.framework_event(&FrameworkEvent::new(FrameworkEventKind::Info));
        registry.framework_event(&FrameworkEvent::new(FrameworkEventKind::Info));

        tokio::time::timeout(Duration::from_secs(2), async {
            while counter.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("queued events were not delivered");
    }
}
