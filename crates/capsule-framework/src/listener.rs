//! Typed observer traits for the three event categories.
//!
//! Each trait is implemented for any matching closure, and the
//! [`plugin_listener`], [`service_listener`] and [`framework_listener`]
//! helpers wrap a closure into the `Arc<dyn …>` the connect calls expect:
//!
//! ```rust,ignore
//! let token = ctx.connect_service_listener(
//!     service_listener(|event| {
//!         info!(kind = ?event.kind(), "service changed");
//!         Ok(())
//!     }),
//!     "(objectclass=greeter)",
//! )?;
//! ```
//!
//! A listener identifies itself by its `Arc`: connecting the same `Arc`
//! twice in one category returns the existing [`ListenerToken`].

use std::fmt;
use std::sync::Arc;

use capsule_core::BoxError;

use crate::event::{FrameworkEvent, PluginEvent, ServiceEvent};

/// Result returned by listener callbacks.  Errors are logged and never
/// reach the code that fired the event.
pub type ListenerResult = Result<(), BoxError>;

/// Opaque handle identifying one subscription.  Returned by the connect
/// calls and accepted by the disconnect calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerToken(pub(crate) u64);

impl fmt::Display for ListenerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Receives plugin lifecycle events.
pub trait PluginListener: Send + Sync + 'static {
    /// Called for every plugin lifecycle transition.
    fn on_plugin_event(&self, event: &PluginEvent) -> ListenerResult;
}

/// Receives service registry events that pass the subscription's filter.
pub trait ServiceListener: Send + Sync + 'static {
    /// Called for every matching service event.
    fn on_service_event(&self, event: &ServiceEvent) -> ListenerResult;
}

/// Receives framework events.
pub trait FrameworkListener: Send + Sync + 'static {
    /// Called for every framework event.
    fn on_framework_event(&self, event: &FrameworkEvent) -> ListenerResult;
}

impl<F> PluginListener for F
where
    F: Fn(&PluginEvent) -> ListenerResult + Send + Sync + 'static,
{
    fn on_plugin_event(&self, event: &PluginEvent) -> ListenerResult {
        self(event)
    }
}

impl<F> ServiceListener for F
where
    F: Fn(&ServiceEvent) -> ListenerResult + Send + Sync + 'static,
{
    fn on_service_event(&self, event: &ServiceEvent) -> ListenerResult {
        self(event)
    }
}

impl<F> FrameworkListener for F
where
    F: Fn(&FrameworkEvent) -> ListenerResult + Send + Sync + 'static,
{
    fn on_framework_event(&self, event: &FrameworkEvent) -> ListenerResult {
        self(event)
    }
}

/// Wraps a closure as a plugin listener.
pub fn plugin_listener<F>(f: F) -> Arc<dyn PluginListener>
where
    F: Fn(&PluginEvent) -> ListenerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wraps a closure as a service listener.
pub fn service_listener<F>(f: F) -> Arc<dyn ServiceListener>
where
    F: Fn(&ServiceEvent) -> ListenerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wraps a closure as a framework listener.
pub fn framework_listener<F>(f: F) -> Arc<dyn FrameworkListener>
where
    F: Fn(&FrameworkEvent) -> ListenerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Identity of a listener object, used to reject duplicate subscriptions.
pub(crate) fn receiver_id<T: ?Sized>(listener: &Arc<T>) -> usize {
    Arc::as_ptr(listener) as *const () as usize
}
