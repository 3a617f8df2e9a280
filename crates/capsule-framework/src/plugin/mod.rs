//! Installed plugins and their lifecycle.
//!
//! A [`Plugin`] is created by [`FrameworkContext::install_plugin`] from the
//! [`LoadedPlugin`] a [`PluginLoader`] returns, and is owned by the
//! framework's plugin table until it is uninstalled.
//!
//! ```text
//! install ──► Installed ──► Resolved ──► Starting ──► Active
//!                              ▲                         │
//!                              └──────── Stopping ◄──────┘
//! uninstall ──► Uninstalled
//! ```
//!
//! Starting a plugin creates a fresh [`PluginContext`] and hands it to the
//! plugin's [`PluginActivator`].  Stopping invalidates that context, then
//! withdraws everything the plugin registered or acquired through it.
//!
//! [`FrameworkContext::install_plugin`]: crate::framework::FrameworkContext::install_plugin

mod loader;
mod table;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::{ReentrantMutex, RwLock};
use tracing::{debug, error, info, warn};

use capsule_core::{BoxError, FrameworkError, FrameworkResult, PluginId, PluginState};

use crate::context::PluginContext;
use crate::event::{FrameworkEvent, PluginEvent, PluginEventKind};
use crate::framework::FrameworkContext;
use crate::service::ServiceReference;

pub use loader::{
    LoadedPlugin, PLUGIN_API_VERSION, PluginDescriptor, PluginLoader, StaticLoader,
};
pub(crate) use table::PluginTable;

// ─── PluginActivator ──────────────────────────────────────────────────────────

/// Entry points the framework calls when a plugin starts and stops.
///
/// `start` typically registers services and connects listeners through the
/// context; `stop` may release resources.  Anything still registered through
/// the context when `stop` returns is cleaned up by the framework.
pub trait PluginActivator: Send + Sync + 'static {
    /// Called with the plugin's fresh context.  An error aborts the start
    /// and leaves the plugin `Resolved`.
    fn start(&self, context: &Arc<PluginContext>) -> Result<(), BoxError>;

    /// Called while the context is still valid.  Errors are reported as
    /// framework error events; the stop proceeds regardless.
    fn stop(&self, context: &Arc<PluginContext>) -> Result<(), BoxError> {
        let _ = context;
        Ok(())
    }
}

// =============================================================================
// Plugin
// =============================================================================

/// An installed plugin.
pub struct Plugin {
    id: PluginId,
    symbolic_name: String,
    location: String,
    version: String,
    data_root: PathBuf,
    framework: Weak<FrameworkContext>,
    activator: Option<Box<dyn PluginActivator>>,
    /// Serialises start/stop/uninstall; re-entrant so an activator may stop
    /// its own plugin.
    lifecycle: ReentrantMutex<()>,
    state: RwLock<PluginState>,
    context: RwLock<Option<Arc<PluginContext>>>,
}

impl Plugin {
    pub(crate) fn new(
        id: PluginId,
        location: impl Into<String>,
        loaded: LoadedPlugin,
        data_root: PathBuf,
        framework: Weak<FrameworkContext>,
    ) -> Self {
        Self {
            id,
            symbolic_name: loaded.symbolic_name,
            location: location.into(),
            version: loaded.version,
            data_root,
            framework,
            activator: loaded.activator,
            lifecycle: ReentrantMutex::new(()),
            state: RwLock::new(PluginState::Installed),
            context: RwLock::new(None),
        }
    }

    // ─── Accessors ────────────────────────────────────────────────────────────

    /// Numeric id, unique for the framework's lifetime.
    pub fn id(&self) -> PluginId {
        self.id
    }

    /// Symbolic name declared by the plugin.
    pub fn symbolic_name(&self) -> &str {
        &self.symbolic_name
    }

    /// Location the plugin was installed from.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Declared version string.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Directory for the plugin's private files.  May not exist yet.
    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PluginState {
        *self.state.read()
    }

    /// The context of the current activation, while the plugin is active.
    pub fn context(&self) -> Option<Arc<PluginContext>> {
        self.context.read().clone()
    }

    /// Services this plugin has registered and not yet withdrawn.
    pub fn registered_services(&self) -> Vec<ServiceReference> {
        self.framework
            .upgrade()
            .map(|fw| fw.services().registered_by(self.id))
            .unwrap_or_default()
    }

    /// Services this plugin currently holds.
    pub fn services_in_use(&self) -> Vec<ServiceReference> {
        self.framework
            .upgrade()
            .map(|fw| fw.services().in_use_by(self.id))
            .unwrap_or_default()
    }

    fn set_state(&self, state: PluginState) {
        *self.state.write() = state;
    }

    fn framework(&self) -> FrameworkResult<Arc<FrameworkContext>> {
        self.framework
            .upgrade()
            .ok_or_else(|| FrameworkError::illegal_state("the framework has been dropped"))
    }

    // ─── Lifecycle ────────────────────────────────────────────────────────────

    /// Starts the plugin.
    ///
    /// Starting an active plugin is a no-op.  Fails with `IllegalState` if the
    /// plugin is uninstalled or mid-transition, or if the framework is not
    /// running, and with `Activator` if the activator's `start` fails.
    pub fn start(self: &Arc<Self>) -> FrameworkResult<()> {
        let _guard = self.lifecycle.lock();
        let fw = self.framework()?;

        match self.state() {
            PluginState::Active => return Ok(()),
            PluginState::Uninstalled | PluginState::Starting | PluginState::Stopping => {
                return Err(FrameworkError::illegal_state(format!(
                    "cannot start plugin {} ({}) in state {}",
                    self.id,
                    self.symbolic_name,
                    self.state()
                )));
            }
            PluginState::Installed => {
                self.set_state(PluginState::Resolved);
                self.fire(&fw, PluginEventKind::Resolved);
            }
            PluginState::Resolved => {}
        }
        if !self.id.is_system() && !fw.is_active() {
            return Err(FrameworkError::illegal_state(format!(
                "cannot start plugin {}: the framework is not running",
                self.id
            )));
        }

        self.set_state(PluginState::Starting);
        self.fire(&fw, PluginEventKind::Starting);

        let context = Arc::new(PluginContext::new(self, Arc::downgrade(&fw)));
        *self.context.write() = Some(Arc::clone(&context));

        let outcome = match &self.activator {
            None => Ok(()),
            Some(activator) => match panic::catch_unwind(AssertUnwindSafe(|| activator.start(&context))) {
                Ok(result) => result,
                Err(_) => Err("activator panicked in start".into()),
            },
        };

        match outcome {
            Ok(()) => {
                self.set_state(PluginState::Active);
                fw.record_started(self.id);
                info!(
                    plugin_id = %self.id,
                    plugin = %self.symbolic_name,
                    version = %self.version,
                    "Plugin started"
                );
                self.fire(&fw, PluginEventKind::Started);
                Ok(())
            }
            Err(source) => {
                error!(
                    plugin_id = %self.id,
                    plugin = %self.symbolic_name,
                    error = %source,
                    "Plugin activator failed to start"
                );
                self.teardown(&fw, &context);
                self.set_state(PluginState::Resolved);
                fw.listeners().framework_event(&FrameworkEvent::error(
                    self.id,
                    format!("plugin {} failed to start: {source}", self.symbolic_name),
                ));
                Err(FrameworkError::Activator {
                    plugin: self.id,
                    source,
                })
            }
        }
    }

    /// Stops the plugin.  Stopping a plugin that is not active is a no-op;
    /// the system plugin can only be stopped by framework shutdown.
    pub fn stop(self: &Arc<Self>) -> FrameworkResult<()> {
        if self.id.is_system() {
            return Err(FrameworkError::illegal_state(
                "the system plugin is stopped by shutting down the framework",
            ));
        }
        self.stop_inner()
    }

    pub(crate) fn stop_inner(self: &Arc<Self>) -> FrameworkResult<()> {
        let _guard = self.lifecycle.lock();
        if self.state() != PluginState::Active {
            debug!(plugin_id = %self.id, state = %self.state(), "Stop ignored, plugin not active");
            return Ok(());
        }
        let fw = self.framework()?;

        self.set_state(PluginState::Stopping);
        self.fire(&fw, PluginEventKind::Stopping);

        let context = self.context.read().clone();
        if let Some(context) = &context {
            if let Some(activator) = &self.activator {
                let outcome =
                    match panic::catch_unwind(AssertUnwindSafe(|| activator.stop(context))) {
                        Ok(result) => result,
                        Err(_) => Err("activator panicked in stop".into()),
                    };
                if let Err(e) = outcome {
                    warn!(plugin_id = %self.id, error = %e, "Plugin activator failed to stop cleanly");
                    fw.listeners().framework_event(&FrameworkEvent::error(
                        self.id,
                        format!("plugin {} failed to stop cleanly: {e}", self.symbolic_name),
                    ));
                }
            }
            self.teardown(&fw, context);
        }

        fw.record_stopped(self.id);
        self.set_state(PluginState::Resolved);
        info!(plugin_id = %self.id, plugin = %self.symbolic_name, "Plugin stopped");
        self.fire(&fw, PluginEventKind::Stopped);
        Ok(())
    }

    /// Stops the plugin if needed and removes it from the framework.
    pub fn uninstall(self: &Arc<Self>) -> FrameworkResult<()> {
        if self.id.is_system() {
            return Err(FrameworkError::illegal_state("the system plugin cannot be uninstalled"));
        }
        let _guard = self.lifecycle.lock();
        if self.state() == PluginState::Uninstalled {
            return Err(FrameworkError::illegal_state(format!(
                "plugin {} is already uninstalled",
                self.id
            )));
        }
        self.stop_inner()?;

        let fw = self.framework()?;
        self.set_state(PluginState::Uninstalled);
        fw.plugins().remove(self.id);
        info!(plugin_id = %self.id, plugin = %self.symbolic_name, "Plugin uninstalled");
        self.fire(&fw, PluginEventKind::Uninstalled);
        Ok(())
    }

    /// Invalidates `context` and sweeps everything registered through it.
    fn teardown(self: &Arc<Self>, fw: &FrameworkContext, context: &PluginContext) {
        context.invalidate();
        *self.context.write() = None;
        fw.services().unregister_all_of(self.id);
        fw.services().release_all_used_by(self);
        // The host's listeners stay connected until the framework's final
        // `Stopped` event has been delivered.
        if !self.id.is_system() {
            fw.listeners().remove_all_of(self.id);
        }
    }

    pub(crate) fn fire(self: &Arc<Self>, fw: &FrameworkContext, kind: PluginEventKind) {
        fw.listeners()
            .plugin_changed(&PluginEvent::new(kind, Arc::clone(self)));
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("id", &self.id)
            .field("symbolic_name", &self.symbolic_name)
            .field("location", &self.location)
            .field("version", &self.version)
            .field("state", &self.state())
            .finish()
    }
}
