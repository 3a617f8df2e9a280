//! The root object owning all framework state.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use capsule_framework::{FrameworkContext, StaticLoader};
//!
//! let framework = FrameworkContext::builder()
//!     .loader(StaticLoader::new().with("static:greeter", GREETER))
//!     .storage_dir("/var/lib/capsule")
//!     .build();
//! framework.init()?;
//!
//! let plugin = framework.install_plugin("static:greeter", None)?;
//! plugin.start()?;
//!
//! let host = framework.system_context()?;
//! let reference = host.service_reference("greeter")?;
//!
//! framework.shutdown();
//! ```

use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use capsule_core::{FrameworkError, FrameworkResult, PluginId, PluginState, Properties, keys};

use crate::context::PluginContext;
use crate::event::{FrameworkEvent, FrameworkEventKind, PluginEventKind};
use crate::listeners::ListenerRegistry;
use crate::plugin::{LoadedPlugin, Plugin, PluginLoader, PluginTable, StaticLoader};
use crate::service::ServiceRegistry;
use crate::storage::{FsStorage, StorageResolver};

/// Symbolic name of the system plugin (id 0).
pub const SYSTEM_PLUGIN_NAME: &str = "capsule.system";

/// Install location reported by the system plugin.
pub const SYSTEM_PLUGIN_LOCATION: &str = "System Plugin";

const FRAMEWORK_VENDOR: &str = "Capsule";

/// Lifecycle of the framework itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameworkState {
    /// Built but not initialised.
    Created,
    /// Running; plugins may be installed and started.
    Active,
    /// Shutting down.
    Stopping,
    /// Shut down.
    Stopped,
}

// =============================================================================
// FrameworkBuilder
// =============================================================================

/// Builder for [`FrameworkContext`].
pub struct FrameworkBuilder {
    properties: Properties,
    storage: Option<Arc<dyn StorageResolver>>,
    loader: Option<Arc<dyn PluginLoader>>,
    runtime: Option<Option<Handle>>,
}

impl FrameworkBuilder {
    fn new() -> Self {
        Self {
            properties: Properties::new(),
            storage: None,
            loader: None,
            runtime: None,
        }
    }

    /// Sets one framework property.
    pub fn property(
        mut self,
        key: impl Into<String>,
        value: impl Into<capsule_core::PropertyValue>,
    ) -> Self {
        self.properties.insert(key, value);
        self
    }

    /// Merges `properties` into the framework properties.
    pub fn properties(mut self, properties: &Properties) -> Self {
        self.properties.extend_from(properties);
        self
    }

    /// Uses [`FsStorage`] rooted at `dir`.
    pub fn storage_dir(self, dir: impl Into<PathBuf>) -> Self {
        self.storage(FsStorage::new(dir))
    }

    /// Uses a custom storage resolver.
    pub fn storage(mut self, storage: impl StorageResolver) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    /// Uses `loader` to resolve install locations.
    pub fn loader(mut self, loader: impl PluginLoader) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    /// Runs queued listener delivery on `handle`.
    ///
    /// Defaults to the runtime the framework is built on, if any.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(Some(handle));
        self
    }

    /// Runs queued listener delivery on dedicated threads even when built
    /// inside a tokio runtime.
    pub fn without_runtime(mut self) -> Self {
        self.runtime = Some(None);
        self
    }

    /// Builds the framework in the [`FrameworkState::Created`] state.
    pub fn build(self) -> Arc<FrameworkContext> {
        let storage: Arc<dyn StorageResolver> = match self.storage {
            Some(storage) => storage,
            None => Arc::new(FsStorage::default()),
        };
        let loader: Arc<dyn PluginLoader> = match self.loader {
            Some(loader) => loader,
            None => Arc::new(StaticLoader::new()),
        };
        let runtime = self.runtime.unwrap_or_else(|| Handle::try_current().ok());

        let mut properties = Properties::new()
            .with(keys::FRAMEWORK_VERSION, env!("CARGO_PKG_VERSION"))
            .with(keys::FRAMEWORK_VENDOR, FRAMEWORK_VENDOR)
            .with(
                keys::FRAMEWORK_STORAGE,
                storage.base_dir().display().to_string(),
            );
        properties.extend_from(&self.properties);

        let listeners = Arc::new(ListenerRegistry::new(runtime));
        let services = ServiceRegistry::new(Arc::clone(&listeners));

        Arc::new(FrameworkContext {
            properties,
            plugins: PluginTable::new(),
            services,
            listeners,
            loader,
            storage,
            state: RwLock::new(FrameworkState::Created),
            start_order: Mutex::new(Vec::new()),
        })
    }
}

// =============================================================================
// FrameworkContext
// =============================================================================

/// Owner of the plugin table, the service registry and the listener
/// registry.
pub struct FrameworkContext {
    properties: Properties,
    plugins: PluginTable,
    services: Arc<ServiceRegistry>,
    listeners: Arc<ListenerRegistry>,
    loader: Arc<dyn PluginLoader>,
    storage: Arc<dyn StorageResolver>,
    state: RwLock<FrameworkState>,
    /// Ids of active plugins in the order they became active.
    start_order: Mutex<Vec<PluginId>>,
}

impl FrameworkContext {
    /// Creates a builder.
    pub fn builder() -> FrameworkBuilder {
        FrameworkBuilder::new()
    }

    /// Starts the framework: installs and activates the system plugin and
    /// fires the framework `Started` event.
    pub fn init(self: &Arc<Self>) -> FrameworkResult<()> {
        {
            let mut state = self.state.write();
            if *state != FrameworkState::Created {
                return Err(FrameworkError::illegal_state(format!(
                    "framework cannot be initialised in state {:?}",
                    *state
                )));
            }
            *state = FrameworkState::Active;
        }

        let system = Arc::new(Plugin::new(
            PluginId::SYSTEM,
            SYSTEM_PLUGIN_LOCATION,
            LoadedPlugin {
                symbolic_name: SYSTEM_PLUGIN_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                activator: None,
            },
            self.storage
                .data_root(PluginId::SYSTEM, SYSTEM_PLUGIN_LOCATION),
            Arc::downgrade(self),
        ));
        if self.plugins.insert_unique(Arc::clone(&system)).is_err() {
            return Err(FrameworkError::illegal_state("system plugin already installed"));
        }
        system.fire(self, PluginEventKind::Installed);
        system.start()?;

        info!(
            version = %env!("CARGO_PKG_VERSION"),
            storage = %self.storage.base_dir().display(),
            "Framework started"
        );
        self.listeners
            .framework_event(&FrameworkEvent::new(FrameworkEventKind::Started));
        Ok(())
    }

    /// Context of the system plugin, for the host application.
    pub fn system_context(&self) -> FrameworkResult<Arc<PluginContext>> {
        self.plugins
            .get(PluginId::SYSTEM)
            .and_then(|system| system.context())
            .ok_or_else(|| FrameworkError::illegal_state("the framework is not running"))
    }

    // ─── Plugin management ────────────────────────────────────────────────────

    /// Installs the plugin at `location`.
    ///
    /// If a plugin is already installed from `location` it is returned
    /// unchanged.  Loader failures surface as [`FrameworkError::Install`].
    pub fn install_plugin(
        self: &Arc<Self>,
        location: &str,
        stream: Option<&mut dyn Read>,
    ) -> FrameworkResult<Arc<Plugin>> {
        if location.trim().is_empty() {
            return Err(FrameworkError::invalid_argument("plugin location must not be empty"));
        }
        if !self.is_active() {
            return Err(FrameworkError::illegal_state(
                "plugins can only be installed while the framework is running",
            ));
        }
        if let Some(existing) = self.plugins.by_location(location) {
            debug!(plugin_id = %existing.id(), location, "Plugin already installed");
            return Ok(existing);
        }

        let loaded = self.loader.load(location, stream)?;
        let id = self.plugins.next_id();
        let plugin = Arc::new(Plugin::new(
            id,
            location,
            loaded,
            self.storage.data_root(id, location),
            Arc::downgrade(self),
        ));

        match self.plugins.insert_unique(plugin) {
            Ok(plugin) => {
                info!(
                    plugin_id = %id,
                    plugin = %plugin.symbolic_name(),
                    version = %plugin.version(),
                    location,
                    "Plugin installed"
                );
                plugin.fire(self, PluginEventKind::Installed);
                Ok(plugin)
            }
            Err(existing) => Ok(existing),
        }
    }

    /// Starts the plugin with `id`.
    pub fn start_plugin(&self, id: PluginId) -> FrameworkResult<()> {
        self.require_plugin(id)?.start()
    }

    /// Stops the plugin with `id`.
    pub fn stop_plugin(&self, id: PluginId) -> FrameworkResult<()> {
        self.require_plugin(id)?.stop()
    }

    /// Uninstalls the plugin with `id`.
    pub fn uninstall_plugin(&self, id: PluginId) -> FrameworkResult<()> {
        self.require_plugin(id)?.uninstall()
    }

    fn require_plugin(&self, id: PluginId) -> FrameworkResult<Arc<Plugin>> {
        self.plugins
            .get(id)
            .ok_or_else(|| FrameworkError::invalid_argument(format!("no plugin with id {id}")))
    }

    /// Stops every active plugin in reverse start order, then the system
    /// plugin, and fires the framework `Stopped` event.  Subscriptions are
    /// dropped afterwards, closing all queued delivery channels.
    ///
    /// Calling `shutdown` on a framework that is not running does nothing.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.write();
            if *state != FrameworkState::Active {
                debug!(state = ?*state, "Shutdown ignored");
                return;
            }
            *state = FrameworkState::Stopping;
        }
        info!("Framework shutting down");

        let order: Vec<PluginId> = self.start_order.lock().iter().rev().copied().collect();
        for id in order.into_iter().filter(|id| !id.is_system()) {
            let Some(plugin) = self.plugins.get(id) else {
                continue;
            };
            if let Err(e) = plugin.stop_inner() {
                warn!(plugin_id = %id, error = %e, "Plugin failed to stop during shutdown");
            }
        }
        for plugin in self.plugins.all() {
            if !plugin.id().is_system() && plugin.state() == PluginState::Active {
                if let Err(e) = plugin.stop_inner() {
                    warn!(plugin_id = %plugin.id(), error = %e, "Plugin failed to stop during shutdown");
                }
            }
        }
        if let Some(system) = self.plugins.get(PluginId::SYSTEM) {
            if let Err(e) = system.stop_inner() {
                warn!(error = %e, "System plugin failed to stop");
            }
        }

        *self.state.write() = FrameworkState::Stopped;
        info!("Framework stopped");
        self.listeners
            .framework_event(&FrameworkEvent::new(FrameworkEventKind::Stopped));
        self.listeners.clear();
    }

    pub(crate) fn record_started(&self, id: PluginId) {
        let mut order = self.start_order.lock();
        if !order.contains(&id) {
            order.push(id);
        }
    }

    pub(crate) fn record_stopped(&self, id: PluginId) {
        self.start_order.lock().retain(|p| *p != id);
    }

    // ─── Accessors ────────────────────────────────────────────────────────────

    /// Framework properties: built-in keys plus configured ones.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// The installed plugin with `id`, including the system plugin.
    pub fn plugin(&self, id: PluginId) -> Option<Arc<Plugin>> {
        self.plugins.get(id)
    }

    /// All installed plugins in id order.
    pub fn installed_plugins(&self) -> Vec<Arc<Plugin>> {
        self.plugins.all()
    }

    pub(crate) fn plugins(&self) -> &PluginTable {
        &self.plugins
    }

    /// The service registry.
    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    /// The listener registry.
    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    /// Current framework state.
    pub fn state(&self) -> FrameworkState {
        *self.state.read()
    }

    /// Returns `true` between [`init`](Self::init) and
    /// [`shutdown`](Self::shutdown).
    pub fn is_active(&self) -> bool {
        self.state() == FrameworkState::Active
    }
}

impl fmt::Debug for FrameworkContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameworkContext")
            .field("state", &self.state())
            .field("plugins", &self.plugins.len())
            .field("services", &self.services.len())
            .field("listeners", &self.listeners.stats())
            .finish()
    }
}
