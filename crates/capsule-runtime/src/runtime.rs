//! Process-level orchestration of a framework instance.
//!
//! [`CapsuleRuntime`] turns a [`CapsuleConfig`] into a running framework:
//! it initializes logging, builds the [`FrameworkContext`] with the
//! configured storage, properties and queued delivery executor, installs
//! the configured plugins and starts the ones marked `start = true`.
//!
//! ```rust,ignore
//! use capsule_runtime::CapsuleRuntime;
//!
//! #[tokio::main]
//! async fn main() -> capsule_runtime::RuntimeResult<()> {
//!     CapsuleRuntime::builder()
//!         .plugin("static:greeter", GREETER)
//!         .build()?
//!         .run()
//!         .await
//! }
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use capsule_framework::{
    FrameworkContext, ListenerStats, PluginDescriptor, PluginState, StaticLoader,
};
use tokio::signal;
use tracing::{debug, error, info, warn};

use crate::config::{CapsuleConfig, ConfigLoader, QueuedDelivery, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// Point-in-time counters for a running runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Installed plugins, including the system plugin.
    pub plugins: usize,
    /// Plugins in the `Active` state.
    pub active_plugins: usize,
    /// Registered services.
    pub services: usize,
    /// Live listener subscriptions.
    pub listeners: ListenerStats,
}

/// Owns the configuration, the compiled-in plugin table and, once started,
/// the framework instance.
pub struct CapsuleRuntime {
    config: CapsuleConfig,
    loader: StaticLoader,
    framework: Option<Arc<FrameworkContext>>,
}

impl CapsuleRuntime {
    /// Loads configuration from the default locations and initializes
    /// logging.
    ///
    /// A configuration that fails to load is reported and replaced by the
    /// defaults.
    pub fn new() -> Self {
        match ConfigLoader::new().with_current_dir().with_user_config_dir().load() {
            Ok(config) => Self::from_config(config),
            Err(err) => {
                let runtime = Self::from_config(CapsuleConfig::default());
                warn!(error = %err, "Failed to load configuration, using defaults");
                runtime
            }
        }
    }

    /// Creates a runtime builder.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from an already loaded configuration and
    /// initializes logging from it.
    pub fn from_config(config: CapsuleConfig) -> Self {
        logging::init_from_config(&config.logging);
        Self {
            config,
            loader: StaticLoader::new(),
            framework: None,
        }
    }

    /// The configuration this runtime was built from.
    pub fn config(&self) -> &CapsuleConfig {
        &self.config
    }

    /// Makes a compiled-in plugin installable under `location`.
    pub fn register_plugin(
        &mut self,
        location: impl Into<String>,
        descriptor: PluginDescriptor,
    ) -> &mut Self {
        let location = location.into();
        debug!(location = %location, name = descriptor.symbolic_name, "Registered plugin");
        self.loader.register(location, descriptor);
        self
    }

    /// The running framework, if started.
    pub fn framework(&self) -> Option<&Arc<FrameworkContext>> {
        self.framework.as_ref()
    }

    /// Returns `true` while the framework is active.
    pub fn is_running(&self) -> bool {
        self.framework.as_ref().is_some_and(|fw| fw.is_active())
    }

    /// Builds and initializes the framework, installs every configured
    /// plugin and then starts the ones marked `start`, in listed order.
    ///
    /// On a plugin failure the framework is shut down again and the error
    /// names the offending location.
    pub fn start(&mut self) -> RuntimeResult<Arc<FrameworkContext>> {
        if self.is_running() {
            return Err(RuntimeError::AlreadyRunning);
        }
        validate_config(&self.config)?;

        let settings = &self.config.framework;
        let mut builder = FrameworkContext::builder()
            .storage_dir(settings.storage_dir.clone())
            .properties(&settings.properties)
            .loader(self.loader.clone());
        if settings.queued_delivery == QueuedDelivery::Thread {
            builder = builder.without_runtime();
        }
        let framework = builder.build();
        framework.init()?;
        self.framework = Some(Arc::clone(&framework));

        if let Err(err) = self.launch_plugins(&framework) {
            error!(error = %err, "Failed to launch configured plugins, shutting down");
            framework.shutdown();
            return Err(err);
        }

        let stats = self.stats();
        info!(
            plugins = stats.plugins,
            active = stats.active_plugins,
            services = stats.services,
            "Capsule runtime started"
        );
        Ok(framework)
    }

    fn launch_plugins(&self, framework: &Arc<FrameworkContext>) -> RuntimeResult<()> {
        let mut to_start = Vec::new();
        for entry in &self.config.plugins {
            let plugin = framework
                .install_plugin(&entry.location, None)
                .map_err(|source| RuntimeError::Plugin {
                    location: entry.location.clone(),
                    source,
                })?;
            if entry.start {
                to_start.push((entry, plugin));
            }
        }

        for (entry, plugin) in to_start {
            plugin.start().map_err(|source| RuntimeError::Plugin {
                location: entry.location.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Current counters; all zero before the first start.
    pub fn stats(&self) -> RuntimeStats {
        let Some(framework) = &self.framework else {
            return RuntimeStats::default();
        };
        let plugins = framework.installed_plugins();
        RuntimeStats {
            plugins: plugins.len(),
            active_plugins: plugins
                .iter()
                .filter(|p| p.state() == PluginState::Active)
                .count(),
            services: framework.services().len(),
            listeners: framework.listeners().stats(),
        }
    }

    /// Stops every plugin and the framework. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(framework) = self.framework.as_ref().filter(|fw| fw.is_active()) {
            info!("Shutting down Capsule runtime");
            framework.shutdown();
        }
    }

    /// Starts the runtime (unless already running) and blocks until Ctrl+C
    /// or SIGTERM, then shuts down.
    pub async fn run(self) -> RuntimeResult<()> {
        self.run_until_result(wait_for_shutdown()).await
    }

    /// Like [`CapsuleRuntime::run`], but stops when `shutdown` completes.
    pub async fn run_until<F>(self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.run_until_result(async {
            shutdown.await;
            Ok(())
        })
        .await
    }

    async fn run_until_result<F>(mut self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        if !self.is_running() {
            self.start()?;
        }
        info!("Capsule runtime is now running. Press Ctrl+C to stop.");

        let signal = shutdown.await;
        self.shutdown();
        signal.map_err(RuntimeError::from)
    }
}

impl Default for CapsuleRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CapsuleRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for CapsuleRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapsuleRuntime")
            .field("plugins", &self.config.plugins.len())
            .field("locations", &self.loader.locations())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Waits for Ctrl+C or, on Unix, SIGTERM.
async fn wait_for_shutdown() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                result
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
                Ok(())
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down");
        Ok(())
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder that loads configuration and collects compiled-in plugins.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    loader: StaticLoader,
}

impl RuntimeBuilder {
    /// Creates a builder searching the current directory and the user
    /// config directory.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir().with_user_config_dir(),
            loader: StaticLoader::new(),
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Enables loading environment variables (enabled by default).
    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges additional configuration programmatically.
    pub fn merge(mut self, config: CapsuleConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Makes a compiled-in plugin installable under `location`.
    pub fn plugin(mut self, location: impl Into<String>, descriptor: PluginDescriptor) -> Self {
        self.loader.register(location, descriptor);
        self
    }

    /// Loads the configuration and builds the runtime.
    pub fn build(self) -> RuntimeResult<CapsuleRuntime> {
        let config = self.config_loader.load()?;
        let mut runtime = CapsuleRuntime::from_config(config);
        runtime.loader = self.loader;
        Ok(runtime)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
