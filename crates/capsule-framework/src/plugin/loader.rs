//! The loader boundary: turning an install location into a plugin image.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;

use tracing::debug;

use capsule_core::InstallError;

use super::PluginActivator;

// ─── API versioning ───────────────────────────────────────────────────────────

/// Current plugin API version (1.0).
pub const PLUGIN_API_VERSION: u32 = 0x0001_0000;

// ─── LoadedPlugin ─────────────────────────────────────────────────────────────

/// What a [`PluginLoader`] produces for a location.
pub struct LoadedPlugin {
    /// Symbolic name declared by the plugin.
    pub symbolic_name: String,
    /// Declared version string.
    pub version: String,
    /// Start/stop entry points; `None` for plugins that only carry data.
    pub activator: Option<Box<dyn PluginActivator>>,
}

impl fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("symbolic_name", &self.symbolic_name)
            .field("version", &self.version)
            .field("has_activator", &self.activator.is_some())
            .finish()
    }
}

/// Resolves install locations into plugin images.
pub trait PluginLoader: Send + Sync + 'static {
    /// Loads the plugin at `location`.  `stream`, when given, carries the
    /// plugin package and takes precedence over reading `location`.
    fn load(&self, location: &str, stream: Option<&mut dyn Read>) -> Result<LoadedPlugin, InstallError>;
}

// ─── PluginDescriptor ─────────────────────────────────────────────────────────

/// A static, `Copy` descriptor for a plugin compiled into the host.
#[derive(Debug, Clone, Copy)]
pub struct PluginDescriptor {
    /// Plugin API version this descriptor was compiled against.
    pub api_version: u32,
    /// Symbolic name.
    pub symbolic_name: &'static str,
    /// Version string.
    pub version: &'static str,
    /// Creates a fresh activator.
    pub create: fn() -> Box<dyn PluginActivator>,
}

impl PluginDescriptor {
    /// Creates a descriptor for the current API version.
    pub const fn new(
        symbolic_name: &'static str,
        version: &'static str,
        create: fn() -> Box<dyn PluginActivator>,
    ) -> Self {
        Self {
            api_version: PLUGIN_API_VERSION,
            symbolic_name,
            version,
            create,
        }
    }

    /// Returns `true` if this descriptor's API version is compatible with the
    /// running framework.
    ///
    /// The major part must match exactly; the descriptor's minor part must be
    /// ≤ the host's minor part.
    pub fn is_compatible(&self) -> bool {
        let host_major = PLUGIN_API_VERSION >> 16;
        let desc_major = self.api_version >> 16;
        let desc_minor = self.api_version & 0xFFFF;
        let host_minor = PLUGIN_API_VERSION & 0xFFFF;
        desc_major == host_major && desc_minor <= host_minor
    }

    fn instantiate(&self) -> LoadedPlugin {
        LoadedPlugin {
            symbolic_name: self.symbolic_name.to_string(),
            version: self.version.to_string(),
            activator: Some((self.create)()),
        }
    }
}

// ─── StaticLoader ─────────────────────────────────────────────────────────────

/// In-process loader mapping location strings to compiled-in plugins.
///
/// ```rust,ignore
/// let loader = StaticLoader::new()
///     .with("static:greeter-provider", GREETER_PROVIDER)
///     .with("static:greeter-consumer", GREETER_CONSUMER);
/// ```
#[derive(Debug, Default, Clone)]
pub struct StaticLoader {
    plugins: HashMap<String, PluginDescriptor>,
}

impl StaticLoader {
    /// Creates an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `descriptor` under `location` (builder pattern).
    pub fn with(mut self, location: impl Into<String>, descriptor: PluginDescriptor) -> Self {
        self.register(location, descriptor);
        self
    }

    /// Registers `descriptor` under `location`, replacing any previous entry.
    pub fn register(&mut self, location: impl Into<String>, descriptor: PluginDescriptor) -> &mut Self {
        self.plugins.insert(location.into(), descriptor);
        self
    }

    /// Known locations, sorted.
    pub fn locations(&self) -> Vec<&str> {
        let mut locations: Vec<&str> = self.plugins.keys().map(String::as_str).collect();
        locations.sort_unstable();
        locations
    }
}

impl PluginLoader for StaticLoader {
    fn load(&self, location: &str, stream: Option<&mut dyn Read>) -> Result<LoadedPlugin, InstallError> {
        // Compiled-in plugins carry no package; drain the stream so callers
        // see read failures rather than silently ignored input.
        if let Some(stream) = stream {
            let mut sink = Vec::new();
            stream
                .read_to_end(&mut sink)
                .map_err(|source| InstallError::Read {
                    location: location.to_string(),
                    source,
                })?;
            debug!(location, bytes = sink.len(), "Ignoring package stream for static plugin");
        }

        let descriptor = self
            .plugins
            .get(location)
            .ok_or_else(|| InstallError::NotFound(location.to_string()))?;
        if !descriptor.is_compatible() {
            return Err(InstallError::rejected(
                location,
                format!(
                    "plugin API version {:#010x} is incompatible with host {:#010x}",
                    descriptor.api_version, PLUGIN_API_VERSION
                ),
            ));
        }
        Ok(descriptor.instantiate())
    }
}
