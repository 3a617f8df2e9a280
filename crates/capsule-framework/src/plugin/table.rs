//! The framework's table of installed plugins.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use capsule_core::PluginId;

use super::Plugin;

/// Installed plugins keyed by id.  Ids start at `1`; `0` is the system
/// plugin, inserted explicitly by the framework.
pub(crate) struct PluginTable {
    plugins: RwLock<BTreeMap<PluginId, Arc<Plugin>>>,
    next_id: AtomicU64,
}

impl PluginTable {
    pub(crate) fn new() -> Self {
        Self {
            plugins: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_id(&self) -> PluginId {
        PluginId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn get(&self, id: PluginId) -> Option<Arc<Plugin>> {
        self.plugins.read().get(&id).cloned()
    }

    /// All plugins in id order.
    pub(crate) fn all(&self) -> Vec<Arc<Plugin>> {
        self.plugins.read().values().cloned().collect()
    }

    pub(crate) fn by_location(&self, location: &str) -> Option<Arc<Plugin>> {
        self.plugins
            .read()
            .values()
            .find(|p| p.location() == location)
            .cloned()
    }

    /// Inserts `plugin` unless one with the same location is already
    /// installed, in which case the existing plugin is returned as `Err`.
    pub(crate) fn insert_unique(&self, plugin: Arc<Plugin>) -> Result<Arc<Plugin>, Arc<Plugin>> {
        let mut plugins = self.plugins.write();
        if let Some(existing) = plugins.values().find(|p| p.location() == plugin.location()) {
            return Err(Arc::clone(existing));
        }
        plugins.insert(plugin.id(), Arc::clone(&plugin));
        Ok(plugin)
    }

    pub(crate) fn remove(&self, id: PluginId) -> Option<Arc<Plugin>> {
        self.plugins.write().remove(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.plugins.read().len()
    }
}
