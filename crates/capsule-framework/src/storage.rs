//! Resolution of each plugin's private data directory.

use std::path::{Path, PathBuf};

use capsule_core::PluginId;

/// Maps a plugin to the directory holding its private files.
///
/// Implementations only compute paths; the directory is created lazily by
/// [`PluginContext::data_file`](crate::context::PluginContext::data_file).
pub trait StorageResolver: Send + Sync + 'static {
    /// Data root for the plugin installed from `location` with id `plugin`.
    fn data_root(&self, plugin: PluginId, location: &str) -> PathBuf;

    /// Base directory reported as the `capsule.framework.storage` property.
    fn base_dir(&self) -> &Path;
}

/// Filesystem layout `<base>/plugins/<id>/data`.
#[derive(Debug, Clone)]
pub struct FsStorage {
    base_dir: PathBuf,
}

impl FsStorage {
    /// Creates a resolver rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

impl Default for FsStorage {
    /// `capsule-storage` in the system temporary directory.
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("capsule-storage"))
    }
}

impl StorageResolver for FsStorage {
    fn data_root(&self, plugin: PluginId, _location: &str) -> PathBuf {
        self.base_dir
            .join("plugins")
            .join(plugin.0.to_string())
            .join("data")
    }

    fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}
