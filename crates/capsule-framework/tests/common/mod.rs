//! Shared fixtures for the framework integration tests.

#![allow(dead_code)]

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use capsule_framework::{
    BoxError, FrameworkContext, InstallError, LoadedPlugin, Plugin, PluginActivator, PluginContext,
    PluginLoader,
};

/// Loader understanding two location schemes:
///
/// - `plain:<name>`: a plugin without activator
/// - `fail:<name>`: a plugin whose activator refuses to start
///
/// Anything else is not found.
pub struct TestLoader;

struct FailingActivator;

impl PluginActivator for FailingActivator {
    fn start(&self, context: &Arc<PluginContext>) -> Result<(), BoxError> {
        // Leave something behind that the failed start must clean up.
        context.register_service(
            &["leftover"],
            capsule_framework::service_object(Arc::new(())),
            Default::default(),
        )?;
        Err("refusing to start".into())
    }
}

impl PluginLoader for TestLoader {
    fn load(
        &self,
        location: &str,
        _stream: Option<&mut dyn Read>,
    ) -> Result<LoadedPlugin, InstallError> {
        let activator: Option<Box<dyn PluginActivator>> = match location.split_once(':') {
            Some(("plain", _)) => None,
            Some(("fail", _)) => Some(Box::new(FailingActivator)),
            _ => return Err(InstallError::NotFound(location.to_string())),
        };
        Ok(LoadedPlugin {
            symbolic_name: location.replace(':', "."),
            version: "1.0.0".to_string(),
            activator,
        })
    }
}

/// A unique scratch directory under the system temp dir.
pub fn scratch_dir() -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    std::env::temp_dir().join(format!(
        "capsule-test-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ))
}

/// An initialised framework delivering queued events on threads.
pub fn framework() -> Arc<FrameworkContext> {
    let framework = FrameworkContext::builder()
        .loader(TestLoader)
        .storage_dir(scratch_dir())
        .without_runtime()
        .build();
    framework.init().unwrap();
    framework
}

/// Installs and starts `plain:<name>`, returning the plugin and its context.
pub fn started(framework: &Arc<FrameworkContext>, name: &str) -> (Arc<Plugin>, Arc<PluginContext>) {
    let plugin = framework
        .install_plugin(&format!("plain:{name}"), None)
        .unwrap();
    plugin.start().unwrap();
    let context = plugin.context().unwrap();
    (plugin, context)
}
