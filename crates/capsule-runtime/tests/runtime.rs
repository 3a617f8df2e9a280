use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use capsule_framework::{
    BoxError, FrameworkError, FrameworkState, PluginActivator, PluginContext, PluginDescriptor,
    PluginState, Properties, service_object,
};
use capsule_runtime::config::QueuedDelivery;
use capsule_runtime::{CapsuleConfig, CapsuleRuntime, ConfigError, PluginEntry, RuntimeError};

struct Provider;

impl PluginActivator for Provider {
    fn start(&self, context: &Arc<PluginContext>) -> Result<(), BoxError> {
        context.register_service(
            &["greeting"],
            service_object(Arc::new("hello".to_string())),
            Properties::new(),
        )?;
        Ok(())
    }
}

/// Fails unless a `greeting` service is already registered.
struct Consumer;

impl PluginActivator for Consumer {
    fn start(&self, context: &Arc<PluginContext>) -> Result<(), BoxError> {
        let reference = context.service_reference("greeting")?;
        let greeting = context
            .get_service_as::<String>(&reference)?
            .ok_or("no greeting service")?;
        assert_eq!(*greeting, "hello");
        Ok(())
    }
}

fn provider() -> Box<dyn PluginActivator> {
    Box::new(Provider)
}

fn consumer() -> Box<dyn PluginActivator> {
    Box::new(Consumer)
}

const PROVIDER: PluginDescriptor = PluginDescriptor::new("test.provider", "1.0.0", provider);
const CONSUMER: PluginDescriptor = PluginDescriptor::new("test.consumer", "1.0.0", consumer);

fn scratch_dir() -> PathBuf {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    std::env::temp_dir().join(format!(
        "capsule-runtime-test-{}-{}",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::SeqCst)
    ))
}

fn config(plugins: Vec<PluginEntry>) -> CapsuleConfig {
    let mut config = CapsuleConfig {
        plugins,
        ..Default::default()
    };
    config.framework.storage_dir = scratch_dir();
    config.framework.queued_delivery = QueuedDelivery::Thread;
    config
}

fn runtime(plugins: Vec<PluginEntry>) -> CapsuleRuntime {
    let mut runtime = CapsuleRuntime::from_config(config(plugins));
    runtime
        .register_plugin("static:provider", PROVIDER)
        .register_plugin("static:consumer", CONSUMER);
    runtime
}

#[test]
fn test_start_installs_then_starts_in_order() {
    let mut runtime = runtime(vec![
        PluginEntry::new("static:provider"),
        PluginEntry::new("static:consumer"),
    ]);
    let framework = runtime.start().unwrap();
    assert!(runtime.is_running());

    let stats = runtime.stats();
    assert_eq!(stats.plugins, 3);
    assert_eq!(stats.active_plugins, 3);
    assert_eq!(stats.services, 1);

    runtime.shutdown();
    assert!(!runtime.is_running());
    assert_eq!(framework.state(), FrameworkState::Stopped);
}

#[test]
fn test_install_only_entries_stay_installed() {
    let mut runtime = runtime(vec![PluginEntry::installed("static:provider")]);
    let framework = runtime.start().unwrap();

    let plugins = framework.installed_plugins();
    let provider = plugins
        .iter()
        .find(|p| p.symbolic_name() == "test.provider")
        .unwrap();
    assert_eq!(provider.state(), PluginState::Installed);
    assert_eq!(runtime.stats().services, 0);
}

#[test]
fn test_consumer_before_provider_fails_and_shuts_down() {
    let mut runtime = runtime(vec![
        PluginEntry::new("static:consumer"),
        PluginEntry::new("static:provider"),
    ]);
    let err = runtime.start().unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Plugin { ref location, source: FrameworkError::Activator { .. } }
            if location == "static:consumer"
    ));
    assert!(!runtime.is_running());
}

#[test]
fn test_unknown_location_is_reported() {
    let mut runtime = runtime(vec![PluginEntry::new("static:missing")]);
    assert!(matches!(
        runtime.start(),
        Err(RuntimeError::Plugin { source: FrameworkError::Install(_), .. })
    ));
}

#[test]
fn test_invalid_config_is_rejected_before_start() {
    let mut runtime = runtime(vec![
        PluginEntry::new("static:provider"),
        PluginEntry::new("static:provider"),
    ]);
    assert!(matches!(
        runtime.start(),
        Err(RuntimeError::Config(ConfigError::DuplicatePlugin(_)))
    ));
    assert!(runtime.framework().is_none());
}

#[test]
fn test_start_twice_and_restart() {
    let mut runtime = runtime(vec![PluginEntry::new("static:provider")]);
    let first = runtime.start().unwrap();
    assert!(matches!(runtime.start(), Err(RuntimeError::AlreadyRunning)));

    runtime.shutdown();
    let second = runtime.start().unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(runtime.stats().services, 1);
}

#[test]
fn test_configured_properties_reach_plugins() {
    let mut config = config(Vec::new());
    config.framework.properties = Properties::new().with("app.name", "demo");
    let mut runtime = CapsuleRuntime::from_config(config);

    let framework = runtime.start().unwrap();
    let context = framework.system_context().unwrap();
    assert_eq!(
        context
            .property("app.name")
            .unwrap()
            .and_then(|v| v.as_str().map(String::from)),
        Some("demo".to_string())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_until_shuts_down() {
    let runtime = runtime(vec![PluginEntry::new("static:provider")]);
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let handle = tokio::spawn(runtime.run_until(async {
        let _ = rx.await;
    }));
    tx.send(()).unwrap();

    tokio_test::assert_ok!(handle.await.unwrap());
}
