//! The two demo plugins.
//!
//! `demo.greeter.provider` publishes an English greeter as a shared service
//! and a German one through a [`ServiceFactory`] that hands every consumer
//! its own instance. `demo.greeter.consumer` watches greeter services come
//! and go and greets with the best match on startup.

use std::sync::atomic::{AtomicUsize, Ordering};

use capsule::prelude::*;

/// Type name the greeters are registered under.
pub const GREETER: &str = "demo.Greeter";

pub const PROVIDER_LOCATION: &str = "static:greeter-provider";
pub const CONSUMER_LOCATION: &str = "static:greeter-consumer";

pub const PROVIDER: PluginDescriptor =
    PluginDescriptor::new("demo.greeter.provider", "1.0.0", provider);
pub const CONSUMER: PluginDescriptor =
    PluginDescriptor::new("demo.greeter.consumer", "1.0.0", consumer);

fn provider() -> Box<dyn PluginActivator> {
    Box::new(Provider)
}

fn consumer() -> Box<dyn PluginActivator> {
    Box::new(Consumer)
}

/// The service interface shared by provider and consumer.
pub trait Greeter: Send + Sync {
    fn greet(&self, name: &str) -> String;
}

struct English;

impl Greeter for English {
    fn greet(&self, name: &str) -> String {
        format!("Hello, {name}!")
    }
}

struct German {
    serial: usize,
}

impl Greeter for German {
    fn greet(&self, name: &str) -> String {
        format!("Hallo, {name}! (Begrüßer #{})", self.serial)
    }
}

// ─── Provider ─────────────────────────────────────────────────────────────────

struct Provider;

impl PluginActivator for Provider {
    fn start(&self, context: &Arc<PluginContext>) -> Result<(), BoxError> {
        let english: Arc<dyn Greeter> = Arc::new(English);
        context.register_service(
            &[GREETER],
            service_object(english),
            Properties::new()
                .with("lang", "en")
                .with(keys::SERVICE_RANKING, 10),
        )?;

        context.register_service_factory(
            &[GREETER],
            Arc::new(GermanFactory::default()),
            Properties::new().with("lang", "de"),
        )?;

        info!(plugin_id = %context.plugin()?.id(), "Greeters registered");
        Ok(())
    }

    fn stop(&self, context: &Arc<PluginContext>) -> Result<(), BoxError> {
        // Registrations are withdrawn by the framework once this returns.
        info!(plugin_id = %context.plugin()?.id(), "Provider stopping");
        Ok(())
    }
}

#[derive(Default)]
struct GermanFactory {
    created: AtomicUsize,
}

impl ServiceFactory for GermanFactory {
    fn get_service(
        &self,
        plugin: &Arc<Plugin>,
        _registration: &ServiceRegistration,
    ) -> Result<ServiceObject, BoxError> {
        let serial = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(plugin_id = %plugin.id(), serial, "Creating German greeter");
        let greeter: Arc<dyn Greeter> = Arc::new(German { serial });
        Ok(service_object(greeter))
    }

    fn unget_service(
        &self,
        plugin: &Arc<Plugin>,
        _registration: &ServiceRegistration,
        _service: &ServiceObject,
    ) {
        debug!(plugin_id = %plugin.id(), "Released German greeter");
    }
}

// ─── Consumer ─────────────────────────────────────────────────────────────────

struct Consumer;

impl PluginActivator for Consumer {
    fn start(&self, context: &Arc<PluginContext>) -> Result<(), BoxError> {
        context.connect_service_listener(
            service_listener(|event| {
                let reference = event.reference();
                info!(
                    kind = ?event.kind(),
                    service_id = ?reference.service_id(),
                    lang = ?reference.property("lang"),
                    "Greeter service changed"
                );
                Ok(())
            }),
            &format!("({}={GREETER})", keys::OBJECTCLASS),
        )?;

        let name = context
            .property("demo.name")?
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| "world".to_string());

        // Highest ranking first: English, then German.
        for reference in context.service_references(GREETER, "")? {
            if let Some(greeter) = context.get_service_as::<dyn Greeter>(&reference)? {
                info!(lang = ?reference.property("lang"), "{}", greeter.greet(&name));
            }
            context.unget_service(&reference)?;
        }

        let german = context.service_references(GREETER, "(lang=de)")?;
        if german.is_empty() {
            warn!("No German greeter available");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use capsule::framework::{FrameworkContext, StaticLoader};

    use super::*;

    #[test]
    fn test_consumer_sees_both_greeters() {
        let framework = FrameworkContext::builder()
            .storage_dir(std::env::temp_dir().join("capsule-greeter-test"))
            .loader(
                StaticLoader::new()
                    .with(PROVIDER_LOCATION, PROVIDER)
                    .with(CONSUMER_LOCATION, CONSUMER),
            )
            .without_runtime()
            .build();
        framework.init().unwrap();

        let provider = framework.install_plugin(PROVIDER_LOCATION, None).unwrap();
        let consumer = framework.install_plugin(CONSUMER_LOCATION, None).unwrap();
        provider.start().unwrap();
        consumer.start().unwrap();

        let context = consumer.context().unwrap();
        let refs = context.service_references(GREETER, "").unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].property("lang"), Some("en".into()));

        let german = context.get_service_as::<dyn Greeter>(&refs[1]).unwrap().unwrap();
        assert!(german.greet("Ada").starts_with("Hallo, Ada!"));
        // Only the get above is outstanding; start released what it used.
        assert_eq!(refs[1].usage_count(consumer.id()), 1);

        framework.shutdown();
    }
}
