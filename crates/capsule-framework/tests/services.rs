mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use tokio_test::assert_ok;

use capsule_framework::{
    BoxError, FrameworkError, Plugin, PropertyValue, Properties, ServiceFactory, ServiceObject,
    ServiceReference, ServiceRegistration, keys, service_object,
};

use common::{framework, started};

trait Greeter: Send + Sync {
    fn greet(&self) -> String;
}

struct Fixed(&'static str);

impl Greeter for Fixed {
    fn greet(&self) -> String {
        self.0.to_string()
    }
}

fn greeter(text: &'static str) -> ServiceObject {
    let greeter: Arc<dyn Greeter> = Arc::new(Fixed(text));
    service_object(greeter)
}

#[test]
fn test_lookup_by_each_registered_type() {
    let fw = framework();
    let (_, ctx) = started(&fw, "a");
    ctx.register_service(&["A", "B"], greeter("hi"), Properties::new())
        .unwrap();

    assert_eq!(ctx.service_references("A", "").unwrap().len(), 1);
    assert_eq!(ctx.service_references("B", "").unwrap().len(), 1);
    assert!(ctx.service_references("C", "").unwrap().is_empty());
    assert!(!ctx.service_reference("C").unwrap().is_valid());

    let reference = ctx.service_reference("A").unwrap();
    assert_eq!(reference.type_names(), ["A".to_string(), "B".to_string()]);
    assert_eq!(
        reference.property(keys::OBJECTCLASS),
        Some(PropertyValue::List(vec!["A".into(), "B".into()]))
    );
}

#[test]
fn test_empty_type_list_is_rejected() {
    let fw = framework();
    let (_, ctx) = started(&fw, "a");
    assert!(matches!(
        ctx.register_service(&[], greeter("hi"), Properties::new()),
        Err(FrameworkError::InvalidArgument(_))
    ));
    assert!(ctx.service_references("", "").unwrap().is_empty());
}

#[test]
fn test_usage_counting() {
    let fw = framework();
    let (_, provider) = started(&fw, "provider");
    let (consumer, ctx) = started(&fw, "consumer");
    let reference = provider
        .register_service(&["greeter"], greeter("hi"), Properties::new())
        .unwrap()
        .reference();

    const N: usize = 3;
    for _ in 0..N {
        let service = ctx.get_service_as::<dyn Greeter>(&reference).unwrap().unwrap();
        assert_eq!(service.greet(), "hi");
    }
    assert_eq!(reference.usage_count(consumer.id()), N);
    assert_eq!(reference.using_plugins(), vec![consumer.id()]);

    for _ in 0..N {
        assert!(ctx.unget_service(&reference).unwrap());
    }
    assert!(!ctx.unget_service(&reference).unwrap());
    assert!(reference.using_plugins().is_empty());
}

#[test]
fn test_invalid_reference_is_rejected() {
    let fw = framework();
    let (_, ctx) = started(&fw, "a");
    assert!(matches!(
        ctx.get_service(&ServiceReference::default()),
        Err(FrameworkError::InvalidArgument(_))
    ));
    assert!(!ctx.unget_service(&ServiceReference::default()).unwrap());
}

#[test]
fn test_typed_get_with_wrong_type_releases_usage() {
    let fw = framework();
    let (consumer, ctx) = started(&fw, "a");
    let reference = ctx
        .register_service(&["num"], service_object(Arc::new(5u32)), Properties::new())
        .unwrap()
        .reference();

    assert!(matches!(
        ctx.get_service_as::<String>(&reference),
        Err(FrameworkError::InvalidArgument(_))
    ));
    assert_eq!(reference.usage_count(consumer.id()), 0);
    assert_eq!(*ctx.get_service_as::<u32>(&reference).unwrap().unwrap(), 5);
}

#[test]
fn test_ranking_order() {
    let fw = framework();
    let (_, ctx) = started(&fw, "a");
    let low = ctx
        .register_service(
            &["greeter"],
            greeter("low"),
            Properties::new().with(keys::SERVICE_RANKING, 5),
        )
        .unwrap();
    let high = ctx
        .register_service(
            &["greeter"],
            greeter("high"),
            Properties::new().with(keys::SERVICE_RANKING, 10),
        )
        .unwrap();
    assert_eq!(ctx.service_reference("greeter").unwrap(), high.reference());

    let first_default = ctx
        .register_service(&["other"], greeter("first"), Properties::new())
        .unwrap();
    let _second_default = ctx
        .register_service(&["other"], greeter("second"), Properties::new())
        .unwrap();
    assert_eq!(
        ctx.service_reference("other").unwrap(),
        first_default.reference()
    );

    let all = ctx.service_references("greeter", "").unwrap();
    assert_eq!(all, vec![high.reference(), low.reference()]);
}

#[test]
fn test_non_integer_ranking_is_rejected() {
    let fw = framework();
    let (_, ctx) = started(&fw, "a");
    assert!(matches!(
        ctx.register_service(
            &["greeter"],
            greeter("x"),
            Properties::new().with(keys::SERVICE_RANKING, "high"),
        ),
        Err(FrameworkError::InvalidArgument(_))
    ));
}

#[test]
fn test_filtered_lookup() {
    let fw = framework();
    let (_, ctx) = started(&fw, "a");
    let foo = ctx
        .register_service(
            &["person"],
            greeter("foo"),
            Properties::new().with("name", "foo").with("age", 5),
        )
        .unwrap();
    ctx.register_service(
        &["person"],
        greeter("young"),
        Properties::new().with("name", "foo").with("age", 2),
    )
    .unwrap();

    let found = ctx
        .service_references("person", "(&(name=foo)(age>=3))")
        .unwrap();
    assert_eq!(found, vec![foo.reference()]);

    assert!(matches!(
        ctx.service_references("person", "(bad"),
        Err(FrameworkError::FilterSyntax(_))
    ));
    // An empty type name searches every type.
    assert_eq!(ctx.service_references("", "(name=foo)").unwrap().len(), 2);
}

#[test]
fn test_set_properties_keeps_framework_keys() {
    let fw = framework();
    let (plugin, ctx) = started(&fw, "a");
    let registration = ctx
        .register_service(
            &["greeter"],
            greeter("x"),
            Properties::new()
                .with("lang", "en")
                .with(keys::SERVICE_RANKING, 3),
        )
        .unwrap();
    let id = registration.service_id();

    registration
        .set_properties(
            Properties::new()
                .with("lang", "fr")
                .with(keys::SERVICE_ID, 999)
                .with(keys::SERVICE_RANKING, 100),
        )
        .unwrap();

    let reference = registration.reference();
    assert_eq!(reference.property("lang"), Some("fr".into()));
    assert_eq!(reference.property(keys::SERVICE_ID), Some(PropertyValue::Int(id.0 as i64)));
    assert_eq!(reference.property(keys::SERVICE_RANKING), Some(PropertyValue::Int(3)));
    assert_eq!(reference.ranking(), 3);
    assert_eq!(
        reference.property(keys::SERVICE_PLUGIN_ID),
        Some(PropertyValue::Int(plugin.id().0 as i64))
    );
}

#[test]
fn test_double_unregister_is_illegal_state() {
    let fw = framework();
    let (_, ctx) = started(&fw, "a");
    let registration = ctx
        .register_service(&["greeter"], greeter("x"), Properties::new())
        .unwrap();
    assert_ok!(registration.unregister());
    assert!(matches!(
        registration.unregister(),
        Err(FrameworkError::IllegalState(_))
    ));
    assert!(matches!(
        registration.set_properties(Properties::new()),
        Err(FrameworkError::IllegalState(_))
    ));
}

#[test]
fn test_lookup_concurrent_with_unregister() {
    let fw = framework();
    let (_, ctx) = started(&fw, "a");

    for round in 0..50 {
        let registration = ctx
            .register_service(
                &["A", "B", "C"],
                greeter("x"),
                Properties::new().with("round", round),
            )
            .unwrap();
        let lookup_ctx = Arc::clone(&ctx);
        let reader = thread::spawn(move || {
            for _ in 0..200 {
                let refs = lookup_ctx.service_references("", "").unwrap();
                for reference in refs {
                    // A visible service is visible under every type.
                    assert_eq!(reference.type_names().len(), 3);
                    assert!(reference.property(keys::SERVICE_ID).is_some());
                }
                let a = lookup_ctx.service_references("A", "").unwrap().len();
                assert!(a <= 1);
            }
        });
        registration.unregister().unwrap();
        reader.join().unwrap();
        assert!(ctx.service_references("B", "").unwrap().is_empty());
    }
}

// ─── Service factories ────────────────────────────────────────────────────────

#[derive(Default)]
struct CountingFactory {
    created: AtomicUsize,
    released: AtomicUsize,
}

impl ServiceFactory for CountingFactory {
    fn get_service(
        &self,
        plugin: &Arc<Plugin>,
        _registration: &ServiceRegistration,
    ) -> Result<ServiceObject, BoxError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(service_object(Arc::new(format!("for {}", plugin.id()))))
    }

    fn unget_service(
        &self,
        _plugin: &Arc<Plugin>,
        _registration: &ServiceRegistration,
        _service: &ServiceObject,
    ) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_factory_creates_one_object_per_consumer() {
    let fw = framework();
    let (provider_plugin, provider) = started(&fw, "provider");
    let (a, a_ctx) = started(&fw, "consumer-a");
    let (b, b_ctx) = started(&fw, "consumer-b");

    let factory = Arc::new(CountingFactory::default());
    let reference = provider
        .register_service_factory(&["named"], factory.clone(), Properties::new())
        .unwrap()
        .reference();

    let first = a_ctx.get_service_as::<String>(&reference).unwrap().unwrap();
    let again = a_ctx.get_service_as::<String>(&reference).unwrap().unwrap();
    let other = b_ctx.get_service_as::<String>(&reference).unwrap().unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(*first, format!("for {}", a.id()));
    assert_eq!(*other, format!("for {}", b.id()));
    assert_eq!(factory.created.load(Ordering::SeqCst), 2);

    assert!(a_ctx.unget_service(&reference).unwrap());
    assert_eq!(factory.released.load(Ordering::SeqCst), 0);
    assert!(a_ctx.unget_service(&reference).unwrap());
    assert_eq!(factory.released.load(Ordering::SeqCst), 1);

    // Stopping the provider unregisters the service and releases the
    // remaining binding.
    assert_eq!(provider_plugin.registered_services(), vec![reference.clone()]);
    provider_plugin.stop().unwrap();
    assert_eq!(factory.released.load(Ordering::SeqCst), 2);
    assert!(reference.using_plugins().is_empty());
}

struct FailingFactory;

impl ServiceFactory for FailingFactory {
    fn get_service(
        &self,
        _plugin: &Arc<Plugin>,
        _registration: &ServiceRegistration,
    ) -> Result<ServiceObject, BoxError> {
        Err("no instance for you".into())
    }
}

#[test]
fn test_failing_factory_yields_none() {
    let fw = framework();
    let (consumer, ctx) = started(&fw, "a");
    let reference = ctx
        .register_service_factory(&["named"], Arc::new(FailingFactory), Properties::new())
        .unwrap()
        .reference();
    assert!(ctx.get_service(&reference).unwrap().is_none());
    assert_eq!(reference.usage_count(consumer.id()), 0);
}
