mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use capsule_framework::{
    BoxError, FrameworkError, Plugin, Properties, ServiceEventKind, ServiceFactory, ServiceObject,
    ServiceRegistration, service_listener, service_object,
};

use common::{framework, started};

#[test]
fn test_concurrent_registration_assigns_unique_ordered_ids() {
    let fw = framework();
    let (_, ctx) = started(&fw, "a");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                (0..25)
                    .map(|_| {
                        ctx.register_service(&["svc"], service_object(Arc::new(())), Properties::new())
                            .unwrap()
                            .service_id()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids: Vec<_> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 200);

    let refs = ctx.service_references("svc", "").unwrap();
    let ordered: Vec<_> = refs.iter().filter_map(|r| r.service_id()).collect();
    assert_eq!(ordered, ids);
}

#[test]
fn test_registration_racing_stop_leaves_nothing_behind() {
    for _ in 0..20 {
        let fw = framework();
        let (plugin, ctx) = started(&fw, "a");
        let registered = Arc::new(AtomicUsize::new(0));

        let worker = {
            let (ctx, registered) = (Arc::clone(&ctx), Arc::clone(&registered));
            thread::spawn(move || {
                loop {
                    match ctx.register_service(&["svc"], service_object(Arc::new(())), Properties::new()) {
                        Ok(_) => {
                            registered.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(FrameworkError::InvalidContext) => break,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            })
        };

        while registered.load(Ordering::SeqCst) < 5 {
            thread::yield_now();
        }
        plugin.stop().unwrap();
        worker.join().unwrap();

        assert!(fw.services().registered_by(plugin.id()).is_empty());
        assert!(fw.services().is_empty());
    }
}

#[test]
fn test_concurrent_get_and_unget_balance() {
    let fw = framework();
    let (_, provider) = started(&fw, "provider");
    let consumers: Vec<_> = (0..4).map(|i| started(&fw, &format!("consumer-{i}"))).collect();
    let reference = provider
        .register_service(&["svc"], service_object(Arc::new(1u64)), Properties::new())
        .unwrap()
        .reference();

    let handles: Vec<_> = consumers
        .iter()
        .map(|(_, ctx)| {
            let (ctx, reference) = (Arc::clone(ctx), reference.clone());
            thread::spawn(move || {
                for _ in 0..100 {
                    assert!(ctx.get_service(&reference).unwrap().is_some());
                }
                for _ in 0..100 {
                    assert!(ctx.unget_service(&reference).unwrap());
                }
                assert!(!ctx.unget_service(&reference).unwrap());
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(reference.using_plugins().is_empty());
}

#[test]
fn test_each_registration_sees_one_registered_and_one_unregistering() {
    let fw = framework();
    let (_, ctx) = started(&fw, "a");
    let registered = Arc::new(AtomicUsize::new(0));
    let unregistering = Arc::new(AtomicUsize::new(0));
    let (r, u) = (Arc::clone(&registered), Arc::clone(&unregistering));
    ctx.connect_service_listener(
        service_listener(move |event| {
            match event.kind() {
                ServiceEventKind::Registered => r.fetch_add(1, Ordering::SeqCst),
                ServiceEventKind::Unregistering => u.fetch_add(1, Ordering::SeqCst),
                _ => 0,
            };
            Ok(())
        }),
        "",
    )
    .unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                for _ in 0..50 {
                    let registration = ctx
                        .register_service(&["svc"], service_object(Arc::new(())), Properties::new())
                        .unwrap();
                    registration.unregister().unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(registered.load(Ordering::SeqCst), 200);
    assert_eq!(unregistering.load(Ordering::SeqCst), 200);
}

/// Blocks inside `get_service` until the test lets it continue.
struct GatedFactory {
    gate: Arc<Barrier>,
    released: AtomicUsize,
}

impl ServiceFactory for GatedFactory {
    fn get_service(
        &self,
        _plugin: &Arc<Plugin>,
        _registration: &ServiceRegistration,
    ) -> Result<ServiceObject, BoxError> {
        self.gate.wait();
        self.gate.wait();
        Ok(service_object(Arc::new(7u32)))
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
fn test_consumer_stopped_while_factory_runs_keeps_no_binding() {
    let fw = framework();
    let (_, provider) = started(&fw, "provider");
    let (consumer, consumer_ctx) = started(&fw, "consumer");
    let gate = Arc::new(Barrier::new(2));
    let factory = Arc::new(GatedFactory {
        gate: Arc::clone(&gate),
        released: AtomicUsize::new(0),
    });
    let reference = provider
        .register_service_factory(&["gated"], factory.clone(), Properties::new())
        .unwrap()
        .reference();

    let getter = {
        let (ctx, reference) = (Arc::clone(&consumer_ctx), reference.clone());
        thread::spawn(move || ctx.get_service(&reference).map(|object| object.is_some()))
    };
    gate.wait();
    consumer.stop().unwrap();
    gate.wait();

    let result = getter.join().unwrap();
    assert!(matches!(result, Err(FrameworkError::InvalidContext)), "{result:?}");
    assert_eq!(reference.usage_count(consumer.id()), 0);
    assert!(reference.using_plugins().is_empty());
    assert_eq!(factory.released.load(Ordering::SeqCst), 1);

    consumer.start().unwrap();
    let fresh = consumer.context().unwrap();
    assert!(!fresh.unget_service(&reference).unwrap());
}

#[test]
fn test_unregister_waits_for_registered_delivery() {
    let fw = framework();
    let (provider, provider_ctx) = started(&fw, "provider");
    let (_, observer) = started(&fw, "observer");
    let gate = Arc::new(Barrier::new(2));
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let (gate, seen) = (Arc::clone(&gate), Arc::clone(&seen));
        observer
            .connect_service_listener(
                service_listener(move |event| {
                    if event.kind() == ServiceEventKind::Registered {
                        gate.wait();
                        gate.wait();
                    }
                    seen.lock().push(event.kind());
                    Ok(())
                }),
                "(objectclass=ordered)",
            )
            .unwrap();
    }

    let registrar = {
        let ctx = Arc::clone(&provider_ctx);
        thread::spawn(move || {
            ctx.register_service(&["ordered"], service_object(Arc::new(())), Properties::new())
                .map(drop)
        })
    };
    gate.wait();
    let stopper = {
        let provider = Arc::clone(&provider);
        thread::spawn(move || provider.stop())
    };
    thread::sleep(Duration::from_millis(50));
    gate.wait();

    registrar.join().unwrap().unwrap();
    stopper.join().unwrap().unwrap();
    assert_eq!(
        *seen.lock(),
        vec![ServiceEventKind::Registered, ServiceEventKind::Unregistering]
    );
}
