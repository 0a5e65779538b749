//! Integration tests for factory configurations, function-shaped services
//! and the per-request lifestyle

use solder::{
    Arguments, ConfigurationBuilder, Container, FactoryValue, LazyValue, Param,
    TypeRegistryBuilder, TypedInstance,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Session {
    id: usize,
}

struct Gadget;

#[test]
fn test_factory_binding_builds_instances() {
    static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

    let mut types = TypeRegistryBuilder::new();
    let session = types.register::<Session>().done();

    let mut config = ConfigurationBuilder::new();
    config.for_type(session).bind_factory(move |_container| {
        Ok(TypedInstance::new(
            session,
            Arc::new(Session {
                id: NEXT_ID.fetch_add(1, Ordering::SeqCst),
            }),
        ))
    });
    let container = Container::new(types.build(), config.build());

    let resolved: Arc<Session> = container.resolve_ref(session, &[]).get::<Session>().unwrap();
    let again: Arc<Session> = container.resolve_ref(session, &[]).get::<Session>().unwrap();
    // resolve memoizes even factory-built services
    assert_eq!(resolved.id, again.id);

    // create always builds fresh
    let first = container.create_one(session, &[], None).unwrap();
    let second = container.create_one(session, &[], None).unwrap();
    let first: Arc<Session> = first.downcast::<Session>().unwrap();
    let second: Arc<Session> = second.downcast::<Session>().unwrap();
    assert_ne!(first.id, second.id);
}

#[test]
fn test_factory_with_target_distinguishes_requesters() {
    let mut types = TypeRegistryBuilder::new();
    let dep = types.register::<Session>().done();

    struct ParentA {
        session: Arc<Session>,
    }
    struct ParentB {
        session: Arc<Session>,
    }
    let parent_a = types
        .register::<ParentA>()
        .constructor(vec![Param::new("session", dep)], |args| {
            Ok(ParentA {
                session: args.get::<Session>(0)?,
            })
        })
        .done();
    let parent_b = types
        .register::<ParentB>()
        .constructor(vec![Param::new("session", dep)], |args| {
            Ok(ParentB {
                session: args.get::<Session>(0)?,
            })
        })
        .done();

    static NEXT_ID: AtomicUsize = AtomicUsize::new(0);
    let mut config = ConfigurationBuilder::new();
    config
        .for_type(dep)
        .bind_factory_with_target(move |_container, _target| {
            Ok(TypedInstance::new(
                dep,
                Arc::new(Session {
                    id: NEXT_ID.fetch_add(1, Ordering::SeqCst),
                }),
            ))
        });
    let container = Container::new(types.build(), config.build());

    let a: Arc<ParentA> = container.resolve_ref(parent_a, &[]).get::<ParentA>().unwrap();
    let b: Arc<ParentB> = container.resolve_ref(parent_b, &[]).get::<ParentB>().unwrap();
    // Each requesting type gets its own cache identity, so the sessions differ.
    assert_ne!(a.session.id, b.session.id);

    // Top-level resolution passes no requester and still works.
    assert!(container.resolve_ref(dep, &[]).single_instance().is_ok());
}

#[test]
fn test_func_parameter_creates_fresh_instances() {
    static BUILT: AtomicUsize = AtomicUsize::new(0);

    let mut types = TypeRegistryBuilder::new();
    let gadget = types
        .register::<Gadget>()
        .constructor(vec![], |_| {
            BUILT.fetch_add(1, Ordering::SeqCst);
            Ok(Gadget)
        })
        .done();
    let gadget_factory = types.factory_of(gadget);

    struct Shop {
        factory: Arc<FactoryValue>,
    }
    let shop = types
        .register::<Shop>()
        .constructor(vec![Param::new("factory", gadget_factory)], |args| {
            Ok(Shop {
                factory: args.get::<FactoryValue>(0)?,
            })
        })
        .done();
    let container = Container::new(types.build(), ConfigurationBuilder::new().build());

    BUILT.store(0, Ordering::SeqCst);
    let shop: Arc<Shop> = container.resolve_ref(shop, &[]).get::<Shop>().unwrap();
    // Resolving the shop does not build any gadget.
    assert_eq!(BUILT.load(Ordering::SeqCst), 0);

    let one = shop.factory.create().unwrap();
    let two = shop.factory.create().unwrap();
    assert_eq!(BUILT.load(Ordering::SeqCst), 2);
    assert!(!Arc::ptr_eq(&one.value, &two.value));
}

#[test]
fn test_lazy_parameter_resolves_once_on_first_access() {
    static BUILT: AtomicUsize = AtomicUsize::new(0);

    let mut types = TypeRegistryBuilder::new();
    let gadget = types
        .register::<Gadget>()
        .constructor(vec![], |_| {
            BUILT.fetch_add(1, Ordering::SeqCst);
            Ok(Gadget)
        })
        .done();
    let lazy_gadget = types.lazy_of(gadget);

    struct Workshop {
        gadget: Arc<LazyValue>,
    }
    let workshop = types
        .register::<Workshop>()
        .constructor(vec![Param::new("gadget", lazy_gadget)], |args| {
            Ok(Workshop {
                gadget: args.get::<LazyValue>(0)?,
            })
        })
        .done();
    let container = Container::new(types.build(), ConfigurationBuilder::new().build());

    BUILT.store(0, Ordering::SeqCst);
    let workshop: Arc<Workshop> = container
        .resolve_ref(workshop, &[])
        .get::<Workshop>()
        .unwrap();
    assert_eq!(BUILT.load(Ordering::SeqCst), 0);

    let first = workshop.gadget.get().unwrap();
    let second = workshop.gadget.get().unwrap();
    assert_eq!(BUILT.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&first.value, &second.value));
}

#[test]
fn test_argument_factory_binds_by_type() {
    let mut types = TypeRegistryBuilder::new();
    let tag = types.simple_type::<String>();

    struct Tagged {
        tag: Arc<String>,
    }
    let tagged = types
        .register::<Tagged>()
        .constructor(vec![Param::new("tag", tag)], |args| {
            Ok(Tagged {
                tag: args.get::<String>(0)?,
            })
        })
        .done();
    let nested = types.factory_with_arg(tag, tagged);

    struct Assembly {
        make_tagged: Arc<solder::ArgumentFactoryValue>,
    }
    let assembly = types
        .register::<Assembly>()
        .constructor(vec![Param::new("make_tagged", nested)], |args| {
            Ok(Assembly {
                make_tagged: args.get::<solder::ArgumentFactoryValue>(0)?,
            })
        })
        .done();
    let container = Container::new(types.build(), ConfigurationBuilder::new().build());

    let assembly: Arc<Assembly> = container
        .resolve_ref(assembly, &[])
        .get::<Assembly>()
        .unwrap();
    let tagged = assembly
        .make_tagged
        .create(TypedInstance::new(tag, Arc::new("blue".to_string())))
        .unwrap();
    let tagged: Arc<Tagged> = tagged.downcast::<Tagged>().unwrap();
    assert_eq!(*tagged.tag, "blue");
}

#[test]
fn test_per_request_refused_by_resolve() {
    let mut types = TypeRegistryBuilder::new();
    let gadget = types
        .register::<Gadget>()
        .per_request()
        .constructor(vec![], |_| Ok(Gadget))
        .done();
    let container = Container::new(types.build(), ConfigurationBuilder::new().build());

    let err = container
        .resolve_ref(gadget, &[])
        .single_instance()
        .unwrap_err();
    assert!(err.to_string().contains("use a factory instead"));

    // create is the sanctioned path
    assert!(container.create_one(gadget, &[], None).is_ok());
}

#[test]
fn test_create_with_arguments_overrides_parameter() {
    let mut types = TypeRegistryBuilder::new();
    let tag = types.simple_type::<String>();
    struct Tagged {
        tag: Arc<String>,
    }
    let tagged = types
        .register::<Tagged>()
        .constructor(vec![Param::new("tag", tag)], |args| {
            Ok(Tagged {
                tag: args.get::<String>(0)?,
            })
        })
        .done();
    let container = Container::new(types.build(), ConfigurationBuilder::new().build());

    let arguments = Arguments::new().with(
        "tag",
        TypedInstance::new(tag, Arc::new("green".to_string())),
    );
    let instance = container
        .create_one(tagged, &[], Some(arguments))
        .unwrap();
    let tagged: Arc<Tagged> = instance.downcast::<Tagged>().unwrap();
    assert_eq!(*tagged.tag, "green");
}

#[test]
fn test_repeat_create_uses_compiled_factory() {
    static BUILT: AtomicUsize = AtomicUsize::new(0);

    let mut types = TypeRegistryBuilder::new();
    let gadget = types
        .register::<Gadget>()
        .constructor(vec![], |_| {
            BUILT.fetch_add(1, Ordering::SeqCst);
            Ok(Gadget)
        })
        .done();
    let container = Container::new(types.build(), ConfigurationBuilder::new().build());

    BUILT.store(0, Ordering::SeqCst);
    let first = container.create_one(gadget, &[], None).unwrap();
    let second = container.create_one(gadget, &[], None).unwrap();
    assert_eq!(BUILT.load(Ordering::SeqCst), 2);
    assert!(!Arc::ptr_eq(&first.value, &second.value));
}

#[test]
fn test_delegate_type_is_refused() {
    let mut types = TypeRegistryBuilder::new();
    let callback = types.register_delegate("OnReady");
    let container = Container::new(types.build(), ConfigurationBuilder::new().build());

    let err = container
        .resolve_ref(callback, &[])
        .single_instance()
        .unwrap_err();
    assert!(err.to_string().contains("can't create delegate [OnReady]"));
}
