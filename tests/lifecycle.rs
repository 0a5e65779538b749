//! Integration tests for lifecycle concerns: component runs, disposal
//! order, build_up, analyze mode and container cloning

use solder::{
    Component, ConfigurationBuilder, Container, Disposable, Error, Param, SelectionDecision,
    TypeRegistryBuilder, TypedInstance,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type EventLog = Arc<Mutex<Vec<String>>>;

fn record(log: &EventLog, event: &str) {
    log.lock().unwrap().push(event.to_string());
}

struct Database {
    log: EventLog,
}

impl Disposable for Database {
    fn dispose(&self) -> solder::Result<()> {
        record(&self.log, "dispose Database");
        Ok(())
    }
}

impl Component for Database {
    fn run(&self) -> solder::Result<()> {
        record(&self.log, "run Database");
        Ok(())
    }
}

struct Api {
    log: EventLog,
    _db: Arc<Database>,
}

impl Disposable for Api {
    fn dispose(&self) -> solder::Result<()> {
        record(&self.log, "dispose Api");
        Ok(())
    }
}

impl Component for Api {
    fn run(&self) -> solder::Result<()> {
        record(&self.log, "run Api");
        Ok(())
    }
}

fn build_api_container(log: EventLog) -> (Container, solder::TypeRef) {
    let mut types = TypeRegistryBuilder::new();
    let db_log = log.clone();
    let database = types
        .register::<Database>()
        .as_component()
        .as_disposable()
        .constructor(vec![], move |_| Ok(Database { log: db_log.clone() }))
        .done();
    let api_log = log;
    let api = types
        .register::<Api>()
        .as_component()
        .as_disposable()
        .constructor(vec![Param::new("db", database)], move |args| {
            Ok(Api {
                log: api_log.clone(),
                _db: args.get::<Database>(0)?,
            })
        })
        .done();
    let container = Container::new(types.build(), ConfigurationBuilder::new().build());
    (container, api)
}

#[test]
fn test_run_order_is_children_before_parents() {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let (container, api) = build_api_container(log.clone());

    let resolved = container.resolve_ref(api, &[]);
    resolved.ensure_run_called().unwrap();
    resolved.ensure_run_called().unwrap();

    let events = log.lock().unwrap().clone();
    assert_eq!(events, vec!["run Database", "run Api"]);
}

#[test]
fn test_dispose_order_is_reverse_of_construction() {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let (container, api) = build_api_container(log.clone());

    container.resolve_ref(api, &[]).single_instance().unwrap();
    container.dispose().unwrap();
    container.dispose().unwrap();

    let events = log.lock().unwrap().clone();
    assert_eq!(events, vec!["dispose Api", "dispose Database"]);
}

#[test]
fn test_resolve_after_dispose_fails() {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let (container, api) = build_api_container(log);

    container.dispose().unwrap();
    let resolved = container.resolve_ref(api, &[]);
    assert!(resolved.single_instance().is_err());
}

#[test]
fn test_dispose_swallows_cancellation_and_aggregates_errors() {
    struct Cancelling;
    impl Disposable for Cancelling {
        fn dispose(&self) -> solder::Result<()> {
            Err(Error::Cancelled)
        }
    }
    struct Failing;
    impl Disposable for Failing {
        fn dispose(&self) -> solder::Result<()> {
            Err(Error::internal("failing disposer"))
        }
    }

    let mut types = TypeRegistryBuilder::new();
    let cancelling = types
        .register::<Cancelling>()
        .as_disposable()
        .constructor(vec![], |_| Ok(Cancelling))
        .done();
    let failing = types
        .register::<Failing>()
        .as_disposable()
        .constructor(vec![], |_| Ok(Failing))
        .done();
    let container = Container::new(types.build(), ConfigurationBuilder::new().build());

    container.resolve_ref(cancelling, &[]).single_instance().unwrap();
    container.resolve_ref(failing, &[]).single_instance().unwrap();

    let err = container.dispose().unwrap_err();
    match err {
        Error::Aggregate(errors) => {
            assert_eq!(errors.len(), 1);
            assert!(errors[0].to_string().contains("failing disposer"));
        }
        other => panic!("expected aggregate, got {}", other),
    }
}

#[test]
fn test_repeat_create_respects_ownership_opt_out() {
    struct Transient {
        log: EventLog,
    }
    impl Disposable for Transient {
        fn dispose(&self) -> solder::Result<()> {
            record(&self.log, "dispose Transient");
            Ok(())
        }
    }

    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let mut types = TypeRegistryBuilder::new();
    let ctor_log = log.clone();
    let transient = types
        .register::<Transient>()
        .as_disposable()
        .constructor(vec![], move |_| {
            Ok(Transient {
                log: ctor_log.clone(),
            })
        })
        .done();

    let mut config = ConfigurationBuilder::new();
    config.for_type(transient).owned_by_container(false);
    let container = Container::new(types.build(), config.build());

    // First create resolves, the second is served from the compiled
    // factory; neither registers the opted-out instance for disposal.
    container.create_one(transient, &[], None).unwrap();
    container.create_one(transient, &[], None).unwrap();
    container.dispose().unwrap();
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn test_build_up_fills_declared_slots() -> anyhow::Result<()> {
    struct Telemetry;
    struct Handler {
        telemetry: Mutex<Option<Arc<Telemetry>>>,
    }

    let mut types = TypeRegistryBuilder::new();
    let telemetry = types
        .register::<Telemetry>()
        .constructor(vec![], |_| Ok(Telemetry))
        .done();
    let handler = types
        .register::<Handler>()
        .injector(vec![Param::new("telemetry", telemetry)], |target, args| {
            *target.telemetry.lock().unwrap() = Some(args.get::<Telemetry>(0)?);
            Ok(())
        })
        .done();
    let container = Container::new(types.build(), ConfigurationBuilder::new().build());

    let target = Arc::new(Handler {
        telemetry: Mutex::new(None),
    });
    let built = container.build_up(TypedInstance::new(handler, target.clone()), &[])?;
    assert_eq!(built.dependencies().len(), 1);
    assert!(target.telemetry.lock().unwrap().is_some());
    Ok(())
}

#[test]
fn test_analyze_mode_visits_without_constructing() {
    static BUILT: AtomicUsize = AtomicUsize::new(0);
    struct Heavy;

    let mut types = TypeRegistryBuilder::new();
    let heavy = types
        .register::<Heavy>()
        .constructor(vec![], |_| {
            BUILT.fetch_add(1, Ordering::SeqCst);
            Ok(Heavy)
        })
        .done();
    let container = Container::new(types.build(), ConfigurationBuilder::new().build());

    BUILT.store(0, Ordering::SeqCst);
    let analyzed = container.analyze_ref(heavy, &[]);
    assert!(analyzed.is_ok());
    assert_eq!(BUILT.load(Ordering::SeqCst), 0);

    // A real resolution afterwards still constructs exactly once.
    container.resolve_ref(heavy, &[]).single_instance().unwrap();
    assert_eq!(BUILT.load(Ordering::SeqCst), 1);
}

#[test]
fn test_clone_with_overlays_configuration() {
    struct ImplA;
    struct ImplB;

    let mut types = TypeRegistryBuilder::new();
    let iface = types.register_named_interface("IService");
    let a = types
        .register::<ImplA>()
        .constructor(vec![], |_| Ok(ImplA))
        .done();
    let b = types
        .register::<ImplB>()
        .constructor(vec![], |_| Ok(ImplB))
        .done();

    let mut config = ConfigurationBuilder::new();
    config.for_type(iface).bind(a);
    let base = Container::new(types.build(), config.build());

    let sibling = base.clone_with(|overlay| {
        overlay.for_type(iface).bind(b);
    });

    assert!(base.resolve_ref(iface, &[]).get::<ImplA>().is_ok());
    assert!(sibling.resolve_ref(iface, &[]).get::<ImplB>().is_ok());
    assert!(Arc::ptr_eq(base.registry(), sibling.registry()));
}

#[test]
fn test_implicit_dependencies_are_resolved() {
    static BUILT: AtomicUsize = AtomicUsize::new(0);
    struct Warmup;
    struct App;

    let mut types = TypeRegistryBuilder::new();
    let warmup = types
        .register::<Warmup>()
        .constructor(vec![], |_| {
            BUILT.fetch_add(1, Ordering::SeqCst);
            Ok(Warmup)
        })
        .done();
    let app = types
        .register::<App>()
        .constructor(vec![], |_| Ok(App))
        .done();

    let mut config = ConfigurationBuilder::new();
    config.for_type(app).implicit_dependency(warmup, &[]);
    let container = Container::new(types.build(), config.build());

    BUILT.store(0, Ordering::SeqCst);
    let resolved = container.resolve_ref(app, &[]);
    assert!(resolved.is_ok());
    assert_eq!(BUILT.load(Ordering::SeqCst), 1);
}

#[test]
fn test_instance_filter_drops_unwanted_results() {
    struct ImplA;
    struct ImplB;

    let mut types = TypeRegistryBuilder::new();
    let iface = types.register_named_interface("IService");
    types
        .register::<ImplA>()
        .implements(iface)
        .constructor(vec![], |_| Ok(ImplA))
        .done();
    types
        .register::<ImplB>()
        .implements(iface)
        .constructor(vec![], |_| Ok(ImplB))
        .done();

    let mut config = ConfigurationBuilder::new();
    config
        .for_type(iface)
        .use_autosearch()
        .filter(|instance| instance.downcast::<ImplB>().is_none());
    let container = Container::new(types.build(), config.build());

    let resolved = container.resolve_ref(iface, &[]);
    let all = resolved.all_instances().unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0].downcast::<ImplA>().is_some());
    assert_eq!(resolved.service().comment(), Some("instance filter"));
}

#[test]
fn test_selector_excludes_candidates_with_comment() {
    struct ImplA;
    struct ImplB;

    let mut types = TypeRegistryBuilder::new();
    let iface = types.register_named_interface("IService");
    types
        .register::<ImplA>()
        .implements(iface)
        .constructor(vec![], |_| Ok(ImplA))
        .done();
    let b = types
        .register::<ImplB>()
        .implements(iface)
        .constructor(vec![], |_| Ok(ImplB))
        .done();

    let mut config = ConfigurationBuilder::new();
    config.for_type(iface).selector(move |_iface, _candidates| {
        vec![SelectionDecision {
            target: b,
            include: false,
            comment: Some("legacy implementation".to_string()),
        }]
    });
    let container = Container::new(types.build(), config.build());

    let resolved = container.resolve_ref(iface, &[]);
    let all = resolved.all_instances().unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0].downcast::<ImplA>().is_some());
    assert!(resolved
        .construction_log()
        .contains("legacy implementation"));
}

#[test]
fn test_resource_parameter_reads_embedded_bytes() {
    struct Templates {
        schema: Arc<solder::Resource>,
    }

    let mut types = TypeRegistryBuilder::new();
    let blob = types.simple_type::<solder::Resource>();
    let templates = types
        .register::<Templates>()
        .resource("schema.sql", b"create table t(x int);".as_slice())
        .constructor(
            vec![Param::new("schema", blob).from_resource("schema.sql")],
            |args| {
                Ok(Templates {
                    schema: args.get::<solder::Resource>(0)?,
                })
            },
        )
        .done();
    let container = Container::new(types.build(), ConfigurationBuilder::new().build());

    let templates: Arc<Templates> = container
        .resolve_ref(templates, &[])
        .get::<Templates>()
        .unwrap();
    assert_eq!(templates.schema.bytes(), b"create table t(x int);");

    // A missing resource is a hard error.
    let mut types = TypeRegistryBuilder::new();
    let blob = types.simple_type::<solder::Resource>();
    let broken = types
        .register::<Templates>()
        .constructor(
            vec![Param::new("schema", blob).from_resource("absent.sql")],
            |args| {
                Ok(Templates {
                    schema: args.get::<solder::Resource>(0)?,
                })
            },
        )
        .done();
    let container = Container::new(types.build(), ConfigurationBuilder::new().build());
    let err = container
        .resolve_ref(broken, &[])
        .single_instance()
        .unwrap_err();
    assert!(err.to_string().contains("can't find resource [absent.sql]"));
}
