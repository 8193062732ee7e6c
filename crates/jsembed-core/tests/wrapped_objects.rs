//! Integration tests for prototypes, wrapped objects and their lifecycle

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use anyhow::anyhow;
use common::{setup, Fixture};
use jsembed_core::{BridgeError, Context, ContextOptions, ObjectHooks, ObjectId, Payload, Prototype, Value};
use jsembed_test::EngineEvent;
use parking_lot::Mutex;
use serde_json::json;

struct Point {
    x: f64,
    y: f64,
}

fn point(payload: &Payload) -> anyhow::Result<&Point> {
    payload.downcast_ref::<Point>().ok_or_else(|| anyhow!("receiver is not a Point"))
}

fn install_point_class(ctx: &Context) {
    let (proto, created) = ctx
        .create_class_prototype("Point", |_ctx, _from, proto, this, args| {
            let x = args.first().map(|v| v.to_double()).transpose()?.unwrap_or(0.0);
            let y = args.get(1).map(|v| v.to_double()).transpose()?.unwrap_or(0.0);
            this.wrap(proto, Point { x, y }, ObjectHooks::new())?;
            Ok(None)
        })
        .unwrap();
    assert!(created);
    proto
        .add_method("norm", |ctx, payload, _from, _args| {
            let p = point(payload)?;
            Ok(Some(ctx.create_double((p.x * p.x + p.y * p.y).sqrt())?))
        })
        .unwrap();
    proto
        .add_method("x", |ctx, payload, _from, _args| Ok(Some(ctx.create_double(point(payload)?.x)?)))
        .unwrap();
    ctx.global()
        .unwrap()
        .set("Point", &proto.class_constructor().unwrap())
        .unwrap();
}

#[test]
fn test_prototype_get_or_create() {
    let Fixture { ctx, .. } = setup();
    let (first, created) = ctx.create_object_prototype("Thing").unwrap();
    assert!(created);
    assert_eq!(first.name(), "Thing");
    assert!(!first.is_class());
    assert_eq!(first.context_id(), ctx.id());

    let (second, created) = ctx.create_object_prototype("Thing").unwrap();
    assert!(!created);
    assert!(second.ptr_eq(&first));
}

#[test]
fn test_concurrent_prototype_creation_creates_once() {
    let Fixture { ctx, .. } = setup();
    let barrier = Arc::new(Barrier::new(8));
    let threads: Vec<_> = (0..8)
        .map(|_| {
            let ctx = ctx.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                ctx.create_object_prototype("Shared").unwrap()
            })
        })
        .collect();

    let results: Vec<(Prototype, bool)> = threads.into_iter().map(|t| t.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|(_, created)| *created).count(), 1);
    let first = &results[0].0;
    assert!(results.iter().all(|(proto, _)| proto.ptr_eq(first)));
}

#[test]
fn test_object_prototype_has_no_constructor() {
    let Fixture { ctx, .. } = setup();
    let (proto, _) = ctx.create_object_prototype("Plain").unwrap();
    assert!(matches!(proto.class_constructor(), Err(BridgeError::Prototype { .. })));
}

#[test]
fn test_instantiate_and_call_methods() {
    let Fixture { ctx, .. } = setup();
    let (counter, _) = ctx.create_object_prototype("Counter").unwrap();
    counter
        .add_method("next", |ctx, payload, _from, _args| {
            let count = payload
                .downcast_ref::<AtomicUsize>()
                .ok_or_else(|| anyhow!("not a counter"))?;
            Ok(Some(ctx.to_value(&(count.fetch_add(1, Ordering::SeqCst) + 1))?))
        })
        .unwrap();
    assert_eq!(counter.method_count(), 1);

    let object = counter.instantiate(AtomicUsize::new(0), ObjectHooks::new()).unwrap();
    ctx.global().unwrap().set("counter", &object).unwrap();

    assert_eq!(ctx.eval("counter.next()", "counter.js").unwrap(), Some(json!(1)));
    assert_eq!(ctx.eval("counter.next()", "counter.js").unwrap(), Some(json!(2)));

    let payload = object.wrapped_payload().unwrap();
    assert_eq!(payload.downcast_ref::<AtomicUsize>().unwrap().load(Ordering::SeqCst), 2);
    assert!(object.object_id().is_some());
}

#[test]
fn test_method_receives_arguments_and_location() {
    let Fixture { ctx, .. } = setup();
    let (proto, _) = ctx.create_object_prototype("Greeter").unwrap();
    proto
        .add_method("greet", |ctx, _payload, from, args| {
            let name = args[0].to_string()?;
            Ok(Some(ctx.create_string(&format!("hello {} from {}", name, from.filename))?))
        })
        .unwrap();
    let greeter = proto.instantiate((), ObjectHooks::new()).unwrap();
    ctx.global().unwrap().set("greeter", &greeter).unwrap();

    assert_eq!(
        ctx.eval(r#"greeter.greet("ada")"#, "greet.js").unwrap(),
        Some(json!("hello ada from greet.js"))
    );
}

#[test]
fn test_method_on_a_plain_object_is_illegal() {
    let Fixture { engine, ctx, .. } = setup();
    let (proto, _) = ctx.create_object_prototype("Thing").unwrap();
    proto.add_method("poke", |_, _, _, _| Ok(None)).unwrap();
    let thing = proto.instantiate((), ObjectHooks::new()).unwrap();
    ctx.global().unwrap().set("thing", &thing).unwrap();

    engine.define_script("borrow()", |scope| {
        let thing = scope.lookup("thing")?;
        let poke = scope.get(&thing, "poke")?;
        let stranger = scope.object(Vec::new());
        scope.call(&poke, stranger, Vec::new())
    });
    let err = ctx.eval("borrow()", "borrow.js").unwrap_err();
    assert!(err.to_string().contains("Illegal invocation"), "{}", err);
}

#[test]
fn test_adding_a_method_twice_replaces_it() {
    let Fixture { ctx, .. } = setup();
    let (proto, _) = ctx.create_object_prototype("Versioned").unwrap();
    proto.add_method("v", |ctx, _, _, _| Ok(Some(ctx.create_int(1)?))).unwrap();
    proto.add_method("v", |ctx, _, _, _| Ok(Some(ctx.create_int(2)?))).unwrap();
    assert_eq!(proto.method_count(), 1);

    let object = proto.instantiate((), ObjectHooks::new()).unwrap();
    ctx.global().unwrap().set("versioned", &object).unwrap();
    assert_eq!(ctx.eval("versioned.v()", "").unwrap(), Some(json!(2)));
}

#[test]
fn test_class_prototype_constructs_from_script() {
    let Fixture { ctx, .. } = setup();
    install_point_class(&ctx);

    assert_eq!(ctx.eval("new Point(3, 4).norm()", "point.js").unwrap(), Some(json!(5)));
    assert_eq!(ctx.eval("new Point(1.5).x()", "point.js").unwrap(), Some(json!(1.5)));

    let (again, created) = ctx
        .create_class_prototype("Point", |_, _, _, _, _| Ok(None))
        .unwrap();
    assert!(!created);
    assert!(again.is_class());
}

#[test]
fn test_calling_a_class_without_new_fails() {
    let Fixture { ctx, .. } = setup();
    install_point_class(&ctx);
    let err = ctx.eval("Point(1, 2)", "point.js").unwrap_err();
    assert!(err.to_string().contains("without 'new'"), "{}", err);
}

#[test]
fn test_getter_resolves_named_properties() {
    let Fixture { ctx, .. } = setup();
    let (proto, _) = ctx.create_object_prototype("Config").unwrap();
    let settings: HashMap<String, i64> = [("port".to_string(), 8080)].into_iter().collect();
    let config = proto
        .instantiate(
            settings,
            ObjectHooks::new().getter(|ctx, payload, name| {
                let settings = payload
                    .downcast_ref::<HashMap<String, i64>>()
                    .ok_or_else(|| anyhow!("not a config"))?;
                match settings.get(name) {
                    Some(value) => Ok(Some(ctx.create_int(*value)?)),
                    None => Ok(None),
                }
            }),
        )
        .unwrap();
    ctx.global().unwrap().set("config", &config).unwrap();

    assert_eq!(ctx.eval("config.port", "getter.js").unwrap(), Some(json!(8080)));
    assert_eq!(ctx.eval("config.missing", "getter.js").unwrap(), None);
}

#[test]
fn test_getter_error_becomes_exception() {
    let Fixture { ctx, .. } = setup();
    let (proto, _) = ctx.create_object_prototype("Strict").unwrap();
    let strict = proto
        .instantiate(
            (),
            ObjectHooks::new().getter(|_, _, name| Err(anyhow!("no property '{}'", name))),
        )
        .unwrap();
    ctx.global().unwrap().set("strict", &strict).unwrap();

    let err = ctx.eval("strict.anything", "strict.js").unwrap_err();
    assert_eq!(err.to_string(), "Failed to execute JS (strict.js): no property 'anything'");
}

#[test]
fn test_collected_object_is_disposed_once() {
    let Fixture { engine, ctx, .. } = setup();
    let disposed = Arc::new(AtomicUsize::new(0));
    let (proto, _) = ctx.create_object_prototype("Temp").unwrap();

    let expected: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
    let saw_external = Arc::new(AtomicBool::new(false));

    let counter = disposed.clone();
    let slot = expected.clone();
    let seen = saw_external.clone();
    let temp = proto
        .instantiate(
            7u32,
            ObjectHooks::new().disposer(move |payload, external| {
                assert_eq!(payload.downcast_ref::<u32>(), Some(&7));
                if slot.lock().as_ref().is_some_and(|value| value.ptr_eq(external)) {
                    seen.store(true, Ordering::SeqCst);
                }
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();
    *expected.lock() = Some(temp.clone());
    let id = temp.object_id().unwrap();
    let values = ctx.count_values();

    assert_eq!(engine.collect_garbage(), 1);
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
    assert!(saw_external.load(Ordering::SeqCst));
    assert!(temp.is_released());
    assert_eq!(ctx.count_values(), values - 1);
    assert!(engine.events().contains(&EngineEvent::Finalized(id)));

    assert_eq!(engine.collect_garbage(), 0);
    ctx.destroy().unwrap();
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_reachable_object_survives_collection() {
    let Fixture { engine, ctx, .. } = setup();
    let disposed = Arc::new(AtomicUsize::new(0));
    let (proto, _) = ctx.create_object_prototype("Kept").unwrap();

    let counter = disposed.clone();
    let kept = proto
        .instantiate(
            (),
            ObjectHooks::new().disposer(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();
    ctx.global().unwrap().set("kept", &kept).unwrap();

    assert_eq!(engine.collect_garbage(), 0);
    assert_eq!(disposed.load(Ordering::SeqCst), 0);

    ctx.destroy().unwrap();
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_dispose_errors_reach_the_handler() {
    let Fixture { isolate, .. } = setup();
    let seen: Arc<Mutex<Vec<(ObjectId, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let ctx = Context::with_options(
        &isolate,
        ContextOptions::default().on_dispose_error(move |id, err| sink.lock().push((id, err.to_string()))),
    )
    .unwrap();

    let (proto, _) = ctx.create_object_prototype("Leaky").unwrap();
    let leaky = proto
        .instantiate((), ObjectHooks::new().disposer(|_, _| Err(anyhow!("close failed"))))
        .unwrap();
    let id = leaky.object_id().unwrap();

    ctx.destroy().unwrap();
    assert_eq!(*seen.lock(), vec![(id, "close failed".to_string())]);
}

#[test]
fn test_wrap_an_existing_object() {
    let Fixture { ctx, .. } = setup();
    let (proto, _) = ctx.create_object_prototype("Tagged").unwrap();
    let plain = ctx.from_json(r#"{"kind": "plain"}"#).unwrap();
    assert!(plain.object_id().is_none());

    let wrapped = plain.wrap(&proto, "tag".to_string(), ObjectHooks::new()).unwrap();
    assert_eq!(wrapped.object_id(), plain.object_id());
    let payload = plain.wrapped_payload().unwrap();
    assert_eq!(payload.downcast_ref::<String>().map(String::as_str), Some("tag"));
    assert_eq!(wrapped.get("kind").unwrap().to_string().unwrap(), "plain");
}

#[test]
#[should_panic(expected = "used to wrap")]
fn test_wrapping_with_a_prototype_of_another_context_is_fatal() {
    let Fixture { isolate, ctx, .. } = setup();
    let other = Context::new(&isolate).unwrap();
    let (foreign, _) = other.create_object_prototype("Foreign").unwrap();
    let plain = ctx.from_json("{}").unwrap();
    let _ = plain.wrap(&foreign, (), ObjectHooks::new());
}

#[test]
fn test_failed_wrap_leaves_no_object() {
    let Fixture { ctx, .. } = setup();
    let disposed = Arc::new(AtomicUsize::new(0));
    let (proto, _) = ctx.create_object_prototype("Boxed").unwrap();
    let number = ctx.create_int(1).unwrap();

    let counter = disposed.clone();
    let err = number
        .wrap(
            &proto,
            (),
            ObjectHooks::new().disposer(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap_err();
    assert!(matches!(err, BridgeError::Wrap(_)), "{}", err);
    assert!(number.object_id().is_none());

    ctx.destroy().unwrap();
    assert_eq!(disposed.load(Ordering::SeqCst), 0);
}
