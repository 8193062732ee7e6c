//! Integration tests for value handles and conversions

mod common;

use common::{setup, Fixture};
use jsembed_core::{BridgeError, Context, ConversionError, Json, ValueKind};
use jsembed_test::JsVal;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Point {
    x: i32,
    y: i32,
}

#[test]
fn test_value_knows_its_context() {
    let Fixture { ctx, .. } = setup();
    let value = ctx.create_int(3).unwrap();
    assert_eq!(value.context_id(), ctx.id());
    assert_eq!(value.context().map(|owner| owner.id()), Some(ctx.id()));
}

#[test]
fn test_scalar_round_trips() {
    let Fixture { ctx, .. } = setup();
    assert_eq!(ctx.create_int(-5).unwrap().to_int().unwrap(), -5);
    assert_eq!(ctx.create_int(1 << 40).unwrap().to_int64().unwrap(), 1 << 40);
    assert_eq!(ctx.create_uint(7).unwrap().to_uint().unwrap(), 7);
    assert_eq!(ctx.create_float(1.25).unwrap().to_float().unwrap(), 1.25);
    assert_eq!(ctx.create_double(2.5).unwrap().to_double().unwrap(), 2.5);
    assert!(ctx.create_bool(true).unwrap().to_bool().unwrap());
    assert_eq!(ctx.create_string("héllo").unwrap().to_string().unwrap(), "héllo");
    assert_eq!(ctx.create_null().unwrap().type_name(), "null");
    assert_eq!(ctx.create_undefined().unwrap().type_name(), "undefined");
}

#[test]
fn test_conversion_mismatch() {
    let Fixture { ctx, .. } = setup();
    let fraction = ctx.create_double(2.5).unwrap();
    let err = fraction.to_int().unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Conversion(ConversionError::TypeMismatch {
            expected: "int32",
            got: "number"
        })
    ));

    let negative = ctx.create_int(-1).unwrap();
    assert!(negative.to_uint().is_err());

    let number = ctx.create_int(1).unwrap();
    let err = number.to_string().unwrap_err();
    assert_eq!(err.to_string(), "Type mismatch: expected string, got number");
    assert!(number.to_bool().is_err());
}

#[test]
fn test_to_value_and_from_js() {
    let Fixture { ctx, .. } = setup();
    assert_eq!(ctx.to_value(&42i32).unwrap().to::<i32>().unwrap(), 42);
    assert_eq!(ctx.to_value(&7u8).unwrap().to::<u32>().unwrap(), 7);
    assert!(ctx.to_value(&true).unwrap().to::<bool>().unwrap());
    assert_eq!(ctx.to_value("text").unwrap().to::<String>().unwrap(), "text");
    assert_eq!(
        ctx.to_value(&json!({"k": [1, null]})).unwrap().to::<serde_json::Value>().unwrap(),
        json!({"k": [1, null]})
    );

    let point = Point { x: 3, y: -4 };
    let value = ctx.to_value(&Json(point.clone())).unwrap();
    assert_eq!(value.to::<Json<Point>>().unwrap().0, point);
}

#[test]
fn test_from_json_errors_name_the_operation() {
    let Fixture { ctx, .. } = setup();
    let err = ctx.from_json("{not json").unwrap_err();
    assert!(matches!(&err, BridgeError::Execution { origin, .. } if origin == "FromJSON"));
}

#[test]
fn test_release_twice_fails() {
    let Fixture { engine, ctx, .. } = setup();
    let value = ctx.create_int(1).unwrap();
    assert_eq!(engine.handle_count(), 1);

    value.release().unwrap();
    assert!(value.is_released());
    assert_eq!(engine.handle_count(), 0);
    assert_eq!(ctx.count_values(), 0);
    assert!(matches!(value.release(), Err(BridgeError::AlreadyReleased)));
}

#[test]
fn test_clones_share_one_handle() {
    let Fixture { ctx, .. } = setup();
    let value = ctx.create_int(1).unwrap();
    let clone = value.clone();
    assert!(clone.ptr_eq(&value));

    clone.release().unwrap();
    assert!(value.is_released());
    assert!(matches!(value.release(), Err(BridgeError::AlreadyReleased)));
}

#[test]
#[should_panic(expected = "Value or context were reset.")]
fn test_using_a_released_value_panics() {
    let Fixture { ctx, .. } = setup();
    let value = ctx.create_int(1).unwrap();
    value.release().unwrap();
    let _ = value.to_int();
}

#[test]
fn test_weaken_hands_the_value_to_the_collector() {
    let Fixture { engine, ctx, .. } = setup();
    let value = ctx.create_array(&[]).unwrap();
    value.weaken().unwrap();

    assert!(value.is_weak());
    assert_eq!(ctx.count_values(), 0);
    assert!(matches!(value.release(), Err(BridgeError::WeakValue)));
    // still usable until collected
    assert_eq!(value.to_json().unwrap(), "[]");

    engine.collect_garbage();
    assert_eq!(engine.handle_count(), 0);
}

#[test]
fn test_burst_get_and_set() {
    let Fixture { engine, ctx, .. } = setup();
    let object = ctx.from_json(r#"{"a": 1, "b": "two"}"#).unwrap();

    let fields = object.burst().unwrap();
    assert_eq!(fields.len(), 2);
    assert_eq!(fields["a"].to_int().unwrap(), 1);
    assert_eq!(fields["b"].to_string().unwrap(), "two");

    let handles = engine.handle_count();
    let values = ctx.count_values();
    assert_eq!(object.get("b").unwrap().to_string().unwrap(), "two");
    // fields that were not asked for are released right away
    assert_eq!(engine.handle_count(), handles + 1);
    assert_eq!(ctx.count_values(), values + 1);

    object.set("c", &ctx.create_bool(true).unwrap()).unwrap();
    assert_eq!(object.to_json().unwrap(), r#"{"a":1,"b":"two","c":true}"#);
}

#[test]
fn test_get_of_missing_field() {
    let Fixture { ctx, .. } = setup();
    let object = ctx.from_json(r#"{"a": 1}"#).unwrap();
    let err = object.get("zzz").unwrap_err();
    assert!(matches!(&err, BridgeError::UndefinedField(field) if field == "zzz"));
    assert_eq!(err.to_string(), "field 'zzz' is undefined");
}

#[test]
fn test_create_array() {
    let Fixture { ctx, .. } = setup();
    let items = [ctx.create_int(1).unwrap(), ctx.create_string("x").unwrap()];
    let array = ctx.create_array(&items).unwrap();
    assert!(array.is(ValueKind::Array));
    assert_eq!(array.type_name(), "array");
    assert_eq!(array.to_json().unwrap(), r#"[1,"x"]"#);
}

#[test]
fn test_kind_checks() {
    let Fixture { engine, ctx, .. } = setup();
    for (source, kind) in [
        ("new Map()", ValueKind::Map),
        ("new Set()", ValueKind::Set),
        ("new Date()", ValueKind::Date),
        ("Promise.resolve()", ValueKind::Promise),
        ("/x/", ValueKind::RegExp),
        ("new ArrayBuffer(8)", ValueKind::ArrayBuffer),
    ] {
        engine.define_script(source, move |scope| Ok(scope.builtin(kind)));
        let value = ctx.eval_raw(source, "kinds.js").unwrap();
        assert!(value.is(kind), "{} is not {:?}", source, kind);
        assert!(!value.is(ValueKind::Array));
    }

    let number = ctx.create_int(1).unwrap();
    assert!(!number.is(ValueKind::Function));
    let function = ctx.create_raw_func(|_, _, _| Ok(None)).unwrap();
    assert!(function.is(ValueKind::Function));
    assert_eq!(function.type_name(), "function");
}

#[test]
fn test_with_bytes_borrows_a_uint8_array() {
    let Fixture { engine, ctx, .. } = setup();
    engine.define_script("bytes()", |scope| Ok(scope.uint8_array(&[1, 2, 3])));
    let bytes = ctx.eval_raw("bytes()", "bytes.js").unwrap();

    assert!(bytes.is(ValueKind::TypedArray));
    assert_eq!(bytes.with_bytes(|b| b.iter().map(|&x| u32::from(x)).sum::<u32>()).unwrap(), 6);
    assert_eq!(bytes.to_bytes().unwrap(), vec![1, 2, 3]);

    let number = ctx.create_int(1).unwrap();
    let err = number.with_bytes(|b| b.len()).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Conversion(ConversionError::TypeMismatch {
            expected: "Uint8Array",
            ..
        })
    ));
}

#[test]
fn test_global_object() {
    let Fixture { engine, ctx, .. } = setup();
    let global = ctx.global().unwrap();
    global.set("answer", &ctx.create_int(42).unwrap()).unwrap();
    assert_eq!(ctx.eval("answer", "").unwrap(), Some(json!(42)));

    engine.define_script("answer_from_script()", |scope| {
        let answer = scope.lookup("answer")?;
        Ok(JsVal::Number(answer.as_number().unwrap_or_default() + 1.0))
    });
    assert_eq!(ctx.eval("answer_from_script()", "").unwrap(), Some(json!(43)));
}

#[test]
#[should_panic(expected = "used in")]
fn test_value_of_another_context_is_rejected() {
    let Fixture { isolate, ctx, .. } = setup();
    let other = Context::new(&isolate).unwrap();
    let object = ctx.from_json("{}").unwrap();
    let foreign = other.create_int(1).unwrap();
    let _ = object.set("x", &foreign);
}
