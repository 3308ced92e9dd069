//! Integration tests for value conversion in both directions

use ferry::{Error, HostFunction, Interpreter, Mapping, Value};
use serde_json::json;

/// Sends `value` into the engine and reads it straight back.
fn round_trip(interp: &Interpreter, value: &Value) -> ferry::Result<Value> {
    interp.set_global("__echo", value)?;
    interp.get_global("__echo")
}

#[test]
fn test_primitives_round_trip() {
    let interp = Interpreter::new().unwrap();
    for value in [
        Value::None,
        Value::Bool(true),
        Value::Bool(false),
        Value::Number(0.0),
        Value::Number(-1.5),
        Value::Number(1e300),
        Value::from(""),
        Value::from("plain"),
        Value::from("nul\0in the middle"),
        Value::from("ünïcödé ✓"),
    ] {
        assert_eq!(round_trip(&interp, &value).unwrap(), value);
    }
}

#[test]
fn test_integers_come_back_as_floats() {
    let interp = Interpreter::new().unwrap();
    let back = round_trip(&interp, &Value::from(7)).unwrap();
    assert_eq!(back, Value::Number(7.0));
    assert_eq!(interp.evaluate("Number.isInteger(__echo)").unwrap(), Value::Bool(true));
}

#[test]
fn test_containers_round_trip() {
    let interp = Interpreter::new().unwrap();
    let value = Value::from(json!({
        "items": [1, "two", null, [true, false]],
        "meta": {"empty_list": [], "empty_map": {}},
    }));
    assert_eq!(round_trip(&interp, &value).unwrap(), value);
    assert_eq!(
        interp.evaluate("Array.isArray(__echo.items)").unwrap(),
        Value::Bool(true)
    );
}

#[test]
fn test_engine_sees_host_values() {
    let interp = Interpreter::new().unwrap();
    interp
        .set_global("data", &Value::from(json!({"xs": [1, 2, 3], "name": "ferry"})))
        .unwrap();
    assert_eq!(
        interp
            .evaluate("data.xs.reduce((a, b) => a + b, 0) + data.name.length")
            .unwrap(),
        Value::Number(11.0)
    );
}

#[test]
fn test_partial_failure_with_own_foreign_function() {
    let interp = Interpreter::new().unwrap();
    let own = interp.evaluate("() => 3").unwrap();
    let baseline = interp.diagnostics();

    let list = Value::Sequence(vec![Value::from(1), Value::from(2), own]);
    assert!(matches!(
        interp.set_global("list", &list),
        Err(Error::UnsupportedType(_))
    ));
    assert_eq!(interp.diagnostics(), baseline);
    assert_eq!(interp.get_global("list").unwrap(), Value::None);
}

#[test]
fn test_partial_failure_with_engine_symbol() {
    let interp = Interpreter::new().unwrap();
    let baseline = interp.diagnostics();

    assert!(matches!(
        interp.evaluate("[1, 2, Symbol()]"),
        Err(Error::UnsupportedType(_))
    ));
    assert_eq!(interp.diagnostics(), baseline);
}

#[test]
fn test_partial_failure_inside_host_function_arguments() {
    let interp = Interpreter::new().unwrap();
    let noop = HostFunction::new(|_| Ok(Value::None));
    interp.set_global("noop", &Value::from(noop)).unwrap();
    let baseline = interp.diagnostics();

    let caught = interp
        .evaluate("try { noop(1, [Symbol()]); 'no' } catch (e) { String(e) }")
        .unwrap();
    assert!(
        caught.as_str().is_some_and(|s| s.contains("UnsupportedType")),
        "{}",
        caught
    );
    assert_eq!(interp.diagnostics(), baseline);
}

#[test]
fn test_non_string_key_is_rejected() {
    let interp = Interpreter::new().unwrap();
    let mut mapping = Mapping::new();
    mapping.insert("fine", 1);
    mapping.insert(Value::Bool(true), 2);

    match interp.set_global("m", &Value::from(mapping)) {
        Err(Error::UnsupportedKeyType(kind)) => assert_eq!(kind, "bool"),
        other => panic!("expected key type error, got {:?}", other),
    }
    assert_eq!(interp.diagnostics().stack_depth, 0);
}

#[test]
fn test_host_result_conversion_failure_reaches_engine() {
    let interp = Interpreter::new().unwrap();
    let bad = HostFunction::new(|_| {
        let mut mapping = Mapping::new();
        mapping.insert(1, "numeric key");
        Ok(Value::from(mapping))
    });
    interp.set_global("bad", &Value::from(bad)).unwrap();

    let err = interp.evaluate("bad()").unwrap_err();
    assert!(err.message().contains("UnsupportedKeyType"), "{}", err.message());
}

#[test]
fn test_object_keys_exclude_inherited_and_hidden() {
    let interp = Interpreter::new().unwrap();
    let value = interp
        .evaluate(
            "class P { get inherited() { return 1 } }
             const o = new P();
             o.own = 'yes';
             Object.defineProperty(o, 'hidden', {value: 1, enumerable: false});
             o",
        )
        .unwrap();
    assert_eq!(value, Value::from(json!({"own": "yes"})));
}

#[test]
fn test_array_vs_object_rule() {
    let interp = Interpreter::new().unwrap();
    assert_eq!(interp.evaluate("[]").unwrap(), Value::Sequence(vec![]));
    assert_eq!(
        interp.evaluate("({0: 'zero'})").unwrap(),
        Value::from(json!({"0": "zero"}))
    );
    assert_eq!(
        interp.evaluate("var a = []; a[2] = 'c'; a").unwrap(),
        Value::from(json!([null, null, "c"]))
    );
}
