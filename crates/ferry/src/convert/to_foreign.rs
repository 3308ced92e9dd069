//! Host values to engine values

use ferry_jsc_sys::*;
use std::ptr;

use crate::bridge;
use crate::error::{Error, Result};
use crate::proxy::{ForeignFunction, host};
use crate::safe_call::Frame;
use crate::string::{self, JscString};
use crate::value::{Callable, HostFunction, Mapping, Value};

/// Converts `value` into the frame's context.
///
/// The result and every intermediate value are tracked by `frame`. On error
/// nothing is thrown into the engine here; callers decide whether the error
/// goes back to the host or into the engine's exception channel.
pub(crate) fn convert(frame: &mut Frame<'_>, value: &Value) -> Result<JSValueRef> {
    let ctx = frame.ctx();
    // SAFETY: ctx is live while the frame is open
    let raw = unsafe {
        match value {
            Value::None => JSValueMakeNull(ctx),
            Value::Bool(b) => JSValueMakeBoolean(ctx, *b),
            Value::Number(n) => JSValueMakeNumber(ctx, *n),
            Value::String(s) => string::make_value(ctx, s)?,
            Value::Sequence(items) => return array(frame, items),
            Value::Mapping(entries) => return object(frame, entries),
            Value::Callable(Callable::Host(function)) => return host::wrap(frame, function),
            Value::Callable(Callable::Foreign(function)) => return foreign(frame, function),
        }
    };
    // SAFETY: raw was just created in ctx
    Ok(unsafe { frame.track(raw) })
}

fn array(frame: &mut Frame<'_>, items: &[Value]) -> Result<JSValueRef> {
    let ctx = frame.ctx();
    let mut exception: JSValueRef = ptr::null_mut();
    // SAFETY: ctx is live; the array is tracked before elements are created
    unsafe {
        let array = JSObjectMakeArray(ctx, 0, ptr::null(), &mut exception);
        if !exception.is_null() {
            return Err(Error::Runtime(bridge::capture(ctx, &mut exception)));
        }
        let array = frame.track(array);

        for (index, item) in items.iter().enumerate() {
            let index = u32::try_from(index)
                .map_err(|_| Error::conversion("sequence too long for an engine array"))?;
            let element = convert(frame, item)?;
            JSObjectSetPropertyAtIndex(ctx, array, index, element, &mut exception);
            if !exception.is_null() {
                return Err(Error::Runtime(bridge::capture(ctx, &mut exception)));
            }
        }
        Ok(array)
    }
}

fn object(frame: &mut Frame<'_>, entries: &Mapping) -> Result<JSValueRef> {
    let ctx = frame.ctx();
    let mut exception: JSValueRef = ptr::null_mut();
    // SAFETY: ctx is live; the object is tracked before values are created
    unsafe {
        let object = frame.track(JSObjectMake(ctx, ptr::null_mut(), ptr::null_mut()));

        for (key, value) in entries.iter() {
            let Value::String(key) = key else {
                return Err(Error::UnsupportedKeyType(key.kind().into()));
            };
            let key = JscString::new(key)?;
            let value = convert(frame, value)?;
            JSObjectSetProperty(
                ctx,
                object,
                key.raw(),
                value,
                K_JS_PROPERTY_ATTRIBUTE_NONE,
                &mut exception,
            );
            if !exception.is_null() {
                return Err(Error::Runtime(bridge::capture(ctx, &mut exception)));
            }
        }
        Ok(object)
    }
}

/// A proxy from another interpreter crosses as a host function that forwards to it.
fn foreign(frame: &mut Frame<'_>, function: &ForeignFunction) -> Result<JSValueRef> {
    if function.belongs_to(frame.runtime()) {
        return Err(Error::unsupported_type(
            "foreign function passed back into its own interpreter",
        ));
    }
    if function.is_released() {
        return Err(Error::NotInitialized);
    }

    let forward = function.clone();
    host::wrap(frame, &HostFunction::new(move |args| forward.call(args)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InterpreterConfig;
    use crate::convert::to_host;
    use crate::runtime::Runtime;
    use crate::safe_call;
    use serde_json::json;
    use std::rc::Rc;

    fn round_trip(rt: &Rc<Runtime>, value: &Value) -> Result<Value> {
        safe_call::run(rt, |frame| {
            let raw = convert(frame, value)?;
            unsafe { to_host::convert(frame, raw) }
        })
    }

    #[test]
    fn primitives_round_trip() {
        let rt = Runtime::new(InterpreterConfig::default()).unwrap();
        for value in [
            Value::None,
            Value::Bool(false),
            Value::Number(-0.5),
            Value::Number(3.0),
            Value::from("nul\0inside"),
            Value::from(""),
        ] {
            assert_eq!(round_trip(&rt, &value).unwrap(), value);
        }
    }

    #[test]
    fn nested_containers_round_trip() {
        let rt = Runtime::new(InterpreterConfig::default()).unwrap();
        let value = Value::from(json!({
            "list": [1, [2, 3], {"deep": null}],
            "name": "ferry",
            "empty": {}
        }));
        assert_eq!(round_trip(&rt, &value).unwrap(), value);
    }

    #[test]
    fn non_string_key_is_rejected_and_cleaned_up() {
        let rt = Runtime::new(InterpreterConfig::default()).unwrap();
        let baseline = rt.pinned_count();
        let mut entries = Mapping::new();
        entries.insert("ok", 1);
        entries.insert(2, "bad");
        let result = round_trip(&rt, &Value::Mapping(entries));
        assert!(matches!(result, Err(Error::UnsupportedKeyType(kind)) if kind == "number"));
        assert_eq!(rt.stack_depth(), 0);
        assert_eq!(rt.pinned_count(), baseline);
    }
}
