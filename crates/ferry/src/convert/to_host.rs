//! Engine values to host values

use ferry_jsc_sys::*;
use std::ptr;

use crate::bridge;
use crate::error::{Error, Result};
use crate::proxy::{ForeignFunction, host};
use crate::runtime::Runtime;
use crate::safe_call::Frame;
use crate::string::{self, JscString};
use crate::value::{Callable, HostFunction, Mapping, Value};

/// Kinds of engine value, in dispatch precedence.
///
/// Host-function objects come before functions, which come before arrays and
/// plain objects, since each of those is also an object.
enum Kind {
    Nullish,
    Boolean,
    Number,
    String,
    HostFunction(HostFunction),
    Function,
    Array,
    Object,
    Unsupported(&'static str),
}

unsafe fn classify(rt: &Runtime, value: JSValueRef) -> Kind {
    let ctx = rt.ctx();
    // SAFETY: value is live per caller contract
    unsafe {
        match JSValueGetType(ctx, value) {
            K_JS_TYPE_UNDEFINED | K_JS_TYPE_NULL => Kind::Nullish,
            K_JS_TYPE_BOOLEAN => Kind::Boolean,
            K_JS_TYPE_NUMBER => Kind::Number,
            K_JS_TYPE_STRING => Kind::String,
            K_JS_TYPE_OBJECT => {
                if let Some(function) = host::unwrap(rt, value) {
                    Kind::HostFunction(function)
                } else if JSObjectIsFunction(ctx, value as JSObjectRef) {
                    Kind::Function
                } else if JSValueIsArray(ctx, value) {
                    Kind::Array
                } else {
                    Kind::Object
                }
            }
            K_JS_TYPE_SYMBOL => Kind::Unsupported("symbol"),
            K_JS_TYPE_BIGINT => Kind::Unsupported("bigint"),
            _ => Kind::Unsupported("unknown engine type"),
        }
    }
}

/// Converts `value`, recursing into arrays and objects.
///
/// Functions become [`ForeignFunction`]s pinned in the registry; host
/// functions that come back are unwrapped. Cyclic structures recurse without
/// bound and must not be passed in.
///
/// # Safety
/// `value` must be a live value of the frame's context.
pub(crate) unsafe fn convert(frame: &mut Frame<'_>, value: JSValueRef) -> Result<Value> {
    let ctx = frame.ctx();
    // SAFETY: value is live per caller contract
    unsafe {
        match classify(frame.runtime(), value) {
            Kind::Nullish => Ok(Value::None),
            Kind::Boolean => Ok(Value::Bool(JSValueToBoolean(ctx, value))),
            Kind::Number => to_number(ctx, value).map(Value::Number),
            Kind::String => string::value_to_string(ctx, value).map(Value::String),
            Kind::HostFunction(function) => Ok(Value::Callable(Callable::Host(function))),
            Kind::Function => ForeignFunction::wrap(frame, value as JSObjectRef).map(Value::from),
            Kind::Array => sequence(frame, value as JSObjectRef),
            Kind::Object => mapping(frame, value as JSObjectRef),
            Kind::Unsupported(kind) => Err(Error::unsupported_type(kind)),
        }
    }
}

unsafe fn sequence(frame: &mut Frame<'_>, array: JSObjectRef) -> Result<Value> {
    // SAFETY: array is live and tracked by an enclosing frame or its owner
    unsafe {
        let len = length(frame.ctx(), array)?;
        // Script-controlled length; a sparse array can claim 2^32 - 1 slots
        let mut items = Vec::new();
        items.try_reserve(len as usize).map_err(|_| {
            Error::conversion(format!("cannot allocate {} array elements", len))
        })?;
        for index in 0..len {
            let item = frame.track(element(frame.ctx(), array, index)?);
            items.push(convert(frame, item)?);
        }
        Ok(Value::Sequence(items))
    }
}

/// Own enumerable string-keyed properties, via `Object.keys`.
unsafe fn mapping(frame: &mut Frame<'_>, object: JSObjectRef) -> Result<Value> {
    let ctx = frame.ctx();
    // SAFETY: object is live; object_keys is pinned by the runtime
    unsafe {
        let mut exception: JSValueRef = ptr::null_mut();
        let argument: JSValueRef = object;
        let keys = JSObjectCallAsFunction(
            ctx,
            frame.runtime().object_keys(),
            ptr::null_mut(),
            1,
            &argument,
            &mut exception,
        );
        if !exception.is_null() {
            return Err(Error::Runtime(bridge::capture(ctx, &mut exception)));
        }
        let keys = frame.track(keys) as JSObjectRef;

        let len = length(ctx, keys)?;
        let mut entries = Mapping::with_capacity(len as usize);
        for index in 0..len {
            let key = frame.track(element(ctx, keys, index)?);
            let name = JscString::new(&string::value_to_string(ctx, key)?)?;

            let item = JSObjectGetProperty(ctx, object, name.raw(), &mut exception);
            if !exception.is_null() {
                return Err(Error::Runtime(bridge::capture(ctx, &mut exception)));
            }
            let item = frame.track(item);

            let value = convert(frame, item)?;
            let key = convert(frame, key)?;
            entries.insert(key, value);
        }
        Ok(Value::Mapping(entries))
    }
}

unsafe fn to_number(ctx: JSContextRef, value: JSValueRef) -> Result<f64> {
    let mut exception: JSValueRef = ptr::null_mut();
    // SAFETY: value is live per caller contract
    unsafe {
        let n = JSValueToNumber(ctx, value, &mut exception);
        if !exception.is_null() {
            return Err(Error::Runtime(bridge::capture(ctx, &mut exception)));
        }
        Ok(n)
    }
}

/// Reads and validates an array's `length`.
unsafe fn length(ctx: JSContextRef, array: JSObjectRef) -> Result<u32> {
    let key = JscString::new("length")?;
    let mut exception: JSValueRef = ptr::null_mut();
    // SAFETY: array is live per caller contract
    unsafe {
        let value = JSObjectGetProperty(ctx, array, key.raw(), &mut exception);
        if !exception.is_null() {
            return Err(Error::Runtime(bridge::capture(ctx, &mut exception)));
        }
        if JSValueGetType(ctx, value) != K_JS_TYPE_NUMBER {
            return Err(Error::conversion("array length is not a number"));
        }
        let n = to_number(ctx, value)?;
        if !(n.is_finite() && n >= 0.0 && n.fract() == 0.0 && n <= f64::from(u32::MAX)) {
            return Err(Error::conversion(format!("invalid array length {}", n)));
        }
        Ok(n as u32)
    }
}

unsafe fn element(ctx: JSContextRef, array: JSObjectRef, index: u32) -> Result<JSValueRef> {
    let mut exception: JSValueRef = ptr::null_mut();
    // SAFETY: array is live per caller contract
    unsafe {
        let value = JSObjectGetPropertyAtIndex(ctx, array, index, &mut exception);
        if !exception.is_null() {
            return Err(Error::Runtime(bridge::capture(ctx, &mut exception)));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InterpreterConfig;
    use crate::safe_call;
    use std::rc::Rc;

    fn eval_convert(rt: &Rc<Runtime>, source: &str) -> Result<Value> {
        let script = JscString::new(source).unwrap();
        safe_call::run(rt, |frame| unsafe {
            let mut exception: JSValueRef = ptr::null_mut();
            let value = JSEvaluateScript(
                frame.ctx(),
                script.raw(),
                ptr::null_mut(),
                ptr::null_mut(),
                1,
                &mut exception,
            );
            assert!(exception.is_null(), "script threw");
            let value = frame.track(value);
            convert(frame, value)
        })
    }

    #[test]
    fn oversized_sparse_array_is_conversion_error() {
        let rt = Runtime::new(InterpreterConfig::default()).unwrap();
        let result = eval_convert(&rt, "var a = []; a.length = 4294967295; a");
        assert!(matches!(result, Err(Error::Conversion(_))), "{:?}", result);
        assert_eq!(rt.stack_depth(), 0);
    }

    #[test]
    fn primitives() {
        let rt = Runtime::new(InterpreterConfig::default()).unwrap();
        assert_eq!(eval_convert(&rt, "undefined").unwrap(), Value::None);
        assert_eq!(eval_convert(&rt, "null").unwrap(), Value::None);
        assert_eq!(eval_convert(&rt, "true").unwrap(), Value::Bool(true));
        assert_eq!(eval_convert(&rt, "42").unwrap(), Value::Number(42.0));
        assert_eq!(eval_convert(&rt, "'a' + 'b'").unwrap(), Value::from("ab"));
    }

    #[test]
    fn integers_beyond_2_53_lose_precision() {
        let rt = Runtime::new(InterpreterConfig::default()).unwrap();
        let value = eval_convert(&rt, "9007199254740993").unwrap();
        assert_eq!(value, Value::Number(9007199254740992.0));
    }

    #[test]
    fn arrays_use_is_array_not_index_zero() {
        let rt = Runtime::new(InterpreterConfig::default()).unwrap();
        assert_eq!(eval_convert(&rt, "[]").unwrap(), Value::Sequence(vec![]));

        let object = eval_convert(&rt, "({0: 'a'})").unwrap();
        assert_eq!(object.as_mapping().unwrap().get("0"), Some(&Value::from("a")));

        let sparse = eval_convert(&rt, "[1, , 3]").unwrap();
        assert_eq!(
            sparse,
            Value::Sequence(vec![Value::Number(1.0), Value::None, Value::Number(3.0)])
        );
    }

    #[test]
    fn only_own_enumerable_keys() {
        let rt = Runtime::new(InterpreterConfig::default()).unwrap();
        let value = eval_convert(
            &rt,
            "var o = Object.create({inherited: 1}); o.own = 2; \
             Object.defineProperty(o, 'hidden', {value: 3, enumerable: false}); o",
        )
        .unwrap();
        let mapping = value.as_mapping().unwrap();
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.get("own"), Some(&Value::Number(2.0)));
    }

    #[test]
    fn symbols_are_unsupported() {
        let rt = Runtime::new(InterpreterConfig::default()).unwrap();
        assert!(matches!(
            eval_convert(&rt, "Symbol('s')"),
            Err(Error::UnsupportedType(kind)) if kind == "symbol"
        ));
    }

    #[test]
    fn throwing_getter_surfaces_runtime_error() {
        let rt = Runtime::new(InterpreterConfig::default()).unwrap();
        let result = eval_convert(&rt, "({get boom() { throw new RangeError('no'); }})");
        match result {
            Err(Error::Runtime(exc)) => assert_eq!(exc.summary(), "RangeError: no"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(rt.stack_depth(), 0);
    }
}
