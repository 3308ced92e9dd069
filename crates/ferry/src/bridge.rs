//! Exception translation between the engine and the host

use ferry_jsc_sys::*;
use std::any::Any;
use std::ptr;

use crate::error::{Error, ForeignException};
use crate::string::{self, JscString};

/// Captures the pending engine exception and clears the slot.
///
/// # Safety
/// `ctx` must be live and `*exception` must be null or a value from `ctx`.
pub(crate) unsafe fn capture(ctx: JSContextRef, exception: &mut JSValueRef) -> ForeignException {
    let value = std::mem::replace(exception, ptr::null_mut());
    if value.is_null() {
        return ForeignException::plain("unknown engine exception");
    }

    // SAFETY: ctx and value are live per caller contract
    unsafe {
        if JSValueIsObject(ctx, value)
            && let Some(message) = string_property(ctx, value as JSObjectRef, "message")
        {
            let obj = value as JSObjectRef;
            let name = string_property(ctx, obj, "name").unwrap_or_else(|| "Error".into());
            let exc = ForeignException::structured(name, message);
            return match string_property(ctx, obj, "stack") {
                Some(stack) => exc.with_stack(stack),
                None => exc,
            };
        }

        let text = string::value_to_string(ctx, value)
            .unwrap_or_else(|_| "<exception could not be converted to a string>".into());
        ForeignException::plain(text)
    }
}

/// Builds the engine exception for a host failure.
///
/// The thrown value is an `Error` whose message is `"<kind>: <message>"`.
/// Without an error, `fallback` becomes the message.
///
/// # Safety
/// `ctx` must be live.
pub(crate) unsafe fn raise(ctx: JSContextRef, error: Option<&Error>, fallback: &str) -> JSValueRef {
    let text = match error {
        Some(error) => format!("{}: {}", error.kind_name(), error.message()),
        None => fallback.to_owned(),
    };

    // SAFETY: ctx is live per caller contract
    unsafe {
        let message = match string::make_value(ctx, &text) {
            Ok(message) => message,
            Err(_) => return JSValueMakeUndefined(ctx),
        };

        let mut exception: JSValueRef = ptr::null_mut();
        let error_object = JSObjectMakeError(ctx, 1, &message, &mut exception);
        if error_object.is_null() || !exception.is_null() {
            // Throw the bare string rather than nothing
            return message;
        }
        error_object
    }
}

/// Extracts the text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> Option<String> {
    if let Some(s) = payload.downcast_ref::<&str>() {
        Some((*s).to_owned())
    } else {
        payload.downcast_ref::<String>().cloned()
    }
}

/// Reads a property and stringifies it; `None` when missing, undefined or throwing.
unsafe fn string_property(ctx: JSContextRef, obj: JSObjectRef, name: &str) -> Option<String> {
    let key = JscString::new(name).ok()?;
    // SAFETY: ctx and obj are live per caller contract
    unsafe {
        let mut exception: JSValueRef = ptr::null_mut();
        let value = JSObjectGetProperty(ctx, obj, key.raw(), &mut exception);
        if !exception.is_null() || value.is_null() || JSValueIsUndefined(ctx, value) {
            return None;
        }
        string::value_to_string(ctx, value).ok()
    }
}
