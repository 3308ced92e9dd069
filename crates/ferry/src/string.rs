//! RAII wrapper for engine strings.
//!
//! Strings cross the boundary as UTF-16 code units with an explicit length,
//! so embedded NUL characters survive in both directions.

use ferry_jsc_sys::*;
use std::fmt;
use std::marker::PhantomData;
use std::ptr;

use crate::bridge;
use crate::error::{Error, Result};

/// Owned `JSStringRef`, released on drop.
pub struct JscString {
    raw: JSStringRef,
    _not_send: PhantomData<*mut ()>,
}

impl JscString {
    /// Creates an engine string from UTF-8 text.
    pub fn new(s: &str) -> Result<Self> {
        let units: Vec<JSChar> = s.encode_utf16().collect();
        // SAFETY: units is a valid buffer of units.len() code units; JSC copies it
        let raw = unsafe { JSStringCreateWithCharacters(units.as_ptr(), units.len()) };
        if raw.is_null() {
            return Err(Error::conversion("failed to allocate engine string"));
        }
        Ok(Self {
            raw,
            _not_send: PhantomData,
        })
    }

    /// Takes ownership of a string returned by a `*Copy` API.
    ///
    /// # Safety
    /// `raw` must be a valid string whose reference the caller owns.
    pub(crate) unsafe fn from_owned(raw: JSStringRef) -> Option<Self> {
        (!raw.is_null()).then_some(Self {
            raw,
            _not_send: PhantomData,
        })
    }

    pub fn raw(&self) -> JSStringRef {
        self.raw
    }

    /// Length in UTF-16 code units.
    pub fn len(&self) -> usize {
        // SAFETY: self.raw is valid for our lifetime
        unsafe { JSStringGetLength(self.raw) }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn units(&self) -> &[JSChar] {
        let len = self.len();
        if len == 0 {
            return &[];
        }
        // SAFETY: JSC guarantees len readable code units behind a non-empty string
        unsafe {
            let chars = JSStringGetCharactersPtr(self.raw);
            if chars.is_null() {
                return &[];
            }
            std::slice::from_raw_parts(chars, len)
        }
    }

    /// Decodes to UTF-8, replacing lone surrogates.
    pub fn to_rust_string(&self) -> String {
        String::from_utf16_lossy(self.units())
    }
}

impl Drop for JscString {
    fn drop(&mut self) {
        // SAFETY: we own exactly one reference
        unsafe { JSStringRelease(self.raw) };
    }
}

impl fmt::Display for JscString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rust_string())
    }
}

impl fmt::Debug for JscString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JscString({:?})", self.to_rust_string())
    }
}

/// Creates a string value in `ctx`.
///
/// # Safety
/// `ctx` must be a live context.
pub(crate) unsafe fn make_value(ctx: JSContextRef, s: &str) -> Result<JSValueRef> {
    let js_str = JscString::new(s)?;
    // SAFETY: ctx is live per caller contract; JSValueMakeString retains the string
    Ok(unsafe { JSValueMakeString(ctx, js_str.raw()) })
}

/// Stringifies any value the way `String(value)` would.
///
/// # Safety
/// `ctx` and `value` must be live.
pub(crate) unsafe fn value_to_string(ctx: JSContextRef, value: JSValueRef) -> Result<String> {
    let mut exception: JSValueRef = ptr::null_mut();
    // SAFETY: ctx and value are live per caller contract
    unsafe {
        let raw = JSValueToStringCopy(ctx, value, &mut exception);
        if !exception.is_null() {
            return Err(Error::Runtime(bridge::capture(ctx, &mut exception)));
        }
        JscString::from_owned(raw)
            .map(|s| s.to_rust_string())
            .ok_or_else(|| Error::conversion("engine returned no string"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_round_trip() {
        let s = JscString::new("hello").unwrap();
        assert_eq!(s.to_rust_string(), "hello");
        assert_eq!(s.len(), 5);
    }

    #[test]
    fn empty_string() {
        let s = JscString::new("").unwrap();
        assert!(s.is_empty());
        assert_eq!(s.to_string(), "");
    }

    #[test]
    fn embedded_nul_is_preserved() {
        let s = JscString::new("a\0b").unwrap();
        assert_eq!(s.len(), 3);
        assert_eq!(s.to_rust_string(), "a\0b");
    }

    #[test]
    fn length_counts_utf16_units() {
        let s = JscString::new("héllo 🦀").unwrap();
        assert_eq!(s.len(), "héllo 🦀".encode_utf16().count());
        assert_eq!(s.to_rust_string(), "héllo 🦀");
    }
}
