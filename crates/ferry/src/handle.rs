//! Owned pins on engine values

use ferry_jsc_sys::*;
use std::fmt;

use crate::runtime::Runtime;

/// A value pinned with `JSValueProtect` for as long as the handle lives.
///
/// Each handle owns exactly one protect count and gives it back on drop.
/// The handle borrows its interpreter, so it cannot outlive the context.
pub struct ForeignRef<'rt> {
    rt: &'rt Runtime,
    value: JSValueRef,
}

impl<'rt> ForeignRef<'rt> {
    /// Pins `value`.
    ///
    /// # Safety
    /// `value` must be a live value of `rt`'s context.
    pub(crate) unsafe fn new(rt: &'rt Runtime, value: JSValueRef) -> Self {
        // SAFETY: value belongs to rt per caller contract
        unsafe { rt.protect(value) };
        Self { rt, value }
    }

    /// The pinned value. Valid while this handle exists.
    pub fn raw(&self) -> JSValueRef {
        self.value
    }

    /// Context the value belongs to.
    pub fn context(&self) -> JSContextRef {
        self.rt.ctx()
    }
}

impl Drop for ForeignRef<'_> {
    fn drop(&mut self) {
        // SAFETY: paired with the protect in new()
        unsafe { self.rt.unprotect(self.value) };
    }
}

impl fmt::Debug for ForeignRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ForeignRef({:p})", self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InterpreterConfig;

    #[test]
    fn pin_count_follows_handle_lifetime() {
        let rt = Runtime::new(InterpreterConfig::default()).unwrap();
        let baseline = rt.pinned_count();
        unsafe {
            let value = JSValueMakeNumber(rt.ctx(), 1.0);
            let first = ForeignRef::new(&rt, value);
            let second = ForeignRef::new(&rt, value);
            assert_eq!(rt.pinned_count(), baseline + 2);
            drop(first);
            assert_eq!(rt.pinned_count(), baseline + 1);
            drop(second);
        }
        assert_eq!(rt.pinned_count(), baseline);
    }
}
