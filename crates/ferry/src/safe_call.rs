//! Protected frames around engine work.
//!
//! A frame records the depth of the runtime's temporary stack on entry. Every
//! engine value created while the frame is open is tracked there, which keeps
//! it pinned while siblings are built. When the frame exits, by returning,
//! failing or panicking, the stack is cut back to its entry depth and every
//! tracked value is unpinned. A frame that yields a result hands back exactly
//! one owned pin for it.
//!
//! The engine reports failures through exception out-parameters, so a body
//! signals failure by returning `Err`. Host code can still abort abruptly by
//! panicking; the frame catches that so it never unwinds into the engine.

use ferry_jsc_sys::*;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use tracing::error;

use crate::bridge;
use crate::error::{Error, Result};
use crate::handle::ForeignRef;
use crate::proxy::host;
use crate::runtime::Runtime;

pub(crate) struct Frame<'rt> {
    rt: &'rt Rc<Runtime>,
    base: usize,
}

impl<'rt> Frame<'rt> {
    pub(crate) fn runtime(&self) -> &'rt Rc<Runtime> {
        self.rt
    }

    pub(crate) fn ctx(&self) -> JSContextRef {
        self.rt.ctx()
    }

    /// Pins `value` until the frame exits and returns it.
    ///
    /// # Safety
    /// `value` must be a live value of the frame's context.
    pub(crate) unsafe fn track(&mut self, value: JSValueRef) -> JSValueRef {
        // SAFETY: forwarded caller contract
        unsafe { self.rt.push(value) };
        value
    }

    /// Values tracked by this frame so far.
    pub(crate) fn tracked(&self) -> usize {
        self.rt.stack_depth().saturating_sub(self.base)
    }
}

/// Runs `body` in a protected frame, releasing everything it tracked.
pub(crate) fn run<T>(
    rt: &Rc<Runtime>,
    body: impl FnOnce(&mut Frame<'_>) -> Result<T>,
) -> Result<T> {
    if !host::in_finalizer() {
        rt.drain_deferred();
    }

    let base = rt.stack_depth();
    let _restore = scopeguard::guard((), |_| rt.truncate_stack(base));
    let mut frame = Frame { rt, base };

    match catch_unwind(AssertUnwindSafe(|| body(&mut frame))) {
        Ok(result) => result,
        Err(payload) => {
            let message = bridge::panic_message(payload.as_ref())
                .unwrap_or_else(|| "host code panicked with a non-string payload".into());
            error!(%message, "panic inside protected frame");
            Err(Error::Panic(message))
        }
    }
}

/// Like [`run`], but keeps one engine value alive past the frame.
///
/// The value `body` returns is pinned before the other tracked values are
/// released.
pub(crate) fn run_with_result<'rt>(
    rt: &'rt Rc<Runtime>,
    body: impl FnOnce(&mut Frame<'_>) -> Result<JSValueRef>,
) -> Result<ForeignRef<'rt>> {
    run(rt, |frame| {
        let value = body(frame)?;
        // SAFETY: body produced the value in this runtime's context
        Ok(unsafe { ForeignRef::new(rt, value) })
    })
}
