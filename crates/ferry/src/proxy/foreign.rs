//! Engine functions exposed to the host.

use ferry_jsc_sys::*;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::ptr;
use std::rc::Rc;

use tracing::debug;

use crate::bridge;
use crate::convert::{to_foreign, to_host};
use crate::error::{Error, Result};
use crate::lock;
use crate::proxy::host;
use crate::runtime::Runtime;
use crate::safe_call::{self, Frame};
use crate::stash::StashId;
use crate::value::Value;

/// A callable handle on an engine function.
///
/// The function is pinned in its interpreter's registry for as long as any
/// clone of the handle is alive, or until [`ForeignFunction::release`]. The
/// handle keeps the interpreter's engine state alive, so it stays callable
/// after the `Interpreter` itself has been dropped.
#[derive(Clone)]
pub struct ForeignFunction {
    inner: Rc<Inner>,
}

struct Binding {
    rt: Rc<Runtime>,
    id: StashId,
}

struct Inner {
    binding: RefCell<Option<Binding>>,
    in_flight: Cell<usize>,
    release_requested: Cell<bool>,
}

impl ForeignFunction {
    /// Pins `function` in the frame's registry.
    ///
    /// # Safety
    /// `function` must be a live function object of the frame's context.
    pub(crate) unsafe fn wrap(frame: &mut Frame<'_>, function: JSObjectRef) -> Result<Self> {
        let rt = frame.runtime().clone();
        // SAFETY: forwarded caller contract
        let id = unsafe { rt.stash().put(function) }?;
        debug!(id, "foreign function pinned");
        Ok(Self {
            inner: Rc::new(Inner {
                binding: RefCell::new(Some(Binding { rt, id })),
                in_flight: Cell::new(0),
                release_requested: Cell::new(false),
            }),
        })
    }

    /// Calls the function with `args` converted to engine values.
    ///
    /// The host lock is released while the function runs and reacquired
    /// before the result is converted. There is no timeout: a function that
    /// never returns blocks the calling thread.
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        // Held before the binding is read so the runtime is never touched unlocked
        let mut guard = lock::acquire();
        let (rt, id) = match &*self.inner.binding.borrow() {
            Some(binding) if !self.inner.release_requested.get() => {
                (binding.rt.clone(), binding.id)
            }
            _ => return Err(Error::NotInitialized),
        };

        self.inner.in_flight.set(self.inner.in_flight.get() + 1);
        let _finish = scopeguard::guard(&self.inner, |inner| {
            inner.in_flight.set(inner.in_flight.get() - 1);
            if inner.in_flight.get() == 0 && inner.release_requested.get() {
                inner.unpin();
            }
        });

        safe_call::run(&rt, |frame| {
            let ctx = frame.ctx();
            // SAFETY: registry entries are live values of ctx
            let function = unsafe { frame.track(rt.stash().get(id)?) };

            let mut argv = Vec::with_capacity(args.len());
            for arg in args {
                argv.push(to_foreign::convert(frame, arg)?);
            }

            let mut exception: JSValueRef = ptr::null_mut();
            // SAFETY: function and argv are pinned by the frame
            let result = guard.suspend(|| unsafe {
                JSObjectCallAsFunction(
                    ctx,
                    function as JSObjectRef,
                    ptr::null_mut(),
                    argv.len(),
                    argv.as_ptr(),
                    &mut exception,
                )
            });

            // SAFETY: exception and result come from ctx
            unsafe {
                if !exception.is_null() {
                    return Err(Error::Runtime(bridge::capture(ctx, &mut exception)));
                }
                let result = frame.track(result);
                to_host::convert(frame, result)
            }
        })
    }

    /// Releases the pin now instead of on drop.
    ///
    /// Later calls fail with [`Error::NotInitialized`]. Releasing while a
    /// call through this handle is running takes effect when it returns.
    pub fn release(&self) {
        self.inner.release_requested.set(true);
        if self.inner.in_flight.get() == 0 {
            self.inner.unpin();
        }
    }

    pub fn is_released(&self) -> bool {
        self.inner.release_requested.get() || self.inner.binding.borrow().is_none()
    }

    /// Registry id of the pinned function, if still pinned.
    pub fn id(&self) -> Option<StashId> {
        self.inner.binding.borrow().as_ref().map(|binding| binding.id)
    }

    pub fn ptr_eq(&self, other: &ForeignFunction) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether the function lives in `rt`'s engine.
    pub(crate) fn belongs_to(&self, rt: &Runtime) -> bool {
        self.inner
            .binding
            .borrow()
            .as_ref()
            .is_some_and(|binding| ptr::eq(Rc::as_ptr(&binding.rt), rt))
    }
}

impl Inner {
    /// Removes the registry entry exactly once.
    fn unpin(&self) {
        let Some(Binding { rt, id }) = self.binding.borrow_mut().take() else {
            return;
        };

        let _guard = lock::acquire();
        if host::in_finalizer() {
            rt.defer_release(id);
        } else if rt.stash().remove(id) {
            debug!(id, "foreign function released");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.unpin();
    }
}

impl fmt::Debug for ForeignFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id() {
            Some(id) if !self.is_released() => write!(f, "ForeignFunction(#{})", id),
            _ => f.write_str("ForeignFunction(<released>)"),
        }
    }
}
