//! Host functions exposed to the engine.
//!
//! A `HostFunction` becomes an object of the runtime's host-function class.
//! The object's private slot owns a boxed payload holding a clone of the
//! closure; the engine's finalizer frees it. The object's prototype is
//! `Function.prototype`, so `call`, `apply` and `bind` behave as for any
//! other function.
//!
//! The engine may finalize objects on a collector or timer thread. The
//! closure inside a payload is not thread-safe, so a payload finalized away
//! from the thread that created it is queued and freed there later.

use ferry_jsc_sys::*;
use std::cell::Cell;
use std::ffi::{CStr, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use tracing::{trace, warn};

use crate::bridge;
use crate::convert::{to_foreign, to_host};
use crate::error::{Error, Result};
use crate::lock;
use crate::runtime::Runtime;
use crate::safe_call::{self, Frame};
use crate::value::HostFunction;

thread_local! {
    static FINALIZING: Cell<usize> = const { Cell::new(0) };
}

/// Whether the current thread is inside an engine finalizer.
///
/// The engine must not be re-entered while it is collecting, so registry
/// removals requested from here are deferred.
pub(crate) fn in_finalizer() -> bool {
    FINALIZING.with(|depth| depth.get() > 0)
}

struct FinalizerScope;

impl FinalizerScope {
    fn enter() -> Self {
        FINALIZING.with(|depth| depth.set(depth.get() + 1));
        FinalizerScope
    }
}

impl Drop for FinalizerScope {
    fn drop(&mut self) {
        FINALIZING.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

pub(crate) struct Payload {
    function: HostFunction,
    live: Arc<AtomicUsize>,
    owner: ThreadId,
    orphans: Orphans,
}

impl Payload {
    fn new(function: HostFunction, live: Arc<AtomicUsize>, orphans: Orphans) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            function,
            live,
            owner: thread::current().id(),
            orphans,
        }
    }
}

/// A payload finalized on a foreign thread, waiting for its owner.
pub(crate) struct Orphan(*mut Payload);

// SAFETY: only the pointer travels; the payload is dereferenced and dropped
// exclusively on its owning thread
unsafe impl Send for Orphan {}

impl Orphan {
    fn into_raw(self) -> *mut Payload {
        self.0
    }
}

/// Payloads queued for release on the runtime's thread.
pub(crate) type Orphans = Arc<Mutex<Vec<Orphan>>>;

/// Frees payloads that were finalized on other threads.
///
/// Must run on the thread that owns the runtime, outside garbage collection.
pub(crate) fn drain_orphans(orphans: &Orphans) -> usize {
    let pending = std::mem::take(&mut *orphans.lock());
    if pending.is_empty() {
        return 0;
    }
    let _guard = lock::acquire();
    let count = pending.len();
    for orphan in pending {
        // SAFETY: queued by retire() after the engine dropped its last reference
        drop(unsafe { Box::from_raw(orphan.into_raw()) });
    }
    trace!(count, "released host functions finalized off-thread");
    count
}

impl Drop for Payload {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Class definition for host-function objects.
pub(crate) fn class_definition(name: &CStr) -> JSClassDefinition {
    JSClassDefinition {
        class_name: name.as_ptr(),
        call_as_function: Some(call_host_function),
        finalize: Some(finalize_host_function),
        ..JSClassDefinition::empty()
    }
}

/// Creates the engine-side object for `function` and tracks it in `frame`.
pub(crate) fn wrap(frame: &mut Frame<'_>, function: &HostFunction) -> Result<JSValueRef> {
    let rt = frame.runtime();
    let ctx = frame.ctx();
    let payload = Box::into_raw(Box::new(Payload::new(
        function.clone(),
        rt.host_function_counter().clone(),
        rt.orphans().clone(),
    )));

    // SAFETY: the class finalizer takes ownership of payload once the object exists
    unsafe {
        let object = JSObjectMake(ctx, rt.function_class(), payload as *mut c_void);
        if object.is_null() {
            drop(Box::from_raw(payload));
            return Err(Error::conversion("cannot allocate host function object"));
        }
        frame.track(object);
        JSObjectSetPrototype(ctx, object, rt.function_prototype());
        trace!(function = ?function, "host function exposed");
        Ok(object)
    }
}

/// Returns the closure behind a host-function object of this runtime.
///
/// # Safety
/// `value` must be a live value of `rt`'s context.
pub(crate) unsafe fn unwrap(rt: &Runtime, value: JSValueRef) -> Option<HostFunction> {
    // SAFETY: objects of function_class always carry a Payload or null
    unsafe {
        if !JSValueIsObjectOfClass(rt.ctx(), value, rt.function_class()) {
            return None;
        }
        let payload = JSObjectGetPrivate(value as JSObjectRef) as *const Payload;
        payload.as_ref().map(|payload| payload.function.clone())
    }
}

unsafe extern "C" fn call_host_function(
    ctx: JSContextRef,
    function: JSObjectRef,
    _this_object: JSObjectRef,
    argument_count: usize,
    arguments: *const JSValueRef,
    exception: *mut JSValueRef,
) -> JSValueRef {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: the engine passes a live context and argument vector
        unsafe { dispatch(ctx, function, argument_count, arguments) }
    }));

    // SAFETY: ctx is live for the duration of the callback
    unsafe {
        let thrown = match outcome {
            Ok(Ok(value)) => return value,
            Ok(Err(err)) => bridge::raise(ctx, Some(&err), "host function failed"),
            Err(_) => bridge::raise(ctx, None, "host function panicked"),
        };
        if !exception.is_null() {
            *exception = thrown;
        }
        JSValueMakeUndefined(ctx)
    }
}

unsafe fn dispatch(
    ctx: JSContextRef,
    function: JSObjectRef,
    argument_count: usize,
    arguments: *const JSValueRef,
) -> Result<JSValueRef> {
    // Engine-driven control flow may arrive without the host lock held
    let _guard = lock::acquire();

    // SAFETY: function is an object of the host-function class; its payload is live
    let host = unsafe {
        let payload = JSObjectGetPrivate(function) as *const Payload;
        payload
            .as_ref()
            .map(|payload| payload.function.clone())
            .ok_or(Error::NotInitialized)?
    };
    // SAFETY: ctx belongs to a runtime that is executing this call
    let rt = unsafe { Runtime::from_context(ctx) }.ok_or(Error::NotInitialized)?;
    let args: &[JSValueRef] = if argument_count == 0 || arguments.is_null() {
        &[]
    } else {
        // SAFETY: the engine guarantees argument_count readable values
        unsafe { std::slice::from_raw_parts(arguments, argument_count) }
    };

    let result = safe_call::run_with_result(&rt, |frame| {
        let mut converted = Vec::with_capacity(args.len());
        for &arg in args {
            // SAFETY: arguments are live values of ctx
            converted.push(unsafe { to_host::convert(frame, arg) }?);
        }
        let value = host.call(&converted)?;
        to_foreign::convert(frame, &value)
    })?;

    // Unpinned on return; the engine takes the value immediately
    Ok(result.raw())
}

unsafe extern "C" fn finalize_host_function(object: JSObjectRef) {
    // SAFETY: called once per object by the engine; the payload was boxed in wrap()
    let payload = unsafe { JSObjectGetPrivate(object) } as *mut Payload;
    if payload.is_null() {
        return;
    }

    // SAFETY: ownership of the payload passes to us exactly once
    let outcome = catch_unwind(AssertUnwindSafe(|| unsafe { retire(payload) }));
    if outcome.is_err() {
        warn!("host function destructor panicked during finalization");
    }
}

/// Drops a payload the engine no longer references, or queues it for its
/// owning thread when called from anywhere else.
///
/// # Safety
/// `payload` must come from `wrap` and must not be used again by the caller.
unsafe fn retire(payload: *mut Payload) {
    // SAFETY: owner and orphans are thread-safe; the closure is left alone here
    let (owner, orphans) = unsafe { ((*payload).owner, (*payload).orphans.clone()) };
    if thread::current().id() != owner {
        orphans.lock().push(Orphan(payload));
        trace!("host function finalized off its owning thread");
        return;
    }

    let _guard = lock::acquire();
    let _scope = FinalizerScope::enter();
    // SAFETY: forwarded caller contract; we are on the owning thread
    drop(unsafe { Box::from_raw(payload) });
    trace!("host function finalized");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InterpreterConfig;
    use crate::value::Value;
    use std::ptr;
    use std::rc::Rc;

    #[test]
    fn wrapped_function_is_callable_from_engine() {
        let rt = Runtime::new(InterpreterConfig::default()).unwrap();
        let double = HostFunction::new(|args| {
            Ok(Value::Number(args[0].as_number().unwrap_or(0.0) * 2.0))
        });

        let result = safe_call::run(&rt, |frame| {
            let object = wrap(frame, &double)?;
            let arg = unsafe { frame.track(JSValueMakeNumber(frame.ctx(), 21.0)) };
            let mut exception: JSValueRef = ptr::null_mut();
            let value = unsafe {
                JSObjectCallAsFunction(
                    frame.ctx(),
                    object,
                    ptr::null_mut(),
                    1,
                    &arg,
                    &mut exception,
                )
            };
            assert!(exception.is_null());
            Ok(unsafe { JSValueToNumber(frame.ctx(), value, ptr::null_mut()) })
        })
        .unwrap();
        assert_eq!(result, 42.0);
    }

    #[test]
    fn unwrap_returns_original_closure() {
        let rt = Runtime::new(InterpreterConfig::default()).unwrap();
        let f = HostFunction::new(|_| Ok(Value::None));
        safe_call::run(&rt, |frame| {
            let object = wrap(frame, &f)?;
            let back = unsafe { unwrap(&rt, object) }.unwrap();
            assert!(back.ptr_eq(&f));

            let plain = unsafe { JSValueMakeNumber(frame.ctx(), 1.0) };
            assert!(unsafe { unwrap(&rt, plain) }.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn payload_counter_tracks_live_objects() {
        let rt = Runtime::new(InterpreterConfig::default()).unwrap();
        let f = HostFunction::new(|_| Ok(Value::None));
        safe_call::run(&rt, |frame| {
            wrap(frame, &f)?;
            wrap(frame, &f)?;
            // Both objects are pinned by the frame, so neither can be finalized yet
            assert_eq!(rt.live_host_functions(), 2);
            Ok(())
        })
        .unwrap();
    }

    struct DropSentinel {
        dropped_on: Rc<Cell<Option<ThreadId>>>,
    }

    impl Drop for DropSentinel {
        fn drop(&mut self) {
            self.dropped_on.set(Some(thread::current().id()));
        }
    }

    #[test]
    fn payload_retired_off_thread_is_freed_by_owner() {
        let live = Arc::new(AtomicUsize::new(0));
        let orphans = Orphans::default();
        let dropped_on = Rc::new(Cell::new(None));
        let sentinel = DropSentinel {
            dropped_on: dropped_on.clone(),
        };
        let f = HostFunction::new(move |_| {
            let _ = &sentinel;
            Ok(Value::None)
        });
        let payload = Orphan(Box::into_raw(Box::new(Payload::new(
            f,
            live.clone(),
            orphans.clone(),
        ))));

        thread::spawn(move || unsafe { retire(payload.into_raw()) })
            .join()
            .unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 1);
        assert_eq!(dropped_on.get(), None);
        assert_eq!(orphans.lock().len(), 1);

        assert_eq!(drain_orphans(&orphans), 1);
        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert_eq!(dropped_on.get(), Some(thread::current().id()));
        assert_eq!(drain_orphans(&orphans), 0);
    }

    #[test]
    fn payload_retired_on_owner_is_freed_immediately() {
        let live = Arc::new(AtomicUsize::new(0));
        let orphans = Orphans::default();
        let payload = Box::into_raw(Box::new(Payload::new(
            HostFunction::new(|_| Ok(Value::None)),
            live.clone(),
            orphans.clone(),
        )));
        unsafe { retire(payload) };
        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert!(orphans.lock().is_empty());
    }

    #[test]
    fn finalizer_scope_nests() {
        assert!(!in_finalizer());
        {
            let _outer = FinalizerScope::enter();
            let _inner = FinalizerScope::enter();
            assert!(in_finalizer());
        }
        assert!(!in_finalizer());
    }
}
