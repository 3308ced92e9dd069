//! Engine state owned by one interpreter.
//!
//! `Runtime` owns the global context, the classes registered for it, the
//! reference registry and the frame stack of pinned temporaries. It lives in an
//! `Rc` shared by the `Interpreter` and every `ForeignFunction` created from
//! it, so the context outlives all proxies. The global object's private slot
//! points back at the `Runtime` so engine callbacks can find it.

use ferry_jsc_sys::*;
use parking_lot::Mutex;
use std::cell::{Cell, RefCell};
use std::ffi::{CString, c_void};
use std::marker::PhantomData;
use std::ptr;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, trace};

use crate::bridge;
use crate::config::InterpreterConfig;
use crate::error::{Error, Result};
use crate::proxy::host;
use crate::stash::{INTERPRETER_ID, Stash, StashId};
use crate::string::JscString;

/// Engine initialization is not fully thread-safe; context creation is serialized.
static CONTEXT_CREATION_LOCK: Mutex<()> = Mutex::new(());

const GLOBAL_CLASS_NAME: &std::ffi::CStr = c"Interpreter";

pub(crate) struct Runtime {
    ctx: JSGlobalContextRef,
    global_class: JSClassRef,
    function_class: JSClassRef,
    stash: Stash,
    object_keys: JSObjectRef,
    function_prototype: JSValueRef,
    /// Temporaries pinned by open safe-call frames.
    stack: RefCell<Vec<JSValueRef>>,
    pins: Cell<usize>,
    host_functions: Arc<AtomicUsize>,
    /// Host-function payloads finalized on other threads.
    orphans: host::Orphans,
    deferred: RefCell<Vec<StashId>>,
    config: InterpreterConfig,
    _not_send: PhantomData<*mut ()>,
}

impl Runtime {
    pub(crate) fn new(config: InterpreterConfig) -> Result<Rc<Self>> {
        let _guard = CONTEXT_CREATION_LOCK.lock();

        let function_class_name = CString::new(config.host_function_class.as_str())
            .map_err(|e| Error::Init(format!("invalid host function class name: {}", e)))?;

        // SAFETY: JSClassCreate copies the definition, including the class name
        unsafe {
            let global_class = JSClassCreate(&JSClassDefinition {
                class_name: GLOBAL_CLASS_NAME.as_ptr(),
                ..JSClassDefinition::empty()
            });
            if global_class.is_null() {
                return Err(Error::Init("JSClassCreate returned null".into()));
            }

            let function_class = JSClassCreate(&host::class_definition(&function_class_name));
            if function_class.is_null() {
                JSClassRelease(global_class);
                return Err(Error::Init("JSClassCreate returned null".into()));
            }

            let ctx = JSGlobalContextCreate(global_class);
            if ctx.is_null() {
                JSClassRelease(function_class);
                JSClassRelease(global_class);
                return Err(Error::Init("JSGlobalContextCreate returned null".into()));
            }

            // From here on Drop tears down whatever was set up
            let mut rt = Runtime {
                ctx,
                global_class,
                function_class,
                stash: Stash::new(ctx, ptr::null_mut()),
                object_keys: ptr::null_mut(),
                function_prototype: ptr::null_mut(),
                stack: RefCell::new(Vec::new()),
                pins: Cell::new(0),
                host_functions: Arc::new(AtomicUsize::new(0)),
                orphans: host::Orphans::default(),
                deferred: RefCell::new(Vec::new()),
                config,
                _not_send: PhantomData,
            };

            let table = JSObjectMake(ctx, ptr::null_mut(), ptr::null_mut());
            if table.is_null() {
                return Err(Error::Init("cannot allocate reference registry".into()));
            }
            // Lookups must not see ids inherited from Object.prototype
            JSObjectSetPrototype(ctx, table, JSValueMakeNull(ctx));
            rt.protect(table);
            rt.stash = Stash::new(ctx, table);

            let global = JSContextGetGlobalObject(ctx);
            let object_ctor = rt.intrinsic(global, "Object")?;
            let object_keys = rt.intrinsic(object_ctor, "keys")?;
            rt.protect(object_keys);
            rt.object_keys = object_keys;

            let function_ctor = rt.intrinsic(global, "Function")?;
            let function_prototype = rt.intrinsic(function_ctor, "prototype")?;
            rt.protect(function_prototype);
            rt.function_prototype = function_prototype;

            let rt = Rc::new(rt);
            if !JSObjectSetPrivate(global, Rc::as_ptr(&rt) as *mut c_void) {
                return Err(Error::Init("global object has no private slot".into()));
            }
            rt.stash.put_at(INTERPRETER_ID, global)?;

            debug!(context = ?ctx, "interpreter created");
            Ok(rt)
        }
    }

    /// Reads a built-in object during setup.
    unsafe fn intrinsic(&self, holder: JSObjectRef, name: &str) -> Result<JSObjectRef> {
        let key = JscString::new(name)?;
        let mut exception: JSValueRef = ptr::null_mut();
        // SAFETY: holder belongs to self.ctx
        unsafe {
            let value = JSObjectGetProperty(self.ctx, holder, key.raw(), &mut exception);
            if !exception.is_null() {
                let exc = bridge::capture(self.ctx, &mut exception);
                return Err(Error::Init(format!("cannot read {}: {}", name, exc)));
            }
            if value.is_null() || !JSValueIsObject(self.ctx, value) {
                return Err(Error::Init(format!("built-in {} is missing", name)));
            }
            Ok(value as JSObjectRef)
        }
    }

    /// Recovers the runtime behind a context handed to an engine callback.
    ///
    /// # Safety
    /// `ctx` must belong to a context created by `Runtime::new` that is still alive.
    pub(crate) unsafe fn from_context(ctx: JSContextRef) -> Option<Rc<Runtime>> {
        // SAFETY: the global private slot holds Rc::as_ptr of a live runtime or null
        unsafe {
            let global = JSContextGetGlobalObject(ctx);
            let raw = JSObjectGetPrivate(global) as *const Runtime;
            if raw.is_null() {
                return None;
            }
            Rc::increment_strong_count(raw);
            Some(Rc::from_raw(raw))
        }
    }

    pub(crate) fn ctx(&self) -> JSContextRef {
        self.ctx
    }

    pub(crate) fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    pub(crate) fn stash(&self) -> &Stash {
        &self.stash
    }

    pub(crate) fn function_class(&self) -> JSClassRef {
        self.function_class
    }

    /// `Object.keys`, pinned for the runtime's lifetime.
    pub(crate) fn object_keys(&self) -> JSObjectRef {
        self.object_keys
    }

    /// `Function.prototype`, pinned for the runtime's lifetime.
    pub(crate) fn function_prototype(&self) -> JSValueRef {
        self.function_prototype
    }

    pub(crate) fn host_function_counter(&self) -> &Arc<AtomicUsize> {
        &self.host_functions
    }

    pub(crate) fn orphans(&self) -> &host::Orphans {
        &self.orphans
    }

    pub(crate) fn live_host_functions(&self) -> usize {
        self.host_functions.load(Ordering::SeqCst)
    }

    /// # Safety
    /// `value` must be a live value of this context.
    pub(crate) unsafe fn protect(&self, value: JSValueRef) {
        // SAFETY: forwarded caller contract
        unsafe { JSValueProtect(self.ctx, value) };
        self.pins.set(self.pins.get() + 1);
    }

    /// # Safety
    /// Must pair with an earlier `protect` of the same value.
    pub(crate) unsafe fn unprotect(&self, value: JSValueRef) {
        // SAFETY: forwarded caller contract
        unsafe { JSValueUnprotect(self.ctx, value) };
        self.pins.set(self.pins.get().saturating_sub(1));
    }

    /// Protect counts currently held by this binding.
    pub(crate) fn pinned_count(&self) -> usize {
        self.pins.get()
    }

    /// Pins a temporary on the frame stack.
    ///
    /// # Safety
    /// `value` must be a live value of this context.
    pub(crate) unsafe fn push(&self, value: JSValueRef) {
        // SAFETY: forwarded caller contract
        unsafe { self.protect(value) };
        self.stack.borrow_mut().push(value);
    }

    pub(crate) fn stack_depth(&self) -> usize {
        self.stack.borrow().len()
    }

    /// Unpins every temporary above `depth`.
    pub(crate) fn truncate_stack(&self, depth: usize) {
        let released: Vec<JSValueRef> = {
            let mut stack = self.stack.borrow_mut();
            if stack.len() <= depth {
                return;
            }
            stack.drain(depth..).collect()
        };
        for value in released {
            // SAFETY: every stack slot was protected by push()
            unsafe { self.unprotect(value) };
        }
    }

    /// Queues a registry removal that cannot run right now.
    pub(crate) fn defer_release(&self, id: StashId) {
        trace!(id, "deferring stash release");
        self.deferred.borrow_mut().push(id);
    }

    /// Performs queued registry removals and frees host functions finalized
    /// off-thread. Call only outside garbage collection.
    pub(crate) fn drain_deferred(&self) {
        host::drain_orphans(&self.orphans);
        let pending = std::mem::take(&mut *self.deferred.borrow_mut());
        for id in pending {
            self.stash.remove(id);
        }
    }

    pub(crate) fn collect_garbage(&self) {
        // SAFETY: ctx is live and no collection is in progress on this thread
        unsafe { JSSynchronousGarbageCollectForDebugging(self.ctx) };
        self.drain_deferred();
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // SAFETY: all handles below were created by Runtime::new for this context
        unsafe {
            let global = JSContextGetGlobalObject(self.ctx);
            JSObjectSetPrivate(global, ptr::null_mut());

            self.truncate_stack(0);
            self.deferred.borrow_mut().clear();
            for value in [
                self.function_prototype,
                self.object_keys,
                self.stash.table(),
            ] {
                if !value.is_null() {
                    self.unprotect(value);
                }
            }

            // Host function finalizers run here and take the host lock themselves
            JSGlobalContextRelease(self.ctx);
            JSClassRelease(self.function_class);
            JSClassRelease(self.global_class);
        }
        host::drain_orphans(&self.orphans);
        debug!(
            live_host_functions = self.host_functions.load(Ordering::SeqCst),
            "interpreter dropped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_runtime_with_back_pointer() {
        let rt = Runtime::new(InterpreterConfig::default()).unwrap();
        let found = unsafe { Runtime::from_context(rt.ctx()) }.unwrap();
        assert!(Rc::ptr_eq(&rt, &found));
        assert_eq!(Rc::strong_count(&rt), 2);
        drop(found);
        assert_eq!(Rc::strong_count(&rt), 1);
    }

    #[test]
    fn setup_pins_registry_and_intrinsics() {
        let rt = Runtime::new(InterpreterConfig::default()).unwrap();
        assert_eq!(rt.pinned_count(), 3);
        assert_eq!(rt.stack_depth(), 0);
        unsafe {
            assert!(JSObjectIsFunction(rt.ctx(), rt.object_keys()));
            assert!(JSValueIsObject(rt.ctx(), rt.function_prototype()));
        }
    }

    #[test]
    fn truncate_releases_pins_above_depth() {
        let rt = Runtime::new(InterpreterConfig::default()).unwrap();
        let baseline = rt.pinned_count();
        unsafe {
            rt.push(JSValueMakeNumber(rt.ctx(), 1.0));
            rt.push(JSValueMakeNumber(rt.ctx(), 2.0));
            rt.push(JSValueMakeNumber(rt.ctx(), 3.0));
        }
        rt.truncate_stack(1);
        assert_eq!(rt.stack_depth(), 1);
        assert_eq!(rt.pinned_count(), baseline + 1);
        rt.truncate_stack(0);
        assert_eq!(rt.pinned_count(), baseline);
    }

    #[test]
    fn registry_table_has_no_prototype() {
        let rt = Runtime::new(InterpreterConfig::default()).unwrap();
        unsafe {
            let proto = JSObjectGetPrototype(rt.ctx(), rt.stash().table());
            assert!(JSValueIsNull(rt.ctx(), proto));
        }
    }

    #[test]
    fn invalid_class_name_is_init_error() {
        let config = InterpreterConfig::default().with_host_function_class("bad\0name");
        assert!(matches!(Runtime::new(config), Err(Error::Init(_))));
    }
}
