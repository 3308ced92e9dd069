//! The embedding entry point.

use ferry_jsc_sys::*;
use std::ptr;
use std::rc::Rc;

use tracing::{debug, debug_span};

use crate::bridge;
use crate::config::InterpreterConfig;
use crate::convert::{to_foreign, to_host};
use crate::error::{Error, ForeignException, Result};
use crate::handle::ForeignRef;
use crate::lock;
use crate::proxy::{ForeignFunction, host};
use crate::runtime::Runtime;
use crate::safe_call;
use crate::string::JscString;
use crate::value::{HostFunction, Value};

/// Counters describing what an interpreter currently holds on to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diagnostics {
    /// Temporaries pinned by open safe-call frames.
    pub stack_depth: usize,
    /// Protect counts held by the binding, including frame temporaries and
    /// the interpreter's own bookkeeping objects.
    pub pinned_values: usize,
    /// Registry entries, including the reserved interpreter slot.
    pub stash_entries: usize,
    /// Host functions the engine has not finalized yet.
    pub host_functions: usize,
}

/// An embedded JavaScript engine instance.
///
/// Every call into or out of one interpreter is sequential. The type is
/// `!Send`; separate threads use separate interpreters.
///
/// ```
/// use ferry::{Interpreter, Value};
///
/// let interp = Interpreter::new().unwrap();
/// assert_eq!(interp.evaluate("6 * 7").unwrap(), Value::Number(42.0));
/// ```
pub struct Interpreter {
    rt: Rc<Runtime>,
}

impl Interpreter {
    /// Creates an interpreter with default settings.
    pub fn new() -> Result<Self> {
        Self::with_config(InterpreterConfig::default())
    }

    pub fn with_config(config: InterpreterConfig) -> Result<Self> {
        let _guard = lock::acquire();
        Ok(Self {
            rt: Runtime::new(config)?,
        })
    }

    pub fn config(&self) -> &InterpreterConfig {
        self.rt.config()
    }

    /// The underlying global context, for use with the raw bindings.
    pub fn context(&self) -> JSContextRef {
        self.rt.ctx()
    }

    /// Parses and runs `source` as top-level code and converts its completion value.
    ///
    /// Parse failures are [`Error::Syntax`]; exceptions thrown while running
    /// are [`Error::Runtime`]. The host lock is released while the engine runs.
    pub fn evaluate(&self, source: &str) -> Result<Value> {
        let config = self.rt.config();
        let span = debug_span!("evaluate", url = %config.source_url, len = source.len());
        let _enter = span.enter();

        let mut guard = lock::acquire();
        let script = JscString::new(source)?;
        let url = JscString::new(&config.source_url)?;

        safe_call::run(&self.rt, |frame| {
            let ctx = frame.ctx();
            let mut exception: JSValueRef = ptr::null_mut();

            if config.check_syntax {
                // SAFETY: ctx, script and url are live for the call
                let valid = guard.suspend(|| unsafe {
                    JSCheckScriptSyntax(
                        ctx,
                        script.raw(),
                        url.raw(),
                        config.starting_line,
                        &mut exception,
                    )
                });
                if !valid {
                    let exc = if exception.is_null() {
                        ForeignException::structured("SyntaxError", "invalid source")
                    } else {
                        // SAFETY: exception was produced by ctx
                        unsafe { bridge::capture(ctx, &mut exception) }
                    };
                    debug!(error = %exc.summary(), "syntax error");
                    return Err(Error::Syntax(exc));
                }
            }

            // SAFETY: ctx, script and url are live for the call
            let result = guard.suspend(|| unsafe {
                JSEvaluateScript(
                    ctx,
                    script.raw(),
                    ptr::null_mut(),
                    url.raw(),
                    config.starting_line,
                    &mut exception,
                )
            });

            // SAFETY: result and exception were produced by ctx
            unsafe {
                if !exception.is_null() {
                    return Err(Error::Runtime(bridge::capture(ctx, &mut exception)));
                }
                let result = frame.track(result);
                to_host::convert(frame, result)
            }
        })
    }

    /// Wraps an engine function so the host can call it.
    ///
    /// # Safety
    /// `function` must be a live value of this interpreter's context.
    pub unsafe fn wrap_foreign_function(&self, function: JSValueRef) -> Result<ForeignFunction> {
        let _guard = lock::acquire();
        safe_call::run(&self.rt, |frame| {
            // SAFETY: function is live per caller contract
            unsafe {
                let function = frame.track(function);
                if host::unwrap(&self.rt, function).is_some()
                    || !JSValueIsObject(frame.ctx(), function)
                    || !JSObjectIsFunction(frame.ctx(), function as JSObjectRef)
                {
                    return Err(Error::unsupported_type("not an engine function"));
                }
                ForeignFunction::wrap(frame, function as JSObjectRef)
            }
        })
    }

    /// Exposes a host function to the engine, returning the pinned function object.
    pub fn wrap_host_function(&self, function: &HostFunction) -> Result<ForeignRef<'_>> {
        let _guard = lock::acquire();
        safe_call::run_with_result(&self.rt, |frame| host::wrap(frame, function))
    }

    /// Converts `value` and stores it as a global variable.
    pub fn set_global(&self, name: &str, value: &Value) -> Result<()> {
        let _guard = lock::acquire();
        let key = JscString::new(name)?;
        safe_call::run(&self.rt, |frame| {
            let raw = to_foreign::convert(frame, value)?;
            let ctx = frame.ctx();
            let mut exception: JSValueRef = ptr::null_mut();
            // SAFETY: raw is tracked by the frame; the global object lives as long as ctx
            unsafe {
                JSObjectSetProperty(
                    ctx,
                    JSContextGetGlobalObject(ctx),
                    key.raw(),
                    raw,
                    K_JS_PROPERTY_ATTRIBUTE_NONE,
                    &mut exception,
                );
                if !exception.is_null() {
                    return Err(Error::Runtime(bridge::capture(ctx, &mut exception)));
                }
            }
            Ok(())
        })
    }

    /// Reads and converts a global variable; missing globals are `None`.
    pub fn get_global(&self, name: &str) -> Result<Value> {
        let _guard = lock::acquire();
        let key = JscString::new(name)?;
        safe_call::run(&self.rt, |frame| {
            let ctx = frame.ctx();
            let mut exception: JSValueRef = ptr::null_mut();
            // SAFETY: the global object lives as long as ctx
            unsafe {
                let value = JSObjectGetProperty(
                    ctx,
                    JSContextGetGlobalObject(ctx),
                    key.raw(),
                    &mut exception,
                );
                if !exception.is_null() {
                    return Err(Error::Runtime(bridge::capture(ctx, &mut exception)));
                }
                let value = frame.track(value);
                to_host::convert(frame, value)
            }
        })
    }

    /// Runs a full engine collection and any registry releases it deferred.
    pub fn collect_garbage(&self) {
        let _guard = lock::acquire();
        self.rt.collect_garbage();
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            stack_depth: self.rt.stack_depth(),
            pinned_values: self.rt.pinned_count(),
            stash_entries: self.rt.stash().len(),
            host_functions: self.rt.live_host_functions(),
        }
    }
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("context", &self.rt.ctx())
            .field("diagnostics", &self.diagnostics())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_interpreter_diagnostics() {
        let interp = Interpreter::new().unwrap();
        let diagnostics = interp.diagnostics();
        assert_eq!(diagnostics.stack_depth, 0);
        assert_eq!(diagnostics.stash_entries, 1);
        assert_eq!(diagnostics.pinned_values, 3);
    }

    #[test]
    fn syntax_check_can_be_disabled() {
        let interp =
            Interpreter::with_config(InterpreterConfig::default().with_check_syntax(false))
                .unwrap();
        match interp.evaluate("var = ;") {
            Err(Error::Runtime(exc)) => assert_eq!(exc.name.as_deref(), Some("SyntaxError")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn source_url_appears_in_stack() {
        let interp =
            Interpreter::with_config(InterpreterConfig::default().with_source_url("app.js"))
                .unwrap();
        let err = interp
            .evaluate("function f() { throw new Error('x'); }\nf()")
            .unwrap_err();
        let stack = err.foreign_exception().and_then(|exc| exc.stack.clone());
        assert!(stack.is_some_and(|stack| stack.contains("app.js")));
    }

    #[test]
    fn wrap_foreign_function_rejects_non_functions() {
        let interp = Interpreter::new().unwrap();
        let number = unsafe { JSValueMakeNumber(interp.context(), 1.0) };
        let result = unsafe { interp.wrap_foreign_function(number) };
        assert!(matches!(result, Err(Error::UnsupportedType(_))));
    }

    #[test]
    fn wrap_host_function_returns_callable_object() {
        let interp = Interpreter::new().unwrap();
        let f = HostFunction::new(|_| Ok(Value::from("hi")));
        let object = interp.wrap_host_function(&f).unwrap();
        let ctx = object.context();
        unsafe {
            assert!(JSObjectIsFunction(ctx, object.raw()));
            let mut exception: JSValueRef = ptr::null_mut();
            let result = JSObjectCallAsFunction(
                ctx,
                object.raw(),
                ptr::null_mut(),
                0,
                ptr::null(),
                &mut exception,
            );
            assert!(exception.is_null());
            let s = crate::string::value_to_string(ctx, result).unwrap();
            assert_eq!(s, "hi");
        }
    }
}
