//! Embed JavaScriptCore and move values and functions across the boundary.
//!
//! An [`Interpreter`] owns one engine context. Values cross as [`Value`]s:
//! primitives are copied, arrays and plain objects are converted
//! recursively, and functions become proxies in both directions. An engine
//! function handed to the host is a [`ForeignFunction`]; a host closure
//! handed to the engine is a [`HostFunction`]. Engine exceptions come back
//! as [`Error::Syntax`] or [`Error::Runtime`], and host errors are thrown
//! into the engine as JavaScript errors.
//!
//! # Example
//!
//! ```
//! use ferry::{HostFunction, Interpreter, Value};
//!
//! let interp = Interpreter::new().unwrap();
//! let double = HostFunction::new(|args| {
//!     let n = args.first().and_then(Value::as_number).unwrap_or(0.0);
//!     Ok(Value::from(n * 2.0))
//! });
//! interp.set_global("double", &Value::from(double)).unwrap();
//! assert_eq!(interp.evaluate("double(21)").unwrap(), Value::Number(42.0));
//!
//! let add = interp.evaluate("(a, b) => a + b").unwrap();
//! let add = add.as_callable().unwrap();
//! assert_eq!(add.call(&[Value::from(1), Value::from(2)]).unwrap(), Value::Number(3.0));
//! ```
//!
//! # Thread Safety
//!
//! Interpreters, values and proxies are `!Send` and `!Sync`. Host code runs
//! under a process-wide reentrant lock (see [`lock`]) that is released while
//! the engine executes, so separate threads may each drive their own
//! interpreter.
//!
//! ```compile_fail
//! use ferry::Interpreter;
//! use std::thread;
//!
//! let interp = Interpreter::new().unwrap();
//! thread::spawn(move || {
//!     interp.evaluate("1 + 1"); // Error: Interpreter is !Send
//! });
//! ```

mod bridge;
mod config;
mod convert;
mod error;
mod handle;
mod interpreter;
pub mod lock;
mod proxy;
mod runtime;
mod safe_call;
mod stash;
pub mod string;
mod value;

pub use config::InterpreterConfig;
pub use error::{Error, ForeignException, Result};
pub use handle::ForeignRef;
pub use interpreter::{Diagnostics, Interpreter};
pub use proxy::ForeignFunction;
pub use stash::{INTERPRETER_ID, StashId};
pub use string::JscString;
pub use value::{Callable, HostFunction, Mapping, Value};

// Re-export the raw bindings for direct FFI access when needed
pub use ferry_jsc_sys;
