//! Function proxies in both directions.
//!
//! [`ForeignFunction`] lets the host call an engine function. Host closures
//! travel the other way through [`host`], which turns a `HostFunction` into a
//! native engine function object.

mod foreign;
pub(crate) mod host;

pub use foreign::ForeignFunction;
