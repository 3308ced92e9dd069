//! Value conversion between the host and the engine.
//!
//! Both directions dispatch with a single match over a closed set of kinds
//! and recurse into containers. Every engine value created or visited along
//! the way is tracked in the caller's safe-call frame, so an error part way
//! through a container releases everything built so far.

pub(crate) mod to_foreign;
pub(crate) mod to_host;
