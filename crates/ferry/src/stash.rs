//! Registry keeping engine values reachable between host calls.
//!
//! Entries live as properties of a single pinned table object, keyed by a
//! decimal id. Ids come from a process-wide counter and are never reused.
//! Id 0 is reserved for the interpreter's global object, which carries the
//! back-pointer to the interpreter state.

use ferry_jsc_sys::*;
use std::cell::Cell;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::bridge;
use crate::error::{Error, Result};
use crate::string::JscString;

pub type StashId = u64;

/// Slot holding the interpreter's own back-pointer.
pub const INTERPRETER_ID: StashId = 0;

static NEXT_ID: AtomicU64 = AtomicU64::new(INTERPRETER_ID + 1);

pub(crate) struct Stash {
    ctx: JSContextRef,
    table: JSObjectRef,
    len: Cell<usize>,
}

impl Stash {
    /// Wraps an already-pinned table object.
    ///
    /// # Safety
    /// `table` must be a plain object of `ctx` that stays pinned while the stash is used.
    pub(crate) unsafe fn new(ctx: JSContextRef, table: JSObjectRef) -> Self {
        Self {
            ctx,
            table,
            len: Cell::new(0),
        }
    }

    pub(crate) fn table(&self) -> JSObjectRef {
        self.table
    }

    /// Stores `value` under a fresh id.
    ///
    /// # Safety
    /// `value` must be a live value of the stash's context.
    pub(crate) unsafe fn put(&self, value: JSValueRef) -> Result<StashId> {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        // SAFETY: forwarded caller contract
        unsafe { self.put_at(id, value)? };
        Ok(id)
    }

    /// Stores `value` under a caller-chosen id.
    ///
    /// # Safety
    /// `value` must be a live value of the stash's context.
    pub(crate) unsafe fn put_at(&self, id: StashId, value: JSValueRef) -> Result<()> {
        let key = JscString::new(&id.to_string())?;
        let mut exception: JSValueRef = ptr::null_mut();
        // SAFETY: table is pinned and belongs to ctx
        unsafe {
            let existed = JSObjectHasProperty(self.ctx, self.table, key.raw());
            JSObjectSetProperty(
                self.ctx,
                self.table,
                key.raw(),
                value,
                K_JS_PROPERTY_ATTRIBUTE_NONE,
                &mut exception,
            );
            if !exception.is_null() {
                return Err(Error::Runtime(bridge::capture(self.ctx, &mut exception)));
            }
            if !existed {
                self.len.set(self.len.get() + 1);
            }
        }
        trace!(id, entries = self.len.get(), "stash insert");
        Ok(())
    }

    /// Looks up an entry.
    pub(crate) fn get(&self, id: StashId) -> Result<JSValueRef> {
        let key = JscString::new(&id.to_string())?;
        // SAFETY: table is pinned and belongs to ctx
        unsafe {
            if !JSObjectHasProperty(self.ctx, self.table, key.raw()) {
                return Err(Error::NotInitialized);
            }
            let mut exception: JSValueRef = ptr::null_mut();
            let value = JSObjectGetProperty(self.ctx, self.table, key.raw(), &mut exception);
            if !exception.is_null() {
                return Err(Error::Runtime(bridge::capture(self.ctx, &mut exception)));
            }
            Ok(value)
        }
    }

    pub(crate) fn contains(&self, id: StashId) -> bool {
        let Ok(key) = JscString::new(&id.to_string()) else {
            return false;
        };
        // SAFETY: table is pinned and belongs to ctx
        unsafe { JSObjectHasProperty(self.ctx, self.table, key.raw()) }
    }

    /// Drops an entry. Returns whether it was present.
    ///
    /// Must not be called while the engine is collecting garbage.
    pub(crate) fn remove(&self, id: StashId) -> bool {
        let Ok(key) = JscString::new(&id.to_string()) else {
            return false;
        };
        // SAFETY: table is pinned and belongs to ctx
        let removed = unsafe {
            if !JSObjectHasProperty(self.ctx, self.table, key.raw()) {
                return false;
            }
            let mut exception: JSValueRef = ptr::null_mut();
            JSObjectDeleteProperty(self.ctx, self.table, key.raw(), &mut exception)
                && exception.is_null()
        };
        if removed {
            self.len.set(self.len.get().saturating_sub(1));
            trace!(id, entries = self.len.get(), "stash remove");
        }
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.len.get()
    }
}
