//! The per-thread pointer to the innermost live guarded call.
//!
//! Explicit [TrapContext](crate::TrapContext)s are the normal way of finding a boundary. This
//! exists for fault detectors, which run in a signal handler and have no way of being handed a
//! context. Everything in here must be async-signal-safe: the thread local has a `const`
//! initialiser, so accessing it never allocates.

use crate::context::Frame;
use std::{cell::Cell, ptr};

thread_local!(static INNERMOST: Cell<*const Frame> = const { Cell::new(ptr::null()) });

/// The innermost live frame on this thread, or null if there isn't one (or if the thread is being
/// torn down).
pub(crate) fn innermost() -> *const Frame {
    INNERMOST.try_with(|p| p.get()).unwrap_or(ptr::null())
}

/// Make `frame` the innermost live frame on this thread, returning the previous one. Once the
/// thread is being torn down this does nothing and returns null: guarded calls made from thread
/// local destructors still work, but are invisible to fault detectors.
pub(crate) fn replace(frame: *const Frame) -> *const Frame {
    INNERMOST
        .try_with(|p| p.replace(frame))
        .unwrap_or(ptr::null())
}
