//! The trap boundary primitive.
//!
//! [enter_guarded_region] captures the current execution context, publishes it into a
//! [BoundaryHandle] and runs a body; [unwind_to_boundary] abandons every native frame between its
//! call site and the matching [enter_guarded_region], which then returns [TrapOutcome::Unwound].
//!
//! The capture itself is done by a small C helper (`boundary.c`) because "this call may return
//! twice" can't be expressed in Rust. From Rust's point of view the helper is an ordinary function
//! that returns exactly once, with an integer telling us which of its two exits it took: we turn
//! that into a [TrapOutcome] immediately and never hand the raw value out.
//!
//! Unwinding does not run destructors, `Drop` impls, or anything else belonging to the frames it
//! skips. Frames that can be on the stack between a body and an unwind must not own resources that
//! need cleaning up: register such cleanup explicitly via
//! [TrapContext::on_unwind](crate::TrapContext::on_unwind) instead.

use static_assertions::{assert_eq_size, assert_not_impl_any};
use std::{cell::Cell, ffi::c_void, marker::PhantomData, ptr};

// These must stay in sync with the `YKTRAP_*` defines in boundary.c.
const YKTRAP_UNWOUND: i32 = 0;
const YKTRAP_COMPLETED: i32 = 1;

extern "C" {
    fn __yktrap_enter(
        handle: *mut *const c_void,
        body: extern "C" fn(*mut c_void),
        payload: *mut c_void,
    ) -> i32;
    fn __yktrap_unwind(buf: *const c_void) -> !;
}

/// An opaque, platform-defined record of processor and stack state (instruction pointer, stack
/// pointer, callee-saved registers). Its storage lives in the frame of the capture primitive, so
/// it can only ever be referred to by pointer, and only while that frame is live.
#[repr(C)]
pub struct SavedContext {
    _data: [u8; 0],
    _marker: PhantomData<(*mut u8, std::marker::PhantomPinned)>,
}

/// The location a fault detector reads to find out where to unwind to.
///
/// A handle is "armed" while an [enter_guarded_region] call that was given it is live, and
/// "unarmed" otherwise. Handles are neither `Send` nor `Sync`: a boundary can only ever be unwound
/// to from the thread that established it.
#[repr(transparent)]
pub struct BoundaryHandle {
    ctx: Cell<*const SavedContext>,
}

assert_eq_size!(BoundaryHandle, *const u8);
assert_not_impl_any!(BoundaryHandle: Send, Sync);

impl BoundaryHandle {
    /// Create a new, unarmed, handle.
    pub const fn new() -> Self {
        Self {
            ctx: Cell::new(ptr::null()),
        }
    }

    /// Is a live boundary currently published in this handle?
    pub fn is_armed(&self) -> bool {
        !self.ctx.get().is_null()
    }

    /// The [SavedContext] currently published in this handle, or null if the handle is unarmed.
    pub fn saved_context(&self) -> *const SavedContext {
        self.ctx.get()
    }
}

impl Default for BoundaryHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// How an [enter_guarded_region] call ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrapOutcome {
    /// The body returned normally.
    Completed,
    /// Control was diverted back to the boundary by [unwind_to_boundary] before the body
    /// completed.
    Unwound,
}

/// Capture the current execution context, publish it into `handle`, and run `body(payload)`.
///
/// Returns [TrapOutcome::Completed] if `body` returns normally, or [TrapOutcome::Unwound] if
/// [unwind_to_boundary] was called on `handle` while `body` was running. Either way, when this
/// function returns `handle` holds whatever it held before the call: a handle that was unarmed
/// becomes unarmed again, and a handle shared with a still-live outer boundary points at that
/// outer boundary again.
///
/// `body` must not unwind (i.e. panic) out of itself: there is a C frame between it and us.
///
/// # Safety
///
/// Any frame that may be on the stack between `body` and a call to [unwind_to_boundary] will be
/// abandoned without being dropped: such frames must not own resources that need cleanup, and
/// must not be relied upon to restore any invariant on exit.
pub unsafe fn enter_guarded_region(
    handle: &BoundaryHandle,
    body: extern "C" fn(*mut c_void),
    payload: *mut c_void,
) -> TrapOutcome {
    let prev = handle.ctx.get();
    let r = unsafe { __yktrap_enter(handle.ctx.as_ptr().cast(), body, payload) };
    handle.ctx.set(prev);
    match r {
        YKTRAP_COMPLETED => TrapOutcome::Completed,
        YKTRAP_UNWOUND => TrapOutcome::Unwound,
        x => unreachable!("__yktrap_enter returned {x}"),
    }
}

/// Transfer control back to the live [enter_guarded_region] call whose context is published in
/// `handle`, causing it to return [TrapOutcome::Unwound]. Never returns.
///
/// No destructors or other cleanup are run for the frames between here and the boundary. This
/// function neither allocates nor takes locks, so it may be called from a signal handler. If
/// `handle` is unarmed, the process is aborted.
///
/// # Safety
///
/// The boundary published in `handle` must still be live (its [enter_guarded_region] call must
/// not have returned) and must have been established on the current thread. See also the safety
/// requirements of [enter_guarded_region].
pub unsafe fn unwind_to_boundary(handle: &BoundaryHandle) -> ! {
    let ctx = handle.ctx.get();
    if ctx.is_null() {
        // We may be inside a signal handler, where `abort` is one of the few things we can do.
        std::process::abort();
    }
    unsafe { __yktrap_unwind(ctx.cast()) }
}
