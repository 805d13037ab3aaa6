//! Per-thread execution contexts: the stack of live guarded calls, and the side channel through
//! which whoever triggers an unwind tells the boundary why.
//!
//! Each guarded call pushes a [Frame] which lives on the native stack of [TrapContext::guard] for
//! exactly as long as the call's boundary is live. Frames are linked together twice: once per
//! context (so that [TrapContext::raise] always targets that context's innermost boundary) and
//! once per thread (so that [handle_fault], which can't be handed a context, always targets the
//! thread's innermost boundary). Since a trap only ever targets the innermost frame, unwinding
//! never skips over a frame that would then be left dangling.

use crate::{
    boundary::{self, BoundaryHandle, TrapOutcome},
    log::{Log, Verbosity},
    tls,
    trap::{Trap, TrapCode},
};
use static_assertions::assert_not_impl_any;
use std::{
    any::Any,
    cell::{Cell, RefCell},
    ffi::c_void,
    marker::PhantomData,
    mem,
    panic::{self, AssertUnwindSafe},
    ptr,
    rc::Rc,
};

/// Why a frame's guarded call didn't complete.
enum UnwindReason {
    /// [TrapContext::raise].
    Trap(Trap),
    /// [handle_fault]. Kept separate from `Trap` so that recording it never allocates.
    Fault { pc: usize, code: TrapCode },
    /// The body panicked. The panic is resumed once we're back on the host side of the boundary.
    Panic(Box<dyn Any + Send>),
}

/// A live guarded call.
pub(crate) struct Frame {
    handle: BoundaryHandle,
    reason: Cell<Option<UnwindReason>>,
    /// Set while a fault detector is handling a fault targeting this frame.
    handling_fault: Cell<bool>,
    /// Cleanups registered with [TrapContext::on_unwind].
    cleanups: RefCell<Vec<Box<dyn FnOnce()>>>,
    /// This context's innermost frame before this one was pushed.
    ctx_prev: *const Frame,
    /// This thread's innermost frame before this one was pushed.
    thread_prev: *const Frame,
}

impl Frame {
    fn new(ctx_prev: *const Frame, thread_prev: *const Frame) -> Self {
        Frame {
            handle: BoundaryHandle::new(),
            reason: Cell::new(None),
            handling_fault: Cell::new(false),
            cleanups: RefCell::new(Vec::new()),
            ctx_prev,
            thread_prev,
        }
    }

    /// Record why we're about to unwind this frame, dropping any previously recorded reason.
    fn set_reason(&self, reason: UnwindReason) {
        drop(self.reason.replace(Some(reason)));
    }

    /// As [Frame::set_reason], but a previously recorded reason is leaked rather than dropped, so
    /// this is safe to call from a fault detector.
    fn set_fault_reason(&self, pc: usize, code: TrapCode) {
        if let Some(old) = self.reason.replace(Some(UnwindReason::Fault { pc, code })) {
            mem::forget(old);
        }
    }
}

/// Counts of what has happened to a [TrapContext]'s guarded calls.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TrapStats {
    /// Guarded calls whose body started running.
    pub entered: usize,
    /// Guarded calls whose body returned normally.
    pub completed: usize,
    /// Guarded calls that were unwound by a trap.
    pub trapped: usize,
    /// Guarded calls whose body panicked.
    pub panicked: usize,
    /// Guarded calls refused because too many were already live.
    pub rejected: usize,
}

struct TrapContextInner {
    max_nesting: usize,
    /// How many frames of this context are live?
    depth: Cell<usize>,
    /// This context's innermost live frame, or null.
    top: Cell<*const Frame>,
    stats: Cell<TrapStats>,
    log: Log,
}

impl TrapContextInner {
    fn bump(&self, f: impl FnOnce(&mut TrapStats)) {
        let mut s = self.stats.get();
        f(&mut s);
        self.stats.set(s);
    }
}

/// A thread's view of guarded execution. A runtime creates one of these (via
/// [TrapContextBuilder](crate::TrapContextBuilder)) per thread that runs guest code and runs guest
/// calls through [TrapContext::guard].
///
/// This is conceptually a front-end akin to an `Rc`: it can be freely `clone()`d without
/// duplicating the underlying state. It is neither `Send` nor `Sync`: boundaries can only be
/// unwound to from the thread that established them.
#[derive(Clone)]
pub struct TrapContext {
    inner: Rc<TrapContextInner>,
    // Raw pointers are neither send nor sync.
    _dont_send_or_sync_me: PhantomData<*mut ()>,
}

assert_not_impl_any!(TrapContext: Send, Sync);

/// What [TrapContext::guard] hands to [call_body] through the C boundary.
struct Payload<F, R> {
    frame: *const Frame,
    f: Option<F>,
    result: Option<R>,
}

/// Run the closure in a [Payload]. Panics are caught here, as they can't unwind through the C
/// frame that called us: they're recorded in the frame and resumed on the other side.
extern "C" fn call_body<F, R>(payload: *mut c_void)
where
    F: FnOnce() -> R,
{
    let payload = unsafe { &mut *(payload as *mut Payload<F, R>) };
    if let Some(f) = payload.f.take() {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(r) => payload.result = Some(r),
            Err(e) => unsafe { &*payload.frame }.set_reason(UnwindReason::Panic(e)),
        }
    }
}

impl TrapContext {
    pub(crate) fn new(max_nesting: usize, log: Log) -> Self {
        Self {
            inner: Rc::new(TrapContextInner {
                max_nesting,
                depth: Cell::new(0),
                top: Cell::new(ptr::null()),
                stats: Cell::new(TrapStats::default()),
                log,
            }),
            _dont_send_or_sync_me: PhantomData,
        }
    }

    /// Run `f` under a new trap boundary.
    ///
    /// Returns `Ok` with `f`'s result if it returns normally, or `Err` if a trap was raised (via
    /// [TrapContext::raise] or [handle_fault]) while this was the innermost live guarded call. If
    /// `f` panics, the panic is resumed once control is back outside the boundary. Cleanups
    /// registered with [TrapContext::on_unwind] during `f` are run, most recently registered
    /// first, if `f` traps or panics, and are discarded unrun if it completes.
    ///
    /// If this context already has its maximum number of live guarded calls, `f` is not run and
    /// [TrapCode::StackOverflow] is returned.
    ///
    /// # Safety
    ///
    /// If `f` traps, none of the frames between the trap and this call are dropped: this includes
    /// `f` itself (and anything it captured by value) and every function it has called that has
    /// not yet returned. Such frames must not own anything that needs dropping. Use
    /// [TrapContext::on_unwind] for cleanup that must happen.
    pub unsafe fn guard<F, R>(&self, f: F) -> Result<R, Trap>
    where
        F: FnOnce() -> R,
    {
        let inner = &*self.inner;
        let depth = inner.depth.get();
        if depth >= inner.max_nesting {
            inner.bump(|s| s.rejected += 1);
            if inner.log.enabled(Verbosity::Warning) {
                inner.log.log(
                    Verbosity::Warning,
                    &format!(
                        "guarded call rejected: {depth} boundaries already live (maximum {})",
                        inner.max_nesting
                    ),
                );
            }
            return Err(Trap::Runtime(TrapCode::StackOverflow));
        }

        let frame = Frame::new(inner.top.get(), tls::innermost());
        let n = depth + 1;
        inner.top.set(&frame);
        tls::replace(&frame);
        inner.depth.set(n);
        inner.bump(|s| s.entered += 1);
        if inner.log.enabled(Verbosity::Boundary) {
            inner
                .log
                .log(Verbosity::Boundary, &format!("entering boundary {n}"));
        }

        let mut payload = Payload {
            frame: &frame,
            f: Some(f),
            result: None,
        };
        let outcome = unsafe {
            boundary::enter_guarded_region(
                &frame.handle,
                call_body::<F, R>,
                &mut payload as *mut Payload<F, R> as *mut c_void,
            )
        };

        inner.depth.set(depth);
        tls::replace(frame.thread_prev);
        inner.top.set(frame.ctx_prev);

        let cleanups = frame.cleanups.take();
        match (outcome, frame.reason.take()) {
            (TrapOutcome::Completed, None) => {
                inner.bump(|s| s.completed += 1);
                if inner.log.enabled(Verbosity::Boundary) {
                    inner.log.log(
                        Verbosity::Boundary,
                        &format!("leaving boundary {n}: completed"),
                    );
                }
                drop(cleanups);
                match payload.result.take() {
                    Some(r) => Ok(r),
                    None => unreachable!(),
                }
            }
            (TrapOutcome::Completed, Some(UnwindReason::Panic(e))) => {
                inner.bump(|s| s.panicked += 1);
                if inner.log.enabled(Verbosity::Unwind) {
                    inner.log.log(
                        Verbosity::Unwind,
                        &format!("leaving boundary {n}: guarded call panicked"),
                    );
                }
                run_cleanups(cleanups);
                panic::resume_unwind(e)
            }
            (TrapOutcome::Unwound, Some(reason)) => {
                let trap = match reason {
                    UnwindReason::Trap(t) => t,
                    UnwindReason::Fault { pc, code } => Trap::Wasm { pc, code },
                    UnwindReason::Panic(_) => unreachable!(),
                };
                inner.bump(|s| s.trapped += 1);
                if inner.log.enabled(Verbosity::Unwind) {
                    inner
                        .log
                        .log(Verbosity::Unwind, &format!("unwound boundary {n}: {trap}"));
                }
                run_cleanups(cleanups);
                Err(trap)
            }
            // Only we can see `frame.handle`, and we always set a reason before unwinding to it.
            (TrapOutcome::Unwound, None) | (TrapOutcome::Completed, Some(_)) => unreachable!(),
        }
    }

    /// Abandon the innermost live guarded call of this context, making its
    /// [TrapContext::guard] return `Err(trap)`. Never returns.
    ///
    /// # Panics
    ///
    /// If this context has no live guarded call, or if its innermost guarded call is not the
    /// innermost guarded call on this thread (i.e. another context's guarded call is nested
    /// inside it).
    ///
    /// # Safety
    ///
    /// See [TrapContext::guard].
    pub unsafe fn raise(&self, trap: Trap) -> ! {
        let top = self.inner.top.get();
        assert!(!top.is_null(), "Can't raise a trap outside a guarded call");
        // The thread's innermost frame is null if its thread locals have already been torn down.
        let innermost = tls::innermost();
        assert!(
            innermost.is_null() || ptr::eq(top, innermost),
            "Can't raise a trap through another context's guarded call"
        );
        let frame = unsafe { &*top };
        frame.set_reason(UnwindReason::Trap(trap));
        unsafe { boundary::unwind_to_boundary(&frame.handle) }
    }

    /// Register `f` to be run if the innermost live guarded call of this context is unwound (by
    /// a trap or a panic). If that call completes normally, `f` is dropped without being run.
    /// Returns `false`, dropping `f`, if there is no live guarded call.
    ///
    /// Cleanups run after their guarded call has been left, so a trap raised by a cleanup unwinds
    /// the next guarded call out (if any). The remaining cleanups of the first call are then
    /// neither run nor dropped.
    pub fn on_unwind<F>(&self, f: F) -> bool
    where
        F: FnOnce() + 'static,
    {
        let top = self.inner.top.get();
        if top.is_null() {
            return false;
        }
        // A frame is only reachable from `top` while its `guard` call is live.
        unsafe { &*top }.cleanups.borrow_mut().push(Box::new(f));
        true
    }

    /// How many guarded calls of this context are currently live?
    pub fn depth(&self) -> usize {
        self.inner.depth.get()
    }

    /// Is at least one guarded call of this context currently live?
    pub fn is_guarding(&self) -> bool {
        !self.inner.top.get().is_null()
    }

    /// The maximum number of guarded calls of this context that may be live at once.
    pub fn max_nesting(&self) -> usize {
        self.inner.max_nesting
    }

    pub fn stats(&self) -> TrapStats {
        self.inner.stats.get()
    }
}

fn run_cleanups(cleanups: Vec<Box<dyn FnOnce()>>) {
    for f in cleanups.into_iter().rev() {
        f();
    }
}

/// The entry point for fault detectors (e.g. a `SIGSEGV` handler): abandon this thread's
/// innermost live guarded call, making its [TrapContext::guard] return
/// `Err(Trap::Wasm { pc, code })`.
///
/// Returns only if there is no live guarded call on this thread, if the innermost guarded call
/// is still being set up or torn down (so its boundary isn't armed), or if this thread is already
/// handling a fault for its innermost guarded call (i.e. the fault detector itself faulted). In
/// each case the fault didn't come from guest code we can recover from, and the caller should
/// fall back to the signal's previous disposition.
///
/// This function neither allocates, nor takes locks, nor logs.
///
/// # Safety
///
/// Must be called on the thread that faulted, while the faulting code is running inside the
/// innermost live guarded call. See also [TrapContext::guard].
pub unsafe fn handle_fault(pc: usize, code: TrapCode) {
    let frame = tls::innermost();
    if frame.is_null() {
        return;
    }
    let frame = unsafe { &*frame };
    // `guard` publishes its frame before arming the boundary, and disarms it before unpublishing.
    if !frame.handle.is_armed() || frame.handling_fault.replace(true) {
        return;
    }
    frame.set_fault_reason(pc, code);
    unsafe { boundary::unwind_to_boundary(&frame.handle) }
}

/// Is there a live guarded call, of any context, on this thread? Async-signal-safe.
pub fn is_guarding_current_thread() -> bool {
    !tls::innermost().is_null()
}
