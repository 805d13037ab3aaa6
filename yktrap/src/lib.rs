//! Trap boundaries for runtimes that execute compiled guest code.
//!
//! When guest code traps (an out-of-bounds memory access, an integer overflow, an `unreachable`
//! instruction, running out of stack) the runtime needs to abandon however many native frames
//! the guest has built up and get back to the host. This crate provides two layers for that:
//!
//!   * [boundary]: the primitive. [enter_guarded_region] registers a resumption point and runs a
//!     body; [unwind_to_boundary] jumps back to it from arbitrarily deep inside the body, without
//!     running any cleanup for the frames in between.
//!   * [TrapContext]: what a runtime normally uses. It keeps the stack of live boundaries for a
//!     thread, carries the reason for each unwind back to the boundary as a [Trap], carries panics
//!     safely across the boundary, and runs explicitly registered unwind cleanups.
//!
//! Fault detectors (e.g. a `SIGSEGV` handler) use [handle_fault], which finds the current thread's
//! innermost boundary without needing a context and is async-signal-safe. Installing such a
//! handler is left to the runtime.

mod config;
mod context;
mod errors;
mod log;
mod tls;
mod trap;

pub mod boundary;

pub use self::boundary::{
    enter_guarded_region, unwind_to_boundary, BoundaryHandle, SavedContext, TrapOutcome,
};
pub use self::config::{TrapContextBuilder, DEFAULT_MAX_NESTING};
pub use self::context::{handle_fault, is_guarding_current_thread, TrapContext, TrapStats};
pub use self::errors::ConfigError;
pub use self::trap::{Trap, TrapCode};
