//! Why guest code stopped.

use std::error::Error;
use strum::{Display, EnumCount, FromRepr};

/// The reason a guest trapped. Generated code reports traps as the `u32` discriminant of one of
/// these: see [TrapCode::from_u32].
#[repr(u32)]
#[derive(Clone, Copy, Debug, Display, EnumCount, Eq, FromRepr, Hash, PartialEq)]
pub enum TrapCode {
    /// The guest ran out of stack, or guarded calls were nested too deeply.
    #[strum(to_string = "call stack exhausted")]
    StackOverflow,
    /// A load or store outside the bounds of a linear memory.
    #[strum(to_string = "out of bounds memory access")]
    HeapAccessOutOfBounds,
    /// A linear memory's base address wasn't suitably aligned.
    #[strum(to_string = "misaligned heap")]
    HeapMisaligned,
    /// A table access outside the table's bounds.
    #[strum(to_string = "undefined element: out of bounds table access")]
    TableAccessOutOfBounds,
    /// An indirect call through an uninitialised table slot.
    #[strum(to_string = "uninitialized element")]
    IndirectCallToNull,
    /// An indirect call whose callee didn't have the expected signature.
    #[strum(to_string = "indirect call type mismatch")]
    BadSignature,
    /// An arithmetic operation overflowed.
    #[strum(to_string = "integer overflow")]
    IntegerOverflow,
    #[strum(to_string = "integer divide by zero")]
    IntegerDivisionByZero,
    /// A float-to-int conversion of a NaN or out of range value.
    #[strum(to_string = "invalid conversion to integer")]
    BadConversionToInteger,
    /// An `unreachable` instruction was executed.
    #[strum(to_string = "unreachable")]
    UnreachableCodeReached,
    /// Execution was interrupted by the host.
    #[strum(to_string = "interrupt")]
    Interrupt,
    #[strum(to_string = "unaligned atomic")]
    UnalignedAtomic,
}

impl TrapCode {
    /// Convert a raw trap number, as emitted by generated code, into a [TrapCode].
    pub fn from_u32(x: u32) -> Option<Self> {
        Self::from_repr(x)
    }

    /// The trap a fault detector should report for a synchronous fault signal `signum` raised
    /// while guest code was running, or `None` if `signum` isn't a signal guest code raises.
    ///
    /// This is a pure function of its argument, so it is safe to call from a signal handler.
    #[cfg(unix)]
    pub fn from_signal(signum: libc::c_int) -> Option<Self> {
        match signum {
            libc::SIGSEGV | libc::SIGBUS => Some(Self::HeapAccessOutOfBounds),
            libc::SIGILL => Some(Self::UnreachableCodeReached),
            libc::SIGFPE => Some(Self::IntegerDivisionByZero),
            _ => None,
        }
    }
}

/// A trap that aborted a guarded call.
#[derive(Debug, thiserror::Error)]
pub enum Trap {
    /// A fault detector observed a hardware fault at `pc` in guest code.
    #[error("{code} (at pc {pc:#x})")]
    Wasm { pc: usize, code: TrapCode },
    /// The runtime, or an explicit check in generated code, raised a trap.
    #[error("{0}")]
    Runtime(TrapCode),
    /// A host function called from guest code raised an error.
    #[error(transparent)]
    User(Box<dyn Error + Send + Sync>),
}

impl Trap {
    /// Create a [Trap::User] from a host error.
    pub fn user<E: Into<Box<dyn Error + Send + Sync>>>(err: E) -> Self {
        Self::User(err.into())
    }

    /// The [TrapCode] behind this trap, if it has one.
    pub fn code(&self) -> Option<TrapCode> {
        match self {
            Self::Wasm { code, .. } | Self::Runtime(code) => Some(*code),
            Self::User(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_u32() {
        for x in 0..TrapCode::COUNT {
            let x = u32::try_from(x).unwrap();
            assert_eq!(TrapCode::from_u32(x).map(|c| c as u32), Some(x));
        }
        assert_eq!(TrapCode::from_u32(u32::try_from(TrapCode::COUNT).unwrap()), None);
        assert_eq!(TrapCode::from_u32(0), Some(TrapCode::StackOverflow));
    }

    #[cfg(unix)]
    #[test]
    fn from_signal() {
        assert_eq!(
            TrapCode::from_signal(libc::SIGSEGV),
            Some(TrapCode::HeapAccessOutOfBounds)
        );
        assert_eq!(
            TrapCode::from_signal(libc::SIGBUS),
            Some(TrapCode::HeapAccessOutOfBounds)
        );
        assert_eq!(
            TrapCode::from_signal(libc::SIGILL),
            Some(TrapCode::UnreachableCodeReached)
        );
        assert_eq!(
            TrapCode::from_signal(libc::SIGFPE),
            Some(TrapCode::IntegerDivisionByZero)
        );
        assert_eq!(TrapCode::from_signal(libc::SIGINT), None);
    }

    #[test]
    fn display() {
        assert_eq!(
            Trap::Runtime(TrapCode::IntegerDivisionByZero).to_string(),
            "integer divide by zero"
        );
        assert_eq!(
            Trap::Wasm {
                pc: 0x1234,
                code: TrapCode::HeapAccessOutOfBounds
            }
            .to_string(),
            "out of bounds memory access (at pc 0x1234)"
        );
        let t = Trap::user("host function failed");
        assert_eq!(t.to_string(), "host function failed");
        assert_eq!(t.code(), None);
        assert_eq!(
            Trap::Runtime(TrapCode::Interrupt).code(),
            Some(TrapCode::Interrupt)
        );
    }
}
