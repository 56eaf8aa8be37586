//! Kernel error types.
//!
//! Most of the memory manager's failure modes are fatal by design (see
//! the error-handling design notes in each module) and surface as
//! panics rather than `KernelError` values; this enum covers the
//! handful of paths that return a recoverable `Result` -- block I/O and
//! the syscall boundary -- plus a small set of ambient variants carried
//! over from the rest of the kernel.

use core::fmt;

/// Main kernel error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// The block device reported a failed read or write. Fatal for this
    /// teaching design: callers propagate it up to a panic rather than
    /// retry, see `error.rs`'s module docs.
    IoError { device: &'static str },

    /// Generic invalid-argument error for syscall and config validation.
    InvalidArgument {
        name: &'static str,
        value: &'static str,
    },
    /// Requested operation is outside this kernel's supported surface.
    OperationNotSupported { operation: &'static str },
    /// Subsystem not initialized (called before its `init()`).
    NotInitialized { subsystem: &'static str },
    /// Legacy string error for gradual migration from `&'static str`
    /// patterns. New code should use a specific variant instead.
    LegacyError { message: &'static str },
}

/// The page-fault handler's outcome space.
///
/// Distinct from [`KernelError`] because a fault is routed to a specific
/// recovery action (kill the process, restart the faulting instruction)
/// rather than propagated with `?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// The PTE is absent or not swapped; the caller escalates to killing
    /// the offending process.
    NotSwapped,
    /// Swap-in could not obtain a fresh frame (`alloc` and the eviction
    /// it may trigger both failed).
    OutOfFrames,
    /// The block layer failed the read of the swapped page.
    Io(KernelError),
    /// The fault was not a demand-paging fault at all (permission
    /// violation, execute-no-execute, ...); the process subsystem
    /// decides what to do with the offending thread.
    ProtectionViolation,
}

impl From<KernelError> for FaultError {
    fn from(err: KernelError) -> Self {
        Self::Io(err)
    }
}

/// Result type alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IoError { device } => write!(f, "I/O error on {}", device),
            Self::InvalidArgument { name, value } => {
                write!(f, "Invalid argument '{}': {}", name, value)
            }
            Self::OperationNotSupported { operation } => {
                write!(f, "Operation not supported: {}", operation)
            }
            Self::NotInitialized { subsystem } => {
                write!(f, "Subsystem not initialized: {}", subsystem)
            }
            Self::LegacyError { message } => write!(f, "{}", message),
        }
    }
}

impl fmt::Display for FaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotSwapped => write!(f, "page fault on a PTE that is neither resident nor swapped"),
            Self::OutOfFrames => write!(f, "no frame available to satisfy swap-in"),
            Self::Io(e) => write!(f, "swap-in I/O failure: {}", e),
            Self::ProtectionViolation => write!(f, "fault was not a demand-paging fault"),
        }
    }
}

/// Conversion from legacy `&'static str` errors to `KernelError`.
///
/// Enables gradual migration: functions returning `Result<T, &'static
/// str>` can be called with `?` from functions returning `Result<T,
/// KernelError>`.
impl From<&'static str> for KernelError {
    fn from(msg: &'static str) -> Self {
        Self::LegacyError { message: msg }
    }
}

// Helper macro for easy error creation.
#[macro_export]
macro_rules! kernel_error {
    (InvalidArgument { $name:expr => $value:expr }) => {
        $crate::error::KernelError::InvalidArgument {
            name: $name,
            value: $value,
        }
    };
    ($variant:ident) => {
        $crate::error::KernelError::$variant
    };
}
