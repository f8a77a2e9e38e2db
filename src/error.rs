//! Error Module - substrate error types
//!
//! Distinguishes the three recoverable error categories the substrate can
//! surface to its host (resource exhaustion, startup failure, and internal
//! consistency errors) from fatal invariant violations, which abort rather
//! than return an `Err`.

use std::sync::PoisonError;
use thiserror::Error;

/// Main error type for all substrate operations.
#[derive(Debug, Error)]
pub enum GcError {
    #[error("out of memory: requested {requested} bytes, available {available} bytes")]
    OutOfMemory { requested: usize, available: usize },

    #[error("heap initialization failed: {0}")]
    HeapInitialization(String),

    #[error("invalid heap address: {address:#x}")]
    InvalidAddress { address: usize },

    #[error("region allocation failed: {reason}")]
    RegionAllocationFailed { reason: String },

    #[error("dispatcher worker startup failed: {0}")]
    WorkerStartupFailed(String),

    #[error("TLH operation failed: {0}")]
    TlhError(String),

    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("virtual memory error: {0}")]
    VirtualMemoryError(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("bounds check failed: index {index} out of bounds for length {length}")]
    BoundsCheckFailed { index: usize, length: usize },

    #[error("alignment error: address {address:#x} is not aligned to {alignment} bytes")]
    AlignmentError { address: usize, alignment: usize },

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("resource exhausted: {resource}")]
    ResourceExhausted { resource: String },

    #[error("request of {requested} bytes exceeds the TLH abandon threshold of {threshold} bytes; fall back to a direct allocation")]
    TooLargeForTlh { requested: usize, threshold: usize },
}

impl GcError {
    /// Errors the host may retry after reclaiming resources (§7 category 2).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GcError::OutOfMemory { .. }
                | GcError::Timeout(_)
                | GcError::ResourceExhausted { .. }
                | GcError::TlhError(_)
                | GcError::TooLargeForTlh { .. }
        )
    }

    /// Errors that indicate a broken invariant rather than transient pressure.
    ///
    /// Per §7, these are conceptually assertions; the substrate still returns
    /// them as `Err` so embedding code can log and abort deliberately instead
    /// of the library calling `std::process::abort` itself.
    pub fn is_bug(&self) -> bool {
        matches!(
            self,
            GcError::InvalidState { .. }
                | GcError::BoundsCheckFailed { .. }
                | GcError::Internal(_)
                | GcError::LockPoisoned(_)
        )
    }
}

impl<T> From<PoisonError<T>> for GcError {
    fn from(err: PoisonError<T>) -> Self {
        GcError::LockPoisoned(err.to_string())
    }
}

/// Result type alias for substrate operations.
pub type Result<T> = std::result::Result<T, GcError>;

/// Maps a poisoned lock into a [`GcError::LockPoisoned`] instead of unwrapping.
#[macro_export]
macro_rules! lock_result {
    ($lock:expr) => {
        $lock.map_err(|e| $crate::error::GcError::from(e))
    };
}

/// Asserts an invariant with a formatted context message.
#[macro_export]
macro_rules! assert_context {
    ($cond:expr, $context:expr) => {
        if !$cond {
            panic!("invariant violated at {}: {}", stringify!($cond), $context);
        }
    };
    ($cond:expr, $context:expr, $($arg:tt)*) => {
        if !$cond {
            panic!("invariant violated at {}: {}", stringify!($cond), format!($context, $($arg)*));
        }
    };
}

/// Early-returns with an error.
#[macro_export]
macro_rules! bail {
    ($err:expr) => {
        return Err($err.into())
    };
}

/// Returns the given error unless the condition holds.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !$cond {
            return Err($err);
        }
    };
}
