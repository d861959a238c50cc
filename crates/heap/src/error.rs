//! Error types and the process-wide last-error channel.
//!
//! Two layers cooperate here. [`HeapError`] is the rich, thiserror-based
//! type every fallible operation returns; it carries enough context for a
//! log line. [`ErrorCode`] is the stable, C-style code the last-error
//! channel stores, together with a mirror of the platform errno.
//!
//! The channel is thread-local: reads are pure and idempotent, and every
//! public heap operation performs exactly one write on its way out (last
//! writer wins).

use core::cell::Cell;

use thiserror::Error;

/// Stable outcome codes reported through the last-error channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    /// Operation successful
    Success = 0,
    /// Heap initialization failed
    InitFailed,
    /// Memory allocation failed
    AllocFailed,
    /// Memory free failed
    FreeFailed,
    /// Out of memory
    OutOfMemory,
    /// Invalid pointer
    InvalidPointer,
    /// Attempt to free already freed memory
    DoubleFree,
    /// Invalid size requested
    InvalidSize,
    /// Heap not initialized
    NotInitialized,
    /// Arithmetic overflow while sizing a request
    Overflow,
    /// Arithmetic underflow while sizing a request
    Underflow,
    /// Memory alignment error
    AlignmentError,
    /// Memory boundary violation (damaged canary)
    BoundaryError,
    /// Heap corruption detected
    CorruptionDetected,
    /// Heap spray pattern detected
    SprayAttack,
    /// Unknown error
    UnknownError,
}

impl ErrorCode {
    /// Human-readable description of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::InitFailed => "heap initialization failed",
            Self::AllocFailed => "memory allocation failed",
            Self::FreeFailed => "memory free failed",
            Self::OutOfMemory => "out of memory",
            Self::InvalidPointer => "invalid pointer",
            Self::DoubleFree => "double free detected",
            Self::InvalidSize => "invalid size requested",
            Self::NotInitialized => "heap not initialized",
            Self::Overflow => "size overflow detected",
            Self::Underflow => "size underflow detected",
            Self::AlignmentError => "memory alignment error",
            Self::BoundaryError => "memory boundary violation",
            Self::CorruptionDetected => "heap corruption detected",
            Self::SprayAttack => "heap spray detected",
            Self::UnknownError => "unknown error",
        }
    }

    /// Whether this code leaves the heap fully usable.
    #[must_use]
    pub const fn is_recoverable(self) -> bool {
        !matches!(
            self,
            Self::InitFailed | Self::BoundaryError | Self::CorruptionDetected
        )
    }
}

impl core::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Heap operation errors
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeapError {
    // --- Initialization ---
    #[error("heap initialization failed: {reason}")]
    InitFailed { reason: String },

    #[error("heap not initialized")]
    NotInitialized,

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // --- Allocation ---
    #[error("out of memory: requested {requested} bytes, region holds {region} bytes")]
    OutOfMemory { requested: usize, region: usize },

    #[error("invalid allocation size: {size}")]
    InvalidSize { size: usize },

    #[error("size overflow while sizing a {operation} request")]
    Overflow { operation: &'static str },

    #[error("allocation burst matches heap-spray pattern: {count} x {size} bytes")]
    SprayDetected { size: usize, count: usize },

    // --- Release ---
    #[error("invalid pointer {addr:#x}: {reason}")]
    InvalidPointer { addr: usize, reason: &'static str },

    #[error("double free of {addr:#x}")]
    DoubleFree { addr: usize },

    #[error("alignment error: {addr:#x} is not {alignment}-byte aligned")]
    AlignmentError { addr: usize, alignment: usize },

    #[error("boundary violation on block {addr:#x}: {which} canary damaged")]
    BoundaryError { addr: usize, which: &'static str },

    #[error("heap corruption at {addr:#x}: {details}")]
    Corruption { addr: usize, details: &'static str },
}

impl HeapError {
    /// Maps this error onto the stable channel code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InitFailed { .. } | Self::InvalidConfig { .. } => ErrorCode::InitFailed,
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::OutOfMemory { .. } => ErrorCode::OutOfMemory,
            Self::InvalidSize { .. } => ErrorCode::InvalidSize,
            Self::Overflow { .. } => ErrorCode::Overflow,
            Self::SprayDetected { .. } => ErrorCode::SprayAttack,
            Self::InvalidPointer { .. } => ErrorCode::InvalidPointer,
            Self::DoubleFree { .. } => ErrorCode::DoubleFree,
            Self::AlignmentError { .. } => ErrorCode::AlignmentError,
            Self::BoundaryError { .. } => ErrorCode::BoundaryError,
            Self::Corruption { .. } => ErrorCode::CorruptionDetected,
        }
    }

    /// The errno value mirrored next to the channel code.
    #[must_use]
    pub const fn errno(&self) -> i32 {
        match self {
            Self::InitFailed { .. } | Self::OutOfMemory { .. } => libc::ENOMEM,
            Self::BoundaryError { .. } | Self::Corruption { .. } => libc::EFAULT,
            _ => libc::EINVAL,
        }
    }

    // --- Convenience constructors ---

    /// Create an initialization failure error
    pub fn init_failed(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        tracing::error!(%reason, "heap initialization failed");
        Self::InitFailed { reason }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create an out-of-memory error
    #[must_use]
    pub fn out_of_memory(requested: usize, region: usize) -> Self {
        Self::OutOfMemory { requested, region }
    }

    /// Create an invalid size error
    #[must_use]
    pub fn invalid_size(size: usize) -> Self {
        Self::InvalidSize { size }
    }

    /// Create a size overflow error
    #[must_use]
    pub fn overflow(operation: &'static str) -> Self {
        Self::Overflow { operation }
    }

    /// Create an invalid pointer error
    #[must_use]
    pub fn invalid_pointer(addr: usize, reason: &'static str) -> Self {
        Self::InvalidPointer { addr, reason }
    }

    /// Create a double free error
    #[must_use]
    pub fn double_free(addr: usize) -> Self {
        Self::DoubleFree { addr }
    }

    /// Create a boundary violation error
    #[must_use]
    pub fn boundary(addr: usize, which: &'static str) -> Self {
        tracing::error!(addr, which, "canary damaged");
        Self::BoundaryError { addr, which }
    }

    /// Create a corruption error
    #[must_use]
    pub fn corruption(addr: usize, details: &'static str) -> Self {
        tracing::error!(addr, details, "heap corruption detected");
        Self::Corruption { addr, details }
    }
}

/// Human-readable description of an error code. Pure; alias for
/// [`ErrorCode::as_str`] on the drop-in surface.
#[must_use]
pub fn error_what(code: ErrorCode) -> &'static str {
    code.as_str()
}

/// Result type for heap operations
pub type HeapResult<T> = core::result::Result<T, HeapError>;

// ============================================================================
// Last-error channel
// ============================================================================

thread_local! {
    static LAST_ERROR: Cell<ErrorCode> = const { Cell::new(ErrorCode::Success) };
    static LAST_ERRNO: Cell<i32> = const { Cell::new(0) };
}

/// Most recent outcome of a public heap operation on this thread.
#[must_use]
pub fn last_error() -> ErrorCode {
    LAST_ERROR.with(Cell::get)
}

/// errno mirror of the most recent outcome on this thread.
#[must_use]
pub fn last_errno() -> i32 {
    LAST_ERRNO.with(Cell::get)
}

/// Records an outcome in the channel. Crate-internal: public operations
/// funnel their single exit write through here.
pub(crate) fn record(code: ErrorCode, errno: i32) {
    LAST_ERROR.with(|slot| slot.set(code));
    LAST_ERRNO.with(|slot| slot.set(errno));
}

/// Records `result` in the channel and passes it through unchanged.
pub(crate) fn record_result<T>(result: HeapResult<T>) -> HeapResult<T> {
    match &result {
        Ok(_) => record(ErrorCode::Success, 0),
        Err(err) => record(err.code(), err.errno()),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_channel() {
        record(ErrorCode::Success, 0);
        assert_eq!(last_error(), ErrorCode::Success);

        let err = HeapError::double_free(0xdead_0000);
        record(err.code(), err.errno());
        assert_eq!(last_error(), ErrorCode::DoubleFree);
        assert_eq!(last_errno(), libc::EINVAL);
    }

    #[test]
    fn record_result_is_last_writer_wins() {
        let _ = record_result::<()>(Err(HeapError::out_of_memory(128, 64)));
        assert_eq!(last_error(), ErrorCode::OutOfMemory);
        assert_eq!(last_errno(), libc::ENOMEM);

        let _ = record_result(Ok(()));
        assert_eq!(last_error(), ErrorCode::Success);
        assert_eq!(last_errno(), 0);
    }

    #[test]
    fn every_error_maps_to_a_distinct_family() {
        assert_eq!(
            HeapError::boundary(0x10, "pre").code(),
            ErrorCode::BoundaryError
        );
        assert_eq!(HeapError::boundary(0x10, "pre").errno(), libc::EFAULT);
        assert_eq!(
            HeapError::invalid_pointer(0, "null").code(),
            ErrorCode::InvalidPointer
        );
        assert_eq!(HeapError::NotInitialized.code(), ErrorCode::NotInitialized);
        assert!(!ErrorCode::CorruptionDetected.is_recoverable());
        assert!(ErrorCode::DoubleFree.is_recoverable());
    }

    #[test]
    fn error_strings_are_stable() {
        assert_eq!(ErrorCode::Success.as_str(), "success");
        assert_eq!(ErrorCode::SprayAttack.as_str(), "heap spray detected");
        assert_eq!(ErrorCode::DoubleFree.as_str(), "double free detected");
    }
}
