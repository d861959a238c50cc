//! Heap configuration and compile-time tunables.
//!
//! All magic numbers of the heap live here: region size bounds, fence
//! geometry, header magics, pool size classes and the spray-detector
//! window. [`HeapConfig`] carries the init-time knobs; the rest are
//! constants shared by the sub-allocators.

use core::time::Duration;

use crate::error::HeapError;

/// Heap size used when the caller passes `0` to init.
pub const DEFAULT_HEAP_SIZE: usize = 64 * 1024;

/// Smallest region the variable allocator will manage.
pub const MIN_HEAP_SIZE: usize = 4 * 1024;

/// Largest region the variable allocator will manage.
pub const MAX_HEAP_SIZE: usize = 16 * 1024 * 1024;

/// A region must hold at least this many headers to be usable.
pub const MIN_HEAP_UNITS: usize = 2;

/// Bytes of canary on each side of a variable-allocator payload.
pub const FENCE_SIZE: usize = 16;

/// Byte value every canary byte must hold.
pub const FENCE_PATTERN: u8 = 0xFE;

/// Header magic while a block is allocated.
pub const ALLOC_MAGIC: usize = 0xDEAD_BEEF;

/// Header magic while a block is on the free list.
pub const FREE_MAGIC: usize = 0xBAAD_F00D;

/// Byte written over a payload when it is released.
pub const POISON_BYTE: u8 = 0xDE;

/// Fixed pool size classes, strictly increasing.
pub const POOL_SIZE_CLASSES: [usize; 4] = [32, 64, 128, 256];

/// Blocks carved out of each pool class mapping.
pub const POOL_BLOCKS_PER_CLASS: usize = 128;

/// Sliding-window capacity of the spray detector.
pub const SPRAY_MAX_EVENTS: usize = 32;

/// Same-size allocations within the window that count as a burst.
pub const SPRAY_SAME_SIZE_LIMIT: usize = 8;

/// Burst window of the spray detector.
pub const SPRAY_TIME_WINDOW: Duration = Duration::from_millis(50);

/// Capacity of the explicit GC root table.
pub const MAX_ROOTS: usize = 1024;

/// Init-time configuration for a [`Heap`](crate::Heap).
///
/// `requested_bytes` follows the clamping rules of the region layer: `0`
/// substitutes [`DEFAULT_HEAP_SIZE`], everything else is clamped into
/// `[MIN_HEAP_SIZE, MAX_HEAP_SIZE]` and rounded to whole pages.
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Requested region size in bytes; `0` means the default.
    pub requested_bytes: usize,

    /// Construct the size-class pool tier. Disabling it routes every
    /// allocation through the free-list allocator.
    pub enable_pools: bool,

    /// Consult the heap-spray detector on the allocation path.
    pub enable_spray_check: bool,

    /// Same-size burst threshold for the spray detector.
    pub spray_same_size_limit: usize,

    /// Time window for the spray detector.
    pub spray_time_window: Duration,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            requested_bytes: 0,
            enable_pools: true,
            enable_spray_check: true,
            spray_same_size_limit: SPRAY_SAME_SIZE_LIMIT,
            spray_time_window: SPRAY_TIME_WINDOW,
        }
    }
}

impl HeapConfig {
    /// Configuration with an explicit region size.
    #[must_use]
    pub fn with_size(requested_bytes: usize) -> Self {
        Self {
            requested_bytes,
            ..Self::default()
        }
    }

    /// Debug configuration: every hardening feature on.
    #[must_use]
    pub fn debug() -> Self {
        Self::default()
    }

    /// Production configuration: pools on, spray heuristic off.
    ///
    /// The detector is advisory and trades false positives for burst
    /// detection; latency-sensitive deployments opt out here.
    #[must_use]
    pub fn production() -> Self {
        Self {
            enable_spray_check: false,
            ..Self::default()
        }
    }

    /// Validates the knobs that have hard requirements.
    pub fn validate(&self) -> Result<(), HeapError> {
        if self.spray_same_size_limit == 0 {
            return Err(HeapError::invalid_config(
                "spray_same_size_limit must be at least 1",
            ));
        }
        if self.spray_same_size_limit > SPRAY_MAX_EVENTS {
            return Err(HeapError::invalid_config(
                "spray_same_size_limit exceeds the event window",
            ));
        }
        Ok(())
    }
}
