//! The unified heap: pools in front, free list behind, spray heuristic
//! and collector on the side.
//!
//! [`Heap`] owns every tier. Allocation consults the spray detector,
//! tries the pool tier and falls back to the free-list allocator;
//! release routes by address range, pool tier first. Any payload pointer
//! belongs to exactly one tier because every tier sits on its own
//! mapping.
//!
//! Public operations report through both channels: the returned
//! `Result`, and the thread-local last-error record (exactly one write
//! per call, last writer wins).

use core::ptr::NonNull;

use crate::config::HeapConfig;
use crate::diag::{self, BlockInfo};
use crate::error::{self, HeapError, HeapResult};
use crate::freelist::FreeListAllocator;
use crate::gc::{CollectStats, Collector};
use crate::pool::{PoolClassStats, PoolReport, PoolSet};
use crate::spray::{SprayDetector, SprayVerdict};

/// A hardened heap instance.
///
/// The process-wide drop-in surface lives in [`crate::global`]; direct
/// instances are the embeddable/testable form. Either way the heap is
/// single-threaded by contract: methods take `&mut self` and do no
/// internal locking.
pub struct Heap {
    freelist: FreeListAllocator,
    pools: Option<PoolSet>,
    spray: Option<SprayDetector>,
    collector: Collector,
}

impl Heap {
    /// Creates a heap with the default configuration.
    pub fn new() -> HeapResult<Self> {
        Self::with_config(HeapConfig::default())
    }

    /// Creates a heap with a region of roughly `bytes` bytes (clamped
    /// and page-rounded; `0` means the default size).
    pub fn with_size(bytes: usize) -> HeapResult<Self> {
        Self::with_config(HeapConfig::with_size(bytes))
    }

    /// Creates a heap from an explicit configuration.
    pub fn with_config(config: HeapConfig) -> HeapResult<Self> {
        error::record_result(Self::build(config))
    }

    fn build(config: HeapConfig) -> HeapResult<Self> {
        config.validate()?;

        let freelist = FreeListAllocator::new(config.requested_bytes)?;
        let pools = config.enable_pools.then(PoolSet::new).transpose()?;
        let spray = config
            .enable_spray_check
            .then(|| SprayDetector::new(config.spray_same_size_limit, config.spray_time_window));

        tracing::debug!(
            region = freelist.region().len(),
            pools = pools.is_some(),
            spray = spray.is_some(),
            "heap initialized"
        );

        Ok(Self {
            freelist,
            pools,
            spray,
            collector: Collector::new(),
        })
    }

    /// Allocates `size` bytes of zeroed memory.
    ///
    /// The payload is at least header-aligned when served by the
    /// free-list tier and block-aligned when served by a pool.
    pub fn alloc(&mut self, size: usize) -> HeapResult<NonNull<u8>> {
        error::record_result(self.alloc_inner(size))
    }

    fn alloc_inner(&mut self, size: usize) -> HeapResult<NonNull<u8>> {
        if size == 0 {
            return Err(HeapError::invalid_size(0));
        }

        if let Some(spray) = &mut self.spray {
            if spray.check(size) == SprayVerdict::Detected {
                let count = spray.same_size_pressure(size);
                return Err(HeapError::SprayDetected { size, count });
            }
        }

        if let Some(pools) = &mut self.pools {
            if let Some(block) = pools.alloc(size) {
                return Ok(block);
            }
        }

        self.freelist.allocate(size)
    }

    /// Releases a payload pointer previously returned by
    /// [`alloc`](Self::alloc).
    ///
    /// # Safety
    ///
    /// No references into the payload may outlive this call. Bogus
    /// pointers are rejected by validation, but passing a pointer whose
    /// memory is still referenced elsewhere poisons bytes those
    /// references can observe.
    pub unsafe fn free(&mut self, ptr: *mut u8) -> HeapResult<()> {
        error::record_result(self.free_inner(ptr))
    }

    fn free_inner(&mut self, ptr: *mut u8) -> HeapResult<()> {
        let Some(ptr) = NonNull::new(ptr) else {
            return Err(HeapError::invalid_pointer(0, "null pointer"));
        };

        if let Some(pools) = &mut self.pools {
            if let Some(handled) = pools.free(ptr) {
                return handled;
            }
        }

        self.freelist.release(ptr)
    }

    /// Forgets the spray detector's recorded events, reopening the
    /// window after a deliberate burst (e.g. application startup).
    pub fn reset_spray_window(&mut self) {
        if let Some(spray) = &mut self.spray {
            spray.reset();
        }
    }

    // --- Garbage collection ---

    /// Registers the address of a pointer variable as a GC root.
    /// Returns false when the bounded root table is full.
    ///
    /// # Safety
    ///
    /// `slot` must stay readable until it is removed with
    /// [`gc_remove_root`](Self::gc_remove_root); every collection reads
    /// `*slot`.
    pub unsafe fn gc_add_root(&mut self, slot: *const *mut u8) -> bool {
        self.collector.add_root(slot)
    }

    /// Unregisters a root slot. No-op when the slot was never added.
    pub fn gc_remove_root(&mut self, slot: *const *mut u8) {
        self.collector.remove_root(slot);
    }

    /// Number of registered root slots.
    #[must_use]
    pub fn gc_root_count(&self) -> usize {
        self.collector.root_count()
    }

    /// Enables conservative stack scanning from the current stack
    /// pointer up to `bottom` (the highest stack address to scan).
    ///
    /// On Linux, [`gc_init_stack_scanning`](Self::gc_init_stack_scanning)
    /// can discover the bottom of the main thread's stack.
    ///
    /// # Safety
    ///
    /// `bottom` must lie within the stack of the thread that will call
    /// [`collect`](Self::collect), above every frame that does so.
    pub unsafe fn gc_set_stack_bottom(&mut self, bottom: usize) {
        self.collector.set_stack_bottom(Some(bottom));
    }

    /// Disables conservative stack scanning.
    pub fn gc_clear_stack_bottom(&mut self) {
        self.collector.set_stack_bottom(None);
    }

    /// Discovers the main-thread stack bottom and enables stack
    /// scanning. Returns false when discovery is unavailable.
    #[cfg(target_os = "linux")]
    pub fn gc_init_stack_scanning(&mut self) -> bool {
        match crate::gc::discover_stack_bottom() {
            Some(bottom) => {
                // SAFETY: the [stack] mapping end is above every frame of
                // the main thread.
                unsafe { self.gc_set_stack_bottom(bottom) };
                true
            }
            None => false,
        }
    }

    /// Runs one stop-the-world mark-sweep cycle.
    ///
    /// Every unreachable variable-tier block is released through the
    /// ordinary path: canaries verified, payload poisoned, neighbors
    /// coalesced. Surviving block addresses are stable. Pool blocks are
    /// never collected.
    pub fn collect(&mut self) -> CollectStats {
        let stats = self.collector.collect(&mut self.freelist);
        error::record(error::ErrorCode::Success, 0);
        stats
    }

    // --- Introspection and diagnostics (read-only) ---

    /// Bytes the variable region spans.
    #[must_use]
    pub fn region_len(&self) -> usize {
        self.freelist.region().len()
    }

    /// Whether `addr` belongs to this heap (either tier).
    #[must_use]
    pub fn owns(&self, addr: usize) -> bool {
        self.owns_variable(addr)
            || self.pools.as_ref().is_some_and(|pools| pools.contains(addr))
    }

    /// Whether `addr` lies in the variable region (as opposed to a
    /// pool). Tier membership decides which free path handles a pointer.
    #[must_use]
    pub fn owns_variable(&self, addr: usize) -> bool {
        self.freelist.contains(addr)
    }

    /// Bytes currently on the variable tier's free list.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.freelist.free_bytes()
    }

    /// Linear walk of the variable region as structured records.
    #[must_use]
    pub fn walk(&self) -> Vec<BlockInfo> {
        diag::capture_walk(&self.freelist)
    }

    /// Renders the linear walk, one line per block.
    #[must_use]
    pub fn walk_report(&self) -> String {
        diag::walk_report(&self.freelist)
    }

    /// Renders the free list in list order.
    #[must_use]
    pub fn free_list_report(&self) -> String {
        diag::free_list_report(&self.freelist)
    }

    /// Hex dump of the entire variable region.
    #[must_use]
    pub fn raw_dump(&self) -> String {
        diag::raw_dump(&self.freelist)
    }

    /// Per-class pool counters, when the pool tier is enabled.
    #[must_use]
    pub fn pool_stats(&self) -> Option<Vec<PoolClassStats>> {
        self.pools.as_ref().map(PoolSet::stats)
    }

    /// Aggregate pool report, when the pool tier is enabled.
    #[must_use]
    pub fn pool_report(&self) -> Option<PoolReport> {
        self.pools.as_ref().map(PoolSet::report)
    }
}
