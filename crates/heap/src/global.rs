//! Process-wide heap facade.
//!
//! The drop-in surface: one [`Heap`] singleton behind a mutex, created
//! by the first successful [`init`] and never dropped, so its mappings
//! live for the process. Raw-pointer in, raw-pointer out; outcomes are
//! reported through [`last_error`](crate::error::last_error) exactly
//! like the instance API.
//!
//! The mutex is the single coarse lock the heap's concurrency contract
//! allows; there is no finer-grained synchronization anywhere below it.

use core::ptr;
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::config::HeapConfig;
use crate::error::{self, ErrorCode, HeapError};
use crate::gc::CollectStats;
use crate::heap::Heap;
use crate::pool::PoolReport;

static HEAP: OnceLock<Mutex<Heap>> = OnceLock::new();

/// Initializes the process-wide heap with a region of roughly `bytes`
/// bytes (`0` = default size).
///
/// Idempotent: after the first success, further calls succeed and change
/// nothing.
pub fn init(bytes: usize) -> ErrorCode {
    if HEAP.get().is_some() {
        error::record(ErrorCode::Success, 0);
        return ErrorCode::Success;
    }

    match Heap::with_config(HeapConfig::with_size(bytes)) {
        Ok(heap) => {
            // A racing init may have won; its heap serves the process
            // and this one unmaps on drop.
            let _ = HEAP.set(Mutex::new(heap));
            error::record(ErrorCode::Success, 0);
            ErrorCode::Success
        }
        Err(err) => err.code(),
    }
}

/// Whether [`init`] has succeeded in this process.
#[must_use]
pub fn is_initialized() -> bool {
    HEAP.get().is_some()
}

fn with_heap<T>(not_ready: T, f: impl FnOnce(&mut Heap) -> T) -> T {
    match HEAP.get() {
        Some(lock) => f(&mut lock.lock()),
        None => {
            error::record(
                ErrorCode::NotInitialized,
                HeapError::NotInitialized.errno(),
            );
            not_ready
        }
    }
}

/// Allocates `size` zeroed bytes from the process-wide heap.
///
/// Returns null on failure; the reason is readable via
/// [`last_error`](crate::error::last_error).
#[must_use]
pub fn alloc(size: usize) -> *mut u8 {
    with_heap(ptr::null_mut(), |heap| {
        heap.alloc(size)
            .map_or(ptr::null_mut(), |p| p.as_ptr())
    })
}

/// Releases a payload pointer previously returned by [`alloc`].
///
/// # Safety
///
/// No references into the payload may outlive this call; see
/// [`Heap::free`].
pub unsafe fn free(ptr: *mut u8) {
    with_heap((), |heap| {
        // SAFETY: forwarded caller contract.
        let _ = unsafe { heap.free(ptr) };
    });
}

/// Registers a GC root slot with the process-wide heap.
///
/// # Safety
///
/// `slot` must stay readable until removed; see [`Heap::gc_add_root`].
pub unsafe fn gc_add_root(slot: *const *mut u8) -> bool {
    // SAFETY: forwarded caller contract.
    with_heap(false, |heap| unsafe { heap.gc_add_root(slot) })
}

/// Unregisters a GC root slot. No-op when absent.
pub fn gc_remove_root(slot: *const *mut u8) {
    with_heap((), |heap| heap.gc_remove_root(slot));
}

/// Enables conservative stack scanning up to `bottom`.
///
/// # Safety
///
/// See [`Heap::gc_set_stack_bottom`].
pub unsafe fn gc_set_stack_bottom(bottom: usize) {
    // SAFETY: forwarded caller contract.
    with_heap((), |heap| unsafe { heap.gc_set_stack_bottom(bottom) });
}

/// Discovers the main-thread stack bottom and enables conservative
/// stack scanning on the process-wide heap.
#[cfg(target_os = "linux")]
pub fn gc_init_stack_scanning() -> bool {
    with_heap(false, Heap::gc_init_stack_scanning)
}

/// Runs one collection cycle on the process-wide heap.
#[must_use = "collection statistics report what was reclaimed"]
pub fn gc_collect() -> CollectStats {
    with_heap(CollectStats::default(), Heap::collect)
}

/// Renders the block walk of the process-wide heap, `None` before init.
#[must_use]
pub fn walk_report() -> Option<String> {
    with_heap(None, |heap| Some(heap.walk_report()))
}

/// Hex dump of the process-wide heap's region, `None` before init.
#[must_use]
pub fn raw_dump() -> Option<String> {
    with_heap(None, |heap| Some(heap.raw_dump()))
}

/// Aggregate pool report of the process-wide heap, `None` before init
/// or when pools are disabled.
#[must_use]
pub fn pool_report() -> Option<PoolReport> {
    with_heap(None, |heap| heap.pool_report())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::last_error;

    // The singleton is process-global, so all facade behavior sits in
    // one test; instance-level behavior is covered everywhere else.
    #[test]
    fn facade_lifecycle() {
        // Before init: operations report NotInitialized.
        if !is_initialized() {
            assert!(alloc(16).is_null());
            assert_eq!(last_error(), ErrorCode::NotInitialized);
            // SAFETY: null free on an uninitialized heap is a no-op.
            unsafe { free(ptr::null_mut()) };
            assert_eq!(last_error(), ErrorCode::NotInitialized);
            assert!(walk_report().is_none());
        }

        assert_eq!(init(64 * 1024), ErrorCode::Success);
        // Idempotent re-init, including with a different size.
        assert_eq!(init(128 * 1024), ErrorCode::Success);

        let p = alloc(100);
        assert!(!p.is_null());
        assert_eq!(last_error(), ErrorCode::Success);

        // SAFETY: p was just allocated and is unreferenced.
        unsafe { free(p) };
        assert_eq!(last_error(), ErrorCode::Success);

        // Double free through the facade.
        // SAFETY: p is stale, which is exactly what the check detects.
        unsafe { free(p) };
        assert_eq!(last_error(), ErrorCode::DoubleFree);

        let report = walk_report().unwrap();
        assert!(report.contains("heap walk"));
        assert!(raw_dump().is_some());
        assert!(pool_report().is_some());

        let stats = gc_collect();
        assert_eq!(last_error(), ErrorCode::Success);
        // p's pool block is not collectible; nothing variable was live.
        assert_eq!(stats.marked_blocks, 0);
    }
}
