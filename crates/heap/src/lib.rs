//! # palisade-heap
//!
//! A hardened, process-local heap allocator. One large region is mapped
//! from the OS at initialization and served by two cooperating tiers: a
//! fixed-size-class pool allocator for small requests and a first-fit
//! free-list allocator with split-and-coalesce for everything else.
//! Every variable-tier block carries canaries and a state magic; freed
//! payloads are poisoned. A conservative stop-the-world mark-sweep
//! collector can reclaim unreachable blocks, and a heap-spray heuristic
//! watches the allocation path for same-size bursts.
//!
//! ## Quick start
//!
//! ```rust
//! use palisade_heap::{Heap, HeapError};
//!
//! fn main() -> Result<(), HeapError> {
//!     let mut heap = Heap::with_size(64 * 1024)?;
//!
//!     let p = heap.alloc(100)?;
//!     // ... use the zeroed payload ...
//!     unsafe { heap.free(p.as_ptr())? };
//!     Ok(())
//! }
//! ```
//!
//! The process-wide drop-in surface lives in [`global`]: `init`,
//! `alloc`, `free` and friends over a never-dropped singleton.
//!
//! ## Contract
//!
//! The heap is single-threaded by contract: instance methods take
//! `&mut self` and hold no locks; the global facade serializes every
//! call behind one mutex. Regions are never grown, remapped or (for the
//! global heap) returned to the OS. Outcomes are mirrored into a
//! thread-local last-error record readable via [`last_error`].

// A heap allocator is raw-pointer arithmetic by nature; every unsafe
// block carries its own justification.
#![allow(unsafe_code)]
// Payload/pointer casts at the region boundary are alignment-checked.
#![allow(clippy::cast_ptr_alignment)]

pub mod config;
pub mod diag;
pub mod error;
pub mod global;
pub mod utils;

mod block;
mod freelist;
mod gc;
mod heap;
mod pool;
mod region;
mod spray;

// Re-export the primary surface at the crate root.
pub use crate::config::HeapConfig;
pub use crate::error::{ErrorCode, HeapError, HeapResult, error_what, last_errno, last_error};
pub use crate::gc::CollectStats;
pub use crate::heap::Heap;
pub use crate::pool::{PoolClassReport, PoolClassStats, PoolReport};
pub use crate::spray::SprayVerdict;

/// Convenient re-exports of commonly used types.
pub mod prelude {
    pub use crate::config::HeapConfig;
    pub use crate::diag::{BlockInfo, BlockMagic, FenceStatus};
    pub use crate::error::{ErrorCode, HeapError, HeapResult, last_error};
    pub use crate::gc::CollectStats;
    pub use crate::heap::Heap;
    pub use crate::pool::{PoolClassStats, PoolReport};
}
