//! Fixed-size-class pool tier, the fast path for small requests.
//!
//! Each size class owns an independent mapping sliced into equal blocks
//! threaded onto an intrusive LIFO free list. A pool block has no header,
//! no fences and no magic: the block address *is* the payload address,
//! and the free-list link reuses the block storage only while the block
//! sits on the free list.
//!
//! The tier answers "not handled" (a `None`) instead of failing, so the
//! unified allocation path can fall back to the free-list allocator.

use core::fmt;
use core::ptr::{self, NonNull};

use crate::config::{POOL_BLOCKS_PER_CLASS, POOL_SIZE_CLASSES};
use crate::error::HeapError;
use crate::region::Region;

/// Intrusive free-list node living in the first word of a free block.
#[repr(C)]
struct PoolFreeBlock {
    next: *mut PoolFreeBlock,
}

/// Counters kept per size class.
///
/// `used_blocks + free_blocks == total_blocks` after every operation;
/// the request/failure counters only ever grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolClassStats {
    /// Bytes per block in this class.
    pub block_size: usize,
    /// Blocks carved out of the class mapping.
    pub total_blocks: usize,
    /// Blocks currently handed out.
    pub used_blocks: usize,
    /// Blocks currently on the free list.
    pub free_blocks: usize,
    /// High-water mark of `used_blocks`.
    pub peak_used: usize,
    /// Allocation attempts routed to this class.
    pub alloc_requests: u64,
    /// Releases handled by this class.
    pub free_requests: u64,
    /// Allocation attempts that found the class exhausted.
    pub alloc_failures: u64,
}

impl PoolClassStats {
    fn new(block_size: usize, total_blocks: usize) -> Self {
        Self {
            block_size,
            total_blocks,
            used_blocks: 0,
            free_blocks: total_blocks,
            peak_used: 0,
            alloc_requests: 0,
            free_requests: 0,
            alloc_failures: 0,
        }
    }

    /// Fraction of the class currently handed out, in percent.
    #[must_use]
    pub fn utilization_percent(&self) -> f64 {
        if self.total_blocks == 0 {
            0.0
        } else {
            100.0 * self.used_blocks as f64 / self.total_blocks as f64
        }
    }
}

/// One size class: its mapping, free list and counters.
struct PoolClass {
    region: Region,
    block_size: usize,
    free_head: *mut PoolFreeBlock,
    stats: PoolClassStats,
}

// SAFETY: each class exclusively owns its region; free-list pointers only
// ever target that region.
unsafe impl Send for PoolClass {}

impl PoolClass {
    fn new(block_size: usize, block_count: usize) -> Result<Self, HeapError> {
        debug_assert!(block_size >= core::mem::size_of::<*mut u8>());

        let len = block_size
            .checked_mul(block_count)
            .ok_or(HeapError::overflow("pool sizing"))?;
        let region = Region::map(len, block_size)?;

        let mut class = Self {
            region,
            block_size,
            free_head: ptr::null_mut(),
            stats: PoolClassStats::new(block_size, block_count),
        };
        class.thread_free_list();
        Ok(class)
    }

    /// Slices the mapping into blocks and threads them, first block at
    /// the head.
    fn thread_free_list(&mut self) {
        let base = self.region.base().as_ptr() as usize;
        let mut head: *mut PoolFreeBlock = ptr::null_mut();
        for i in (0..self.stats.total_blocks).rev() {
            let block = (base + i * self.block_size) as *mut PoolFreeBlock;
            // SAFETY: block lies inside the class mapping and every block
            // is at least pointer-sized; initialization runs before any
            // block escapes.
            unsafe {
                (*block).next = head;
            }
            head = block;
        }
        self.free_head = head;
        self.stats.free_blocks = self.stats.total_blocks;
        self.stats.used_blocks = 0;
    }

    fn contains(&self, addr: usize) -> bool {
        self.region.contains(addr)
    }

    /// Pops a block, or `None` when the class is exhausted.
    fn pop(&mut self) -> Option<NonNull<u8>> {
        self.stats.alloc_requests += 1;
        let head = self.free_head;
        if head.is_null() {
            self.stats.alloc_failures += 1;
            return None;
        }
        // SAFETY: head came off this class's free list, so it points at a
        // free block inside the mapping.
        self.free_head = unsafe { (*head).next };
        self.stats.used_blocks += 1;
        self.stats.free_blocks -= 1;
        self.stats.peak_used = self.stats.peak_used.max(self.stats.used_blocks);
        // SAFETY: blocks are non-null addresses inside the mapping.
        Some(unsafe { NonNull::new_unchecked(head.cast::<u8>()) })
    }

    /// Whether `block` is already on the free list. Linear, but the
    /// class holds at most [`POOL_BLOCKS_PER_CLASS`] blocks.
    fn on_free_list(&self, block: *const PoolFreeBlock) -> bool {
        let mut current = self.free_head;
        while !current.is_null() {
            if ptr::eq(current, block) {
                return true;
            }
            // SAFETY: free-list nodes are live blocks of this mapping.
            current = unsafe { (*current).next };
        }
        false
    }

    /// Length of the free list by actual traversal, for integrity
    /// checks.
    fn free_list_len(&self) -> usize {
        let mut len = 0;
        let mut current = self.free_head;
        while !current.is_null() && len <= self.stats.total_blocks {
            len += 1;
            // SAFETY: free-list nodes are live blocks of this mapping.
            current = unsafe { (*current).next };
        }
        len
    }

    fn push(&mut self, addr: usize) -> Result<(), HeapError> {
        let offset = addr - self.region.base().as_ptr() as usize;
        if offset % self.block_size != 0 {
            return Err(HeapError::AlignmentError {
                addr,
                alignment: self.block_size,
            });
        }

        let block = addr as *mut PoolFreeBlock;
        if self.on_free_list(block) {
            return Err(HeapError::double_free(addr));
        }

        // SAFETY: addr is a block boundary inside this mapping (range and
        // offset checked above) and the block is not free, so writing the
        // link cannot clobber free-list state.
        unsafe {
            (*block).next = self.free_head;
        }
        self.free_head = block;
        self.stats.used_blocks -= 1;
        self.stats.free_blocks += 1;
        self.stats.free_requests += 1;
        Ok(())
    }
}

/// The whole pool tier: one class per entry of [`POOL_SIZE_CLASSES`].
pub(crate) struct PoolSet {
    classes: Vec<PoolClass>,
}

impl PoolSet {
    /// Maps and threads every size class.
    pub(crate) fn new() -> Result<Self, HeapError> {
        let mut classes = Vec::with_capacity(POOL_SIZE_CLASSES.len());
        for block_size in POOL_SIZE_CLASSES {
            classes.push(PoolClass::new(block_size, POOL_BLOCKS_PER_CLASS)?);
        }
        tracing::debug!(classes = classes.len(), "pool tier initialized");
        Ok(Self { classes })
    }

    /// Allocates from the smallest class that can hold `size`,
    /// overflowing into larger classes when one is exhausted. `None`
    /// means the tier does not handle this request.
    pub(crate) fn alloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        for class in &mut self.classes {
            if size > class.block_size {
                continue;
            }
            if let Some(block) = class.pop() {
                // SAFETY: a pool block is at least `size` bytes and now
                // exclusively ours; callers expect zeroed payloads.
                unsafe {
                    ptr::write_bytes(block.as_ptr(), 0, size);
                }
                return Some(block);
            }
        }
        None
    }

    /// Releases `ptr` if some class's range contains it.
    ///
    /// `None` means the pointer is not pool memory and the caller should
    /// try the variable tier; `Some(Err(_))` means it is pool memory but
    /// the release is bogus.
    pub(crate) fn free(&mut self, ptr: NonNull<u8>) -> Option<Result<(), HeapError>> {
        let addr = ptr.as_ptr() as usize;
        self.classes
            .iter_mut()
            .find(|class| class.contains(addr))
            .map(|class| class.push(addr))
    }

    /// Whether any class's mapping contains `addr`.
    pub(crate) fn contains(&self, addr: usize) -> bool {
        self.classes.iter().any(|class| class.contains(addr))
    }

    /// Snapshot of every class's counters.
    pub(crate) fn stats(&self) -> Vec<PoolClassStats> {
        self.classes.iter().map(|class| class.stats).collect()
    }

    /// Aggregate report with free-list integrity checks.
    pub(crate) fn report(&self) -> PoolReport {
        PoolReport {
            classes: self
                .classes
                .iter()
                .map(|class| PoolClassReport {
                    stats: class.stats,
                    free_list_len: class.free_list_len(),
                })
                .collect(),
        }
    }
}

/// Per-class slice of a [`PoolReport`].
#[derive(Debug, Clone, Copy)]
pub struct PoolClassReport {
    /// Counter snapshot.
    pub stats: PoolClassStats,
    /// Free blocks found by actually walking the list.
    pub free_list_len: usize,
}

impl PoolClassReport {
    /// Walk length and counters agree, and used+free covers the class.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.free_list_len == self.stats.free_blocks
            && self.stats.used_blocks + self.stats.free_blocks == self.stats.total_blocks
    }
}

/// Aggregate pool statistics, renderable for diagnostics.
#[derive(Debug, Clone)]
pub struct PoolReport {
    /// One entry per size class, smallest first.
    pub classes: Vec<PoolClassReport>,
}

impl PoolReport {
    /// Total allocation attempts across classes.
    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.classes.iter().map(|c| c.stats.alloc_requests).sum()
    }

    /// Total exhausted attempts across classes.
    #[must_use]
    pub fn total_failures(&self) -> u64 {
        self.classes.iter().map(|c| c.stats.alloc_failures).sum()
    }

    /// Failed fraction of all attempts, in percent.
    #[must_use]
    pub fn failure_rate_percent(&self) -> f64 {
        let requests = self.total_requests();
        if requests == 0 {
            0.0
        } else {
            100.0 * self.total_failures() as f64 / requests as f64
        }
    }
}

impl fmt::Display for PoolReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== pool statistics ===")?;
        for (index, class) in self.classes.iter().enumerate() {
            let s = &class.stats;
            writeln!(
                f,
                "class {index} [{} B]: used {}/{} (peak {}), requests {}, frees {}, failures {}, utilization {:.1}%",
                s.block_size,
                s.used_blocks,
                s.total_blocks,
                s.peak_used,
                s.alloc_requests,
                s.free_requests,
                s.alloc_failures,
                s.utilization_percent(),
            )?;
            if !class.is_consistent() {
                writeln!(
                    f,
                    "  WARNING: free-list length {} disagrees with counters",
                    class.free_list_len
                )?;
            }
        }
        writeln!(
            f,
            "total requests {}, failures {} ({:.1}%)",
            self.total_requests(),
            self.total_failures(),
            self.failure_rate_percent(),
        )
    }
}
