//! First-fit free-list allocator over a single mapped region.
//!
//! The free list is singly linked, circular, and sorted by block address,
//! rooted at a sentinel header that is not a real block. Allocation
//! splits the first fitting block and takes the low portion; release
//! re-inserts in address order and coalesces with both physical
//! neighbors, so no two free blocks are ever adjacent.
//!
//! # Safety
//!
//! All block headers live inside `self.region`; the only pointers that
//! leave that mapping are the sentinel (a raw heap allocation with a
//! stable address, freed on drop) and payload pointers handed to
//! callers. Every raw dereference below is on either the sentinel or a
//! header that has been range-, alignment- and magic-checked.

use core::ptr::{self, NonNull};

use crate::block::{self, BLOCK_OVERHEAD, BlockHeader, HEADER_SIZE};
use crate::config::{
    ALLOC_MAGIC, DEFAULT_HEAP_SIZE, FREE_MAGIC, MAX_HEAP_SIZE, MIN_HEAP_SIZE, MIN_HEAP_UNITS,
};
use crate::error::HeapError;
use crate::region::{Region, page_size};
use crate::utils::{align_down, checked_align_up, is_aligned};

/// Upper bound on free-list traversals in diagnostics, against cycles
/// introduced by external memory corruption.
const FREE_LIST_WALK_LIMIT: usize = 10_000;

/// The variable-size tier: region, sentinel and roving free pointer.
pub(crate) struct FreeListAllocator {
    region: Region,
    /// Anchor of the circular free list: a heap-allocated header that is
    /// not a real block, owned raw so list links may alias it freely.
    sentinel: NonNull<BlockHeader>,
    /// Where the next first-fit search begins.
    freep: *mut BlockHeader,
}

// SAFETY: the allocator exclusively owns its region and sentinel; the
// raw freep pointer targets memory owned by the same struct.
unsafe impl Send for FreeListAllocator {}

impl Drop for FreeListAllocator {
    fn drop(&mut self) {
        // SAFETY: sentinel came from Box::into_raw in new() and nothing
        // else frees it; region blocks pointing at it die with the
        // mapping.
        unsafe {
            drop(Box::from_raw(self.sentinel.as_ptr()));
        }
    }
}

impl FreeListAllocator {
    /// Maps a region for `requested_bytes` (0 = default) and seeds the
    /// free list with one block spanning it.
    pub(crate) fn new(requested_bytes: usize) -> Result<Self, HeapError> {
        let requested = if requested_bytes == 0 {
            DEFAULT_HEAP_SIZE
        } else {
            requested_bytes
        };
        let requested = requested.clamp(MIN_HEAP_SIZE, MAX_HEAP_SIZE);

        let paged = checked_align_up(requested, page_size())
            .ok_or_else(|| HeapError::init_failed("region size overflows page rounding"))?;
        let len = align_down(paged, HEADER_SIZE);
        if len / HEADER_SIZE < MIN_HEAP_UNITS {
            return Err(HeapError::init_failed("region too small for two headers"));
        }

        let region = Region::map(len, HEADER_SIZE)?;

        let sentinel_ptr = Box::into_raw(Box::new(BlockHeader::sentinel()));

        let first = region.base().as_ptr().cast::<BlockHeader>();
        // SAFETY: the region is at least MIN_HEAP_UNITS headers long and
        // its base is HEADER_SIZE-aligned (checked by Region::map);
        // sentinel_ptr is a fresh heap allocation.
        unsafe {
            BlockHeader::init_free(first, len, sentinel_ptr);
            (*sentinel_ptr).next = first;
        }

        tracing::debug!(len, "free-list region initialized");

        // SAFETY: Box::into_raw never returns null.
        let sentinel = unsafe { NonNull::new_unchecked(sentinel_ptr) };
        Ok(Self {
            region,
            sentinel,
            freep: sentinel_ptr,
        })
    }

    fn sentinel_ptr(&self) -> *mut BlockHeader {
        self.sentinel.as_ptr()
    }

    /// The backing region.
    pub(crate) fn region(&self) -> &Region {
        &self.region
    }

    /// Whether `addr` lies inside the variable region.
    pub(crate) fn contains(&self, addr: usize) -> bool {
        self.region.contains(addr)
    }

    /// First-fit allocation of `request` payload bytes.
    pub(crate) fn allocate(&mut self, request: usize) -> Result<NonNull<u8>, HeapError> {
        if request == 0 {
            return Err(HeapError::invalid_size(0));
        }

        let payload =
            checked_align_up(request, HEADER_SIZE).ok_or(HeapError::overflow("payload rounding"))?;
        let total = payload
            .checked_add(BLOCK_OVERHEAD)
            .ok_or(HeapError::overflow("block sizing"))?;
        if total > self.region.len() {
            return Err(HeapError::out_of_memory(request, self.region.len()));
        }

        let start = self.freep;
        let mut prev = start;
        // SAFETY: prev/p only ever hold the sentinel or free-list nodes,
        // all of which are live headers (list integrity is a module
        // invariant re-established by every public operation).
        unsafe {
            let mut p = (*prev).next;
            loop {
                if !(*p).is_in_use() && (*p).size() >= total {
                    let remainder = (*p).size() - total;
                    if remainder >= BLOCK_OVERHEAD {
                        // Split: the caller gets the low portion, the
                        // remainder becomes a free block spliced in where
                        // the consumed block sat (address order holds).
                        let rem = (p as usize + total) as *mut BlockHeader;
                        BlockHeader::init_free(rem, remainder, (*p).next);
                        (*prev).next = rem;
                        (*p).set_size(total);
                    } else {
                        // Too small to split; hand over the whole block.
                        (*prev).next = (*p).next;
                    }

                    (*p).next = ptr::null_mut();
                    (*p).set_in_use();
                    (*p).set_magic(ALLOC_MAGIC);

                    let header = NonNull::new_unchecked(p);
                    block::write_fences(header);
                    block::zero_payload(header);

                    self.freep = prev;
                    return Ok(block::payload_ptr(header));
                }

                if p == start {
                    // Walked the full circle without a fit.
                    return Err(HeapError::out_of_memory(request, self.region.len()));
                }
                prev = p;
                p = (*p).next;
            }
        }
    }

    /// Validates that `payload_addr` designates a block of this region.
    ///
    /// Strictly stricter than a range check: header alignment, plausible
    /// size and a known magic are all required. Shared with the
    /// collector's sweep phase.
    pub(crate) fn validate_payload(
        &self,
        payload_addr: usize,
    ) -> Result<NonNull<BlockHeader>, HeapError> {
        let Some(header_addr) = block::header_addr_from_payload(payload_addr) else {
            return Err(HeapError::invalid_pointer(payload_addr, "address underflow"));
        };
        if !self.region.contains(header_addr) {
            return Err(HeapError::invalid_pointer(payload_addr, "outside region"));
        }
        if !is_aligned(header_addr, HEADER_SIZE) {
            return Err(HeapError::invalid_pointer(payload_addr, "misaligned header"));
        }

        let header = header_addr as *mut BlockHeader;
        // SAFETY: header_addr is inside the region and aligned, so it is
        // readable as a header; the checks below decide whether its
        // contents are plausible.
        let (size, magic) = unsafe { ((*header).size(), (*header).magic()) };

        let end = self.region.base().as_ptr() as usize + self.region.len();
        if size < BLOCK_OVERHEAD
            || !is_aligned(size, HEADER_SIZE)
            || header_addr + size > end
        {
            return Err(HeapError::invalid_pointer(payload_addr, "implausible size"));
        }
        if magic != ALLOC_MAGIC && magic != FREE_MAGIC {
            return Err(HeapError::invalid_pointer(payload_addr, "unknown magic"));
        }

        // SAFETY: header is non-null (inside a mapping).
        Ok(unsafe { NonNull::new_unchecked(header) })
    }

    /// Releases the block owning `payload`, poisoning its payload and
    /// coalescing with both physical neighbors.
    pub(crate) fn release(&mut self, payload: NonNull<u8>) -> Result<(), HeapError> {
        let header = self.validate_payload(payload.as_ptr() as usize)?;
        let bp = header.as_ptr();
        let addr = bp as usize;

        // SAFETY: header passed validate_payload, so it is a live block
        // header of this region.
        unsafe {
            if !(*bp).is_in_use() {
                return Err(HeapError::double_free(addr));
            }
            if (*bp).magic() != ALLOC_MAGIC {
                return Err(HeapError::corruption(addr, "in-use block without alloc magic"));
            }

            block::check_fences(header)?;
            block::poison_payload(header);

            (*bp).clear_in_use();
            (*bp).set_magic(FREE_MAGIC);
        }

        let sentinel = self.sentinel_ptr();
        // SAFETY: prev walks the circular free list (sentinel included),
        // which contains only live headers; bp is a validated block that
        // is not on the list (it was in use until just now).
        unsafe {
            // Find the unique address-ordered insertion point, handling
            // the wrap position where the list folds back past the
            // highest address.
            let mut prev = self.freep;
            loop {
                let next = (*prev).next;
                if (prev as usize) < addr && addr < (next as usize) {
                    break;
                }
                if (prev as usize) >= (next as usize)
                    && (addr > prev as usize || addr < next as usize)
                {
                    break;
                }
                prev = next;
            }

            // Coalesce with the upper neighbor.
            let next = (*prev).next;
            if next != sentinel && addr + (*bp).size() == next as usize {
                (*bp).set_size((*bp).size() + (*next).size());
                (*bp).next = (*next).next;
            } else {
                (*bp).next = next;
            }

            // Coalesce with the lower neighbor.
            if prev != sentinel && (prev as usize) + (*prev).size() == addr {
                (*prev).set_size((*prev).size() + (*bp).size());
                (*prev).next = (*bp).next;
            } else {
                (*prev).next = bp;
            }

            self.freep = prev;
        }

        Ok(())
    }

    /// Linear walk over every block in the region, in address order.
    pub(crate) fn blocks(&self) -> Blocks<'_> {
        let base = self.region.base().as_ptr() as usize;
        Blocks {
            next_addr: base,
            end: base + self.region.len(),
            _owner: core::marker::PhantomData,
        }
    }

    /// Free blocks in list order (not address order of the walk),
    /// bounded against corrupted cycles.
    pub(crate) fn free_blocks_in_list_order(&self) -> Vec<NonNull<BlockHeader>> {
        let sentinel = self.sentinel_ptr().cast_const();
        let mut out = Vec::new();
        // SAFETY: list nodes are live headers; the iteration cap guards
        // against cycles caused by external corruption.
        unsafe {
            let mut p = (*self.sentinel_ptr()).next;
            let mut steps = 0;
            while p.cast_const() != sentinel {
                if steps >= FREE_LIST_WALK_LIMIT {
                    tracing::warn!("free list suspiciously long, truncating walk");
                    break;
                }
                out.push(NonNull::new_unchecked(p));
                p = (*p).next;
                steps += 1;
            }
        }
        out
    }

    /// Total bytes sitting on the free list.
    pub(crate) fn free_bytes(&self) -> usize {
        self.free_blocks_in_list_order()
            .iter()
            // SAFETY: pointers come fresh from the free-list walk.
            .map(|h| unsafe { h.as_ref().size() })
            .sum()
    }
}

/// Address-ordered iterator over all blocks of the region.
pub(crate) struct Blocks<'heap> {
    next_addr: usize,
    end: usize,
    _owner: core::marker::PhantomData<&'heap FreeListAllocator>,
}

impl Iterator for Blocks<'_> {
    type Item = NonNull<BlockHeader>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_addr >= self.end {
            return None;
        }
        let header = self.next_addr as *mut BlockHeader;
        // SAFETY: next_addr starts at the region base and advances by
        // stored block sizes; the guards below stop the walk instead of
        // stepping outside the mapping when a size is implausible.
        let size = unsafe { (*header).size() };
        if size < HEADER_SIZE || !is_aligned(size, HEADER_SIZE) || self.next_addr + size > self.end
        {
            tracing::warn!(addr = self.next_addr, size, "block walk hit implausible size");
            self.next_addr = self.end;
            return None;
        }
        self.next_addr += size;
        // SAFETY: header points inside the mapping.
        Some(unsafe { NonNull::new_unchecked(header) })
    }
}
