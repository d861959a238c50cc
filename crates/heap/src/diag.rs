//! Read-only heap diagnostics: block walk, walk report, raw region dump.
//!
//! Everything here observes and renders; nothing mutates heap state. The
//! per-block records are the interface external tooling consumes, the
//! reports are plain strings so callers decide where they go.

use core::fmt::Write as _;

use crate::block;
use crate::config::{ALLOC_MAGIC, FREE_MAGIC};
use crate::freelist::FreeListAllocator;

/// What the magic word of a block claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMagic {
    /// `ALLOC_MAGIC`: block claims to be allocated.
    Allocated,
    /// `FREE_MAGIC`: block claims to be free.
    Free,
    /// Anything else: corruption or a stray write.
    Unknown(usize),
}

impl BlockMagic {
    fn classify(raw: usize) -> Self {
        match raw {
            ALLOC_MAGIC => Self::Allocated,
            FREE_MAGIC => Self::Free,
            other => Self::Unknown(other),
        }
    }
}

/// Canary health of an in-use block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FenceStatus {
    /// Pre-payload canary intact.
    pub pre_intact: bool,
    /// Post-payload canary intact.
    pub post_intact: bool,
}

/// One record of the linear block walk.
#[derive(Debug, Clone, Copy)]
pub struct BlockInfo {
    /// Address of the block header.
    pub header_addr: usize,
    /// Address of the payload between the canaries.
    pub payload_addr: usize,
    /// Whole block size: header, canaries and payload.
    pub total_size: usize,
    /// Payload capacity.
    pub payload_size: usize,
    /// IN-USE flag.
    pub in_use: bool,
    /// MARK flag; nonzero only inside a collection cycle.
    pub marked: bool,
    /// Magic classification.
    pub magic: BlockMagic,
    /// Canary status, checked only for in-use blocks.
    pub fences: Option<FenceStatus>,
}

impl BlockInfo {
    /// Flag/magic agreement per the block-state invariant.
    #[must_use]
    pub fn state_is_consistent(&self) -> bool {
        matches!(
            (self.in_use, self.magic),
            (true, BlockMagic::Allocated) | (false, BlockMagic::Free)
        )
    }
}

/// Captures the linear walk as a vector of records.
pub(crate) fn capture_walk(freelist: &FreeListAllocator) -> Vec<BlockInfo> {
    freelist
        .blocks()
        .map(|header| {
            // SAFETY: the walk yields live, size-validated headers and
            // nothing mutates the heap while `freelist` is shared.
            unsafe {
                let h = header.as_ref();
                let in_use = h.is_in_use();
                let fences = in_use.then(|| {
                    let (pre_intact, post_intact) = block::fence_status(header);
                    FenceStatus {
                        pre_intact,
                        post_intact,
                    }
                });
                BlockInfo {
                    header_addr: header.as_ptr() as usize,
                    payload_addr: block::payload_addr(header.as_ptr() as usize),
                    total_size: h.size(),
                    payload_size: h.payload_size(),
                    in_use,
                    marked: h.is_marked(),
                    magic: BlockMagic::classify(h.magic()),
                    fences,
                }
            }
        })
        .collect()
}

/// Renders the block walk, one line per block.
pub(crate) fn walk_report(freelist: &FreeListAllocator) -> String {
    let base = freelist.region().base().as_ptr() as usize;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "=== heap walk: region {base:#x}, {} bytes ===",
        freelist.region().len()
    );
    for (index, info) in capture_walk(freelist).iter().enumerate() {
        let state = if info.in_use { "used" } else { "free" };
        let magic = match info.magic {
            BlockMagic::Allocated => "alloc".to_string(),
            BlockMagic::Free => "free".to_string(),
            BlockMagic::Unknown(raw) => format!("?{raw:#x}"),
        };
        let fences = match info.fences {
            Some(FenceStatus {
                pre_intact: true,
                post_intact: true,
            }) => " fences=ok",
            Some(FenceStatus {
                pre_intact: false, ..
            }) => " fences=PRE-DAMAGED",
            Some(_) => " fences=POST-DAMAGED",
            None => "",
        };
        let _ = writeln!(
            out,
            "block {index}: header={:#x} payload={:#x} total={} payload_size={} {state} magic={magic}{}{}",
            info.header_addr,
            info.payload_addr,
            info.total_size,
            info.payload_size,
            fences,
            if info.marked { " marked" } else { "" },
        );
    }
    out
}

/// Renders the free list in list order, with the walk-limit guard the
/// allocator applies against corrupted cycles.
pub(crate) fn free_list_report(freelist: &FreeListAllocator) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== free list ===");
    for (index, header) in freelist.free_blocks_in_list_order().iter().enumerate() {
        // SAFETY: entries come fresh off the guarded list walk.
        let size = unsafe { header.as_ref().size() };
        let _ = writeln!(
            out,
            "free {index}: addr={:#x} bytes={size}",
            header.as_ptr() as usize
        );
    }
    out
}

/// Hex dump of the whole region, 16 bytes per row.
pub(crate) fn raw_dump(freelist: &FreeListAllocator) -> String {
    // SAFETY: read-only snapshot of the region; `freelist` is borrowed
    // shared, so no allocator mutation overlaps the read.
    let bytes = unsafe { freelist.region().as_bytes() };
    let base = freelist.region().base().as_ptr() as usize;

    let mut out = String::new();
    let _ = writeln!(out, "=== raw region dump: {} bytes ===", bytes.len());
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let _ = write!(out, "{:#010x}: ", base + row * 16);
        for b in chunk {
            let _ = write!(out, "{b:02x} ");
        }
        let _ = writeln!(out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::POISON_BYTE;

    #[test]
    fn walk_records_match_heap_shape() {
        let mut freelist = FreeListAllocator::new(10 * 1024).unwrap();
        let p1 = freelist.allocate(100).unwrap();
        let _p2 = freelist.allocate(200).unwrap();
        freelist.release(p1).unwrap();

        let walk = capture_walk(&freelist);
        assert_eq!(walk.len(), 3);
        assert!(!walk[0].in_use);
        assert!(walk[1].in_use);
        assert!(!walk[2].in_use);
        assert!(walk.iter().all(BlockInfo::state_is_consistent));
        assert!(walk.iter().all(|b| !b.marked));

        let covered: usize = walk.iter().map(|b| b.total_size).sum();
        assert_eq!(covered, freelist.region().len());

        // Fences are only checked on the in-use block, and are intact.
        assert_eq!(
            walk[1].fences,
            Some(FenceStatus {
                pre_intact: true,
                post_intact: true
            })
        );
        assert!(walk[0].fences.is_none());
    }

    #[test]
    fn tampered_fence_shows_in_walk() {
        let mut freelist = FreeListAllocator::new(10 * 1024).unwrap();
        let p = freelist.allocate(100).unwrap();
        // SAFETY: the byte below the payload is the pre-canary.
        unsafe {
            *p.as_ptr().sub(1) = 0;
        }

        let walk = capture_walk(&freelist);
        assert_eq!(
            walk[0].fences,
            Some(FenceStatus {
                pre_intact: false,
                post_intact: true
            })
        );

        let report = walk_report(&freelist);
        assert!(report.contains("PRE-DAMAGED"));
    }

    #[test]
    fn reports_render_without_mutating() {
        let mut freelist = FreeListAllocator::new(10 * 1024).unwrap();
        let p = freelist.allocate(64).unwrap();
        freelist.release(p).unwrap();

        let before = capture_walk(&freelist);
        let _ = walk_report(&freelist);
        let _ = free_list_report(&freelist);
        let dump = raw_dump(&freelist);
        let after = capture_walk(&freelist);

        assert_eq!(before.len(), after.len());
        assert_eq!(before[0].total_size, after[0].total_size);

        // The poisoned payload shows up in the raw bytes.
        assert!(dump.contains(&format!("{POISON_BYTE:02x} ")));
    }

    #[test]
    fn free_list_report_lists_every_free_block() {
        let mut freelist = FreeListAllocator::new(10 * 1024).unwrap();
        let p1 = freelist.allocate(1600).unwrap();
        let _p2 = freelist.allocate(1600).unwrap();
        freelist.release(p1).unwrap();

        let report = free_list_report(&freelist);
        // Freed head block and the trailing remainder.
        assert_eq!(report.matches("free ").count(), 2);
    }
}
