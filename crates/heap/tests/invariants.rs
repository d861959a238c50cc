//! Property tests: the structural invariants of the heap hold after
//! arbitrary interleavings of allocation, release and collection.

use palisade_heap::prelude::*;

use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    /// Allocate this many bytes and keep the pointer.
    Alloc(usize),
    /// Free the live pointer at this index (modulo the live set).
    Free(usize),
    /// Run a collection cycle with no roots: every live pointer we hold
    /// is unrooted garbage from the collector's point of view.
    Collect,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (1usize..3000).prop_map(Op::Alloc),
        3 => (0usize..64).prop_map(Op::Free),
        1 => Just(Op::Collect),
    ]
}

/// Structural invariants checked after every operation:
/// the linear walk covers the region exactly, block states are
/// consistent, no two free blocks are adjacent, marks are clear, and
/// pool counters stay complementary.
fn assert_heap_invariants(heap: &Heap) {
    let walk = heap.walk();
    let covered: usize = walk.iter().map(|b| b.total_size).sum();
    assert_eq!(covered, heap.region_len(), "walk must cover the region");

    let mut previous_free = false;
    for block in &walk {
        assert!(
            block.state_is_consistent(),
            "magic/flag mismatch: {block:?}"
        );
        assert!(!block.marked, "marks must be clear between cycles");
        assert!(
            !(previous_free && !block.in_use),
            "two adjacent free blocks survived coalescing"
        );
        if let Some(fences) = block.fences {
            assert!(fences.pre_intact && fences.post_intact);
        }
        previous_free = !block.in_use;
    }

    if let Some(stats) = heap.pool_stats() {
        for class in stats {
            assert_eq!(
                class.used_blocks + class.free_blocks,
                class.total_blocks,
                "pool counters must stay complementary"
            );
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn invariants_hold_under_variable_tier_churn(ops in proptest::collection::vec(op_strategy(), 1..120)) {
        let mut heap = Heap::with_config(HeapConfig {
            requested_bytes: 32 * 1024,
            enable_pools: false,
            enable_spray_check: false,
            ..HeapConfig::default()
        }).unwrap();

        let mut live: Vec<*mut u8> = Vec::new();
        for op in ops {
            match op {
                Op::Alloc(size) => {
                    if let Ok(p) = heap.alloc(size) {
                        live.push(p.as_ptr());
                    }
                }
                Op::Free(index) => {
                    if !live.is_empty() {
                        let p = live.swap_remove(index % live.len());
                        // SAFETY: p came from this heap and is removed
                        // from the live set before the free.
                        unsafe { heap.free(p).expect("freeing a live pointer"); }
                    }
                }
                Op::Collect => {
                    let swept = heap.collect().swept_blocks;
                    // Everything we held was unrooted, so it is all gone.
                    prop_assert_eq!(swept, live.len());
                    live.clear();
                }
            }
            assert_heap_invariants(&heap);
        }

        // Draining the live set returns the heap to one free block.
        for p in live.drain(..) {
            // SAFETY: still-live pointer from this heap.
            unsafe { heap.free(p).expect("freeing a live pointer"); }
        }
        assert_heap_invariants(&heap);
        prop_assert_eq!(heap.free_bytes(), heap.region_len());
    }

    #[test]
    fn invariants_hold_with_pool_tier(ops in proptest::collection::vec(op_strategy(), 1..80)) {
        let mut heap = Heap::with_config(HeapConfig {
            requested_bytes: 32 * 1024,
            enable_spray_check: false,
            ..HeapConfig::default()
        }).unwrap();

        let mut live: Vec<*mut u8> = Vec::new();
        for op in ops {
            match op {
                Op::Alloc(size) => {
                    if let Ok(p) = heap.alloc(size) {
                        live.push(p.as_ptr());
                    }
                }
                Op::Free(index) => {
                    if !live.is_empty() {
                        let p = live.swap_remove(index % live.len());
                        // SAFETY: p came from this heap and is removed
                        // from the live set before the free.
                        unsafe { heap.free(p).expect("freeing a live pointer"); }
                    }
                }
                Op::Collect => {
                    // Pool blocks are never collected; only variable-tier
                    // pointers leave the live set.
                    heap.collect();
                    live.retain(|&p| !heap.owns_variable(p as usize));
                }
            }
            assert_heap_invariants(&heap);
        }
    }

    #[test]
    fn double_free_never_mutates(sizes in proptest::collection::vec(1usize..2000, 1..12)) {
        let mut heap = Heap::with_config(HeapConfig {
            requested_bytes: 32 * 1024,
            enable_pools: false,
            enable_spray_check: false,
            ..HeapConfig::default()
        }).unwrap();

        let ptrs: Vec<_> = sizes.iter().filter_map(|&s| heap.alloc(s).ok()).collect();
        for p in &ptrs {
            // SAFETY: live pointer from this heap.
            unsafe { heap.free(p.as_ptr()).unwrap(); }
        }

        let shape: Vec<_> = heap.walk().iter().map(|b| (b.total_size, b.in_use)).collect();
        for p in &ptrs {
            // SAFETY: stale pointer; exactly what double-free detection
            // is for.
            let err = unsafe { heap.free(p.as_ptr()) };
            prop_assert!(err.is_err());
            let after: Vec<_> = heap.walk().iter().map(|b| (b.total_size, b.in_use)).collect();
            prop_assert_eq!(&after, &shape);
        }
    }
}
