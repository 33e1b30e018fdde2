//! End-to-end scenarios from the allocator's behavioral contract, one
//! function per scenario. Each test builds its own [`Allocator`] instance
//! rather than touching the process-wide singleton, so they can run
//! concurrently under the default test harness.

use lingua_memory::{Allocator, AllocatorConfig, ErrorCode};

fn config() -> AllocatorConfig {
    AllocatorConfig {
        small_block_size: 64,
        small_pool_size: 1024 * 1024,
        large_pool_size: 10 * 1024 * 1024,
        max_pools: 2,
        objects_per_slab: 64,
    }
}

/// Scenario 1: a small allocation lands in the slab cache and is never
/// counted toward any pool's used-byte total.
#[test]
fn scenario_1_slab_allocation_excluded_from_pool_stats() {
    let alloc = Allocator::new(config()).unwrap();
    let before = alloc.get_stats();
    let p = alloc.alloc(32).unwrap();
    assert!(!p.is_null());
    let after = alloc.get_stats();
    assert_eq!(before.total_used, after.total_used);
}

/// Scenario 2: freeing the first of two equal-size allocations makes the
/// next allocation of the same size reclaim exactly that hole.
#[test]
fn scenario_2_first_fit_reclaims_freed_hole() {
    let alloc = Allocator::new(config()).unwrap();
    let p1 = alloc.alloc(200).unwrap();
    let p2 = alloc.alloc(200).unwrap();
    alloc.free(p1).unwrap();
    let p3 = alloc.alloc(200).unwrap();
    assert_eq!(p1, p3);
    alloc.free(p2).unwrap();
    alloc.free(p3).unwrap();
}

/// Scenario 3: realloc to a smaller size is the identity; growing further
/// either stays in place (if the physical neighbor is free and large
/// enough) or moves, preserving the original bytes.
#[test]
fn scenario_3_realloc_shrink_then_grow_preserves_data() {
    let alloc = Allocator::new(config()).unwrap();
    let p = alloc.alloc(1000).unwrap();
    // SAFETY: `p` was just allocated with payload >= 1000 bytes.
    unsafe {
        for i in 0..1000u8 {
            p.add(i as usize).write(i);
        }
    }
    let p2 = alloc.realloc(p, 500).unwrap();
    assert_eq!(p, p2);

    let p3 = alloc.realloc(p2, 2000).unwrap();
    // SAFETY: both `p2` and `p3` have at least 1000 valid payload bytes:
    // `p2` because it was never shrunk physically, `p3` because realloc
    // copies at least the old payload on a move.
    unsafe {
        for i in 0..1000u8 {
            assert_eq!(p3.add(i as usize).read(), i);
        }
    }
}

/// Scenario 4 (soak variant lives in `random_trace.rs`): a minimal smoke
/// check that draining every live allocation returns `total_used` to zero.
#[test]
fn scenario_4_full_drain_zeros_used_bytes() {
    let alloc = Allocator::new(config()).unwrap();
    let mut live = Vec::new();
    for size in [100usize, 500, 1500, 4000] {
        live.push(alloc.alloc(size).unwrap());
    }
    for p in live {
        alloc.free(p).unwrap();
    }
    assert_eq!(alloc.get_stats().total_used, 0);
}

/// Scenario 5: after a pool is destroyed, prior pointers no longer test as
/// contained in it.
#[test]
fn scenario_5_destroyed_pool_rejects_prior_pointers() {
    let alloc = Allocator::new(config()).unwrap();
    alloc.destroy(0).unwrap();
    let pool_id = alloc.create(65536).unwrap();
    let p = alloc.alloc_from(pool_id, 64).unwrap();
    assert!(alloc.contains(pool_id, p));
    alloc.destroy(pool_id).unwrap();
    assert!(!alloc.contains(pool_id, p));
}

/// Scenario 6: with leak tracking enabled, allocating three blocks and
/// freeing two leaves exactly one surviving record.
#[cfg(feature = "debug-leak-tracking")]
#[test]
fn scenario_6_leak_check_reports_the_surviving_block() {
    use lingua_memory::leak_check;

    lingua_memory::cleanup();
    lingua_memory::init(config()).unwrap();
    let a = lingua_memory::alloc(64).unwrap();
    let b = lingua_memory::alloc(64).unwrap();
    let c = lingua_memory::alloc(64).unwrap();
    lingua_memory::free(a).unwrap();
    lingua_memory::free(c).unwrap();

    let leaks = leak_check();
    assert_eq!(leaks.len(), 1);
    assert_eq!(leaks[0].ptr, b as usize);

    lingua_memory::free(b).unwrap();
    lingua_memory::cleanup();
}

#[test]
fn allocation_exceeding_every_pool_returns_error_with_unchanged_state() {
    let alloc = Allocator::new(config()).unwrap();
    let before = alloc.get_stats();
    let result = alloc.alloc(50 * 1024 * 1024);
    assert_eq!(result, Err(ErrorCode::PoolAllocFailed));
    assert_eq!(alloc.get_stats(), before);
}

#[test]
fn realloc_null_is_alloc_and_realloc_zero_is_free() {
    let alloc = Allocator::new(config()).unwrap();
    // 300 bytes is above the slab ceiling, so this lands in a pool and
    // shows up in `total_used`.
    let p = alloc.realloc(std::ptr::null_mut(), 300).unwrap();
    assert!(!p.is_null());
    let before = alloc.get_stats();
    let null_result = alloc.realloc(p, 0).unwrap();
    assert!(null_result.is_null());
    assert!(alloc.get_stats().total_used < before.total_used);
}
