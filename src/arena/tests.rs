//! Arena pool tests
//!
//! Test suite organized by component:
//! - Construction: sizing and failure handling
//! - Small Path: bump allocation, alignment, block growth
//! - Large Path: tracking, freeing, slot recycling, unwinding
//! - Cleanup: registration and teardown ordering
//! - Reset: reuse without teardown
//! - Teardown: release of every heap block

use super::*;
use crate::heap::TrackingHeap;
use core::ptr::NonNull;
use proptest::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;

fn addr(ptr: NonNull<u8>) -> usize {
    ptr.as_ptr() as usize
}

/// Fill block 0 exactly, so the next small request must grow the chain
fn fill_first_block<H: RawHeap>(pool: &mut ArenaPool<H>) {
    let remaining = pool.block_remaining(0).unwrap();
    pool.alloc_unaligned(remaining).expect("fill block 0");
    assert_eq!(pool.block_remaining(0), Some(0));
}

// ===== Construction Tests =====

#[test]
fn construction_derives_max_from_pool_size() {
    let pool = ArenaPool::new(512).expect("pool");
    assert_eq!(pool.max_small(), 512 - POOL_HEADER_SIZE);
    assert_eq!(pool.block_count(), 1);
    assert_eq!(pool.current_block(), 0);
    assert_eq!(pool.block_remaining(0), Some(512 - POOL_HEADER_SIZE));
}

#[test]
fn construction_caps_max_below_one_page() {
    let pool = ArenaPool::new(1024 * 1024).expect("pool");
    assert_eq!(pool.max_small(), page_size() - 1);
}

#[test]
fn construction_rejects_pool_smaller_than_minimum() {
    let err = ArenaPool::new(MIN_POOL_SIZE - 1).err().expect("too small");
    assert_eq!(
        err,
        AllocError::PoolTooSmall {
            requested: MIN_POOL_SIZE - 1,
            minimum: MIN_POOL_SIZE,
        }
    );
}

#[test]
fn construction_fails_when_heap_exhausted() {
    let heap = TrackingHeap::new();
    heap.fail_next(1);
    let err = ArenaPool::with_heap(1024, &heap).err().expect("exhausted");
    assert_eq!(err, AllocError::HeapExhausted { requested: 1024 });
    assert_eq!(heap.live_bytes(), 0);
}

#[test]
fn from_config_uses_pool_size() {
    let config = crate::config::ArenaConfig { pool_size: 2048 };
    let pool = ArenaPool::from_config(&config).expect("pool");
    assert_eq!(pool.block_size(), 2048);
}

// ===== Small Path Tests =====

#[test]
fn small_allocations_are_sequential() {
    let mut pool = ArenaPool::new(1024).expect("pool");

    let a = pool.alloc(64).expect("a");
    let b = pool.alloc(64).expect("b");
    let c = pool.alloc(64).expect("c");

    assert_eq!(addr(b), addr(a) + 64);
    assert_eq!(addr(c), addr(b) + 64);
    assert_eq!(pool.block_count(), 1);
}

#[test]
fn aligned_allocations_are_word_aligned() {
    let mut pool = ArenaPool::new(1024).expect("pool");

    for size in [1, 3, 5, 7, 13] {
        pool.alloc_unaligned(size).expect("misalign cursor");
        let ptr = pool.alloc(size).expect("aligned");
        assert_eq!(addr(ptr) % WORD_ALIGN, 0, "not word aligned after {}", size);
    }
}

#[test]
fn unaligned_allocations_pack_densely() {
    let mut pool = ArenaPool::new(1024).expect("pool");

    let a = pool.alloc_unaligned(3).expect("a");
    let b = pool.alloc_unaligned(5).expect("b");
    let c = pool.alloc_unaligned(1).expect("c");

    assert_eq!(addr(b), addr(a) + 3);
    assert_eq!(addr(c), addr(b) + 5);
}

#[test]
fn zero_size_allocation_returns_pointer() {
    let mut pool = ArenaPool::new(512).expect("pool");
    assert!(pool.alloc(0).is_some());
    assert_eq!(pool.block_remaining(0), Some(512 - POOL_HEADER_SIZE));
}

#[test]
fn zeroed_allocation_clears_reused_memory() {
    let mut pool = ArenaPool::new(512).expect("pool");

    let dirty = pool.alloc_unaligned(64).expect("dirty");
    unsafe { core::ptr::write_bytes(dirty.as_ptr(), 0xAA, 64) };

    pool.reset();
    let clean = pool.alloc_zeroed(64).expect("zeroed");
    assert_eq!(clean, dirty);

    let bytes = unsafe { core::slice::from_raw_parts(clean.as_ptr(), 64) };
    assert!(bytes.iter().all(|&b| b == 0));
}

#[test]
fn overflow_grows_chain_with_uniform_blocks() {
    let heap = TrackingHeap::new();
    let mut pool = ArenaPool::with_heap(512, &heap).expect("pool");

    fill_first_block(&mut pool);
    let ptr = pool.alloc(100).expect("from new block");

    assert_eq!(pool.block_count(), 2);
    assert_eq!(heap.obtains(), 2);
    assert_eq!(heap.live_bytes(), 1024);

    // Served right after the minimal header of the new block
    assert_eq!(pool.block_remaining(1), Some(512 - BLOCK_HEADER_SIZE - 100));
    assert_eq!(addr(ptr) % WORD_ALIGN, 0);
}

#[test]
fn scan_reuses_room_left_in_earlier_blocks() {
    let mut pool = ArenaPool::new(512).expect("pool");

    pool.alloc(400).expect("block 0 mostly full");
    pool.alloc(400).expect("grows block 1");
    assert_eq!(pool.block_count(), 2);

    // Still fits in block 0's tail
    pool.alloc(16).expect("small");
    assert_eq!(pool.block_count(), 2);
    assert_eq!(pool.block_remaining(0), Some(512 - POOL_HEADER_SIZE - 400 - 16));
}

#[test]
fn growth_failure_returns_none() {
    let heap = TrackingHeap::new();
    let mut pool = ArenaPool::with_heap(256, &heap).expect("pool");

    fill_first_block(&mut pool);
    heap.fail_next(1);

    assert!(pool.alloc(32).is_none());
    assert_eq!(pool.block_count(), 1);

    // Heap recovered, growth works again
    assert!(pool.alloc(32).is_some());
    assert_eq!(pool.block_count(), 2);
}

#[test]
fn current_block_advances_after_repeated_failures() {
    let mut pool = ArenaPool::new(256).expect("pool");
    let max = pool.max_small();

    // Each max-sized request after the first needs a fresh block
    pool.alloc(max).expect("fills block 0");
    for growth in 1..=5 {
        pool.alloc(max).expect("growth");
        assert_eq!(pool.block_count(), growth + 1);
        assert_eq!(pool.current_block(), 0);
    }
    assert_eq!(pool.block_failures(0), Some(4));

    pool.alloc(max).expect("sixth growth");
    assert_eq!(pool.block_failures(0), Some(5));
    assert_eq!(pool.current_block(), 1);
}

#[test]
fn retired_block_is_skipped_even_with_room() {
    let mut pool = ArenaPool::new(256).expect("pool");
    let max = pool.max_small();

    // Leave 8 bytes free in block 0, then grow six times
    pool.alloc(max - 8).expect("block 0");
    for _ in 0..6 {
        pool.alloc(max).expect("growth");
    }
    assert_eq!(pool.current_block(), 1);

    pool.alloc(8).expect("small");
    assert_eq!(pool.block_remaining(0), Some(8));
}

proptest! {
    #[test]
    fn small_allocations_never_overlap(sizes in prop::collection::vec(1usize..48, 1..40)) {
        let mut pool = ArenaPool::new(4096).expect("pool");
        let budget = pool.max_small();
        let total: usize = sizes.iter().sum();
        prop_assume!(total <= budget);

        let mut regions = Vec::new();
        for &size in &sizes {
            let before = pool.stats().bytes_used;
            let ptr = pool.alloc_unaligned(size).expect("fits");
            let after = pool.stats().bytes_used;
            prop_assert_eq!(after - before, size);
            regions.push((addr(ptr), size));
        }

        regions.sort_unstable();
        for pair in regions.windows(2) {
            prop_assert!(pair[0].0 + pair[0].1 <= pair[1].0);
        }
        prop_assert_eq!(pool.block_count(), 1);
    }

    #[test]
    fn aligned_allocations_always_word_aligned(sizes in prop::collection::vec(0usize..64, 1..32)) {
        let mut pool = ArenaPool::new(4096).expect("pool");
        for &size in &sizes {
            let ptr = pool.alloc(size).expect("alloc");
            prop_assert_eq!(addr(ptr) % WORD_ALIGN, 0);
        }
    }
}

// ===== Large Path Tests =====

#[test]
fn request_above_max_uses_heap_directly() {
    let heap = TrackingHeap::new();
    let mut pool = ArenaPool::with_heap(512, &heap).expect("pool");

    let big = pool.alloc(512).expect("large");
    assert_eq!(heap.obtains(), 2);
    assert_eq!(pool.large_len(), 1);
    assert_eq!(pool.block_count(), 1);

    unsafe { core::ptr::write_bytes(big.as_ptr(), 0xCD, 512) };
}

#[test]
fn large_record_consumes_small_space() {
    let mut pool = ArenaPool::new(512).expect("pool");
    let before = pool.block_remaining(0).unwrap();

    pool.alloc(1024).expect("large");

    let after = pool.block_remaining(0).unwrap();
    assert!(before - after >= core::mem::size_of::<LargeAllocRecord>());
}

#[test]
fn free_releases_and_keeps_slot() {
    let heap = TrackingHeap::new();
    let mut pool = ArenaPool::with_heap(512, &heap).expect("pool");

    let big = pool.alloc(2048).expect("large");
    assert!(pool.free(big));

    assert_eq!(pool.large_len(), 1);
    assert_eq!(pool.stats().large_live, 0);
    assert_eq!(heap.live_bytes(), 512);
}

#[test]
fn freed_slot_is_recycled() {
    let mut pool = ArenaPool::new(512).expect("pool");

    let first = pool.alloc(2048).expect("first");
    pool.free(first);
    let used = pool.stats().bytes_used;

    pool.alloc(4096).expect("second");
    assert_eq!(pool.large_len(), 1);
    assert_eq!(pool.stats().large_live, 1);
    // No new record was carved
    assert_eq!(pool.stats().bytes_used, used);
}

#[test]
fn recycling_scan_is_bounded() {
    let mut pool = ArenaPool::new(1024).expect("pool");

    let oldest = pool.alloc(2048).expect("oldest");
    for _ in 0..LARGE_SCAN_DEPTH {
        pool.alloc(2048).expect("newer");
    }
    // The oldest record sits past the scan depth
    pool.free(oldest);

    pool.alloc(2048).expect("fresh record");
    assert_eq!(pool.large_len(), LARGE_SCAN_DEPTH + 2);
}

#[test]
fn free_of_unknown_pointer_is_noop() {
    let heap = TrackingHeap::new();
    let mut pool = ArenaPool::with_heap(512, &heap).expect("pool");

    pool.alloc(1000).expect("large");
    let small = pool.alloc(32).expect("small");
    let len = pool.large_len();
    let releases = heap.releases();

    assert!(!pool.free(small));
    let mut outside = 0u64;
    assert!(!pool.free(NonNull::from(&mut outside).cast()));

    assert_eq!(pool.large_len(), len);
    assert_eq!(pool.stats().large_live, 1);
    assert_eq!(heap.releases(), releases);
}

#[test]
fn large_metadata_failure_releases_block() {
    let heap = TrackingHeap::new();
    let mut pool = ArenaPool::with_heap(256, &heap).expect("pool");
    fill_first_block(&mut pool);

    // The large block succeeds, the block growth for its record does not
    heap.allow_only(1);
    assert!(pool.alloc(1000).is_none());

    assert_eq!(pool.large_len(), 0);
    assert_eq!(heap.live_bytes(), 256);
    assert_eq!(heap.releases(), 1);
}

// ===== Cleanup Tests =====

#[test]
fn cleanups_run_in_reverse_registration_order() {
    let order = Rc::new(RefCell::new(Vec::new()));

    {
        let mut pool = ArenaPool::new(1024).expect("pool");
        for name in ["A", "B", "C"] {
            let order = Rc::clone(&order);
            pool.register_cleanup(0)
                .expect("cleanup")
                .set_handler(move |_| order.borrow_mut().push(name));
        }
        assert!(order.borrow().is_empty());
    }

    assert_eq!(*order.borrow(), vec!["C", "B", "A"]);
}

#[test]
fn cleanup_receives_reserved_data_region() {
    let seen = Rc::new(RefCell::new(None));
    {
        let mut pool = ArenaPool::new(1024).expect("pool");
        let record = pool.register_cleanup(8).expect("cleanup");
        let data = record.data().expect("data region");
        unsafe { data.as_ptr().cast::<u64>().write(0xFEED) };

        let seen = Rc::clone(&seen);
        record.set_handler(move |data| {
            let value = unsafe { data.expect("data").as_ptr().cast::<u64>().read() };
            *seen.borrow_mut() = Some(value);
        });
    }
    assert_eq!(*seen.borrow(), Some(0xFEED));
}

#[test]
fn cleanup_without_size_has_no_data() {
    let mut pool = ArenaPool::new(512).expect("pool");
    let record = pool.register_cleanup(0).expect("cleanup");
    assert!(record.data().is_none());
    assert!(!record.has_handler());
}

#[test]
fn cleanup_without_handler_is_skipped() {
    let ran = Rc::new(RefCell::new(0));
    {
        let mut pool = ArenaPool::new(512).expect("pool");
        pool.register_cleanup(0).expect("bare");
        let ran = Rc::clone(&ran);
        pool.register_cleanup(0)
            .expect("with handler")
            .set_handler(move |_| *ran.borrow_mut() += 1);
        assert_eq!(pool.cleanup_count(), 2);
    }
    assert_eq!(*ran.borrow(), 1);
}

#[test]
fn cleanup_metadata_failure_links_nothing() {
    let heap = TrackingHeap::new();
    let mut pool = ArenaPool::with_heap(256, &heap).expect("pool");
    fill_first_block(&mut pool);
    heap.allow_only(0);

    assert!(pool.register_cleanup(0).is_none());
    assert_eq!(pool.cleanup_count(), 0);
}

#[test]
fn cleanup_data_failure_links_nothing() {
    let heap = TrackingHeap::new();
    let mut pool = ArenaPool::with_heap(256, &heap).expect("pool");

    // Leave exactly enough room for the record itself
    let record = core::mem::size_of::<CleanupRecord>();
    let remaining = pool.block_remaining(0).unwrap();
    pool.alloc(remaining - record).expect("fill");
    heap.allow_only(0);

    assert!(pool.register_cleanup(16).is_none());
    assert_eq!(pool.cleanup_count(), 0);
    assert_eq!(pool.block_remaining(0), Some(0));
}

#[test]
fn cleanups_see_large_memory_before_release() {
    let seen = Rc::new(RefCell::new(0u8));
    {
        let mut pool = ArenaPool::new(512).expect("pool");
        let big = pool.alloc(4096).expect("large");
        unsafe { big.as_ptr().write(0x7E) };

        let seen = Rc::clone(&seen);
        let record = pool.register_cleanup(0).expect("cleanup");
        record.set_data(Some(big));
        record.set_handler(move |data| {
            *seen.borrow_mut() = unsafe { data.expect("large").as_ptr().read() };
        });
    }
    assert_eq!(*seen.borrow(), 0x7E);
}

// ===== Reset Tests =====

#[test]
fn reset_restores_every_block_capacity() {
    let heap = TrackingHeap::new();
    let mut pool = ArenaPool::with_heap(512, &heap).expect("pool");

    for _ in 0..8 {
        pool.alloc(300).expect("small");
    }
    pool.alloc(5000).expect("large");
    let blocks = pool.block_count();
    assert!(blocks > 1);

    pool.reset();

    assert_eq!(pool.block_count(), blocks);
    assert_eq!(pool.current_block(), 0);
    assert_eq!(pool.large_len(), 0);
    assert_eq!(pool.block_remaining(0), Some(512 - POOL_HEADER_SIZE));
    for index in 1..blocks {
        assert_eq!(pool.block_remaining(index), Some(512 - BLOCK_HEADER_SIZE));
        assert_eq!(pool.block_failures(index), Some(0));
    }
    assert_eq!(heap.live_bytes(), 512 * blocks);
}

#[test]
fn reset_replays_identically() {
    let mut pool = ArenaPool::new(512).expect("pool");
    let sizes = [24, 100, 7, 300, 64, 1, 256, 48];

    let run = |pool: &mut ArenaPool| -> Vec<usize> {
        sizes.iter().map(|&s| addr(pool.alloc(s).expect("alloc"))).collect()
    };

    let first: Vec<usize> = run(&mut pool);
    let blocks = pool.block_count();
    pool.reset();
    let second: Vec<usize> = run(&mut pool);

    assert_eq!(first, second);
    assert_eq!(pool.block_count(), blocks);
}

#[test]
fn reset_does_not_run_cleanups() {
    let ran = Rc::new(RefCell::new(0));
    {
        let mut pool = ArenaPool::new(512).expect("pool");
        let counter = Rc::clone(&ran);
        pool.register_cleanup(0)
            .expect("cleanup")
            .set_handler(move |_| *counter.borrow_mut() += 1);

        pool.reset();
        pool.reset();
        assert_eq!(*ran.borrow(), 0);
        assert_eq!(pool.cleanup_count(), 1);
    }
    assert_eq!(*ran.borrow(), 1);
}

// ===== Teardown Tests =====

#[test]
fn teardown_returns_all_memory() {
    let heap = TrackingHeap::new();
    {
        let mut pool = ArenaPool::with_heap(512, &heap).expect("pool");
        for _ in 0..10 {
            pool.alloc(200).expect("small");
        }
        pool.alloc(3000).expect("kept");
        let freed = pool.alloc(3000).expect("freed");
        pool.free(freed);
        pool.register_cleanup(64).expect("cleanup");
    }
    assert_eq!(heap.live_bytes(), 0);
    assert_eq!(heap.obtains(), heap.releases());
}

// ===== Typed Helpers =====

#[test]
fn alloc_value_writes_in_place() {
    let mut pool = ArenaPool::new(512).expect("pool");
    let ptr = pool.alloc_value((7u32, 9u64)).expect("value");
    assert_eq!(unsafe { *ptr.as_ptr() }, (7, 9));
}

#[test]
fn alloc_value_rejects_over_aligned_types() {
    #[repr(align(64))]
    struct Wide(u8);

    let mut pool = ArenaPool::new(512).expect("pool");
    assert!(pool.alloc_value(Wide(1)).is_none());
}

#[test]
fn alloc_bytes_copies_slice() {
    let mut pool = ArenaPool::new(512).expect("pool");
    let ptr = pool.alloc_bytes(b"hello world").expect("bytes");
    let copy = unsafe { core::slice::from_raw_parts(ptr.as_ptr(), 11) };
    assert_eq!(copy, b"hello world");
}

// ===== Statistics Tests =====

#[test]
fn stats_reflect_activity() {
    let mut pool = ArenaPool::new(512).expect("pool");
    let initial = pool.stats();
    assert_eq!(initial.blocks, 1);
    assert_eq!(initial.bytes_used, POOL_HEADER_SIZE);
    assert_eq!(initial.large_records, 0);

    pool.alloc(64).expect("small");
    pool.alloc(1024).expect("large");
    pool.register_cleanup(0).expect("cleanup");

    let stats = pool.stats();
    assert!(stats.bytes_used > initial.bytes_used + 64);
    assert_eq!(stats.large_records, 1);
    assert_eq!(stats.large_live, 1);
    assert_eq!(stats.cleanups, 1);
    assert_eq!(stats.max_small, 512 - POOL_HEADER_SIZE);
}
