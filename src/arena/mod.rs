//! Arena pool - region allocation with bulk release
//!
//! Design: Three-layer architecture:
//! 1. Bump allocation inside a chain of uniform blocks (small requests)
//! 2. Direct heap blocks tracked in a recyclable list (large requests)
//! 3. Cleanup callbacks run once at teardown, newest first
//!
//! Small allocations are never freed individually; they are reclaimed by
//! `reset` (for reuse) or by dropping the pool. Bookkeeping records for large
//! allocations and cleanups are themselves carved from the pool's small path.
//!
//! The pool is single-threaded: it is neither `Send` nor `Sync`.

mod block;
mod bump;
mod cleanup;
mod large;

#[cfg(test)]
mod tests;

pub use cleanup::{CleanupHandler, CleanupRecord};
pub use large::{LargeAllocRecord, LARGE_SCAN_DEPTH};

use core::mem::{align_of, size_of};
use core::ptr::{self, NonNull};

use crate::config::ArenaConfig;
use crate::error::AllocError;
use crate::heap::{page_size, RawHeap, SystemHeap};
use crate::logging::{
    log_block_growth, log_block_retired, log_growth_failure, log_large_alloc, log_large_free,
    log_pool_created, log_pool_reset, log_pool_teardown,
};
use block::Block;
use bump::align_up;
use cleanup::CleanupChain;
use large::LargeList;

/// Alignment applied by the aligned allocation entry points
pub const WORD_ALIGN: usize = size_of::<usize>();

/// Minimal header reserved at the front of every chained block
/// (cursor, end, next link, failure counter)
pub const BLOCK_HEADER_SIZE: usize = 4 * size_of::<usize>();

/// Header reserved at the front of the first block: the block header plus
/// max, current block, large list head and cleanup list head
pub const POOL_HEADER_SIZE: usize = BLOCK_HEADER_SIZE + 4 * size_of::<usize>();

/// Pool size used when none is configured
pub const DEFAULT_POOL_SIZE: usize = 16 * 1024;

/// Rounding applied to the minimum pool size
pub const POOL_ALIGNMENT: usize = 16;

/// Smallest pool: its header plus room for two large-allocation records
pub const MIN_POOL_SIZE: usize =
    align_up(POOL_HEADER_SIZE + 2 * size_of::<LargeAllocRecord>(), POOL_ALIGNMENT);

/// Failures a block tolerates before small allocations stop starting there
pub const MAX_FAILURES: usize = 4;

/// Region allocator over a chain of uniform blocks
pub struct ArenaPool<H: RawHeap = SystemHeap> {
    heap: H,
    /// Chain in link order; `blocks[0]` carries the pool header
    blocks: Vec<Block>,
    block_size: usize,
    max: usize,
    current: usize,
    large: LargeList,
    cleanups: CleanupChain,
}

impl ArenaPool<SystemHeap> {
    /// Create a pool whose blocks are `total_size` bytes each
    pub fn new(total_size: usize) -> Result<Self, AllocError> {
        Self::with_heap(total_size, SystemHeap)
    }

    pub fn from_config(config: &ArenaConfig) -> Result<Self, AllocError> {
        Self::new(config.pool_size)
    }
}

impl<H: RawHeap> ArenaPool<H> {
    /// Create a pool drawing its memory from `heap`
    pub fn with_heap(total_size: usize, heap: H) -> Result<Self, AllocError> {
        if total_size < MIN_POOL_SIZE {
            return Err(AllocError::PoolTooSmall {
                requested: total_size,
                minimum: MIN_POOL_SIZE,
            });
        }

        let base = heap
            .obtain(total_size)
            .ok_or(AllocError::HeapExhausted { requested: total_size })?;
        // POOL_HEADER_SIZE < MIN_POOL_SIZE <= total_size
        let first = unsafe { Block::new(base, total_size, POOL_HEADER_SIZE) };
        let max = (total_size - POOL_HEADER_SIZE).min(page_size() - 1);

        log_pool_created(total_size, max);

        Ok(Self {
            heap,
            blocks: vec![first],
            block_size: total_size,
            max,
            current: 0,
            large: LargeList::default(),
            cleanups: CleanupChain::default(),
        })
    }

    /// Allocate `size` bytes aligned to [`WORD_ALIGN`]
    #[inline]
    pub fn alloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size <= self.max {
            self.alloc_small(size, WORD_ALIGN)
        } else {
            self.alloc_large(size)
        }
    }

    /// Allocate `size` bytes with no alignment padding (byte buffers)
    #[inline]
    pub fn alloc_unaligned(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size <= self.max {
            self.alloc_small(size, 1)
        } else {
            self.alloc_large(size)
        }
    }

    /// Allocate `size` zeroed bytes
    pub fn alloc_zeroed(&mut self, size: usize) -> Option<NonNull<u8>> {
        let ptr = self.alloc_unaligned(size)?;
        unsafe { ptr::write_bytes(ptr.as_ptr(), 0, size) };
        Some(ptr)
    }

    /// Move `value` into the pool.
    ///
    /// The value is never dropped by the pool; register a cleanup for anything
    /// it owns. Types aligned beyond [`WORD_ALIGN`] are rejected.
    pub fn alloc_value<T>(&mut self, value: T) -> Option<NonNull<T>> {
        if align_of::<T>() > WORD_ALIGN {
            return None;
        }
        let ptr = self.alloc(size_of::<T>())?.cast::<T>();
        unsafe { ptr.as_ptr().write(value) };
        Some(ptr)
    }

    /// Copy `bytes` into the pool without alignment padding
    pub fn alloc_bytes(&mut self, bytes: &[u8]) -> Option<NonNull<u8>> {
        let ptr = self.alloc_unaligned(bytes.len())?;
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len()) };
        Some(ptr)
    }

    /// Small path: bump from `current` forward, growing the chain on overflow
    fn alloc_small(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        for block in &mut self.blocks[self.current..] {
            if let Some(ptr) = block.try_alloc(size, align) {
                return Some(ptr);
            }
        }
        self.alloc_block(size)
    }

    /// Link a new block at the tail and serve `size` bytes from it
    fn alloc_block(&mut self, size: usize) -> Option<NonNull<u8>> {
        let Some(base) = self.heap.obtain(self.block_size) else {
            log_growth_failure("block", self.block_size);
            return None;
        };

        // Every block is block_size bytes, larger than any header
        let mut block = unsafe { Block::new(base, self.block_size, BLOCK_HEADER_SIZE) };
        let Some(ptr) = block.try_alloc(size, WORD_ALIGN) else {
            unsafe { self.heap.release(base, self.block_size) };
            return None;
        };

        // The tail is the attach point and is not charged a failure
        let tail = self.blocks.len() - 1;
        for index in self.current..tail {
            let failures = self.blocks[index].record_failure();
            if failures > MAX_FAILURES {
                self.current = index + 1;
                log_block_retired(index, failures);
            }
        }

        self.blocks.push(block);
        log_block_growth(self.blocks.len(), self.block_size, self.current);
        Some(ptr)
    }

    /// Large path: heap block plus a tracking record
    fn alloc_large(&mut self, size: usize) -> Option<NonNull<u8>> {
        let ptr = self.heap.obtain(size)?;

        if self.large.reuse_slot(ptr, size) {
            log_large_alloc(size, ptr.as_ptr(), true);
            return Some(ptr);
        }

        if self.alloc_small(size_of::<LargeAllocRecord>(), WORD_ALIGN).is_none() {
            unsafe { self.heap.release(ptr, size) };
            log_growth_failure("large_record", size);
            return None;
        }

        self.large.push_front(ptr, size);
        log_large_alloc(size, ptr.as_ptr(), false);
        Some(ptr)
    }

    /// Release a block obtained through the large path.
    ///
    /// Pointers the pool did not hand out as large allocations are ignored.
    /// Returns whether a block was released.
    pub fn free(&mut self, ptr: NonNull<u8>) -> bool {
        let found = self.large.free(&self.heap, ptr);
        log_large_free(ptr.as_ptr(), found);
        found
    }

    /// Register a teardown callback, optionally reserving `size` bytes of data.
    ///
    /// The returned record is already linked; set its handler (and data if the
    /// reserved region is not wanted) before the pool is dropped.
    pub fn register_cleanup(&mut self, size: usize) -> Option<&mut CleanupRecord> {
        self.alloc_small(size_of::<CleanupRecord>(), WORD_ALIGN)?;

        let data = if size > 0 { Some(self.alloc(size)?) } else { None };

        Some(self.cleanups.push_front(CleanupRecord::new(data)))
    }

    /// Reclaim everything for reuse without running cleanups.
    ///
    /// Large blocks are released; small blocks stay chained with rewound
    /// cursors. Every pointer previously handed out becomes dangling.
    pub fn reset(&mut self) {
        let released = self.large.release_all(&self.heap);
        for block in &mut self.blocks {
            block.rewind();
        }
        self.current = 0;
        log_pool_reset(released, self.blocks.len());
    }

    /// Largest request served from blocks
    #[inline]
    pub fn max_small(&self) -> usize {
        self.max
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Index of the block where small allocation scans start
    #[inline]
    pub fn current_block(&self) -> usize {
        self.current
    }

    /// Bytes left after the cursor of block `index`
    pub fn block_remaining(&self, index: usize) -> Option<usize> {
        self.blocks.get(index).map(Block::remaining)
    }

    /// Consecutive growth failures charged to block `index`
    pub fn block_failures(&self, index: usize) -> Option<usize> {
        self.blocks.get(index).map(Block::failures)
    }

    /// Records in the large list, freed slots included
    pub fn large_len(&self) -> usize {
        self.large.len()
    }

    pub fn cleanup_count(&self) -> usize {
        self.cleanups.len()
    }

    /// Underlying heap
    pub fn heap(&self) -> &H {
        &self.heap
    }

    /// Snapshot for monitoring and debugging
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            blocks: self.blocks.len(),
            block_size: self.block_size,
            max_small: self.max,
            current_block: self.current,
            bytes_used: self.blocks.iter().map(Block::used).sum(),
            current_remaining: self.blocks[self.current].remaining(),
            large_records: self.large.len(),
            large_live: self.large.live(),
            cleanups: self.cleanups.len(),
        }
    }
}

impl<H: RawHeap> Drop for ArenaPool<H> {
    /// Teardown: cleanups first (newest first), then large blocks, then the
    /// chain itself, which holds the bookkeeping read by the earlier steps.
    fn drop(&mut self) {
        let invoked = self.cleanups.run_all();
        let released = self.large.release_all(&self.heap);
        let blocks = self.blocks.len();
        for block in self.blocks.drain(..) {
            unsafe { self.heap.release(block.base(), self.block_size) };
        }
        log_pool_teardown(invoked, released, blocks);
    }
}

/// Pool statistics for monitoring and debugging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub blocks: usize,
    pub block_size: usize,
    pub max_small: usize,
    pub current_block: usize,
    /// Bytes consumed across all blocks, headers included
    pub bytes_used: usize,
    pub current_remaining: usize,
    pub large_records: usize,
    pub large_live: usize,
    pub cleanups: usize,
}
