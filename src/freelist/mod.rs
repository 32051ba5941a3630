//! Segregated free-list allocator for small objects
//!
//! Design: Two levels:
//! 1. Requests above [`MAX_BYTES`] go straight to [`MallocAlloc`]
//! 2. Smaller requests are rounded to one of sixteen size classes and served
//!    from that class's free list, refilled in batches from a shared slab
//!
//! Freed nodes return to their class list and are never given back to the
//! heap while the allocator lives. Dropping the allocator releases every slab
//! at once. All list and slab state sits behind one mutex, so an allocator can
//! be shared across threads.

mod malloc;
mod size_class;
mod slab;


pub use malloc::{MallocAlloc, OomHandler};
pub use size_class::{class_index, class_size, class_sizes, round_up, ALIGN, MAX_BYTES, NFREELISTS};

use core::ptr::{self, NonNull};
use parking_lot::Mutex;

use crate::config::FreeListConfig;
use crate::error::AllocError;
use crate::heap::{RawHeap, SystemHeap};
use slab::FreeListState;

/// Nodes carved per refill when none is configured
pub const DEFAULT_BATCH_SIZE: usize = 20;

pub struct SegregatedFreeList<H: RawHeap = SystemHeap> {
    state: Mutex<FreeListState>,
    malloc: MallocAlloc<H>,
    batch_size: usize,
}

impl SegregatedFreeList<SystemHeap> {
    pub fn new() -> Self {
        Self::with_heap(SystemHeap)
    }

    pub fn from_config(config: &FreeListConfig) -> Self {
        Self::with_heap_and_config(SystemHeap, config)
    }
}

impl Default for SegregatedFreeList<SystemHeap> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: RawHeap> SegregatedFreeList<H> {
    pub fn with_heap(heap: H) -> Self {
        Self::with_heap_and_config(heap, &FreeListConfig::default())
    }

    pub fn with_heap_and_config(heap: H, config: &FreeListConfig) -> Self {
        Self {
            state: Mutex::new(FreeListState::new()),
            malloc: MallocAlloc::new(heap),
            batch_size: config.batch_size.max(1),
        }
    }

    /// Allocate `n` bytes.
    ///
    /// Small requests are served at their class size, so the block may be
    /// larger than asked. Zero-byte requests get an 8-byte node.
    pub fn allocate(&self, n: usize) -> Result<NonNull<u8>, AllocError> {
        if n > MAX_BYTES {
            return self.malloc.allocate(n);
        }

        let mut state = self.state.lock();
        if let Some(node) = state.pop(class_index(n)) {
            return Ok(node);
        }
        state.refill(&self.malloc, round_up(n), self.batch_size)
    }

    /// Return a block to its class list (or the heap above the ceiling).
    ///
    /// # Safety
    ///
    /// `ptr` must come from this allocator with the same `n` it was requested
    /// with, and must not be used afterwards.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, n: usize) {
        if n > MAX_BYTES {
            self.malloc.deallocate(ptr, n);
            return;
        }
        self.state.lock().push(class_index(n), ptr);
    }

    /// Resize a block, preserving the first `min(old_n, new_n)` bytes.
    ///
    /// Within one size class the block is returned unchanged. On failure the
    /// original block is still valid.
    ///
    /// # Safety
    ///
    /// `ptr` must come from this allocator with size `old_n`. On success it
    /// must not be used again unless it was returned.
    pub unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_n: usize,
        new_n: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        if old_n > MAX_BYTES && new_n > MAX_BYTES {
            return self.malloc.reallocate(ptr, old_n, new_n);
        }
        if old_n <= MAX_BYTES && new_n <= MAX_BYTES && class_index(old_n) == class_index(new_n) {
            return Ok(ptr);
        }

        let fresh = self.allocate(new_n)?;
        ptr::copy_nonoverlapping(ptr.as_ptr(), fresh.as_ptr(), old_n.min(new_n));
        self.deallocate(ptr, old_n);
        Ok(fresh)
    }

    /// Install (or clear) the out-of-memory handler, returning the previous one
    pub fn set_oom_handler(&self, handler: Option<OomHandler>) -> Option<OomHandler> {
        self.malloc.set_oom_handler(handler)
    }

    pub fn heap(&self) -> &H {
        self.malloc.heap()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Nodes currently listed in the class serving `n` bytes
    pub fn free_list_len(&self, n: usize) -> usize {
        if n > MAX_BYTES {
            return 0;
        }
        self.state.lock().list_len(class_index(n))
    }

    /// Snapshot for monitoring and debugging
    pub fn stats(&self) -> FreeListStats {
        let state = self.state.lock();
        let mut free_lengths = [0; NFREELISTS];
        for (index, len) in free_lengths.iter_mut().enumerate() {
            *len = state.list_len(index);
        }
        FreeListStats {
            heap_size: state.heap_size(),
            slab_remaining: state.slab_remaining(),
            refills: state.refills(),
            slabs: state.slab_count(),
            free_lengths,
        }
    }
}

impl<H: RawHeap> Drop for SegregatedFreeList<H> {
    fn drop(&mut self) {
        for (slab, bytes) in self.state.get_mut().take_slabs() {
            unsafe { self.malloc.deallocate(slab, bytes) };
        }
    }
}

impl<H: RawHeap> core::fmt::Debug for SegregatedFreeList<H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SegregatedFreeList")
            .field("batch_size", &self.batch_size)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Free-list statistics for monitoring and debugging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeListStats {
    /// Total bytes ever obtained for slabs
    pub heap_size: usize,
    pub slab_remaining: usize,
    pub refills: usize,
    pub slabs: usize,
    /// Listed nodes per class, smallest class first
    pub free_lengths: [usize; NFREELISTS],
}
