//! Slab carving and free-list threading
//!
//! Design: One slab cursor pair feeds every size class. Exhausted classes are
//! refilled in batches carved off the front of the slab; when the slab runs
//! dry a larger one is obtained and the unusable tail of the old one is
//! threaded onto the class it fits exactly.
//!
//! Free nodes store their link in their own first word. A node handed to a
//! caller is never read again until it is pushed back.

use core::ptr::{self, NonNull};

use super::malloc::MallocAlloc;
use super::size_class::{class_index, round_up, ALIGN, MAX_BYTES, NFREELISTS};
use crate::error::AllocError;
use crate::heap::RawHeap;
use crate::logging::{log_leftover_salvaged, log_node_requisitioned, log_slab_growth};

/// Link overlay written into a node while it sits on a free list
#[repr(C)]
struct FreeNode {
    next: Option<NonNull<FreeNode>>,
}

/// Everything guarded by the allocator lock
pub(crate) struct FreeListState {
    heads: [Option<NonNull<FreeNode>>; NFREELISTS],
    /// Uncarved remainder of the current slab
    start: *mut u8,
    end: *mut u8,
    /// Total bytes ever obtained for slabs
    heap_size: usize,
    refills: usize,
    /// Heap-obtained slabs, released when the allocator is dropped
    slabs: Vec<(NonNull<u8>, usize)>,
}

// The raw pointers address memory owned by this state; access is serialized
// by the allocator mutex.
unsafe impl Send for FreeListState {}

impl FreeListState {
    pub(crate) fn new() -> Self {
        Self {
            heads: [None; NFREELISTS],
            start: ptr::null_mut(),
            end: ptr::null_mut(),
            heap_size: 0,
            refills: 0,
            slabs: Vec::new(),
        }
    }

    /// Pop the head of class `index`
    #[inline]
    pub(crate) fn pop(&mut self, index: usize) -> Option<NonNull<u8>> {
        let node = self.heads[index]?;
        // A listed node always holds a valid link
        self.heads[index] = unsafe { (*node.as_ptr()).next };
        Some(node.cast())
    }

    /// Push `ptr` onto class `index`.
    ///
    /// # Safety
    ///
    /// `ptr` must address at least the class size in bytes, owned by this
    /// allocator and no longer used by any caller.
    #[inline]
    pub(crate) unsafe fn push(&mut self, index: usize, ptr: NonNull<u8>) {
        let node = ptr.cast::<FreeNode>();
        node.as_ptr().write(FreeNode {
            next: self.heads[index],
        });
        self.heads[index] = Some(node);
    }

    /// Nodes currently listed in class `index`
    pub(crate) fn list_len(&self, index: usize) -> usize {
        let mut len = 0;
        let mut cursor = self.heads[index];
        while let Some(node) = cursor {
            len += 1;
            cursor = unsafe { (*node.as_ptr()).next };
        }
        len
    }

    #[inline]
    fn bytes_left(&self) -> usize {
        self.end as usize - self.start as usize
    }

    pub(crate) fn slab_remaining(&self) -> usize {
        self.bytes_left()
    }

    pub(crate) fn heap_size(&self) -> usize {
        self.heap_size
    }

    pub(crate) fn refills(&self) -> usize {
        self.refills
    }

    pub(crate) fn slab_count(&self) -> usize {
        self.slabs.len()
    }

    /// Hand back every heap-obtained slab
    pub(crate) fn take_slabs(&mut self) -> Vec<(NonNull<u8>, usize)> {
        self.heads = [None; NFREELISTS];
        self.start = ptr::null_mut();
        self.end = ptr::null_mut();
        core::mem::take(&mut self.slabs)
    }

    /// Serve one node of `size` bytes (already rounded), threading the rest
    /// of a fresh batch onto its class.
    pub(crate) fn refill<H: RawHeap>(
        &mut self,
        malloc: &MallocAlloc<H>,
        size: usize,
        batch: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        let mut nobjs = batch;
        let chunk = self.chunk_alloc(malloc, size, &mut nobjs)?;
        self.refills += 1;

        if nobjs == 1 {
            return Ok(chunk);
        }

        // Node 1 goes to the caller; nodes 2..nobjs become the list, in order
        let index = class_index(size);
        let base = chunk.as_ptr();
        let mut next = self.heads[index];
        for i in (1..nobjs).rev() {
            unsafe {
                let node = base.add(i * size).cast::<FreeNode>();
                node.write(FreeNode { next });
                next = Some(NonNull::new_unchecked(node));
            }
        }
        self.heads[index] = next;

        Ok(chunk)
    }

    /// Carve up to `nobjs` nodes of `size` bytes from the slab, growing it
    /// when not even one fits. `nobjs` is lowered to the count produced.
    fn chunk_alloc<H: RawHeap>(
        &mut self,
        malloc: &MallocAlloc<H>,
        size: usize,
        nobjs: &mut usize,
    ) -> Result<NonNull<u8>, AllocError> {
        loop {
            // Saturated totals still fall through to the partial-batch case
            let total = size.saturating_mul(*nobjs);
            let left = self.bytes_left();

            if left >= total {
                return Ok(self.carve(total));
            }

            if left >= size {
                *nobjs = left / size;
                return Ok(self.carve(size * *nobjs));
            }

            let bytes_to_get = total
                .checked_mul(2)
                .and_then(|bytes| bytes.checked_add(round_up_slack(self.heap_size >> 4)))
                .ok_or(AllocError::OutOfMemory { requested: usize::MAX })?;

            // The tail is a whole number of ALIGN units, smaller than `size`
            if left > 0 {
                let tail = unsafe { NonNull::new_unchecked(self.start) };
                unsafe { self.push(class_index(left), tail) };
                log_leftover_salvaged(left);
            }
            self.start = ptr::null_mut();
            self.end = ptr::null_mut();

            if let Some(slab) = malloc.heap().obtain(bytes_to_get) {
                self.install_slab(slab, bytes_to_get);
                continue;
            }

            if self.requisition(size) {
                continue;
            }

            let slab = malloc.allocate(bytes_to_get)?;
            self.install_slab(slab, bytes_to_get);
        }
    }

    /// Cut `total` bytes off the front of the slab
    #[inline]
    fn carve(&mut self, total: usize) -> NonNull<u8> {
        let result = self.start;
        // Callers checked total <= bytes_left() and the slab is non-empty
        unsafe {
            self.start = result.add(total);
            NonNull::new_unchecked(result)
        }
    }

    fn install_slab(&mut self, slab: NonNull<u8>, bytes: usize) {
        self.start = slab.as_ptr();
        self.end = unsafe { slab.as_ptr().add(bytes) };
        self.heap_size += bytes;
        self.slabs.push((slab, bytes));
        log_slab_growth(bytes, self.heap_size);
    }

    /// Turn a free node of at least `size` bytes into the slab
    fn requisition(&mut self, size: usize) -> bool {
        for class in (size..=MAX_BYTES).step_by(ALIGN) {
            if let Some(node) = self.pop(class_index(class)) {
                self.start = node.as_ptr();
                self.end = unsafe { node.as_ptr().add(class) };
                log_node_requisitioned(class, size);
                return true;
            }
        }
        false
    }
}

/// Slack term for slab growth; zero stays zero
#[inline]
fn round_up_slack(bytes: usize) -> usize {
    if bytes == 0 {
        0
    } else {
        round_up(bytes)
    }
}
