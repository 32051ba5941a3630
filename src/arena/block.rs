//! Block management - heap regions chained behind the pool
//!
//! Design: Every block is obtained at the pool's block size. The first
//! `header` bytes of a block are reserved for its header (the full pool header
//! on the first block, the minimal block header on the rest); allocation starts
//! right after it.

use core::ptr::NonNull;

use super::bump::BumpCursor;

/// One chained block and its bump state
pub(crate) struct Block {
    base: NonNull<u8>,
    header: usize,
    bump: BumpCursor,
    failed: usize,
}

impl Block {
    /// Wrap a freshly obtained region.
    ///
    /// # Safety
    ///
    /// `base` must point to `size` writable bytes and `header <= size`.
    pub(crate) unsafe fn new(base: NonNull<u8>, size: usize, header: usize) -> Self {
        debug_assert!(header <= size, "header larger than block");
        let start = base.as_ptr().add(header);
        let end = base.as_ptr().add(size);
        Self {
            base,
            header,
            bump: BumpCursor::new(start, end),
            failed: 0,
        }
    }

    #[inline]
    pub(crate) fn try_alloc(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        self.bump.try_alloc(size, align)
    }

    /// Bump the failure counter, returning the new count
    #[inline]
    pub(crate) fn record_failure(&mut self) -> usize {
        self.failed += 1;
        self.failed
    }

    /// Rewind to just past the header and forget past failures
    pub(crate) fn rewind(&mut self) {
        // header <= size, checked at construction
        let start = unsafe { self.base.as_ptr().add(self.header) };
        self.bump.reset(start);
        self.failed = 0;
    }

    #[inline]
    pub(crate) fn base(&self) -> NonNull<u8> {
        self.base
    }

    #[inline]
    pub(crate) fn remaining(&self) -> usize {
        self.bump.remaining()
    }

    #[inline]
    pub(crate) fn failures(&self) -> usize {
        self.failed
    }

    /// Offset of the bump cursor from the block base
    #[inline]
    pub(crate) fn used(&self) -> usize {
        self.bump.position() as usize - self.base.as_ptr() as usize
    }
}
