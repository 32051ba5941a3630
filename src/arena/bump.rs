//! Bump pointer allocation - O(1) fast path
//!
//! Design: A cursor/end pair per block. The cursor only moves forward until the
//! owning pool rewinds it on reset.

use core::ptr::NonNull;

/// Cursor state for one block
pub(crate) struct BumpCursor {
    cursor: *mut u8,
    end: *mut u8,
}

impl BumpCursor {
    #[inline]
    pub(crate) const fn new(start: *mut u8, end: *mut u8) -> Self {
        Self { cursor: start, end }
    }

    /// Fast path: bump pointer allocation
    ///
    /// Returns None if the block cannot hold `size` bytes after aligning the
    /// cursor (caller handles the slow path).
    #[inline(always)]
    pub(crate) fn try_alloc(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        debug_assert!(align.is_power_of_two(), "alignment must be power of 2");

        let addr = self.cursor as usize;
        let padding = align_up(addr, align) - addr;
        let available = (self.end as usize).saturating_sub(addr);

        if padding > available || available - padding < size {
            return None;
        }

        // In bounds: padding + size <= end - cursor
        unsafe {
            let ptr = self.cursor.add(padding);
            self.cursor = ptr.add(size);
            NonNull::new(ptr)
        }
    }

    /// Move the cursor back to `start`
    #[inline]
    pub(crate) fn reset(&mut self, start: *mut u8) {
        debug_assert!(start <= self.end, "invalid block bounds");
        self.cursor = start;
    }

    /// Remaining capacity in this block
    #[inline]
    pub(crate) fn remaining(&self) -> usize {
        (self.end as usize).saturating_sub(self.cursor as usize)
    }

    #[inline]
    pub(crate) fn position(&self) -> *const u8 {
        self.cursor
    }
}

/// Align address upward to next multiple of alignment
///
/// Uses bit manipulation for branch-free execution:
/// - Add (align - 1) to round up
/// - Mask with !(align - 1) to align down
#[inline(always)]
pub(crate) const fn align_up(addr: usize, align: usize) -> usize {
    (addr.wrapping_add(align).wrapping_sub(1)) & !align.wrapping_sub(1)
}
