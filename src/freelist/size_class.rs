//! Size classes for the free lists.
//!
//! Sixteen classes from 8 to 128 bytes in 8-byte steps. A request of `n`
//! bytes is served by class `ceil(n / 8)`.

/// Granularity of the size classes
pub const ALIGN: usize = 8;

/// Largest request served from the free lists
pub const MAX_BYTES: usize = 128;

/// Number of size classes
pub const NFREELISTS: usize = MAX_BYTES / ALIGN;

/// Round `bytes` up to a multiple of [`ALIGN`]; zero-byte requests use the
/// smallest class. Sizes within `ALIGN` of `usize::MAX` saturate instead of
/// wrapping, so they never compare equal to a class size.
#[inline]
pub const fn round_up(bytes: usize) -> usize {
    let rounded = bytes.saturating_add(ALIGN - 1) & !(ALIGN - 1);
    if rounded == 0 {
        ALIGN
    } else {
        rounded
    }
}

/// Free-list slot for a request of `bytes` (at most [`MAX_BYTES`])
#[inline]
pub const fn class_index(bytes: usize) -> usize {
    round_up(bytes) / ALIGN - 1
}

/// Node size served by slot `index`
#[inline]
pub const fn class_size(index: usize) -> usize {
    (index + 1) * ALIGN
}

/// Every class size, smallest first
pub fn class_sizes() -> impl Iterator<Item = usize> {
    (0..NFREELISTS).map(class_size)
}
