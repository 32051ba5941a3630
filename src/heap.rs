//! Raw heap primitive - the memory source beneath both engines
//!
//! Design: Both allocators obtain, release and resize memory exclusively
//! through `RawHeap`, so the backing allocator can be swapped or instrumented:
//! 1. `SystemHeap` maps onto `std::alloc` (the default)
//! 2. `TrackingHeap` wraps any heap with counters and failure injection
//!
//! Sizes are passed back on release because `std::alloc` needs the layout.

use core::ptr::NonNull;
use once_cell::sync::Lazy;
use std::alloc::{alloc, dealloc, realloc, Layout};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Alignment of every block obtained from `SystemHeap`
pub const HEAP_ALIGN: usize = 16;

/// Page size assumed when the platform cannot be queried
pub const FALLBACK_PAGE_SIZE: usize = 4096;

/// Obtain / release / resize primitive supplied by the host environment.
///
/// # Safety
///
/// Implementors must return blocks aligned to at least [`HEAP_ALIGN`] that stay
/// valid and disjoint from every other live block until released. The heap must
/// tolerate calls from several threads when shared.
pub unsafe trait RawHeap {
    /// Obtain `size` bytes, or `None` when the heap is exhausted
    fn obtain(&self, size: usize) -> Option<NonNull<u8>>;

    /// Release a block previously obtained with the same `size`.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `obtain`/`resize` on this heap with size `size`
    /// and must not be used afterwards.
    unsafe fn release(&self, ptr: NonNull<u8>, size: usize);

    /// Resize a block, preserving `min(old_size, new_size)` bytes.
    ///
    /// On failure the original block is left untouched.
    ///
    /// # Safety
    ///
    /// Same contract as [`RawHeap::release`] for `ptr`/`old_size`.
    unsafe fn resize(&self, ptr: NonNull<u8>, old_size: usize, new_size: usize) -> Option<NonNull<u8>>;
}

unsafe impl<H: RawHeap + ?Sized> RawHeap for &H {
    #[inline]
    fn obtain(&self, size: usize) -> Option<NonNull<u8>> {
        (**self).obtain(size)
    }

    #[inline]
    unsafe fn release(&self, ptr: NonNull<u8>, size: usize) {
        (**self).release(ptr, size)
    }

    #[inline]
    unsafe fn resize(&self, ptr: NonNull<u8>, old_size: usize, new_size: usize) -> Option<NonNull<u8>> {
        (**self).resize(ptr, old_size, new_size)
    }
}

unsafe impl<H: RawHeap + ?Sized> RawHeap for Arc<H> {
    #[inline]
    fn obtain(&self, size: usize) -> Option<NonNull<u8>> {
        (**self).obtain(size)
    }

    #[inline]
    unsafe fn release(&self, ptr: NonNull<u8>, size: usize) {
        (**self).release(ptr, size)
    }

    #[inline]
    unsafe fn resize(&self, ptr: NonNull<u8>, old_size: usize, new_size: usize) -> Option<NonNull<u8>> {
        (**self).resize(ptr, old_size, new_size)
    }
}

/// Global-allocator backed heap
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHeap;

/// Zero-byte requests are served as one byte so every block has a real layout
#[inline]
fn layout_for(size: usize) -> Option<Layout> {
    Layout::from_size_align(size.max(1), HEAP_ALIGN).ok()
}

unsafe impl RawHeap for SystemHeap {
    fn obtain(&self, size: usize) -> Option<NonNull<u8>> {
        let layout = layout_for(size)?;
        NonNull::new(unsafe { alloc(layout) })
    }

    unsafe fn release(&self, ptr: NonNull<u8>, size: usize) {
        if let Some(layout) = layout_for(size) {
            dealloc(ptr.as_ptr(), layout);
        }
    }

    unsafe fn resize(&self, ptr: NonNull<u8>, old_size: usize, new_size: usize) -> Option<NonNull<u8>> {
        let layout = layout_for(old_size)?;
        // realloc requires the new size to form a valid layout too
        layout_for(new_size)?;
        NonNull::new(realloc(ptr.as_ptr(), layout, new_size.max(1)))
    }
}

/// Heap wrapper that counts traffic and can be told to fail.
///
/// Used to observe slab and block growth, and to drive out-of-memory paths.
#[derive(Debug)]
pub struct TrackingHeap<H: RawHeap = SystemHeap> {
    inner: H,
    obtains: AtomicUsize,
    failed_obtains: AtomicUsize,
    releases: AtomicUsize,
    resizes: AtomicUsize,
    live_bytes: AtomicUsize,
    /// Number of upcoming obtains that fail unconditionally
    fail_pending: AtomicUsize,
    /// Successful obtains still allowed (`usize::MAX` = unlimited)
    remaining: AtomicUsize,
}

impl TrackingHeap<SystemHeap> {
    pub fn new() -> Self {
        Self::wrap(SystemHeap)
    }
}

impl Default for TrackingHeap<SystemHeap> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: RawHeap> TrackingHeap<H> {
    pub fn wrap(inner: H) -> Self {
        Self {
            inner,
            obtains: AtomicUsize::new(0),
            failed_obtains: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            resizes: AtomicUsize::new(0),
            live_bytes: AtomicUsize::new(0),
            fail_pending: AtomicUsize::new(0),
            remaining: AtomicUsize::new(usize::MAX),
        }
    }

    /// Make the next `count` obtains fail, then recover
    pub fn fail_next(&self, count: usize) {
        self.fail_pending.store(count, Ordering::SeqCst);
    }

    /// Allow only `count` more successful obtains; every later one fails
    pub fn allow_only(&self, count: usize) {
        self.remaining.store(count, Ordering::SeqCst);
    }

    /// Lift every injected failure
    pub fn heal(&self) {
        self.fail_pending.store(0, Ordering::SeqCst);
        self.remaining.store(usize::MAX, Ordering::SeqCst);
    }

    /// Successful obtains so far
    pub fn obtains(&self) -> usize {
        self.obtains.load(Ordering::SeqCst)
    }

    pub fn failed_obtains(&self) -> usize {
        self.failed_obtains.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn resizes(&self) -> usize {
        self.resizes.load(Ordering::SeqCst)
    }

    /// Bytes obtained and not yet released
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::SeqCst)
    }

    fn should_fail(&self) -> bool {
        let injected = self
            .fail_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return true;
        }
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                usize::MAX => Some(n),
                0 => None,
                n => Some(n - 1),
            })
            .is_err()
    }
}

unsafe impl<H: RawHeap> RawHeap for TrackingHeap<H> {
    fn obtain(&self, size: usize) -> Option<NonNull<u8>> {
        if self.should_fail() {
            self.failed_obtains.fetch_add(1, Ordering::SeqCst);
            return None;
        }
        let ptr = self.inner.obtain(size)?;
        self.obtains.fetch_add(1, Ordering::SeqCst);
        self.live_bytes.fetch_add(size, Ordering::SeqCst);
        Some(ptr)
    }

    unsafe fn release(&self, ptr: NonNull<u8>, size: usize) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.live_bytes.fetch_sub(size, Ordering::SeqCst);
        self.inner.release(ptr, size);
    }

    unsafe fn resize(&self, ptr: NonNull<u8>, old_size: usize, new_size: usize) -> Option<NonNull<u8>> {
        if self.should_fail() {
            self.failed_obtains.fetch_add(1, Ordering::SeqCst);
            return None;
        }
        let resized = self.inner.resize(ptr, old_size, new_size)?;
        self.resizes.fetch_add(1, Ordering::SeqCst);
        self.live_bytes.fetch_sub(old_size, Ordering::SeqCst);
        self.live_bytes.fetch_add(new_size, Ordering::SeqCst);
        Some(resized)
    }
}

static PAGE_SIZE: Lazy<usize> = Lazy::new(query_page_size);

/// Size of one virtual-memory page on this platform
#[inline]
pub fn page_size() -> usize {
    *PAGE_SIZE
}

#[cfg(unix)]
fn query_page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        FALLBACK_PAGE_SIZE
    }
}

#[cfg(windows)]
fn query_page_size() -> usize {
    use winapi::um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO};

    let mut info: SYSTEM_INFO = unsafe { core::mem::zeroed() };
    unsafe { GetSystemInfo(&mut info) };
    if info.dwPageSize > 0 {
        info.dwPageSize as usize
    } else {
        FALLBACK_PAGE_SIZE
    }
}

#[cfg(not(any(unix, windows)))]
fn query_page_size() -> usize {
    FALLBACK_PAGE_SIZE
}
