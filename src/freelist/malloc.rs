//! First-level allocator - raw heap access with an out-of-memory handler
//!
//! Design: Serves above-ceiling requests and new slabs. When the heap refuses a
//! request and a handler is registered, the handler is invoked and the request
//! retried, forever, until the heap succeeds. Nothing outside the handler can
//! cancel that loop: the handler must eventually free memory or terminate the
//! process. Without a handler the request fails with `OutOfMemory`.

use core::fmt;
use core::ptr::NonNull;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::error::AllocError;
use crate::heap::RawHeap;
use crate::logging::{log_oom_fatal, log_oom_retry};

/// Recovery callback invoked between retries of a failed heap request
pub type OomHandler = Arc<dyn Fn() + Send + Sync>;

pub struct MallocAlloc<H: RawHeap> {
    heap: H,
    handler: RwLock<Option<OomHandler>>,
}

impl<H: RawHeap> MallocAlloc<H> {
    pub fn new(heap: H) -> Self {
        Self {
            heap,
            handler: RwLock::new(None),
        }
    }

    pub fn heap(&self) -> &H {
        &self.heap
    }

    /// Install (or clear) the handler, returning the previous one
    pub fn set_oom_handler(&self, handler: Option<OomHandler>) -> Option<OomHandler> {
        core::mem::replace(&mut *self.handler.write(), handler)
    }

    pub fn has_oom_handler(&self) -> bool {
        self.handler.read().is_some()
    }

    /// Obtain `size` bytes, falling back to the handler loop
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        match self.heap.obtain(size) {
            Some(ptr) => Ok(ptr),
            None => self.retry_with_handler(size, || self.heap.obtain(size)),
        }
    }

    /// # Safety
    ///
    /// `ptr` must come from this allocator with size `size`.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
        self.heap.release(ptr, size);
    }

    /// Resize a block, falling back to the handler loop.
    ///
    /// # Safety
    ///
    /// `ptr` must come from this allocator with size `old_size`.
    pub unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        match self.heap.resize(ptr, old_size, new_size) {
            Some(resized) => Ok(resized),
            None => self.retry_with_handler(new_size, || self.heap.resize(ptr, old_size, new_size)),
        }
    }

    fn retry_with_handler<F>(&self, size: usize, mut attempt: F) -> Result<NonNull<u8>, AllocError>
    where
        F: FnMut() -> Option<NonNull<u8>>,
    {
        let mut round = 0;
        loop {
            // Clone out so the handler may replace itself
            let Some(handler) = self.handler.read().clone() else {
                log_oom_fatal(size);
                return Err(AllocError::OutOfMemory { requested: size });
            };

            round += 1;
            log_oom_retry(size, round);
            handler();

            if let Some(ptr) = attempt() {
                return Ok(ptr);
            }
        }
    }
}

impl<H: RawHeap> fmt::Debug for MallocAlloc<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MallocAlloc")
            .field("has_oom_handler", &self.has_oom_handler())
            .finish()
    }
}
