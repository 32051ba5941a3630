//! Large allocation tracking
//!
//! Design: Records live in an owned node vector and are linked by index,
//! newest first. A record whose block was freed stays in the chain as a
//! recyclable slot.

use core::ptr::NonNull;

use crate::heap::RawHeap;

/// Records inspected for a free slot before a new one is created
pub const LARGE_SCAN_DEPTH: usize = 4;

/// One heap block handed out by the large-allocation path
#[derive(Debug)]
pub struct LargeAllocRecord {
    alloc: Option<NonNull<u8>>,
    size: usize,
    next: Option<usize>,
}

impl LargeAllocRecord {
    /// Backing block, `None` once freed
    pub fn alloc(&self) -> Option<NonNull<u8>> {
        self.alloc
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// Singly linked list of large records
#[derive(Debug, Default)]
pub(crate) struct LargeList {
    nodes: Vec<LargeAllocRecord>,
    head: Option<usize>,
}

impl LargeList {
    /// Iterate records from the head
    fn iter(&self) -> impl Iterator<Item = &LargeAllocRecord> + '_ {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            let record = &self.nodes[cursor?];
            cursor = record.next;
            Some(record)
        })
    }

    /// Attach `ptr` to a freed slot within the scan depth
    pub(crate) fn reuse_slot(&mut self, ptr: NonNull<u8>, size: usize) -> bool {
        let mut cursor = self.head;
        for _ in 0..LARGE_SCAN_DEPTH {
            let Some(index) = cursor else { break };
            let record = &mut self.nodes[index];
            if record.alloc.is_none() {
                record.alloc = Some(ptr);
                record.size = size;
                return true;
            }
            cursor = record.next;
        }
        false
    }

    /// Link a new record at the head
    pub(crate) fn push_front(&mut self, ptr: NonNull<u8>, size: usize) {
        let index = self.nodes.len();
        self.nodes.push(LargeAllocRecord {
            alloc: Some(ptr),
            size,
            next: self.head,
        });
        self.head = Some(index);
    }

    /// Release the block at `ptr` and keep its record as a free slot
    pub(crate) fn free<H: RawHeap>(&mut self, heap: &H, ptr: NonNull<u8>) -> bool {
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let record = &mut self.nodes[index];
            if record.alloc == Some(ptr) {
                record.alloc = None;
                unsafe { heap.release(ptr, record.size) };
                return true;
            }
            cursor = record.next;
        }
        false
    }

    /// Release every live block and drop all records, returning the count released
    pub(crate) fn release_all<H: RawHeap>(&mut self, heap: &H) -> usize {
        let mut released = 0;
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let record = &mut self.nodes[index];
            if let Some(ptr) = record.alloc.take() {
                unsafe { heap.release(ptr, record.size) };
                released += 1;
            }
            cursor = record.next;
        }
        self.nodes.clear();
        self.head = None;
        released
    }

    /// Records in the chain, freed slots included
    pub(crate) fn len(&self) -> usize {
        self.iter().count()
    }

    /// Records still holding a block
    pub(crate) fn live(&self) -> usize {
        self.iter().filter(|record| record.alloc.is_some()).count()
    }
}
