//! Cleanup callbacks run at pool teardown
//!
//! Design: Records are linked newest first, so walking from the head runs
//! callbacks in reverse registration order. The engine never interprets the
//! handler or its data; it only guarantees a single invocation.

use core::fmt;
use core::ptr::NonNull;

use crate::logging::log_cleanup_invoked;

/// Callback invoked once at teardown with the record's data pointer
pub type CleanupHandler = Box<dyn FnOnce(Option<NonNull<u8>>)>;

/// Caller-filled cleanup slot returned by `ArenaPool::register_cleanup`
pub struct CleanupRecord {
    handler: Option<CleanupHandler>,
    data: Option<NonNull<u8>>,
    next: Option<usize>,
}

impl CleanupRecord {
    pub(crate) fn new(data: Option<NonNull<u8>>) -> Self {
        Self {
            handler: None,
            data,
            next: None,
        }
    }

    /// Install the callback, replacing any previous one
    pub fn set_handler<F>(&mut self, handler: F)
    where
        F: FnOnce(Option<NonNull<u8>>) + 'static,
    {
        self.handler = Some(Box::new(handler));
    }

    /// Point the callback at different data (defaults to the region reserved at registration)
    pub fn set_data(&mut self, data: Option<NonNull<u8>>) {
        self.data = data;
    }

    pub fn data(&self) -> Option<NonNull<u8>> {
        self.data
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Run the handler if one is set; a record fires at most once
    fn invoke(&mut self) -> bool {
        match self.handler.take() {
            Some(handler) => {
                handler(self.data);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for CleanupRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupRecord")
            .field("has_handler", &self.handler.is_some())
            .field("data", &self.data)
            .finish()
    }
}

/// Cleanup records in LIFO order
#[derive(Debug, Default)]
pub(crate) struct CleanupChain {
    nodes: Vec<CleanupRecord>,
    head: Option<usize>,
}

impl CleanupChain {
    /// Link `record` at the head and hand it back for the caller to fill in
    pub(crate) fn push_front(&mut self, mut record: CleanupRecord) -> &mut CleanupRecord {
        let index = self.nodes.len();
        record.next = self.head;
        self.nodes.push(record);
        self.head = Some(index);
        &mut self.nodes[index]
    }

    /// Invoke every handler from the head, returning how many ran
    pub(crate) fn run_all(&mut self) -> usize {
        let mut invoked = 0;
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let record = &mut self.nodes[index];
            if record.has_handler() {
                log_cleanup_invoked(invoked, record.data.map(|p| p.as_ptr() as *const u8));
            }
            if record.invoke() {
                invoked += 1;
            }
            cursor = record.next;
        }
        invoked
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }
}
