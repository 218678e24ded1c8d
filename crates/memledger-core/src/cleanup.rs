//! Batch deallocation of ungrouped blocks.

use std::ptr::NonNull;

use crate::tracker::Tracker;

/// Collects handles and frees them all at once.
///
/// Unlike [`AllocationSet`](crate::AllocationSet) there is no commit:
/// members are either freed by `free_all` or left alone when dropped.
#[derive(Debug)]
pub struct BulkCleanup<'t> {
    tracker: &'t Tracker,
    pending: Vec<NonNull<u8>>,
}

impl<'t> BulkCleanup<'t> {
    #[must_use]
    pub fn new(tracker: &'t Tracker) -> Self {
        Self {
            tracker,
            pending: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Queue `handle` for release.
    ///
    /// # Safety
    ///
    /// `handle` must be a live block from this cleanup's tracker that nothing
    /// else will release while it is queued.
    pub unsafe fn push(&mut self, handle: NonNull<u8>) {
        self.pending.push(handle);
    }

    /// Free every queued block. Returns how many were freed.
    pub fn free_all(&mut self) -> usize {
        let pending = std::mem::take(&mut self.pending);
        let count = pending.len();
        for ptr in pending {
            // SAFETY: queued handles are live and exclusively owned (`push` contract).
            unsafe { self.tracker.deallocate(Some(ptr)) };
        }
        count
    }
}
