//! Transactional allocation sets.
//!
//! A set groups tracked blocks so they can be kept together (`commit`) or
//! released together (`rollback`). Both leave the set open and empty, ready
//! for the next transaction. Dropping a set releases only its own member
//! array; any remaining members stay allocated.

use std::ptr::NonNull;

use crate::error::SetError;
use crate::guard::ScopeGuard;
use crate::ledger::SourceLocation;
use crate::tracker::Tracker;

/// Initial member capacity, reserved on first `add`.
const INITIAL_CAPACITY: usize = 8;

/// A group of tracked blocks with commit/rollback semantics.
#[derive(Debug)]
pub struct AllocationSet<'t> {
    tracker: &'t Tracker,
    members: Vec<NonNull<u8>>,
}

impl<'t> AllocationSet<'t> {
    /// Open, empty set over `tracker`.
    #[must_use]
    pub fn new(tracker: &'t Tracker) -> Self {
        Self {
            tracker,
            members: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[must_use]
    pub fn members(&self) -> &[NonNull<u8>] {
        &self.members
    }

    /// Append `handle`. On error the caller still owns `handle`.
    ///
    /// # Safety
    ///
    /// `handle` must be a live block from this set's tracker that nothing
    /// else will release while it is a member.
    pub unsafe fn add(&mut self, handle: NonNull<u8>) -> Result<(), SetError> {
        self.reserve_one()?;
        self.members.push(handle);
        Ok(())
    }

    /// Allocate `size` bytes through the tracker and add them to the set.
    #[track_caller]
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        let location = SourceLocation::caller();
        let ptr = self.tracker.allocate_at(size, location)?;
        self.adopt(ptr)
    }

    /// Allocate `count * size` zeroed bytes and add them to the set.
    #[track_caller]
    pub fn allocate_zeroed(&mut self, count: usize, size: usize) -> Option<NonNull<u8>> {
        let location = SourceLocation::caller();
        let ptr = self.tracker.allocate_zeroed_at(count, size, location)?;
        self.adopt(ptr)
    }

    /// Keep every member. Ownership of the handles moves to the caller.
    pub fn commit(&mut self) -> Vec<NonNull<u8>> {
        std::mem::take(&mut self.members)
    }

    /// Release every member through the tracker. Returns how many were freed.
    pub fn rollback(&mut self) -> usize {
        let members = std::mem::take(&mut self.members);
        let count = members.len();
        for ptr in members {
            // SAFETY: members are live tracker blocks owned by the set (`add` contract).
            unsafe { self.tracker.deallocate(Some(ptr)) };
        }
        count
    }

    fn adopt(&mut self, ptr: NonNull<u8>) -> Option<NonNull<u8>> {
        let tracker = self.tracker;
        // SAFETY: `ptr` is a fresh block that has not been published.
        let guard = ScopeGuard::new(ptr, |ptr| unsafe { tracker.deallocate(Some(ptr)) });
        self.reserve_one().ok()?;
        let ptr = guard.dismiss();
        self.members.push(ptr);
        Some(ptr)
    }

    fn reserve_one(&mut self) -> Result<(), SetError> {
        let capacity = self.members.capacity();
        if self.members.len() < capacity {
            return Ok(());
        }
        let additional = capacity.max(INITIAL_CAPACITY);
        self.members
            .try_reserve_exact(additional)
            .map_err(|_| SetError::Growth { capacity })
    }
}

impl Drop for AllocationSet<'_> {
    fn drop(&mut self) {
        if !self.members.is_empty() {
            self.tracker
                .note("allocation_set", "set_dropped_with_members", self.members.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;

    fn tracker() -> Tracker {
        Tracker::initialized(TrackerConfig::quiet()).unwrap()
    }

    #[test]
    fn rollback_frees_every_member() {
        let tracker = tracker();
        let mut set = AllocationSet::new(&tracker);
        for size in [16, 32, 64] {
            set.allocate(size).unwrap();
        }
        assert_eq!(tracker.current_usage(), 112);
        assert_eq!(set.rollback(), 3);
        assert!(set.is_empty());
        assert_eq!(tracker.current_usage(), 0);
        assert_eq!(tracker.active_allocation_count(), 0);
    }

    #[test]
    fn commit_keeps_members_allocated() {
        let tracker = tracker();
        let mut set = AllocationSet::new(&tracker);
        set.allocate(10).unwrap();
        set.allocate_zeroed(4, 4).unwrap();
        let kept = set.commit();
        assert_eq!(kept.len(), 2);
        assert!(set.is_empty());
        assert_eq!(set.rollback(), 0);
        assert_eq!(tracker.current_usage(), 26);
        for ptr in kept {
            // SAFETY: committed handles belong to the caller.
            unsafe { tracker.deallocate(Some(ptr)) };
        }
        assert_eq!(tracker.current_usage(), 0);
    }

    #[test]
    fn set_is_reusable_after_each_transaction() {
        let tracker = tracker();
        let mut set = AllocationSet::new(&tracker);
        for _ in 0..3 {
            for _ in 0..20 {
                set.allocate(8).unwrap();
            }
            assert_eq!(set.len(), 20);
            set.rollback();
        }
        assert_eq!(tracker.active_allocation_count(), 0);
    }

    #[test]
    fn add_accepts_external_blocks() {
        let tracker = tracker();
        let ptr = tracker.allocate(48).unwrap();
        let mut set = AllocationSet::new(&tracker);
        // SAFETY: ptr is a live block from this tracker.
        unsafe { set.add(ptr) }.unwrap();
        assert_eq!(set.members(), &[ptr]);
        set.rollback();
        assert_eq!(tracker.current_usage(), 0);
    }

    #[test]
    fn zero_sized_convenience_allocation_adds_nothing() {
        let tracker = tracker();
        let mut set = AllocationSet::new(&tracker);
        assert!(set.allocate(0).is_none());
        assert!(set.is_empty());
    }

    #[test]
    fn drop_leaves_members_allocated_and_warns() {
        let tracker = tracker();
        let ptr = {
            let mut set = AllocationSet::new(&tracker);
            set.allocate(40).unwrap()
        };
        assert_eq!(tracker.current_usage(), 40);
        assert!(
            tracker
                .lifecycle_logs()
                .iter()
                .any(|r| r.event == "set_dropped_with_members")
        );
        // SAFETY: the dropped set did not free its member.
        unsafe { tracker.deallocate(Some(ptr)) };
    }
}
