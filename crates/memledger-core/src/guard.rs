//! Owned handles that release exactly once on every exit path.

use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use crate::ledger::SourceLocation;
use crate::tracker::Tracker;

/// A tracked block freed through its tracker when dropped.
#[derive(Debug)]
pub struct TrackedBlock<'t> {
    tracker: &'t Tracker,
    ptr: NonNull<u8>,
    len: usize,
}

impl<'t> TrackedBlock<'t> {
    /// Take ownership of `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block of at least `len` bytes obtained from
    /// `tracker`, and nothing else may release it.
    pub unsafe fn from_raw(tracker: &'t Tracker, ptr: NonNull<u8>, len: usize) -> Self {
        Self { tracker, ptr, len }
    }

    #[must_use]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Requested size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Fill the whole block with `byte`.
    pub fn fill(&mut self, byte: u8) {
        // SAFETY: the block is live and `len` bytes long.
        unsafe { self.ptr.as_ptr().write_bytes(byte, self.len) };
    }

    /// Resize through the tracker, possibly moving the block.
    ///
    /// Returns false and leaves the block untouched when `new_size` is zero
    /// or the reallocation fails.
    #[track_caller]
    pub fn resize(&mut self, new_size: usize) -> bool {
        if new_size == 0 {
            return false;
        }
        let location = SourceLocation::caller();
        // SAFETY: this guard owns a live block from `tracker`.
        match unsafe { self.tracker.reallocate_at(Some(self.ptr), new_size, location) } {
            Some(ptr) => {
                self.ptr = ptr;
                self.len = new_size;
                true
            }
            None => false,
        }
    }

    /// Give up ownership without freeing. The block stays tracked.
    #[must_use]
    pub fn into_raw(self) -> NonNull<u8> {
        let this = ManuallyDrop::new(self);
        this.ptr
    }
}

impl Drop for TrackedBlock<'_> {
    fn drop(&mut self) {
        // SAFETY: this guard is the block's only owner.
        unsafe { self.tracker.deallocate(Some(self.ptr)) };
    }
}

/// Runs `cleanup(value)` on drop unless dismissed.
pub struct ScopeGuard<T, F: FnOnce(T)> {
    inner: ManuallyDrop<T>,
    cleanup: ManuallyDrop<F>,
}

impl<T, F: FnOnce(T)> ScopeGuard<T, F> {
    pub fn new(value: T, cleanup: F) -> Self {
        Self {
            inner: ManuallyDrop::new(value),
            cleanup: ManuallyDrop::new(cleanup),
        }
    }

    /// Cancel the cleanup and hand the value back.
    pub fn dismiss(self) -> T {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so each field is taken exactly once.
        unsafe {
            ManuallyDrop::drop(&mut this.cleanup);
            ManuallyDrop::take(&mut this.inner)
        }
    }
}

impl<T, F: FnOnce(T)> Deref for ScopeGuard<T, F> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T, F: FnOnce(T)> DerefMut for ScopeGuard<T, F> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T, F: FnOnce(T)> Drop for ScopeGuard<T, F> {
    fn drop(&mut self) {
        // SAFETY: drop runs once and `dismiss` bypasses it.
        let (value, cleanup) = unsafe {
            (
                ManuallyDrop::take(&mut self.inner),
                ManuallyDrop::take(&mut self.cleanup),
            )
        };
        cleanup(value);
    }
}

/// Run `f` at scope exit.
pub fn defer<F: FnOnce()>(f: F) -> ScopeGuard<(), impl FnOnce(())> {
    ScopeGuard::new((), move |()| f())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use std::cell::Cell;

    #[test]
    fn tracked_block_frees_on_drop() {
        let tracker = Tracker::initialized(TrackerConfig::quiet()).unwrap();
        {
            let mut block = tracker.allocate_scoped(256).unwrap();
            block.fill(0x5A);
            assert_eq!(block.len(), 256);
            assert_eq!(tracker.current_usage(), 256);
        }
        assert_eq!(tracker.current_usage(), 0);
        assert_eq!(tracker.active_allocation_count(), 0);
    }

    #[test]
    fn resize_follows_the_block() {
        let tracker = Tracker::initialized(TrackerConfig::quiet()).unwrap();
        let mut block = tracker.allocate_scoped(16).unwrap();
        block.fill(7);
        assert!(block.resize(4096));
        assert_eq!(block.len(), 4096);
        assert_eq!(tracker.current_usage(), 4096);
        // SAFETY: the first 16 bytes survive the move.
        assert_eq!(unsafe { *block.as_ptr().as_ptr().add(15) }, 7);
        assert!(!block.resize(0));
        assert_eq!(tracker.lookup(block.as_ptr()).map(|r| r.size), Some(4096));
        drop(block);
        assert_eq!(tracker.current_usage(), 0);
    }

    #[test]
    fn into_raw_keeps_block_alive() {
        let tracker = Tracker::initialized(TrackerConfig::quiet()).unwrap();
        let ptr = tracker.allocate_scoped(32).unwrap().into_raw();
        assert_eq!(tracker.lookup(ptr).map(|r| r.size), Some(32));
        // SAFETY: ownership was released by into_raw.
        unsafe { tracker.deallocate(Some(ptr)) };
        assert_eq!(tracker.current_usage(), 0);
    }

    #[test]
    fn scope_guard_runs_once_unless_dismissed() {
        let runs = Cell::new(0);
        {
            let _guard = ScopeGuard::new(7, |v| runs.set(runs.get() + v));
        }
        assert_eq!(runs.get(), 7);

        let guard = ScopeGuard::new(5, |v| runs.set(runs.get() + v));
        assert_eq!(*guard, 5);
        assert_eq!(guard.dismiss(), 5);
        assert_eq!(runs.get(), 7);
    }

    #[test]
    fn defer_runs_at_scope_exit() {
        let ran = Cell::new(false);
        {
            let _guard = defer(|| ran.set(true));
            assert!(!ran.get());
        }
        assert!(ran.get());
    }
}
