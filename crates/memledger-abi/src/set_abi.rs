//! ABI layer for allocation sets and bulk cleanup over the global tracker.

use std::ffi::{c_int, c_void};
use std::ptr::NonNull;

use memledger_core::{AllocationSet, BulkCleanup};

use crate::global_tracker;
use crate::util::set_errno;

/// Opaque allocation set handle.
pub type MemledgerSet = AllocationSet<'static>;

/// Opaque bulk cleanup handle.
pub type MemledgerCleanup = BulkCleanup<'static>;

#[unsafe(no_mangle)]
pub extern "C" fn memledger_set_create() -> *mut MemledgerSet {
    Box::into_raw(Box::new(AllocationSet::new(global_tracker())))
}

/// `0` on success; `-1` for a null argument or when the set cannot grow,
/// in which case the caller still owns `ptr`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memledger_set_add(set: *mut MemledgerSet, ptr: *mut c_void) -> c_int {
    // SAFETY: `set` is null or a live set from `memledger_set_create`.
    let Some(set) = (unsafe { set.as_mut() }) else {
        set_errno(libc::EINVAL);
        return -1;
    };
    let Some(ptr) = NonNull::new(ptr.cast::<u8>()) else {
        set_errno(libc::EINVAL);
        return -1;
    };
    // SAFETY: `ptr` is a live block from this library, handed over by the caller.
    match unsafe { set.add(ptr) } {
        Ok(()) => 0,
        Err(_) => {
            set_errno(libc::ENOMEM);
            -1
        }
    }
}

/// Keep every member. Returns how many handles were released from the set.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memledger_set_commit(set: *mut MemledgerSet) -> usize {
    // SAFETY: `set` is null or a live set from `memledger_set_create`.
    unsafe { set.as_mut() }.map_or(0, |set| set.commit().len())
}

/// Free every member. Returns how many were freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memledger_set_rollback(set: *mut MemledgerSet) -> usize {
    // SAFETY: `set` is null or a live set from `memledger_set_create`.
    unsafe { set.as_mut() }.map_or(0, AllocationSet::rollback)
}

/// Release the set's own storage. Members are not freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memledger_set_destroy(set: *mut MemledgerSet) {
    if set.is_null() {
        return;
    }
    // SAFETY: `set` came from `Box::into_raw` in `memledger_set_create`.
    drop(unsafe { Box::from_raw(set) });
}

#[unsafe(no_mangle)]
pub extern "C" fn memledger_cleanup_create() -> *mut MemledgerCleanup {
    Box::into_raw(Box::new(BulkCleanup::new(global_tracker())))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn memledger_cleanup_add(
    cleanup: *mut MemledgerCleanup,
    ptr: *mut c_void,
) -> c_int {
    // SAFETY: `cleanup` is null or a live handle from `memledger_cleanup_create`.
    let Some(cleanup) = (unsafe { cleanup.as_mut() }) else {
        set_errno(libc::EINVAL);
        return -1;
    };
    let Some(ptr) = NonNull::new(ptr.cast::<u8>()) else {
        return 0;
    };
    // SAFETY: `ptr` is a live block from this library, handed over by the caller.
    unsafe { cleanup.push(ptr) };
    0
}

/// Free every queued block. Returns how many were freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memledger_cleanup_free_all(cleanup: *mut MemledgerCleanup) -> usize {
    // SAFETY: `cleanup` is null or a live handle from `memledger_cleanup_create`.
    unsafe { cleanup.as_mut() }.map_or(0, BulkCleanup::free_all)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn memledger_cleanup_destroy(cleanup: *mut MemledgerCleanup) {
    if cleanup.is_null() {
        return;
    }
    // SAFETY: `cleanup` came from `Box::into_raw` in `memledger_cleanup_create`.
    drop(unsafe { Box::from_raw(cleanup) });
}
