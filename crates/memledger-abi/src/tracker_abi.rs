//! ABI layer for the tracked allocation functions and tracker lifecycle.
//!
//! Allocation failures return null and set `errno` to `ENOMEM`. Zero-size
//! requests return null without touching `errno`.

use std::ffi::{c_char, c_int, c_void};
use std::ptr::{self, NonNull};

use memledger_core::InitOutcome;

use crate::global_tracker;
use crate::util::{location, set_errno};

/// Statistics snapshot in C layout.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemledgerStats {
    pub total_allocated: usize,
    pub total_freed: usize,
    pub peak_usage: usize,
    pub current_usage: usize,
    pub active_allocations: usize,
    pub failed_allocations: u64,
}

/// `0` when storage was acquired, `1` when already initialized, `-1` on failure.
#[unsafe(no_mangle)]
pub extern "C" fn memledger_init() -> c_int {
    match global_tracker().initialize() {
        Ok(InitOutcome::Initialized) => 0,
        Ok(InitOutcome::AlreadyInitialized) => 1,
        Err(_) => {
            set_errno(libc::ENOMEM);
            -1
        }
    }
}

/// Report leaks (to stderr, if configured) and release tracking storage.
/// Returns the number of leaked blocks.
#[unsafe(no_mangle)]
pub extern "C" fn memledger_shutdown() -> usize {
    global_tracker()
        .shutdown()
        .map_or(0, |report| report.leak_count)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn memledger_malloc(
    size: usize,
    file: *const c_char,
    line: c_int,
) -> *mut c_void {
    // SAFETY: `file` is a C string or null per the export contract.
    let site = unsafe { location(file, line) };
    let out = global_tracker().allocate_at(size, site);
    finish(out, size != 0)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn memledger_calloc(
    count: usize,
    size: usize,
    file: *const c_char,
    line: c_int,
) -> *mut c_void {
    // SAFETY: `file` is a C string or null per the export contract.
    let site = unsafe { location(file, line) };
    let out = global_tracker().allocate_zeroed_at(count, size, site);
    finish(out, count != 0 && size != 0)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn memledger_realloc(
    ptr: *mut c_void,
    size: usize,
    file: *const c_char,
    line: c_int,
) -> *mut c_void {
    // SAFETY: `file` is a C string or null per the export contract.
    let site = unsafe { location(file, line) };
    let handle = NonNull::new(ptr.cast::<u8>());
    // SAFETY: `ptr` is null or a live block from this library.
    let out = unsafe { global_tracker().reallocate_at(handle, size, site) };
    finish(out, size != 0)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn memledger_free(ptr: *mut c_void) {
    // SAFETY: `ptr` is null or a live block from this library.
    unsafe { global_tracker().deallocate(NonNull::new(ptr.cast::<u8>())) };
}

#[unsafe(no_mangle)]
pub extern "C" fn memledger_current_usage() -> usize {
    global_tracker().current_usage()
}

#[unsafe(no_mangle)]
pub extern "C" fn memledger_active_allocations() -> usize {
    global_tracker().active_allocation_count()
}

/// Fill `out` with a statistics snapshot. Returns `-1` when `out` is null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memledger_stats(out: *mut MemledgerStats) -> c_int {
    if out.is_null() {
        set_errno(libc::EINVAL);
        return -1;
    }
    let tracker = global_tracker();
    let stats = tracker.statistics();
    let snapshot = MemledgerStats {
        total_allocated: stats.total_allocated,
        total_freed: stats.total_freed,
        peak_usage: stats.peak_usage,
        current_usage: stats.current_usage,
        active_allocations: tracker.active_allocation_count(),
        failed_allocations: stats.failed_allocations,
    };
    // SAFETY: `out` is non-null and points to writable storage per the export contract.
    unsafe { out.write(snapshot) };
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn memledger_set_leak_detection(enabled: c_int) {
    global_tracker().set_leak_detection(enabled != 0);
}

#[unsafe(no_mangle)]
pub extern "C" fn memledger_leak_detection_enabled() -> c_int {
    c_int::from(global_tracker().leak_detection_enabled())
}

/// Print the current leak report to stderr without changing anything.
/// Returns the number of live tracked blocks.
#[unsafe(no_mangle)]
pub extern "C" fn memledger_report_leaks() -> usize {
    let report = global_tracker().report_leaks();
    eprint!("{report}");
    report.leak_count
}

fn finish(out: Option<NonNull<u8>>, nonzero_request: bool) -> *mut c_void {
    match out {
        Some(ptr) => ptr.as_ptr().cast::<c_void>(),
        None => {
            if nonzero_request {
                set_errno(libc::ENOMEM);
            }
            ptr::null_mut()
        }
    }
}
