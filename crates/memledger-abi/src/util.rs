//! Shared internal utilities for ABI adapters.

use std::collections::HashSet;
use std::ffi::{CStr, c_char, c_int};

use memledger_core::SourceLocation;
use parking_lot::Mutex;

const UNKNOWN_FILE: &str = "<unknown>";

/// Interned call-site file names. Grows by one entry per distinct source file.
static FILE_NAMES: Mutex<Option<HashSet<&'static str>>> = Mutex::new(None);

/// Build a call site from a C `__FILE__`/`__LINE__` pair.
///
/// # Safety
///
/// `file` must be null or point to a NUL-terminated string.
pub(crate) unsafe fn location(file: *const c_char, line: c_int) -> SourceLocation {
    let line = u32::try_from(line).unwrap_or(0);
    if file.is_null() {
        return SourceLocation::new(UNKNOWN_FILE, line);
    }
    // SAFETY: caller guarantees a NUL-terminated string.
    let name = unsafe { CStr::from_ptr(file) }.to_string_lossy();
    SourceLocation::new(intern(&name), line)
}

fn intern(name: &str) -> &'static str {
    let mut guard = FILE_NAMES.lock();
    let names = guard.get_or_insert_with(HashSet::new);
    if let Some(&existing) = names.get(name) {
        return existing;
    }
    let leaked: &'static str = Box::leak(name.to_owned().into_boxed_str());
    names.insert(leaked);
    leaked
}

/// Owned copy of a C string, or `fallback` when null.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string.
pub(crate) unsafe fn owned_name(ptr: *const c_char, fallback: &str) -> String {
    if ptr.is_null() {
        return fallback.to_owned();
    }
    // SAFETY: caller guarantees a NUL-terminated string.
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

#[cfg(target_os = "linux")]
pub(crate) fn set_errno(val: c_int) {
    // SAFETY: __errno_location returns this thread's errno slot.
    unsafe { *libc::__errno_location() = val };
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn set_errno(_val: c_int) {}
