//! Raw allocation primitives the tracker delegates to.
//!
//! The tracker never carves memory itself. Every byte comes from a
//! [`RawAllocator`], by default the C heap (`malloc`/`calloc`/`realloc`/`free`),
//! which lets callers free a block without remembering its size.

use std::ffi::c_void;

/// Untracked heap primitives with C allocator semantics.
///
/// Implementations return null on failure and must leave the original block
/// untouched when `reallocate` fails.
///
/// `reallocate` runs with the owning tracker's lock held, and that lock is
/// not reentrant. Implementations must never call back into the tracker that
/// owns them; doing so deadlocks.
pub trait RawAllocator: Send + Sync {
    /// Allocate `size` bytes. `size` is never zero.
    fn allocate(&self, size: usize) -> *mut u8;

    /// Allocate `count * size` zeroed bytes. The product never overflows and
    /// is never zero.
    fn allocate_zeroed(&self, count: usize, size: usize) -> *mut u8;

    /// Resize `ptr` to `new_size` bytes, possibly moving it.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator and not yet released.
    /// `new_size` is never zero.
    unsafe fn reallocate(&self, ptr: *mut u8, new_size: usize) -> *mut u8;

    /// Release `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator and not yet released.
    unsafe fn deallocate(&self, ptr: *mut u8);
}

/// The C heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl RawAllocator for SystemAllocator {
    fn allocate(&self, size: usize) -> *mut u8 {
        // SAFETY: plain libc allocation; a null result is handled by the caller.
        unsafe { libc::malloc(size) }.cast::<u8>()
    }

    fn allocate_zeroed(&self, count: usize, size: usize) -> *mut u8 {
        // SAFETY: plain libc allocation; calloc performs its own overflow check.
        unsafe { libc::calloc(count, size) }.cast::<u8>()
    }

    unsafe fn reallocate(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        // SAFETY: caller guarantees `ptr` is a live block from this allocator.
        unsafe { libc::realloc(ptr.cast::<c_void>(), new_size) }.cast::<u8>()
    }

    unsafe fn deallocate(&self, ptr: *mut u8) {
        // SAFETY: caller guarantees `ptr` is a live block from this allocator.
        unsafe { libc::free(ptr.cast::<c_void>()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_allocator_round_trip() {
        let alloc = SystemAllocator;
        let ptr = alloc.allocate(32);
        assert!(!ptr.is_null());
        // SAFETY: ptr is a live 32-byte block.
        unsafe {
            ptr.write_bytes(0xAB, 32);
            let grown = alloc.reallocate(ptr, 64);
            assert!(!grown.is_null());
            assert_eq!(*grown.add(31), 0xAB);
            alloc.deallocate(grown);
        }
    }

    #[test]
    fn zeroed_allocation_is_zeroed() {
        let alloc = SystemAllocator;
        let ptr = alloc.allocate_zeroed(16, 4);
        assert!(!ptr.is_null());
        // SAFETY: ptr is a live 64-byte block.
        unsafe {
            let bytes = std::slice::from_raw_parts(ptr, 64);
            assert!(bytes.iter().all(|&b| b == 0));
            alloc.deallocate(ptr);
        }
    }
}
