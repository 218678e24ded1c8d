//! ABI layer for object pools.
//!
//! Pools are handed to C as opaque pointers owned by the caller until
//! `memledger_pool_destroy`.

use std::ffi::{c_char, c_int, c_void};
use std::ptr::{self, NonNull};

use memledger_core::{MemoryPool, PoolError};

use crate::util::{owned_name, set_errno};

/// Returns null (with `errno` set) when the geometry is empty, overflows, or
/// the backing block cannot be allocated.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memledger_pool_create(
    object_size: usize,
    count: usize,
    name: *const c_char,
) -> *mut MemoryPool {
    // SAFETY: `name` is a C string or null per the export contract.
    let name = unsafe { owned_name(name, "pool") };
    match MemoryPool::create(object_size, count, name) {
        Ok(pool) => Box::into_raw(Box::new(pool)),
        Err(err) => {
            set_errno(match err {
                PoolError::Exhausted { .. } => libc::ENOMEM,
                _ => libc::EINVAL,
            });
            ptr::null_mut()
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn memledger_pool_alloc(pool: *mut MemoryPool) -> *mut c_void {
    // SAFETY: `pool` is null or a live pool from `memledger_pool_create`.
    let Some(pool) = (unsafe { pool.as_ref() }) else {
        set_errno(libc::EINVAL);
        return ptr::null_mut();
    };
    match pool.allocate() {
        Some(obj) => obj.as_ptr().cast::<c_void>(),
        None => {
            set_errno(libc::ENOMEM);
            ptr::null_mut()
        }
    }
}

/// `0` on success, `-1` (errno `EINVAL`) for a null, foreign or already-free object.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memledger_pool_free(pool: *mut MemoryPool, obj: *mut c_void) -> c_int {
    // SAFETY: `pool` is null or a live pool from `memledger_pool_create`.
    let Some(pool) = (unsafe { pool.as_ref() }) else {
        set_errno(libc::EINVAL);
        return -1;
    };
    let Some(obj) = NonNull::new(obj.cast::<u8>()) else {
        set_errno(libc::EINVAL);
        return -1;
    };
    match pool.give_back(obj) {
        Ok(()) => 0,
        Err(_) => {
            set_errno(libc::EINVAL);
            -1
        }
    }
}

/// Number of free slots, or 0 for a null pool.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memledger_pool_available(pool: *const MemoryPool) -> usize {
    // SAFETY: `pool` is null or a live pool from `memledger_pool_create`.
    unsafe { pool.as_ref() }.map_or(0, |pool| pool.stats().free)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn memledger_pool_destroy(pool: *mut MemoryPool) {
    if pool.is_null() {
        return;
    }
    // SAFETY: `pool` came from `Box::into_raw` in `memledger_pool_create`
    // and is destroyed once.
    drop(unsafe { Box::from_raw(pool) });
}
