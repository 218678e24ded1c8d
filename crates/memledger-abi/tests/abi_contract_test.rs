//! Integration tests for the C boundary over the process-wide tracker.

use std::ffi::{CString, c_int};
use std::ptr;
use std::sync::Mutex;

use memledger_abi::global_tracker;
use memledger_abi::pool_abi::{
    memledger_pool_alloc, memledger_pool_available, memledger_pool_create, memledger_pool_destroy,
    memledger_pool_free,
};
use memledger_abi::set_abi::{
    memledger_cleanup_add, memledger_cleanup_create, memledger_cleanup_destroy,
    memledger_cleanup_free_all, memledger_set_add, memledger_set_commit, memledger_set_create,
    memledger_set_destroy, memledger_set_rollback,
};
use memledger_abi::tracker_abi::{
    MemledgerStats, memledger_active_allocations, memledger_calloc, memledger_current_usage,
    memledger_free, memledger_init, memledger_malloc, memledger_realloc, memledger_stats,
};

static TEST_LOCK: Mutex<()> = Mutex::new(());

fn errno() -> c_int {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

fn file() -> CString {
    CString::new("abi_contract_test.c").unwrap()
}

#[test]
fn tracked_round_trip_records_c_call_site() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    assert!(memledger_init() >= 0);
    let baseline = memledger_current_usage();
    let live = memledger_active_allocations();
    let file = file();

    unsafe {
        let p = memledger_malloc(100, file.as_ptr(), 17);
        assert!(!p.is_null());
        let record = global_tracker()
            .lookup(ptr::NonNull::new(p.cast()).unwrap())
            .unwrap();
        assert_eq!(record.location.file, "abi_contract_test.c");
        assert_eq!(record.location.line, 17);

        let q = memledger_realloc(p, 500, file.as_ptr(), 18);
        assert!(!q.is_null());
        assert_eq!(memledger_current_usage(), baseline + 500);

        let z = memledger_calloc(8, 8, ptr::null(), 0);
        assert!(!z.is_null());
        assert_eq!(std::slice::from_raw_parts(z.cast::<u8>(), 64), &[0_u8; 64]);

        memledger_free(q);
        memledger_free(z);
        memledger_free(ptr::null_mut());
    }
    assert_eq!(memledger_current_usage(), baseline);
    assert_eq!(memledger_active_allocations(), live);
}

#[test]
fn zero_and_overflowing_requests_return_null() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    assert!(memledger_init() >= 0);
    let file = file();
    unsafe {
        assert!(memledger_malloc(0, file.as_ptr(), 1).is_null());
        assert!(memledger_calloc(0, 4, file.as_ptr(), 2).is_null());
        assert!(memledger_calloc(usize::MAX, 2, file.as_ptr(), 3).is_null());
        assert_eq!(errno(), libc::ENOMEM);
    }
}

#[test]
fn stats_snapshot_matches_diagnostics() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    assert!(memledger_init() >= 0);
    let mut stats = MemledgerStats::default();
    unsafe {
        assert_eq!(memledger_stats(ptr::null_mut()), -1);
        assert_eq!(memledger_stats(&mut stats), 0);
    }
    assert_eq!(stats.current_usage, memledger_current_usage());
    assert_eq!(stats.active_allocations, memledger_active_allocations());
    assert!(stats.peak_usage >= stats.current_usage);
}

#[test]
fn pool_exports_enforce_capacity_and_membership() {
    let name = CString::new("abi-pool").unwrap();
    unsafe {
        assert!(memledger_pool_create(0, 4, name.as_ptr()).is_null());
        let pool = memledger_pool_create(32, 2, name.as_ptr());
        assert!(!pool.is_null());
        let a = memledger_pool_alloc(pool);
        let b = memledger_pool_alloc(pool);
        assert!(!a.is_null() && !b.is_null());
        assert!(memledger_pool_alloc(pool).is_null());
        assert_eq!(memledger_pool_available(pool), 0);

        assert_eq!(memledger_pool_free(pool, b), 0);
        assert_eq!(memledger_pool_free(pool, b), -1);
        assert_eq!(memledger_pool_free(pool, ptr::null_mut()), -1);
        assert_eq!(memledger_pool_alloc(pool), b);
        memledger_pool_destroy(pool);
        memledger_pool_destroy(ptr::null_mut());
    }
}

#[test]
fn set_and_cleanup_exports() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    assert!(memledger_init() >= 0);
    let baseline = memledger_current_usage();
    let file = file();
    unsafe {
        let set = memledger_set_create();
        for line in 0..4 {
            let p = memledger_malloc(16, file.as_ptr(), line);
            assert_eq!(memledger_set_add(set, p), 0);
        }
        assert_eq!(memledger_set_add(set, ptr::null_mut()), -1);
        assert_eq!(memledger_current_usage(), baseline + 64);
        assert_eq!(memledger_set_rollback(set), 4);
        assert_eq!(memledger_current_usage(), baseline);

        let kept = memledger_malloc(8, file.as_ptr(), 40);
        assert_eq!(memledger_set_add(set, kept), 0);
        assert_eq!(memledger_set_commit(set), 1);
        memledger_set_destroy(set);
        assert_eq!(memledger_current_usage(), baseline + 8);

        let cleanup = memledger_cleanup_create();
        assert_eq!(memledger_cleanup_add(cleanup, kept), 0);
        assert_eq!(memledger_cleanup_free_all(cleanup), 1);
        memledger_cleanup_destroy(cleanup);
    }
    assert_eq!(memledger_current_usage(), baseline);
}
