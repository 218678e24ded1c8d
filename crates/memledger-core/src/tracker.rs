//! Instrumented allocation wrappers over the allocation ledger.
//!
//! A [`Tracker`] is one independent instance of the subsystem: a ledger,
//! usage statistics and a lifecycle log behind a single mutex, plus the raw
//! allocator it delegates to. Production code typically owns exactly one;
//! tests construct as many as they like.
//!
//! Tracking happens only while the tracker is initialized and leak detection
//! is enabled. Otherwise every wrapper is a plain call into the raw allocator.
//! Failed or rejected requests always come back as `None`; nothing here
//! panics or aborts on allocation failure.

use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::failure::{AllocationFailure, FailureKind, FailureObserver};
use crate::guard::TrackedBlock;
use crate::ledger::{AllocationRecord, Ledger, SourceLocation, UsageStatistics};
use crate::leak::LeakReport;
use crate::log::{LifecycleEvent, LifecycleLog, LifecycleRecord, LogLevel};
use crate::raw::{RawAllocator, SystemAllocator};

/// Result of [`Tracker::initialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// Tracking storage was acquired by this call.
    Initialized,
    /// The tracker was already initialized; nothing changed.
    AlreadyInitialized,
}

struct TrackerState {
    /// Present exactly while the tracker is initialized.
    ledger: Option<Ledger>,
    stats: UsageStatistics,
    log: LifecycleLog,
}

impl TrackerState {
    fn log_enabled(&self, level: LogLevel) -> bool {
        self.log.enabled(level)
    }

    fn log(&mut self, event: LifecycleEvent) {
        let active = self.ledger.as_ref().map_or(0, Ledger::len);
        self.log.record(event, active, self.stats.current_usage);
    }

    /// Account for a record whose block was released while untracked.
    fn evict_stale(&mut self, symbol: &'static str, stale: &AllocationRecord) {
        if !self.stats.record_free(stale.size) {
            self.log_underflow(symbol, stale.address, stale.size);
        }
        if self.log_enabled(LogLevel::Warn) {
            self.log(
                LifecycleEvent::new(LogLevel::Warn, symbol, "stale_record_evicted", "replaced")
                    .ptr(stale.address)
                    .size(stale.size)
                    .details(format!("stale_site={}", stale.location)),
            );
        }
    }

    fn log_underflow(&mut self, symbol: &'static str, ptr: usize, size: usize) {
        self.log(
            LifecycleEvent::new(
                LogLevel::Error,
                symbol,
                "invariant_current_usage_underflow",
                "recovered",
            )
            .ptr(ptr)
            .size(size)
            .details("checked_sub_failed"),
        );
    }
}

/// Instrumented allocation subsystem instance.
pub struct Tracker {
    state: Mutex<TrackerState>,
    leak_detection: AtomicBool,
    raw: Box<dyn RawAllocator>,
    observer: Option<Arc<dyn FailureObserver>>,
    config: TrackerConfig,
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("initialized", &self.is_initialized())
            .field("leak_detection", &self.leak_detection_enabled())
            .field("statistics", &self.statistics())
            .finish_non_exhaustive()
    }
}

impl Tracker {
    /// Uninitialized tracker over the C heap.
    #[must_use]
    pub fn new(config: TrackerConfig) -> Self {
        Self::with_allocator(config, SystemAllocator)
    }

    /// Uninitialized tracker over a custom raw allocator.
    #[must_use]
    pub fn with_allocator(config: TrackerConfig, raw: impl RawAllocator + 'static) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                ledger: None,
                stats: UsageStatistics::default(),
                log: LifecycleLog::new(config.log_threshold, config.log_capacity),
            }),
            leak_detection: AtomicBool::new(config.leak_detection),
            raw: Box::new(raw),
            observer: None,
            config,
        }
    }

    /// Initialized tracker over the C heap.
    pub fn initialized(config: TrackerConfig) -> Result<Self, TrackerError> {
        let tracker = Self::new(config);
        tracker.initialize()?;
        Ok(tracker)
    }

    /// Attach the receiver of allocation failure notifications.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn FailureObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Configuration this tracker was built with.
    #[must_use]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Acquire ledger storage. Idempotent.
    ///
    /// A tracker that was shut down may be initialized again; statistics
    /// restart from zero in that case.
    pub fn initialize(&self) -> Result<InitOutcome, TrackerError> {
        let mut state = self.state.lock();
        if state.ledger.is_some() {
            return Ok(InitOutcome::AlreadyInitialized);
        }
        let ledger = Ledger::with_capacity(
            self.config.initial_ledger_capacity,
            self.config.effective_growth_factor(),
            self.config.index,
        )?;
        state.ledger = Some(ledger);
        state.stats = UsageStatistics::default();
        if state.log_enabled(LogLevel::Info) {
            let details = format!(
                "capacity={} growth_factor={} index={:?}",
                self.config.initial_ledger_capacity,
                self.config.effective_growth_factor(),
                self.config.index
            );
            state.log(
                LifecycleEvent::new(LogLevel::Info, "initialize", "initialize", "success")
                    .details(details),
            );
        }
        Ok(InitOutcome::Initialized)
    }

    /// Report leaks, then release tracking storage. Idempotent.
    ///
    /// The leak report is produced when leak detection is enabled and the
    /// ledger is non-empty, strictly before the ledger is released. It is
    /// returned to the caller and, if configured, written to stderr.
    pub fn shutdown(&self) -> Option<LeakReport> {
        let mut state = self.state.lock();
        let ledger = state.ledger.as_ref()?;
        let report = (self.leak_detection_enabled() && !ledger.is_empty())
            .then(|| LeakReport::from_records(ledger.records()));
        if let Some(report) = &report {
            if state.log_enabled(LogLevel::Warn) {
                let details = format!(
                    "leak_count={} total_leaked_bytes={}",
                    report.leak_count, report.total_leaked_bytes
                );
                state.log(
                    LifecycleEvent::new(LogLevel::Warn, "shutdown", "leaks_detected", "reported")
                        .size(report.total_leaked_bytes)
                        .details(details),
                );
            }
        }
        state.ledger = None;
        state.log(LifecycleEvent::new(
            LogLevel::Info,
            "shutdown",
            "shutdown",
            "storage_released",
        ));
        drop(state);

        if let Some(report) = &report {
            if self.config.print_leak_report {
                eprint!("{report}");
            }
        }
        report
    }

    /// Whether tracking storage is currently held.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.lock().ledger.is_some()
    }

    /// Whether wrappers record allocations in the ledger.
    #[must_use]
    pub fn leak_detection_enabled(&self) -> bool {
        self.leak_detection.load(Ordering::Relaxed)
    }

    /// Toggle ledger bookkeeping at runtime.
    ///
    /// Blocks allocated while disabled are unknown to the ledger; freeing
    /// them later is still safe and is logged as an unknown pointer. Blocks
    /// freed while disabled keep their records until the address is handed
    /// out again, at which point the stale record is evicted and counted as
    /// freed.
    pub fn set_leak_detection(&self, enabled: bool) {
        self.leak_detection.store(enabled, Ordering::Relaxed);
    }

    /// Allocate `size` bytes. Zero size yields `None` with no side effects.
    #[track_caller]
    pub fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        self.allocate_at(size, SourceLocation::caller())
    }

    /// [`allocate`](Self::allocate) with an explicit call site.
    pub fn allocate_at(&self, size: usize, location: SourceLocation) -> Option<NonNull<u8>> {
        if size == 0 {
            self.note_zero_request("allocate");
            return None;
        }
        let ptr = NonNull::new(self.raw.allocate(size));
        self.finish_allocation("allocate", ptr, size, location)
    }

    /// Allocate `count * size` zeroed bytes.
    ///
    /// Zero count or size yields `None` with no side effects; an overflowing
    /// product yields `None` and is reported as a failure.
    #[track_caller]
    pub fn allocate_zeroed(&self, count: usize, size: usize) -> Option<NonNull<u8>> {
        self.allocate_zeroed_at(count, size, SourceLocation::caller())
    }

    /// [`allocate_zeroed`](Self::allocate_zeroed) with an explicit call site.
    pub fn allocate_zeroed_at(
        &self,
        count: usize,
        size: usize,
        location: SourceLocation,
    ) -> Option<NonNull<u8>> {
        if count == 0 || size == 0 {
            self.note_zero_request("allocate_zeroed");
            return None;
        }
        let Some(total) = count.checked_mul(size) else {
            self.fail("allocate_zeroed", FailureKind::Overflow, usize::MAX, location, || {
                format!("count={count} size={size}")
            });
            return None;
        };
        let ptr = NonNull::new(self.raw.allocate_zeroed(count, size));
        self.finish_allocation("allocate_zeroed", ptr, total, location)
    }

    /// Allocate `size` bytes owned by a guard that frees them on drop.
    #[track_caller]
    pub fn allocate_scoped(&self, size: usize) -> Option<TrackedBlock<'_>> {
        let location = SourceLocation::caller();
        let ptr = self.allocate_at(size, location)?;
        // SAFETY: `ptr` was just returned by this tracker and is owned by nobody else.
        Some(unsafe { TrackedBlock::from_raw(self, ptr, size) })
    }

    /// Resize a block, possibly moving it.
    ///
    /// `None` as `handle` behaves as `allocate(new_size)`. A zero `new_size`
    /// releases `handle` and returns `None`. On failure `None` is returned
    /// and `handle` stays valid and tracked with its old size.
    ///
    /// # Safety
    ///
    /// `handle`, if present, must come from this tracker (or its raw
    /// allocator) and must not have been released.
    #[track_caller]
    pub unsafe fn reallocate(
        &self,
        handle: Option<NonNull<u8>>,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        // SAFETY: forwarded caller contract.
        unsafe { self.reallocate_at(handle, new_size, SourceLocation::caller()) }
    }

    /// [`reallocate`](Self::reallocate) with an explicit call site.
    ///
    /// # Safety
    ///
    /// Same contract as [`reallocate`](Self::reallocate).
    pub unsafe fn reallocate_at(
        &self,
        handle: Option<NonNull<u8>>,
        new_size: usize,
        location: SourceLocation,
    ) -> Option<NonNull<u8>> {
        let Some(old) = handle else {
            return self.allocate_at(new_size, location);
        };
        if new_size == 0 {
            // SAFETY: forwarded caller contract.
            unsafe { self.deallocate(Some(old)) };
            return None;
        }

        if !self.leak_detection_enabled() {
            // SAFETY: forwarded caller contract.
            return unsafe { self.untracked_reallocate(old, new_size, location) };
        }

        let old_addr = old.as_ptr() as usize;
        let mut pending = AllocationRecord::new(0, new_size, location);

        // The lock is held from removal of the old record until the new one
        // is stored: no observer sees the block untracked, and no other
        // thread can record the vacated address first.
        let mut state = self.state.lock();
        let Some(ledger) = state.ledger.as_mut() else {
            drop(state);
            // SAFETY: forwarded caller contract.
            return unsafe { self.untracked_reallocate(old, new_size, location) };
        };
        let old_record = ledger.remove(old_addr);

        // SAFETY: forwarded caller contract.
        let raw_ptr = unsafe { self.raw.reallocate(old.as_ptr(), new_size) };

        let Some(moved) = NonNull::new(raw_ptr) else {
            // The original block is untouched; put its record back.
            let old_size = old_record.as_ref().map_or(0, |r| r.size);
            let restored = match old_record {
                Some(record) => ledger.insert(record).is_ok(),
                None => true,
            };
            state.stats.record_failure();
            if !restored {
                state.log(
                    LifecycleEvent::new(
                        LogLevel::Error,
                        "reallocate",
                        "realloc_restore_failed",
                        "untracked",
                    )
                    .ptr(old_addr)
                    .size(old_size),
                );
            }
            if state.log_enabled(LogLevel::Warn) {
                state.log(
                    LifecycleEvent::new(LogLevel::Warn, "reallocate", "realloc_failed", "oom")
                        .ptr(old_addr)
                        .size(new_size)
                        .details(format!("old_size={old_size} record_restored={restored}")),
                );
            }
            drop(state);
            self.notify(AllocationFailure {
                operation: "reallocate",
                kind: FailureKind::Exhausted,
                requested: new_size,
                location,
            });
            return None;
        };

        let new_addr = moved.as_ptr() as usize;
        pending.address = new_addr;
        let old_size = old_record.as_ref().map_or(0, |r| r.size);
        let known = old_record.is_some();
        match ledger.insert(pending) {
            Ok(stale) => {
                if let Some(stale) = stale {
                    state.evict_stale("reallocate", &stale);
                }
                if !known {
                    state.log(
                        LifecycleEvent::new(
                            LogLevel::Warn,
                            "reallocate",
                            "realloc_unknown_pointer",
                            "old_size_assumed_zero",
                        )
                        .ptr(old_addr)
                        .size(new_size),
                    );
                }
                if !state.stats.record_resize(old_size, new_size) {
                    state.log_underflow("reallocate", new_addr, old_size);
                }
                if state.log_enabled(LogLevel::Trace) {
                    state.log(
                        LifecycleEvent::new(LogLevel::Trace, "reallocate", "realloc", "success")
                            .ptr(new_addr)
                            .size(new_size)
                            .details(format!(
                                "old_ptr={old_addr:#x} old_size={old_size} moved={}",
                                old_addr != new_addr
                            )),
                    );
                }
            }
            Err(full) => {
                // Only reachable for an unknown old pointer with a full ledger:
                // a known record always leaves its slot free for the new one.
                if state.log_enabled(LogLevel::Error) {
                    state.log(
                        LifecycleEvent::new(
                            LogLevel::Error,
                            "reallocate",
                            "ledger_growth_failed",
                            "untracked",
                        )
                        .ptr(new_addr)
                        .size(new_size)
                        .details(format!("capacity={}", full.capacity)),
                    );
                }
            }
        }
        Some(moved)
    }

    /// Raw resize with no ledger bookkeeping.
    ///
    /// # Safety
    ///
    /// Same contract as [`reallocate`](Self::reallocate).
    unsafe fn untracked_reallocate(
        &self,
        old: NonNull<u8>,
        new_size: usize,
        location: SourceLocation,
    ) -> Option<NonNull<u8>> {
        // SAFETY: forwarded caller contract.
        let moved = NonNull::new(unsafe { self.raw.reallocate(old.as_ptr(), new_size) });
        if moved.is_none() {
            self.notify(AllocationFailure {
                operation: "reallocate",
                kind: FailureKind::Exhausted,
                requested: new_size,
                location,
            });
        }
        moved
    }

    /// Release a block. `None` is a no-op.
    ///
    /// # Safety
    ///
    /// `handle`, if present, must come from this tracker (or its raw
    /// allocator) and must not have been released.
    pub unsafe fn deallocate(&self, handle: Option<NonNull<u8>>) {
        let Some(ptr) = handle else {
            return;
        };
        let addr = ptr.as_ptr() as usize;
        if self.leak_detection_enabled() {
            let mut state = self.state.lock();
            if let Some(ledger) = state.ledger.as_mut() {
                match ledger.remove(addr) {
                    Some(record) => {
                        if !state.stats.record_free(record.size) {
                            state.log_underflow("deallocate", addr, record.size);
                        }
                        state.log(
                            LifecycleEvent::new(LogLevel::Trace, "deallocate", "free", "success")
                                .ptr(addr)
                                .size(record.size),
                        );
                    }
                    None => state.log(
                        LifecycleEvent::new(
                            LogLevel::Warn,
                            "deallocate",
                            "unknown_free_pointer",
                            "released_untracked",
                        )
                        .ptr(addr)
                        .details("pointer_not_present_in_ledger"),
                    ),
                }
            }
        }
        // SAFETY: forwarded caller contract.
        unsafe { self.raw.deallocate(ptr.as_ptr()) };
    }

    /// Bytes held by live tracked allocations.
    #[must_use]
    pub fn current_usage(&self) -> usize {
        self.state.lock().stats.current_usage
    }

    /// Number of live tracked allocations.
    #[must_use]
    pub fn active_allocation_count(&self) -> usize {
        self.state.lock().ledger.as_ref().map_or(0, Ledger::len)
    }

    /// Snapshot of all usage counters.
    #[must_use]
    pub fn statistics(&self) -> UsageStatistics {
        self.state.lock().stats
    }

    /// Copy of the record for `ptr`, if tracked.
    #[must_use]
    pub fn lookup(&self, ptr: NonNull<u8>) -> Option<AllocationRecord> {
        let state = self.state.lock();
        state.ledger.as_ref()?.get(ptr.as_ptr() as usize).cloned()
    }

    /// Report every live tracked allocation without modifying anything.
    #[must_use]
    pub fn report_leaks(&self) -> LeakReport {
        let records = {
            let state = self.state.lock();
            state
                .ledger
                .as_ref()
                .map(|ledger| ledger.records().to_vec())
                .unwrap_or_default()
        };
        LeakReport::from_records(&records)
    }

    /// Copy of the retained lifecycle records.
    #[must_use]
    pub fn lifecycle_logs(&self) -> Vec<LifecycleRecord> {
        self.state.lock().log.snapshot()
    }

    /// Remove and return the retained lifecycle records.
    pub fn drain_lifecycle_logs(&self) -> Vec<LifecycleRecord> {
        self.state.lock().log.drain()
    }

    /// Record a warning on behalf of a helper built on this tracker.
    pub(crate) fn note(&self, symbol: &'static str, event: &'static str, count: usize) {
        let mut state = self.state.lock();
        if state.log_enabled(LogLevel::Warn) {
            state.log(
                LifecycleEvent::new(LogLevel::Warn, symbol, event, "leaked_members")
                    .details(format!("members={count}")),
            );
        }
    }

    fn note_zero_request(&self, symbol: &'static str) {
        if !self.leak_detection_enabled() {
            return;
        }
        let mut state = self.state.lock();
        if state.ledger.is_some() {
            state.log(LifecycleEvent::new(
                LogLevel::Debug,
                symbol,
                "zero_size_rejected",
                "noop",
            ));
        }
    }

    fn finish_allocation(
        &self,
        symbol: &'static str,
        ptr: Option<NonNull<u8>>,
        size: usize,
        location: SourceLocation,
    ) -> Option<NonNull<u8>> {
        let Some(ptr) = ptr else {
            self.fail(symbol, FailureKind::Exhausted, size, location, String::new);
            return None;
        };
        if !self.leak_detection_enabled() {
            return Some(ptr);
        }

        let addr = ptr.as_ptr() as usize;
        let record = AllocationRecord::new(addr, size, location);
        let mut state = self.state.lock();
        let Some(ledger) = state.ledger.as_mut() else {
            return Some(ptr);
        };
        match ledger.insert(record) {
            Ok(stale) => {
                if let Some(stale) = stale {
                    state.evict_stale(symbol, &stale);
                }
                state.stats.record_alloc(size);
                state.log(
                    LifecycleEvent::new(LogLevel::Trace, symbol, "alloc", "success")
                        .ptr(addr)
                        .size(size),
                );
                Some(ptr)
            }
            Err(full) => {
                state.stats.record_failure();
                if state.log_enabled(LogLevel::Error) {
                    state.log(
                        LifecycleEvent::new(LogLevel::Error, symbol, "ledger_growth_failed", "oom")
                            .ptr(addr)
                            .size(size)
                            .details(format!("capacity={}", full.capacity)),
                    );
                }
                drop(state);
                // SAFETY: `ptr` came from the raw allocator above and was never published.
                unsafe { self.raw.deallocate(ptr.as_ptr()) };
                self.notify(AllocationFailure {
                    operation: symbol,
                    kind: FailureKind::LedgerGrowth,
                    requested: size,
                    location,
                });
                None
            }
        }
    }

    fn fail(
        &self,
        symbol: &'static str,
        kind: FailureKind,
        requested: usize,
        location: SourceLocation,
        details: impl FnOnce() -> String,
    ) {
        if self.leak_detection_enabled() {
            let mut state = self.state.lock();
            if state.ledger.is_some() {
                state.stats.record_failure();
                if state.log_enabled(LogLevel::Warn) {
                    state.log(
                        LifecycleEvent::new(LogLevel::Warn, symbol, "alloc_failed", kind.as_str())
                            .size(requested)
                            .details(details()),
                    );
                }
            }
        }
        self.notify(AllocationFailure {
            operation: symbol,
            kind,
            requested,
            location,
        });
    }

    fn notify(&self, failure: AllocationFailure) {
        if let Some(observer) = &self.observer {
            observer.allocation_failed(&failure);
        }
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
