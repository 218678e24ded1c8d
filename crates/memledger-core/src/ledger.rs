//! Allocation ledger: metadata for every live tracked allocation.
//!
//! The ledger is a flat, unordered record array. Removal swaps the last
//! record into the vacated slot, so order carries no meaning. Capacity grows
//! by a fixed multiplicative factor with fallible reservation; a failed growth
//! is reported to the caller instead of aborting the process.
//!
//! Lookup is a linear scan unless the hashed index is selected, in which case
//! an address -> slot map is maintained across every insert and swap-remove.

use std::collections::HashMap;
use std::fmt;
use std::panic::Location;
use std::time::SystemTime;

use serde::Serialize;

use crate::config::LedgerIndex;
use crate::error::TrackerError;

/// Call site of a tracked allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SourceLocation {
    /// Source file.
    pub file: &'static str,
    /// 1-based line.
    pub line: u32,
    /// 1-based column; 0 when the caller did not supply one.
    pub column: u32,
}

impl SourceLocation {
    /// Explicit location, for callers that carry their own file/line pair.
    #[must_use]
    pub const fn new(file: &'static str, line: u32) -> Self {
        Self {
            file,
            line,
            column: 0,
        }
    }

    /// Location of the caller (through any chain of `#[track_caller]` frames).
    #[must_use]
    #[track_caller]
    pub fn caller() -> Self {
        Self::from(Location::caller())
    }
}

impl From<&'static Location<'static>> for SourceLocation {
    fn from(location: &'static Location<'static>) -> Self {
        Self {
            file: location.file(),
            line: location.line(),
            column: location.column(),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.column == 0 {
            write!(f, "{}:{}", self.file, self.line)
        } else {
            write!(f, "{}:{}:{}", self.file, self.line, self.column)
        }
    }
}

/// Metadata for one live tracked allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationRecord {
    /// Address of the block.
    pub address: usize,
    /// Requested size in bytes.
    pub size: usize,
    /// Call site.
    pub location: SourceLocation,
    /// OS thread id of the allocating thread.
    pub owner_thread: u64,
    /// Wall-clock allocation time.
    pub allocated_at: SystemTime,
}

impl AllocationRecord {
    /// New record stamped with the current thread and time.
    #[must_use]
    pub fn new(address: usize, size: usize, location: SourceLocation) -> Self {
        Self {
            address,
            size,
            location,
            owner_thread: current_thread_id(),
            allocated_at: SystemTime::now(),
        }
    }
}

/// Cumulative usage counters, maintained on every tracked operation.
///
/// `current_usage == total_allocated - total_freed` and
/// `peak_usage >= current_usage` hold whenever no record is double-counted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageStatistics {
    /// Bytes ever handed out (including reallocation growth).
    pub total_allocated: usize,
    /// Bytes ever released (including reallocation shrinkage).
    pub total_freed: usize,
    /// Highest `current_usage` observed.
    pub peak_usage: usize,
    /// Bytes held by live tracked allocations.
    pub current_usage: usize,
    /// Successful tracked allocations.
    pub allocation_count: u64,
    /// Tracked blocks released.
    pub free_count: u64,
    /// Allocation requests that yielded no memory (overflow or exhaustion).
    pub failed_allocations: u64,
}

impl UsageStatistics {
    pub(crate) fn record_alloc(&mut self, size: usize) {
        self.total_allocated = self.total_allocated.saturating_add(size);
        self.current_usage = self.current_usage.saturating_add(size);
        self.allocation_count = self.allocation_count.saturating_add(1);
        self.bump_peak();
    }

    /// Returns false when `current_usage` would have gone negative; the
    /// counter is clamped to zero in that case.
    #[must_use]
    pub(crate) fn record_free(&mut self, size: usize) -> bool {
        self.total_freed = self.total_freed.saturating_add(size);
        self.free_count = self.free_count.saturating_add(1);
        self.shrink(size)
    }

    /// Applies a reallocation delta. Growth counts as allocated bytes,
    /// shrinkage as freed bytes. Returns false on clamped underflow.
    #[must_use]
    pub(crate) fn record_resize(&mut self, old_size: usize, new_size: usize) -> bool {
        if new_size >= old_size {
            let grown = new_size - old_size;
            self.total_allocated = self.total_allocated.saturating_add(grown);
            self.current_usage = self.current_usage.saturating_add(grown);
            self.bump_peak();
            true
        } else {
            let shrunk = old_size - new_size;
            self.total_freed = self.total_freed.saturating_add(shrunk);
            self.shrink(shrunk)
        }
    }

    pub(crate) fn record_failure(&mut self) {
        self.failed_allocations = self.failed_allocations.saturating_add(1);
    }

    fn shrink(&mut self, size: usize) -> bool {
        match self.current_usage.checked_sub(size) {
            Some(next) => {
                self.current_usage = next;
                true
            }
            None => {
                self.current_usage = 0;
                false
            }
        }
    }

    fn bump_peak(&mut self) {
        if self.current_usage > self.peak_usage {
            self.peak_usage = self.current_usage;
        }
    }
}

/// Ledger growth failed; the record was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LedgerFull {
    pub capacity: usize,
}

/// Table of live allocation records.
#[derive(Debug)]
pub(crate) struct Ledger {
    records: Vec<AllocationRecord>,
    index: Option<HashMap<usize, usize>>,
    growth_factor: usize,
}

impl Ledger {
    /// Ledger with `capacity` slots reserved up front.
    pub(crate) fn with_capacity(
        capacity: usize,
        growth_factor: usize,
        index: LedgerIndex,
    ) -> Result<Self, TrackerError> {
        let storage_err = TrackerError::LedgerStorage {
            requested: capacity,
        };
        let mut records = Vec::new();
        records
            .try_reserve_exact(capacity)
            .map_err(|_| storage_err)?;
        let index = match index {
            LedgerIndex::Linear => None,
            LedgerIndex::Hashed => {
                let mut map = HashMap::new();
                map.try_reserve(capacity).map_err(|_| storage_err)?;
                Some(map)
            }
        };
        Ok(Self {
            records,
            index,
            growth_factor: growth_factor.max(crate::config::MIN_GROWTH_FACTOR),
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.records.capacity()
    }

    pub(crate) fn records(&self) -> &[AllocationRecord] {
        &self.records
    }

    /// Slot holding `address`, if tracked.
    pub(crate) fn find(&self, address: usize) -> Option<usize> {
        match &self.index {
            Some(map) => map.get(&address).copied(),
            None => self.records.iter().position(|r| r.address == address),
        }
    }

    pub(crate) fn get(&self, address: usize) -> Option<&AllocationRecord> {
        self.find(address).map(|slot| &self.records[slot])
    }

    /// Store a record, growing storage geometrically when full.
    ///
    /// Addresses stay unique: a record already held for `record.address`
    /// is stale (its block was released untracked and the address handed
    /// out again), so it is replaced in place and returned.
    pub(crate) fn insert(
        &mut self,
        record: AllocationRecord,
    ) -> Result<Option<AllocationRecord>, LedgerFull> {
        if let Some(slot) = self.find(record.address) {
            return Ok(Some(std::mem::replace(&mut self.records[slot], record)));
        }
        self.reserve_one()?;
        let slot = self.records.len();
        if let Some(map) = &mut self.index {
            map.insert(record.address, slot);
        }
        self.records.push(record);
        Ok(None)
    }

    /// Remove the record for `address` by swapping in the last record.
    pub(crate) fn remove(&mut self, address: usize) -> Option<AllocationRecord> {
        let slot = self.find(address)?;
        let removed = self.records.swap_remove(slot);
        if let Some(map) = &mut self.index {
            map.remove(&address);
            if let Some(moved) = self.records.get(slot) {
                map.insert(moved.address, slot);
            }
        }
        Some(removed)
    }

    fn reserve_one(&mut self) -> Result<(), LedgerFull> {
        let capacity = self.records.capacity();
        let full = LedgerFull { capacity };
        if self.records.len() == capacity {
            let target = capacity.saturating_mul(self.growth_factor).max(1);
            let additional = target - self.records.len();
            self.records
                .try_reserve_exact(additional)
                .map_err(|_| full)?;
        }
        if let Some(map) = &mut self.index {
            map.try_reserve(1).map_err(|_| full)?;
        }
        Ok(())
    }
}

/// OS thread id of the calling thread.
#[cfg(target_os = "linux")]
#[must_use]
pub fn current_thread_id() -> u64 {
    // SAFETY: gettid has no preconditions.
    let tid = unsafe { libc::syscall(libc::SYS_gettid) };
    tid as u64
}

/// Process-local thread id of the calling thread.
#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn current_thread_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};

    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static THREAD_ID: u64 = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    }
    THREAD_ID.with(|id| *id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(address: usize, size: usize) -> AllocationRecord {
        AllocationRecord::new(address, size, SourceLocation::new("ledger.rs", 1))
    }

    fn both_indexes() -> [Ledger; 2] {
        [
            Ledger::with_capacity(2, 2, LedgerIndex::Linear).unwrap(),
            Ledger::with_capacity(2, 2, LedgerIndex::Hashed).unwrap(),
        ]
    }

    #[test]
    fn grows_geometrically_when_full() {
        for mut ledger in both_indexes() {
            assert!(ledger.capacity() >= 2);
            for addr in 1..=3 {
                ledger.insert(record(addr * 16, 8)).unwrap();
            }
            assert_eq!(ledger.len(), 3);
            assert!(ledger.capacity() >= 4);
        }
    }

    #[test]
    fn zero_initial_capacity_still_grows() {
        let mut ledger = Ledger::with_capacity(0, 3, LedgerIndex::Linear).unwrap();
        ledger.insert(record(0x10, 1)).unwrap();
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn swap_remove_keeps_other_records_findable() {
        for mut ledger in both_indexes() {
            for addr in [0x10, 0x20, 0x30, 0x40] {
                ledger.insert(record(addr, addr)).unwrap();
            }
            let removed = ledger.remove(0x10).unwrap();
            assert_eq!(removed.size, 0x10);
            assert_eq!(ledger.len(), 3);
            for addr in [0x20, 0x30, 0x40] {
                assert_eq!(ledger.get(addr).map(|r| r.size), Some(addr));
            }
            assert!(ledger.get(0x10).is_none());
            assert!(ledger.remove(0x10).is_none());
        }
    }

    #[test]
    fn insert_at_held_address_replaces_stale_record() {
        for mut ledger in both_indexes() {
            for addr in [0x10, 0x20, 0x30] {
                ledger.insert(record(addr, 8)).unwrap();
            }
            let stale = ledger.insert(record(0x20, 64)).unwrap();
            assert_eq!(stale.map(|r| r.size), Some(8));
            assert_eq!(ledger.len(), 3);
            assert_eq!(ledger.get(0x20).map(|r| r.size), Some(64));

            assert!(ledger.remove(0x10).is_some());
            assert_eq!(ledger.remove(0x20).map(|r| r.size), Some(64));
            assert!(ledger.get(0x20).is_none());
            assert_eq!(ledger.get(0x30).map(|r| r.size), Some(8));
        }
    }

    #[test]
    fn remove_last_record_empties_ledger() {
        for mut ledger in both_indexes() {
            ledger.insert(record(0x10, 4)).unwrap();
            assert!(ledger.remove(0x10).is_some());
            assert!(ledger.is_empty());
        }
    }

    #[test]
    fn statistics_track_resize_in_both_directions() {
        let mut stats = UsageStatistics::default();
        stats.record_alloc(100);
        assert!(stats.record_resize(100, 500));
        assert_eq!(stats.current_usage, 500);
        assert_eq!(stats.peak_usage, 500);
        assert!(stats.record_resize(500, 200));
        assert_eq!(stats.current_usage, 200);
        assert_eq!(stats.peak_usage, 500);
        assert_eq!(
            stats.current_usage,
            stats.total_allocated - stats.total_freed
        );
    }

    #[test]
    fn statistics_clamp_underflow() {
        let mut stats = UsageStatistics::default();
        assert!(!stats.record_free(10));
        assert_eq!(stats.current_usage, 0);
    }

    #[test]
    fn source_location_display() {
        assert_eq!(SourceLocation::new("a.c", 7).to_string(), "a.c:7");
        let here = SourceLocation::caller();
        assert!(here.file.ends_with("ledger.rs"));
        assert!(here.column > 0);
    }

    #[test]
    fn thread_ids_differ_across_threads() {
        let main_id = current_thread_id();
        let other = std::thread::spawn(current_thread_id).join().unwrap();
        assert_ne!(main_id, other);
    }
}
