//! Benchmark fixtures shared by the memledger benches.

use memledger_core::{LedgerIndex, Tracker, TrackerConfig};

/// Initialized tracker with logging retention off, so benches measure the
/// ledger rather than the lifecycle buffer.
///
/// # Panics
///
/// Panics if ledger storage cannot be reserved; an uninitialized tracker
/// would only measure the raw allocator.
#[must_use]
pub fn bench_tracker(index: LedgerIndex) -> Tracker {
    let tracker = Tracker::new(TrackerConfig {
        index,
        log_capacity: 0,
        print_leak_report: false,
        ..TrackerConfig::default()
    });
    tracker.initialize().expect("bench tracker initialize");
    tracker
}
