#![no_main]
use std::ptr::NonNull;

use libfuzzer_sys::fuzz_target;
use memledger_core::{LedgerIndex, Tracker, TrackerConfig};

// Each 4-byte chunk is one operation: [op, size_lo, size_hi, slot].
fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }
    let index = if data[0] & 0x80 == 0 {
        LedgerIndex::Linear
    } else {
        LedgerIndex::Hashed
    };
    let tracker = Tracker::new(TrackerConfig {
        index,
        initial_ledger_capacity: 2,
        log_capacity: 16,
        print_leak_report: false,
        ..TrackerConfig::default()
    });
    if tracker.initialize().is_err() {
        return;
    }

    const SLOTS: usize = 16;
    let mut slots: [Option<(NonNull<u8>, usize)>; SLOTS] = [None; SLOTS];

    for chunk in data.chunks_exact(4) {
        let op = chunk[0] % 5;
        let size = usize::from(u16::from_le_bytes([chunk[1], chunk[2]]));
        let slot = usize::from(chunk[3]) % SLOTS;

        match (op, slots[slot]) {
            (0, None) => {
                slots[slot] = tracker.allocate(size).map(|p| (p, size));
            }
            (1, None) => {
                let count = usize::from(chunk[1] % 16);
                let each = usize::from(chunk[2]);
                slots[slot] = tracker
                    .allocate_zeroed(count, each)
                    .map(|p| (p, count * each));
            }
            (2, Some((ptr, old))) => {
                // SAFETY: the slot owns a live block from `tracker`.
                let moved = unsafe { tracker.reallocate(Some(ptr), size) };
                slots[slot] = match moved {
                    Some(p) => Some((p, size)),
                    None if size == 0 => None,
                    None => Some((ptr, old)),
                };
            }
            (3, _) => {
                tracker.set_leak_detection(chunk[1] & 1 == 0);
            }
            (_, Some((ptr, _))) => {
                // SAFETY: the slot owns a live block from `tracker`.
                unsafe { tracker.deallocate(Some(ptr)) };
                slots[slot] = None;
            }
            _ => {}
        }

        // Records of blocks freed while detection was off linger until
        // their address is reused, but they stay unique and fully counted.
        let stats = tracker.statistics();
        let report = tracker.report_leaks();
        assert!(stats.peak_usage >= stats.current_usage);
        assert_eq!(report.total_leaked_bytes, stats.current_usage);
        assert_eq!(report.leak_count, tracker.active_allocation_count());
        assert!(report.entries.windows(2).all(|w| w[0].address < w[1].address));
    }

    tracker.set_leak_detection(true);
    for (ptr, _) in slots.iter_mut().filter_map(Option::take) {
        // SAFETY: drained slots are live and released exactly once.
        unsafe { tracker.deallocate(Some(ptr)) };
    }
    let lingering = tracker.active_allocation_count();
    let report = tracker.shutdown();
    assert_eq!(report.map_or(0, |r| r.leak_count), lingering);
});
