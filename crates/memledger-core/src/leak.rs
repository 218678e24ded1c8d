//! Leak reporting.
//!
//! A leak is any record still present in the ledger when the report is
//! taken. Building a report reads a snapshot of the ledger; it never frees
//! or removes anything.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::ledger::{AllocationRecord, SourceLocation};

/// One unreleased allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeakEntry {
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

impl From<&AllocationRecord> for LeakEntry {
    fn from(record: &AllocationRecord) -> Self {
        Self {
            address: record.address,
            size: record.size,
            location: record.location,
            owner_thread: record.owner_thread,
            allocated_at: record.allocated_at,
        }
    }
}

/// Every live allocation at the time the report was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeakReport {
    /// Number of leaked blocks.
    pub leak_count: usize,
    /// Sum of leaked block sizes.
    pub total_leaked_bytes: usize,
    /// When the report was taken.
    pub generated_at: SystemTime,
    /// Leaked blocks, ordered by address.
    pub entries: Vec<LeakEntry>,
}

impl LeakReport {
    /// Report over a ledger snapshot.
    #[must_use]
    pub fn from_records(records: &[AllocationRecord]) -> Self {
        let mut entries: Vec<LeakEntry> = records.iter().map(LeakEntry::from).collect();
        entries.sort_by_key(|entry| entry.address);
        let total_leaked_bytes = entries
            .iter()
            .fold(0_usize, |acc, entry| acc.saturating_add(entry.size));
        Self {
            leak_count: entries.len(),
            total_leaked_bytes,
            generated_at: SystemTime::now(),
            entries,
        }
    }

    /// True when nothing leaked.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return writeln!(f, "memledger: no leaks detected");
        }
        writeln!(
            f,
            "memledger: {} leaked allocation{}, {} bytes total",
            self.leak_count,
            if self.leak_count == 1 { "" } else { "s" },
            self.total_leaked_bytes
        )?;
        for (idx, entry) in self.entries.iter().enumerate() {
            let age = self
                .generated_at
                .duration_since(entry.allocated_at)
                .unwrap_or(Duration::ZERO);
            writeln!(
                f,
                "  #{:<4} {:#014x} {:>10} bytes  at {}  thread {}  allocated {}  age {:.3}s",
                idx + 1,
                entry.address,
                entry.size,
                entry.location,
                entry.owner_thread,
                epoch_seconds(entry.allocated_at),
                age.as_secs_f64()
            )?;
        }
        Ok(())
    }
}

fn epoch_seconds(at: SystemTime) -> String {
    let since = at.duration_since(UNIX_EPOCH).unwrap_or_default();
    format!("{}.{:03}", since.as_secs(), since.subsec_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(address: usize, size: usize, line: u32) -> AllocationRecord {
        AllocationRecord::new(address, size, SourceLocation::new("download.c", line))
    }

    #[test]
    fn totals_and_ordering() {
        let report = LeakReport::from_records(&[record(0x2000, 64, 10), record(0x1000, 32, 20)]);
        assert_eq!(report.leak_count, 2);
        assert_eq!(report.total_leaked_bytes, 96);
        assert_eq!(report.entries[0].address, 0x1000);
        assert_eq!(report.entries[1].location.line, 10);
    }

    #[test]
    fn rendering_lists_every_leak() {
        let report = LeakReport::from_records(&[record(0x1000, 48, 7), record(0x3000, 16, 9)]);
        let text = report.to_string();
        assert!(text.starts_with("memledger: 2 leaked allocations, 64 bytes total"));
        assert!(text.contains("download.c:7"));
        assert!(text.contains("download.c:9"));
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn empty_report_is_clean() {
        let report = LeakReport::from_records(&[]);
        assert!(report.is_clean());
        assert_eq!(report.to_string(), "memledger: no leaks detected\n");
    }

    #[test]
    fn report_serializes() {
        let report = LeakReport::from_records(&[record(0x1000, 8, 1)]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["leak_count"], 1);
        assert_eq!(json["entries"][0]["location"]["file"], "download.c");
    }
}
