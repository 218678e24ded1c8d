//! Structured tracker lifecycle records.
//!
//! The tracker appends one record per notable event (allocation, free,
//! rejected request, invariant recovery). Records carry a snapshot of the
//! live-allocation count and current usage taken at the moment of the event.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Lifecycle record severity.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
}

impl LogLevel {
    /// Parse from string (case-insensitive). Unknown input maps to `Warn`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" | "all" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "error" => Self::Error,
            _ => Self::Warn,
        }
    }

    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Structured tracker lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleRecord {
    /// Monotonic event id, starting at 1.
    pub decision_id: u64,
    /// Correlation id for this record.
    pub trace_id: String,
    /// Severity level.
    pub level: LogLevel,
    /// Operation (`allocate`, `allocate_zeroed`, `reallocate`, `deallocate`, ...).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `free`, `zero_size_rejected`, ...).
    pub event: &'static str,
    /// Address involved in the event.
    pub ptr: Option<usize>,
    /// Size involved in the event.
    pub size: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
    /// Snapshot: live tracked allocations.
    pub active_count: usize,
    /// Snapshot: bytes currently tracked.
    pub current_usage: usize,
}

/// Fields of a record supplied by the caller; the log fills in ids and snapshots.
#[derive(Debug, Clone)]
pub(crate) struct LifecycleEvent {
    pub level: LogLevel,
    pub symbol: &'static str,
    pub event: &'static str,
    pub ptr: Option<usize>,
    pub size: Option<usize>,
    pub outcome: &'static str,
    pub details: String,
}

impl LifecycleEvent {
    pub(crate) fn new(
        level: LogLevel,
        symbol: &'static str,
        event: &'static str,
        outcome: &'static str,
    ) -> Self {
        Self {
            level,
            symbol,
            event,
            ptr: None,
            size: None,
            outcome,
            details: String::new(),
        }
    }

    pub(crate) fn ptr(mut self, ptr: usize) -> Self {
        self.ptr = Some(ptr);
        self
    }

    pub(crate) fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub(crate) fn details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }
}

/// Bounded buffer of lifecycle records. Oldest records are dropped first.
#[derive(Debug)]
pub(crate) struct LifecycleLog {
    records: VecDeque<LifecycleRecord>,
    threshold: LogLevel,
    capacity: usize,
    next_decision_id: u64,
}

impl LifecycleLog {
    pub(crate) fn new(threshold: LogLevel, capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            threshold,
            capacity,
            next_decision_id: 1,
        }
    }

    /// Whether a record at `level` would be retained. Callers check this
    /// before formatting details.
    pub(crate) fn enabled(&self, level: LogLevel) -> bool {
        self.capacity > 0 && level >= self.threshold
    }

    pub(crate) fn record(
        &mut self,
        event: LifecycleEvent,
        active_count: usize,
        current_usage: usize,
    ) {
        if !self.enabled(event.level) {
            return;
        }
        let decision_id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(LifecycleRecord {
            decision_id,
            trace_id: format!("memledger::tracker::{}::{:016x}", event.symbol, decision_id),
            level: event.level,
            symbol: event.symbol,
            event: event.event,
            ptr: event.ptr,
            size: event.size,
            outcome: event.outcome,
            details: event.details,
            active_count,
            current_usage,
        });
    }

    pub(crate) fn snapshot(&self) -> Vec<LifecycleRecord> {
        self.records.iter().cloned().collect()
    }

    pub(crate) fn drain(&mut self) -> Vec<LifecycleRecord> {
        self.records.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(level: LogLevel) -> LifecycleEvent {
        LifecycleEvent::new(level, "allocate", "alloc", "success")
    }

    #[test]
    fn levels_are_ordered() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert_eq!(LogLevel::from_str_loose("TRACE"), LogLevel::Trace);
        assert_eq!(LogLevel::from_str_loose("nonsense"), LogLevel::Warn);
    }

    #[test]
    fn records_below_threshold_are_skipped() {
        let mut log = LifecycleLog::new(LogLevel::Info, 8);
        log.record(event(LogLevel::Debug), 0, 0);
        log.record(event(LogLevel::Error), 1, 64);
        let records = log.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, LogLevel::Error);
        assert_eq!(records[0].decision_id, 1);
        assert_eq!(records[0].current_usage, 64);
    }

    #[test]
    fn capacity_drops_oldest() {
        let mut log = LifecycleLog::new(LogLevel::Trace, 2);
        for _ in 0..3 {
            log.record(event(LogLevel::Trace), 0, 0);
        }
        let ids: Vec<u64> = log.drain().iter().map(|r| r.decision_id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert!(log.snapshot().is_empty());
    }

    #[test]
    fn zero_capacity_disables_retention() {
        let mut log = LifecycleLog::new(LogLevel::Trace, 0);
        assert!(!log.enabled(LogLevel::Error));
        log.record(event(LogLevel::Error), 0, 0);
        assert!(log.snapshot().is_empty());
    }

    #[test]
    fn trace_ids_carry_symbol_and_decision_id() {
        let mut log = LifecycleLog::new(LogLevel::Trace, 4);
        log.record(event(LogLevel::Trace), 0, 0);
        let records = log.snapshot();
        assert_eq!(
            records[0].trace_id,
            "memledger::tracker::allocate::0000000000000001"
        );
    }
}
