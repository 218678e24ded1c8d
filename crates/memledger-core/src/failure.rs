//! Failure notifications for an external error-reporting facility.
//!
//! The tracker reports every allocation request that produced no memory
//! (other than zero-size requests, which are a defined no-op). Observers are
//! invoked after the tracker lock is released, so they may log, allocate or
//! call back into the tracker.

use std::fmt;

use serde::Serialize;

use crate::ledger::SourceLocation;

/// Why an allocation request produced no memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// `count * size` overflowed.
    Overflow,
    /// The raw allocator returned null.
    Exhausted,
    /// The block was obtained but the ledger could not grow to record it;
    /// the block was released again.
    LedgerGrowth,
}

impl FailureKind {
    /// Stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Overflow => "overflow",
            Self::Exhausted => "exhausted",
            Self::LedgerGrowth => "ledger_growth",
        }
    }
}

/// One failed allocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AllocationFailure {
    /// Operation that failed (`allocate`, `allocate_zeroed`, `reallocate`).
    pub operation: &'static str,
    /// Failure class.
    pub kind: FailureKind,
    /// Requested byte count; saturated to `usize::MAX` on overflow.
    pub requested: usize,
    /// Call site of the request.
    pub location: SourceLocation,
}

impl fmt::Display for AllocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} bytes failed ({}) at {}",
            self.operation,
            self.requested,
            self.kind.as_str(),
            self.location
        )
    }
}

/// Receiver of allocation failures.
pub trait FailureObserver: Send + Sync {
    /// Called once per failed request, outside the tracker lock.
    fn allocation_failed(&self, failure: &AllocationFailure);
}

impl<F> FailureObserver for F
where
    F: Fn(&AllocationFailure) + Send + Sync,
{
    fn allocation_failed(&self, failure: &AllocationFailure) {
        self(failure);
    }
}
