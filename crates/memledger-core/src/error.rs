//! Error types for fallible lifecycle and container operations.
//!
//! The allocation wrappers themselves never return these: a rejected or
//! failed allocation is reported as `None`.

use thiserror::Error;

/// Tracker lifecycle failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TrackerError {
    /// Ledger backing storage could not be reserved.
    #[error("unable to reserve ledger storage for {requested} records")]
    LedgerStorage { requested: usize },
}

/// Object pool failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Object size or object count was zero.
    #[error("pool `{name}` needs a non-zero object size and count")]
    EmptyGeometry { name: String },
    /// `object_size * count` does not fit in `usize` or in a valid layout.
    #[error("pool `{name}` block size overflows ({object_size} x {count})")]
    Overflow {
        name: String,
        object_size: usize,
        count: usize,
    },
    /// The system allocator could not provide the backing block.
    #[error("pool `{name}` could not allocate its {bytes}-byte backing block")]
    Exhausted { name: String, bytes: usize },
    /// The returned address does not belong to this pool.
    #[error("address {addr:#x} is not an object slot of pool `{name}`")]
    ForeignObject { name: String, addr: usize },
    /// The returned object is already on the free list.
    #[error("object {addr:#x} returned twice to pool `{name}`")]
    DoubleReturn { name: String, addr: usize },
}

/// Allocation set failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SetError {
    /// Growing the member array failed; the caller still owns the handle.
    #[error("allocation set could not grow beyond {capacity} members")]
    Growth { capacity: usize },
}
