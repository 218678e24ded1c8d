//! # memledger-core
//!
//! Instrumented allocation for long-running services.
//!
//! A [`Tracker`] wraps the system allocator and records every live block in a
//! ledger (address, size, call site, owning thread, time), keeps usage
//! statistics, and reports whatever is still allocated at shutdown. On top of
//! the tracker sit:
//! - [`AllocationSet`]: commit/rollback groups of allocations.
//! - [`BulkCleanup`]: batch deallocation.
//! - [`TrackedBlock`] and [`ScopeGuard`]: release on scope exit.
//!
//! [`MemoryPool`] is a standalone fixed-object-size allocator with its own lock.
//!
//! Allocation failures never panic: wrappers return `None`, lifecycle and
//! container operations return `Result`.

pub mod cleanup;
pub mod config;
pub mod error;
pub mod failure;
pub mod guard;
pub mod leak;
pub mod ledger;
pub mod log;
pub mod pool;
pub mod raw;
pub mod set;
pub mod tracker;

pub use cleanup::BulkCleanup;
pub use config::{LedgerIndex, TrackerConfig};
pub use error::{PoolError, SetError, TrackerError};
pub use failure::{AllocationFailure, FailureKind, FailureObserver};
pub use guard::{ScopeGuard, TrackedBlock, defer};
pub use leak::{LeakEntry, LeakReport};
pub use ledger::{AllocationRecord, SourceLocation, UsageStatistics, current_thread_id};
pub use log::{LifecycleRecord, LogLevel};
pub use pool::{MemoryPool, PoolStats};
pub use raw::{RawAllocator, SystemAllocator};
pub use set::AllocationSet;
pub use tracker::{InitOutcome, Tracker};
