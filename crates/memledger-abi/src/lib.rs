// Every export takes raw pointers from C callers and documents its contract
// on the C side; per-function safety sections would repeat the same rule.
#![allow(clippy::missing_safety_doc)]
//! # memledger-abi
//!
//! `extern "C"` entry points over one process-wide [`Tracker`].
//!
//! C code calls these through thin macros that supply `__FILE__`/`__LINE__`:
//!
//! ```text
//! #define ML_MALLOC(n)      memledger_malloc((n), __FILE__, __LINE__)
//! #define ML_FREE(p)        memledger_free(p)
//! ```
//!
//! The global tracker is built lazily from `MEMLEDGER_*` environment variables
//! and stays uninitialized (pure pass-through) until `memledger_init` runs.
//! Symbols are prefixed so they never shadow the host allocator.

use std::sync::OnceLock;

use memledger_core::{Tracker, TrackerConfig};

pub mod pool_abi;
pub mod set_abi;
pub mod tracker_abi;
mod util;

static GLOBAL_TRACKER: OnceLock<Tracker> = OnceLock::new();

/// The process-wide tracker behind every export.
pub fn global_tracker() -> &'static Tracker {
    GLOBAL_TRACKER.get_or_init(|| Tracker::new(TrackerConfig::from_env()))
}
