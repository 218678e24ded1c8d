//! Workload driver for memledger.
//!
//! This crate provides:
//! - Seeded stress, leak and pool workloads that check tracker invariants
//! - JSONL structured logs carrying harness events and tracker lifecycle records
//! - Config loading from JSON files layered over `MEMLEDGER_*` environment variables

#![forbid(unsafe_code)]

pub mod error;
pub mod structured_log;
pub mod workload;

use std::path::Path;

use memledger_core::TrackerConfig;

pub use error::HarnessError;
pub use structured_log::{LogEmitter, LogEntry, Outcome, validate_log_line};
pub use workload::{
    LeakParams, PoolParams, StressParams, WorkloadSummary, XorShift64, run_leak, run_pool,
    run_stress,
};

/// Tracker configuration from `path` (JSON, missing fields defaulted), or
/// from the environment when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<TrackerConfig, HarnessError> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&raw)?)
        }
        None => Ok(TrackerConfig::from_env()),
    }
}
