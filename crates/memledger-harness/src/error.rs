//! Harness error type.

use memledger_core::{PoolError, TrackerError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// A workload finished with the tracker in an unexpected state.
    #[error("invariant violated in `{workload}`: {message}")]
    Invariant { workload: String, message: String },
    #[error("worker thread panicked in `{workload}`")]
    WorkerPanicked { workload: String },
}
