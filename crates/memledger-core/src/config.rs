//! Tracker configuration.
//!
//! Defaults suit production use: leak detection on, linear ledger lookup,
//! lifecycle logging limited to warnings and above. Every knob can be
//! overridden from the environment through [`TrackerConfig::from_env`]:
//! - `MEMLEDGER_LEAK_DETECTION`: `on` (default) or `off`.
//! - `MEMLEDGER_INDEX`: `linear` (default) or `hashed`.
//! - `MEMLEDGER_LOG`: minimum lifecycle log level (`trace` .. `error`).
//! - `MEMLEDGER_LOG_CAPACITY`: maximum retained lifecycle records.
//! - `MEMLEDGER_LEDGER_CAPACITY`: ledger slots reserved by `initialize`.
//!
//! Unparseable values fall back to the default rather than failing startup.

use serde::{Deserialize, Serialize};

use crate::log::LogLevel;

/// Minimum growth factor applied when the ledger overflows.
pub const MIN_GROWTH_FACTOR: usize = 2;

/// Default number of ledger slots reserved at initialization.
pub const DEFAULT_LEDGER_CAPACITY: usize = 1024;

/// Default number of lifecycle records retained.
pub const DEFAULT_LOG_CAPACITY: usize = 1024;

/// How the ledger locates a record by address.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerIndex {
    /// Linear scan over the record array. Suited to hundreds or low
    /// thousands of live allocations.
    #[default]
    Linear,
    /// Address-keyed hash index kept beside the record array.
    Hashed,
}

impl LedgerIndex {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "hashed" | "hash" | "map" | "indexed" => Self::Hashed,
            _ => Self::Linear,
        }
    }
}

/// Runtime configuration for a [`Tracker`](crate::Tracker).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Record every allocation in the ledger. When false the wrappers are a
    /// pure pass-through to the raw allocator.
    pub leak_detection: bool,
    /// Ledger slots reserved by `initialize`.
    pub initial_ledger_capacity: usize,
    /// Multiplicative ledger growth on overflow. Values below 2 are raised to 2.
    pub growth_factor: usize,
    /// Address lookup strategy.
    pub index: LedgerIndex,
    /// Lifecycle records below this level are not retained.
    pub log_threshold: LogLevel,
    /// Maximum retained lifecycle records; 0 disables retention.
    pub log_capacity: usize,
    /// Write the automatic shutdown leak report to stderr.
    pub print_leak_report: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            leak_detection: true,
            initial_ledger_capacity: DEFAULT_LEDGER_CAPACITY,
            growth_factor: MIN_GROWTH_FACTOR,
            index: LedgerIndex::Linear,
            log_threshold: LogLevel::Warn,
            log_capacity: DEFAULT_LOG_CAPACITY,
            print_leak_report: true,
        }
    }
}

impl TrackerConfig {
    /// Defaults overridden by any `MEMLEDGER_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading from an arbitrary source.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(raw) = lookup("MEMLEDGER_LEAK_DETECTION") {
            config.leak_detection = parse_switch(&raw).unwrap_or(config.leak_detection);
        }
        if let Some(raw) = lookup("MEMLEDGER_INDEX") {
            config.index = LedgerIndex::from_str_loose(&raw);
        }
        if let Some(raw) = lookup("MEMLEDGER_LOG") {
            config.log_threshold = LogLevel::from_str_loose(&raw);
        }
        if let Some(raw) = lookup("MEMLEDGER_LOG_CAPACITY") {
            config.log_capacity = raw.trim().parse().unwrap_or(config.log_capacity);
        }
        if let Some(raw) = lookup("MEMLEDGER_LEDGER_CAPACITY") {
            config.initial_ledger_capacity =
                raw.trim().parse().unwrap_or(config.initial_ledger_capacity);
        }
        config
    }

    /// Growth factor actually applied by the ledger.
    #[must_use]
    pub fn effective_growth_factor(&self) -> usize {
        self.growth_factor.max(MIN_GROWTH_FACTOR)
    }

    /// Configuration for tests and tools: full lifecycle logging, no stderr output.
    #[must_use]
    pub fn quiet() -> Self {
        Self {
            log_threshold: LogLevel::Trace,
            print_leak_report: false,
            ..Self::default()
        }
    }
}

fn parse_switch(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "on" | "true" | "yes" | "enabled" => Some(true),
        "0" | "off" | "false" | "no" | "disabled" => Some(false),
        _ => None,
    }
}
