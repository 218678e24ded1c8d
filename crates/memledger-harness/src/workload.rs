//! Deterministic allocation workloads driven against a tracker or pool.
//!
//! Every workload is seeded, so a failing run can be replayed exactly.
//! Workloads check the tracker's invariants when they finish and report a
//! [`WorkloadSummary`] suitable for JSON output.

use std::time::Instant;

use memledger_core::{
    AllocationSet, LeakReport, MemoryPool, PoolStats, TrackedBlock, Tracker, UsageStatistics,
};
use serde::Serialize;

use crate::error::HarnessError;

/// xorshift64* generator.
#[derive(Clone, Copy, Debug)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    /// Zero seeds are remapped; xorshift would otherwise stay at zero forever.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    pub fn gen_range_usize(&mut self, low: usize, high_inclusive: usize) -> usize {
        debug_assert!(low <= high_inclusive);
        let span = (high_inclusive - low).saturating_add(1);
        low + (self.next_u64() as usize % span)
    }
}

/// Multi-threaded allocate / resize / free churn.
#[derive(Debug, Clone, Serialize)]
pub struct StressParams {
    pub threads: usize,
    pub cycles: usize,
    pub max_size: usize,
    /// Live blocks each thread keeps at most.
    pub working_set: usize,
    pub seed: u64,
}

impl Default for StressParams {
    fn default() -> Self {
        Self {
            threads: 4,
            cycles: 10_000,
            max_size: 4_096,
            working_set: 32,
            seed: 0xC0FF_EE00,
        }
    }
}

/// Blocks deliberately left allocated.
#[derive(Debug, Clone, Serialize)]
pub struct LeakParams {
    pub count: usize,
    pub size: usize,
}

/// Pool exhaustion and reuse rounds.
#[derive(Debug, Clone, Serialize)]
pub struct PoolParams {
    pub object_size: usize,
    pub count: usize,
    pub rounds: usize,
    pub seed: u64,
}

/// Result of one workload.
#[derive(Debug, Clone, Serialize)]
pub struct WorkloadSummary {
    pub workload: &'static str,
    pub operations: u64,
    pub duration_ms: u64,
    pub statistics: Option<UsageStatistics>,
    pub active_allocations: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leaks: Option<LeakReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolStats>,
}

fn invariant(workload: &str, message: String) -> HarnessError {
    HarnessError::Invariant {
        workload: workload.to_string(),
        message,
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Churn on `params.threads` threads. Every block is released by the end,
/// so usage and live count must return to where they started.
pub fn run_stress(tracker: &Tracker, params: &StressParams) -> Result<WorkloadSummary, HarnessError> {
    const NAME: &str = "stress";
    let start = Instant::now();
    let baseline_usage = tracker.current_usage();
    let baseline_live = tracker.active_allocation_count();
    let max_size = params.max_size.max(1);
    let working_set = params.working_set.max(1);

    let operations = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..params.threads.max(1))
            .map(|t| {
                let seed = params.seed.wrapping_add(t as u64);
                scope.spawn(move || stress_worker(tracker, seed, params.cycles, max_size, working_set))
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join())
            .try_fold(0_u64, |acc, ops| ops.map(|ops| acc + ops))
    })
    .map_err(|_| HarnessError::WorkerPanicked {
        workload: NAME.to_string(),
    })?;

    let usage = tracker.current_usage();
    if usage != baseline_usage {
        return Err(invariant(
            NAME,
            format!("current usage {usage} != baseline {baseline_usage}"),
        ));
    }
    let live = tracker.active_allocation_count();
    if live != baseline_live {
        return Err(invariant(
            NAME,
            format!("live allocations {live} != baseline {baseline_live}"),
        ));
    }
    let statistics = tracker.statistics();
    if statistics.peak_usage < statistics.current_usage {
        return Err(invariant(NAME, "peak usage below current usage".to_string()));
    }

    Ok(WorkloadSummary {
        workload: NAME,
        operations,
        duration_ms: elapsed_ms(start),
        statistics: Some(statistics),
        active_allocations: Some(live),
        leaks: None,
        pool: None,
    })
}

fn stress_worker(
    tracker: &Tracker,
    seed: u64,
    cycles: usize,
    max_size: usize,
    working_set: usize,
) -> u64 {
    let mut rng = XorShift64::new(seed);
    let mut live: Vec<TrackedBlock<'_>> = Vec::with_capacity(working_set);
    let mut set = AllocationSet::new(tracker);
    let mut operations = 0_u64;

    for _ in 0..cycles {
        let size = rng.gen_range_usize(1, max_size);
        match rng.gen_range_usize(0, 9) {
            0..=3 if live.len() < working_set => {
                if let Some(block) = tracker.allocate_scoped(size) {
                    live.push(block);
                }
            }
            4 | 5 if !live.is_empty() => {
                let idx = rng.gen_range_usize(0, live.len() - 1);
                live[idx].resize(size);
            }
            6 => {
                if set.allocate(size).is_some() && set.len() >= 8 {
                    set.rollback();
                }
            }
            _ if !live.is_empty() => {
                let idx = rng.gen_range_usize(0, live.len() - 1);
                live.swap_remove(idx);
            }
            _ => continue,
        }
        operations += 1;
    }

    operations += set.rollback() as u64;
    operations += live.len() as u64;
    operations
}

/// Leave `params.count` blocks allocated and return the tracker's view of them.
///
/// The blocks stay tracked so that the next `shutdown` reports them.
pub fn run_leak(tracker: &Tracker, params: &LeakParams) -> Result<WorkloadSummary, HarnessError> {
    const NAME: &str = "leak";
    let start = Instant::now();
    let before = tracker.active_allocation_count();
    for _ in 0..params.count {
        let Some(block) = tracker.allocate_scoped(params.size) else {
            return Err(invariant(NAME, format!("allocation of {} bytes failed", params.size)));
        };
        let _leaked = block.into_raw();
    }
    let report = tracker.report_leaks();
    let expected = before + params.count;
    if tracker.leak_detection_enabled() && report.leak_count != expected {
        return Err(invariant(
            NAME,
            format!("reported {} leaks, expected {expected}", report.leak_count),
        ));
    }
    Ok(WorkloadSummary {
        workload: NAME,
        operations: params.count as u64,
        duration_ms: elapsed_ms(start),
        statistics: Some(tracker.statistics()),
        active_allocations: Some(tracker.active_allocation_count()),
        leaks: Some(report),
        pool: None,
    })
}

/// Drain the pool, check it refuses one more, give back a random subset and
/// check LIFO reuse, then return everything.
pub fn run_pool(params: &PoolParams) -> Result<WorkloadSummary, HarnessError> {
    const NAME: &str = "pool";
    let start = Instant::now();
    let pool = MemoryPool::create(params.object_size, params.count, "harness")?;
    let mut rng = XorShift64::new(params.seed);
    let mut operations = 0_u64;

    for round in 0..params.rounds {
        let mut held = Vec::with_capacity(params.count);
        while let Some(obj) = pool.allocate() {
            held.push(obj);
        }
        operations += held.len() as u64;
        if held.len() != params.count {
            return Err(invariant(
                NAME,
                format!("round {round}: drained {} of {} objects", held.len(), params.count),
            ));
        }

        let returns = rng.gen_range_usize(1, held.len());
        let mut last = None;
        for _ in 0..returns {
            let idx = rng.gen_range_usize(0, held.len() - 1);
            let obj = held.swap_remove(idx);
            pool.give_back(obj)?;
            last = Some(obj);
            operations += 1;
        }
        let reused = pool.allocate();
        if reused != last {
            return Err(invariant(
                NAME,
                format!("round {round}: allocation after give_back was not LIFO"),
            ));
        }
        held.extend(reused);
        for obj in held {
            pool.give_back(obj)?;
            operations += 1;
        }
    }

    let stats = pool.stats();
    if stats.allocated != 0 || stats.free != params.count {
        return Err(invariant(
            NAME,
            format!("{} objects still out after the final round", stats.allocated),
        ));
    }
    pool.destroy();
    Ok(WorkloadSummary {
        workload: NAME,
        operations,
        duration_ms: elapsed_ms(start),
        statistics: None,
        active_allocations: None,
        leaks: None,
        pool: Some(stats),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xorshift_is_deterministic_and_nonzero() {
        let mut a = XorShift64::new(0);
        let mut b = XorShift64::new(0);
        for _ in 0..16 {
            let x = a.next_u64();
            assert_eq!(x, b.next_u64());
            assert_ne!(x, 0);
        }
    }

    #[test]
    fn gen_range_stays_inclusive() {
        let mut rng = XorShift64::new(5);
        for _ in 0..1000 {
            let v = rng.gen_range_usize(3, 5);
            assert!((3..=5).contains(&v));
        }
        assert_eq!(rng.gen_range_usize(7, 7), 7);
    }
}
