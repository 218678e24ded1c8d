use std::io::Write;

use memledger_core::{LedgerIndex, Tracker, TrackerConfig};
use memledger_harness::{
    HarnessError, LeakParams, PoolParams, StressParams, load_config, run_leak, run_pool,
    run_stress,
};

fn tracker(index: LedgerIndex) -> Tracker {
    Tracker::initialized(TrackerConfig {
        index,
        log_capacity: 64,
        ..TrackerConfig::quiet()
    })
    .expect("initialize tracker")
}

#[test]
fn stress_returns_usage_to_baseline() {
    for index in [LedgerIndex::Linear, LedgerIndex::Hashed] {
        let tracker = tracker(index);
        let params = StressParams {
            threads: 4,
            cycles: 2_000,
            max_size: 1_024,
            working_set: 16,
            seed: 42,
        };
        let summary = run_stress(&tracker, &params).expect("stress workload");
        assert_eq!(summary.workload, "stress");
        assert!(summary.operations > 0);
        let stats = summary.statistics.expect("statistics");
        assert_eq!(stats.current_usage, 0);
        assert_eq!(stats.total_allocated, stats.total_freed);
        assert!(stats.peak_usage > 0);
        assert_eq!(summary.active_allocations, Some(0));
        assert!(tracker.shutdown().is_none());
    }
}

#[test]
fn leak_workload_is_reported_at_shutdown() {
    let tracker = tracker(LedgerIndex::Linear);
    let summary = run_leak(&tracker, &LeakParams { count: 3, size: 40 }).expect("leak workload");
    let leaks = summary.leaks.expect("leak report");
    assert_eq!(leaks.leak_count, 3);
    assert_eq!(leaks.total_leaked_bytes, 120);
    assert!(
        leaks
            .entries
            .iter()
            .all(|e| e.location.file.ends_with("workload.rs"))
    );

    let report = tracker.shutdown().expect("shutdown report");
    assert_eq!(report.leak_count, 3);
    assert_eq!(report.total_leaked_bytes, 120);
}

#[test]
fn pool_workload_checks_lifo_and_exhaustion() {
    let summary = run_pool(&PoolParams {
        object_size: 24,
        count: 32,
        rounds: 20,
        seed: 7,
    })
    .expect("pool workload");
    let stats = summary.pool.expect("pool stats");
    assert_eq!(stats.total, 32);
    assert_eq!(stats.free, 32);
    assert_eq!(stats.high_water, 32);
}

#[test]
fn pool_workload_rejects_empty_geometry() {
    let err = run_pool(&PoolParams {
        object_size: 0,
        count: 4,
        rounds: 1,
        seed: 1,
    })
    .unwrap_err();
    assert!(matches!(err, HarnessError::Pool(_)));
}

#[test]
fn summaries_serialize_to_json() {
    let tracker = tracker(LedgerIndex::Linear);
    let summary = run_stress(
        &tracker,
        &StressParams {
            threads: 1,
            cycles: 100,
            ..StressParams::default()
        },
    )
    .expect("stress workload");
    let json = serde_json::to_value(&summary).expect("serialize");
    assert_eq!(json["workload"], "stress");
    assert_eq!(json["statistics"]["current_usage"], 0);
    assert!(json.get("leaks").is_none());
}

#[test]
fn config_file_overrides_defaults() {
    let dir = std::env::temp_dir().join(format!("memledger-harness-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir");
    let path = dir.join("tracker.json");
    let mut file = std::fs::File::create(&path).expect("create config");
    writeln!(file, r#"{{"index":"hashed","initial_ledger_capacity":16}}"#).expect("write");
    drop(file);

    let config = load_config(Some(&path)).expect("load config");
    assert_eq!(config.index, LedgerIndex::Hashed);
    assert_eq!(config.initial_ledger_capacity, 16);
    assert!(config.leak_detection);

    std::fs::remove_dir_all(&dir).expect("cleanup");
}
