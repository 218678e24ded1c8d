//! CLI entrypoint for the memledger workload harness.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use memledger_core::{LedgerIndex, LogLevel, Tracker, TrackerConfig};
use memledger_harness::{
    LeakParams, LogEmitter, LogEntry, Outcome, PoolParams, StressParams, WorkloadSummary,
    load_config, run_leak, run_pool, run_stress,
};

/// Allocation tracking workloads.
#[derive(Debug, Parser)]
#[command(name = "memledger-harness")]
#[command(about = "Run seeded allocation workloads against memledger and emit structured logs")]
struct Cli {
    /// Tracker config JSON (defaults: MEMLEDGER_* environment variables).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// JSONL log output path (if omitted, logs go to stdout).
    #[arg(long, global = true)]
    log: Option<PathBuf>,
    /// Override the ledger lookup strategy (`linear` or `hashed`).
    #[arg(long, global = true)]
    index: Option<String>,
    /// Run identifier used in trace ids.
    #[arg(long, global = true)]
    run_id: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Multi-threaded allocate/resize/free churn; usage must return to zero.
    Stress {
        #[arg(long, default_value_t = 4)]
        threads: usize,
        #[arg(long, default_value_t = 10_000)]
        cycles: usize,
        #[arg(long, default_value_t = 4_096)]
        max_size: usize,
        #[arg(long, default_value_t = 32)]
        working_set: usize,
        /// Root seed (decimal or 0x...).
        #[arg(long, default_value = "0xC0FFEE00")]
        seed: String,
    },
    /// Leave blocks allocated and print the shutdown leak report.
    Leak {
        #[arg(long, default_value_t = 3)]
        count: usize,
        #[arg(long, default_value_t = 128)]
        size: usize,
    },
    /// Drain and refill an object pool, checking exhaustion and LIFO reuse.
    Pool {
        #[arg(long, default_value_t = 64)]
        object_size: usize,
        #[arg(long, default_value_t = 256)]
        count: usize,
        #[arg(long, default_value_t = 100)]
        rounds: usize,
        #[arg(long, default_value = "0x5EED")]
        seed: String,
    },
    /// Print the effective tracker configuration as JSON.
    ShowConfig,
}

fn parse_seed(raw: &str) -> Result<u64, String> {
    let cleaned = raw.replace('_', "");
    let parsed = match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => cleaned.parse(),
    };
    parsed.map_err(|e| format!("invalid seed {raw:?}: {e}"))
}

fn default_run_id() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("run-{secs}")
}

fn finish(
    emitter: &mut LogEmitter,
    tracker: Option<&Tracker>,
    summary: &WorkloadSummary,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(tracker) = tracker {
        emitter.emit_lifecycle(&tracker.drain_lifecycle_logs())?;
    }
    let entry = LogEntry::new(String::new(), LogLevel::Info, "workload_complete")
        .with_workload(summary.workload)
        .with_outcome(Outcome::Pass)
        .with_duration_ms(summary.duration_ms)
        .with_details(serde_json::to_value(summary)?);
    let entry = match (summary.active_allocations, summary.statistics) {
        (Some(active), Some(stats)) => entry.with_usage(active, stats.current_usage),
        _ => entry,
    };
    emitter.emit_entry(entry)?;
    emitter.flush()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config: TrackerConfig = load_config(cli.config.as_deref())?;
    if let Some(index) = &cli.index {
        config.index = LedgerIndex::from_str_loose(index);
    }
    let run_id = cli.run_id.clone().unwrap_or_else(default_run_id);
    let mut emitter = match &cli.log {
        Some(path) => LogEmitter::to_file(path, &run_id)?,
        None => LogEmitter::to_stdout(&run_id),
    };

    match cli.command {
        Command::Stress {
            threads,
            cycles,
            max_size,
            working_set,
            seed,
        } => {
            let params = StressParams {
                threads,
                cycles,
                max_size,
                working_set,
                seed: parse_seed(&seed)?,
            };
            let tracker = Tracker::initialized(config)?;
            emitter.emit_entry(
                LogEntry::new(String::new(), LogLevel::Info, "workload_start")
                    .with_workload("stress")
                    .with_details(serde_json::to_value(&params)?),
            )?;
            let outcome = run_stress(&tracker, &params);
            match outcome {
                Ok(summary) => {
                    finish(&mut emitter, Some(&tracker), &summary)?;
                    if let Some(report) = tracker.shutdown() {
                        return Err(format!("stress workload leaked {} blocks", report.leak_count).into());
                    }
                }
                Err(err) => {
                    emitter.emit_lifecycle(&tracker.drain_lifecycle_logs())?;
                    emitter.emit_entry(
                        LogEntry::new(String::new(), LogLevel::Error, "workload_failed")
                            .with_workload("stress")
                            .with_outcome(Outcome::Fail)
                            .with_details(serde_json::json!({ "error": err.to_string() })),
                    )?;
                    emitter.flush()?;
                    return Err(err.into());
                }
            }
        }
        Command::Leak { count, size } => {
            let tracker = Tracker::initialized(config)?;
            let summary = run_leak(&tracker, &LeakParams { count, size })?;
            finish(&mut emitter, Some(&tracker), &summary)?;
            match tracker.shutdown() {
                Some(report) => eprintln!(
                    "leak workload: shutdown reported {} block(s), {} bytes",
                    report.leak_count, report.total_leaked_bytes
                ),
                None => eprintln!("leak workload: no report (leak detection disabled)"),
            }
        }
        Command::Pool {
            object_size,
            count,
            rounds,
            seed,
        } => {
            let summary = run_pool(&PoolParams {
                object_size,
                count,
                rounds,
                seed: parse_seed(&seed)?,
            })?;
            finish(&mut emitter, None, &summary)?;
        }
        Command::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}
