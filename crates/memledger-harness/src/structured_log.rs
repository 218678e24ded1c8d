//! Structured JSONL logging for harness runs.
//!
//! Provides:
//! - [`LogEntry`]: canonical JSONL record with required + optional fields.
//! - [`LogEmitter`]: writes JSONL lines to a file, stdout or any writer.
//! - [`validate_log_line`]: checks a single line against the schema.
//!
//! Tracker lifecycle records are forwarded through
//! [`LogEntry::from_lifecycle`] so one file carries both harness and tracker
//! events under the same run.

use std::io::Write;
use std::path::Path;

use memledger_core::{LifecycleRecord, LogLevel};
use serde::{Deserialize, Serialize};

/// Workload outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    Error,
}

/// Canonical structured log entry.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    // Required
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    // Optional
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workload: Option<String>,
    /// Tracker operation for forwarded lifecycle records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ptr: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_usage: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create a new log entry with required fields only.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            run_id: None,
            workload: None,
            symbol: None,
            outcome: None,
            ptr: None,
            size: None,
            active_count: None,
            current_usage: None,
            duration_ms: None,
            details: None,
        }
    }

    /// Forward a tracker lifecycle record, keeping its trace id.
    #[must_use]
    pub fn from_lifecycle(record: &LifecycleRecord) -> Self {
        let mut entry = Self::new(&record.trace_id, record.level, record.event);
        entry.symbol = Some(record.symbol.to_string());
        entry.ptr = record.ptr;
        entry.size = record.size;
        entry.active_count = Some(record.active_count);
        entry.current_usage = Some(record.current_usage);
        let mut details = serde_json::json!({
            "decision_id": record.decision_id,
            "outcome": record.outcome,
        });
        if !record.details.is_empty() {
            details["details"] = serde_json::Value::String(record.details.clone());
        }
        entry.details = Some(details);
        entry
    }

    #[must_use]
    pub fn with_workload(mut self, workload: impl Into<String>) -> Self {
        self.workload = Some(workload.into());
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Record a usage snapshot.
    #[must_use]
    pub fn with_usage(mut self, active_count: usize, current_usage: usize) -> Self {
        self.active_count = Some(active_count);
        self.current_usage = Some(current_usage);
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// JSONL writer with per-run trace ids.
pub struct LogEmitter {
    writer: Box<dyn Write>,
    seq: u64,
    run_id: String,
}

impl LogEmitter {
    /// Create an emitter that writes to a file.
    pub fn to_file(path: &Path, run_id: &str) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::to_writer(Box::new(std::io::BufWriter::new(file)), run_id))
    }

    /// Create an emitter that writes to stdout.
    #[must_use]
    pub fn to_stdout(run_id: &str) -> Self {
        Self::to_writer(Box::new(std::io::stdout()), run_id)
    }

    #[must_use]
    pub fn to_writer(writer: Box<dyn Write>, run_id: &str) -> Self {
        Self {
            writer,
            seq: 0,
            run_id: run_id.to_string(),
        }
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Generate the next trace ID.
    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("memledger::harness::{}::{:03}", self.run_id, self.seq)
    }

    /// Emit a log entry with auto-generated trace_id and run_id.
    pub fn emit(&mut self, level: LogLevel, event: &str) -> std::io::Result<LogEntry> {
        let entry = LogEntry::new(String::new(), level, event);
        self.emit_entry(entry)
    }

    /// Emit a fully-populated log entry, filling in trace_id and run_id when absent.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> std::io::Result<LogEntry> {
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        if entry.run_id.is_none() {
            entry.run_id = Some(self.run_id.clone());
        }
        let line = entry.to_jsonl().map_err(std::io::Error::other)?;
        writeln!(self.writer, "{line}")?;
        Ok(entry)
    }

    /// Forward tracker lifecycle records. Returns how many were written.
    pub fn emit_lifecycle(&mut self, records: &[LifecycleRecord]) -> std::io::Result<usize> {
        for record in records {
            self.emit_entry(LogEntry::from_lifecycle(record))?;
        }
        Ok(records.len())
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// A schema violation in one JSONL line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogValidationError {
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for LogValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}: field '{}': {}",
            self.line_number, self.field, self.message
        )
    }
}

/// Validate a single JSONL line.
pub fn validate_log_line(
    line: &str,
    line_number: usize,
) -> Result<LogEntry, Vec<LogValidationError>> {
    let err = |field: &str, message: String| LogValidationError {
        line_number,
        field: field.to_string(),
        message,
    };
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return Err(vec![err("(root)", format!("invalid JSON: {e}"))]),
    };
    let Some(obj) = value.as_object() else {
        return Err(vec![err("(root)", "expected JSON object".to_string())]);
    };

    let mut errors = Vec::new();
    for field in ["timestamp", "trace_id", "level", "event"] {
        match obj.get(field).and_then(serde_json::Value::as_str) {
            Some(s) if !s.is_empty() => {}
            Some(_) => errors.push(err(field, "must not be empty".to_string())),
            None => errors.push(err(field, "required string field missing".to_string())),
        }
    }
    if let Some(trace_id) = obj.get("trace_id").and_then(serde_json::Value::as_str) {
        if !trace_id.starts_with("memledger::") {
            errors.push(err(
                "trace_id",
                format!("expected memledger:: prefix, got {trace_id:?}"),
            ));
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }
    serde_json::from_value(value).map_err(|e| vec![err("(root)", format!("schema mismatch: {e}"))])
}

fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = duration.as_secs();
    let (year, month, day) = civil_from_days(secs / 86_400);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{:03}Z",
        (secs % 86_400) / 3_600,
        (secs % 3_600) / 60,
        secs % 60,
        duration.subsec_millis(),
    )
}

/// Proleptic Gregorian date for a day count since 1970-01-01.
fn civil_from_days(days: u64) -> (u64, u64, u64) {
    let z = days + 719_468;
    let era = z / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + u64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn lines(&self) -> Vec<String> {
            String::from_utf8(self.0.borrow().clone())
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    #[test]
    fn emitter_sequences_trace_ids() {
        let buffer = SharedBuffer::default();
        let mut emitter = LogEmitter::to_writer(Box::new(buffer.clone()), "run-7");
        emitter.emit(LogLevel::Info, "start").unwrap();
        emitter.emit(LogLevel::Info, "stop").unwrap();
        let lines = buffer.lines();
        assert_eq!(lines.len(), 2);
        let second = validate_log_line(&lines[1], 2).unwrap();
        assert_eq!(second.trace_id, "memledger::harness::run-7::002");
        assert_eq!(second.run_id.as_deref(), Some("run-7"));
    }

    #[test]
    fn lifecycle_records_keep_their_trace_id() {
        let tracker = memledger_core::Tracker::initialized(memledger_core::TrackerConfig::quiet())
            .unwrap();
        let block = tracker.allocate_scoped(64).unwrap();
        drop(block);
        let records = tracker.drain_lifecycle_logs();

        let buffer = SharedBuffer::default();
        let mut emitter = LogEmitter::to_writer(Box::new(buffer.clone()), "lc");
        assert_eq!(emitter.emit_lifecycle(&records).unwrap(), records.len());
        for (idx, line) in buffer.lines().iter().enumerate() {
            let entry = validate_log_line(line, idx + 1).unwrap();
            assert_eq!(entry.trace_id, records[idx].trace_id);
            assert!(entry.current_usage.is_some());
        }
    }

    #[test]
    fn validation_reports_missing_fields() {
        let errors = validate_log_line(r#"{"timestamp":"t","level":"info"}"#, 3).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["trace_id", "event"]);
        assert!(errors[0].to_string().starts_with("line 3:"));
        assert!(validate_log_line("not json", 1).is_err());
    }

    #[test]
    fn timestamps_are_iso8601() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(19_723), (2024, 1, 1));
        assert_eq!(civil_from_days(19_782), (2024, 2, 29));
        let ts = now_utc();
        assert_eq!(ts.len(), "2024-01-01T00:00:00.000Z".len());
        assert!(ts.ends_with('Z'));
    }
}
