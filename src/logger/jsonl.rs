//! JSONL event log: append-only line-delimited JSON, partitioned by calendar month.
//!
//! Each line is a self-contained JSON object. Lines are assembled in memory and
//! written with a single `write_all` so a concurrent `tail -f` never sees a
//! partial record. Entries land in `<dir>/<prefix>-YYYYMM.jsonl`, keyed by the
//! entry's own timestamp.
//!
//! Four-level fallback chain:
//! 1. Primary directory
//! 2. Fallback directory (e.g. under the system temp dir)
//! 3. stderr with `[CHV-JSONL]` prefix
//! 4. Silent discard (an experiment must never fail because logging failed)

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::{ChaosError, Result};

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Event kinds emitted over an experiment's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ExperimentStart,
    ExperimentEnd,
    StateTransition,
    PreconditionDenied,
    PreconditionWarning,
    SloMeasured,
    MeasurementDegraded,
    InjectionStart,
    InjectionStartFailed,
    InjectionVerified,
    InjectionVerifyFailed,
    InjectionStop,
    InjectionStopFailed,
    SafetyTrip,
    AutoHealTrip,
    Rollback,
    ReportWritten,
    Error,
}

/// A single JSONL log entry. All fields except `ts`, `event`, `severity` are optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp with millisecond precision.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
    /// Lifecycle or runner state at the time of the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Fault parameters or measurement values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self::at(Utc::now(), event, severity)
    }

    /// Create a new entry stamped with `ts`.
    pub fn at(ts: DateTime<Utc>, event: EventType, severity: Severity) -> Self {
        Self {
            ts: ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            event,
            severity,
            run_id: None,
            scenario: None,
            service: None,
            fault: None,
            state: None,
            params: BTreeMap::new(),
            ok: None,
            reason: None,
            details: None,
        }
    }

    /// Attach a parameter, builder style.
    #[must_use]
    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// `YYYYMM` partition key derived from `ts`.
    #[must_use]
    pub fn partition_key(&self) -> String {
        DateTime::parse_from_rfc3339(&self.ts)
            .map_or_else(|_| Utc::now(), |t| t.with_timezone(&Utc))
            .format("%Y%m")
            .to_string()
    }
}

/// Degradation state of the JSONL writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    /// Writing to the primary directory.
    Normal,
    /// Primary failed, writing to the fallback directory.
    Fallback,
    /// Both directories failed, writing to stderr.
    Stderr,
    /// Everything failed, silently discarding.
    Discard,
}

/// Configuration for the JSONL writer.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    /// Primary log directory.
    pub dir: PathBuf,
    /// Optional fallback directory (e.g. on a different filesystem).
    pub fallback_dir: Option<PathBuf>,
    /// File name prefix; files are `<prefix>-YYYYMM.jsonl`.
    pub file_prefix: String,
    /// Seconds between forced fsync calls. Default: 10.
    pub fsync_interval_secs: u64,
}

impl JsonlConfig {
    /// Config writing under `dir` with default prefix and fsync cadence.
    #[must_use]
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            fallback_dir: None,
            file_prefix: "chaos-events".to_string(),
            fsync_interval_secs: 10,
        }
    }
}

/// Append-only, month-partitioned JSONL writer with multi-level fallback.
pub struct JsonlWriter {
    config: JsonlConfig,
    writer: Option<BufWriter<File>>,
    state: WriterState,
    partition: Option<String>,
    last_fsync: SystemTime,
    lines_written: u64,
}

impl JsonlWriter {
    /// Create a writer. Files are opened lazily on the first entry of each partition.
    pub fn open(config: JsonlConfig) -> Self {
        Self {
            config,
            writer: None,
            state: WriterState::Normal,
            partition: None,
            last_fsync: SystemTime::now(),
            lines_written: 0,
        }
    }

    /// Write a single log entry as one atomic JSONL line.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        let line = match serde_json::to_string(entry) {
            Ok(json) => format!("{json}\n"),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[CHV-JSONL] serialize error: {e}");
                return;
            }
        };
        let key = entry.partition_key();
        self.write_line(&key, &line);
    }

    /// Flush buffers.
    pub fn flush(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
    }

    /// Force an fsync on the underlying file.
    pub fn fsync(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
            let _ = w.get_ref().sync_data();
            self.last_fsync = SystemTime::now();
        }
    }

    /// Current degradation state.
    pub fn state(&self) -> &'static str {
        match self.state {
            WriterState::Normal => "normal",
            WriterState::Fallback => "fallback",
            WriterState::Stderr => "stderr",
            WriterState::Discard => "discard",
        }
    }

    /// Lines successfully handed to a file since open.
    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    /// File a given partition resolves to in the primary directory.
    pub fn partition_path(&self, key: &str) -> PathBuf {
        partition_file(&self.config.dir, &self.config.file_prefix, key)
    }

    // ──────────────────────── internals ────────────────────────

    fn write_line(&mut self, key: &str, line: &str) {
        if matches!(self.state, WriterState::Normal | WriterState::Fallback)
            && (self.writer.is_none() || self.partition.as_deref() != Some(key))
        {
            self.open_partition(key);
        }

        match self.state {
            WriterState::Normal | WriterState::Fallback => {
                if let Some(w) = self.writer.as_mut() {
                    if w.write_all(line.as_bytes()).is_err() {
                        self.degrade(key);
                        self.write_line(key, line);
                        return;
                    }
                    self.lines_written += 1;
                    self.maybe_fsync();
                } else {
                    self.degrade(key);
                    self.write_line(key, line);
                }
            }
            WriterState::Stderr => {
                let _ = write!(io::stderr(), "[CHV-JSONL] {line}");
            }
            WriterState::Discard => {}
        }
    }

    fn maybe_fsync(&mut self) {
        let elapsed = SystemTime::now()
            .duration_since(self.last_fsync)
            .unwrap_or(Duration::ZERO);
        if elapsed.as_secs() >= self.config.fsync_interval_secs {
            self.fsync();
        }
    }

    fn current_dir(&self) -> Option<&Path> {
        match self.state {
            WriterState::Normal => Some(&self.config.dir),
            WriterState::Fallback => self.config.fallback_dir.as_deref(),
            WriterState::Stderr | WriterState::Discard => None,
        }
    }

    fn open_partition(&mut self, key: &str) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
        self.writer = None;
        let Some(dir) = self.current_dir() else {
            return;
        };
        let path = partition_file(dir, &self.config.file_prefix, key);
        match open_append(&path) {
            Ok(file) => {
                self.writer = Some(BufWriter::with_capacity(16 * 1024, file));
                self.partition = Some(key.to_string());
            }
            Err(_) => self.degrade(key),
        }
    }

    fn degrade(&mut self, key: &str) {
        self.writer = None;
        match self.state {
            WriterState::Normal => {
                if self.config.fallback_dir.is_some() {
                    self.state = WriterState::Fallback;
                    let _ = writeln!(
                        io::stderr(),
                        "[CHV-JSONL] primary log dir failed, using fallback dir"
                    );
                    self.open_partition(key);
                } else {
                    self.state = WriterState::Stderr;
                    let _ = writeln!(
                        io::stderr(),
                        "[CHV-JSONL] primary log dir failed and no fallback configured, using stderr"
                    );
                }
            }
            WriterState::Fallback => {
                self.state = WriterState::Stderr;
                let _ = writeln!(io::stderr(), "[CHV-JSONL] fallback write failed, using stderr");
            }
            WriterState::Stderr => {
                self.state = WriterState::Discard;
            }
            WriterState::Discard => {}
        }
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        self.flush();
    }
}

// ──────────────────────── helpers ────────────────────────

/// `<dir>/<prefix>-<key>.jsonl`.
#[must_use]
pub fn partition_file(dir: &Path, prefix: &str, key: &str) -> PathBuf {
    dir.join(format!("{prefix}-{key}.jsonl"))
}

/// Open or create a file for appending, creating parent directories.
fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ChaosError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| ChaosError::io(path, source))
}

// ──────────────────────── tests ────────────────────────
