//! Experiment monitor: records experiment start/end for external visibility.
//!
//! The state file (`state.json`) is how `chv status` sees what is running and
//! how the last run ended. It is written atomically (write to `.tmp`, then
//! `rename()`) on every start and end, so readers always get a consistent
//! snapshot.

#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::{ChaosError, Result};
use crate::logger::context::EventContext;
use crate::logger::jsonl::{EventType, Severity};
use crate::runner::result::{ExperimentResult, Outcome, Verdict};

// ──────────────────── state file schema ────────────────────

/// Top-level state written to `state.json`.
///
/// Every field defaults so older or newer state files still parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorState {
    pub version: String,
    pub last_updated: String,
    pub current: Option<ExperimentRecord>,
    pub last: Option<ExperimentRecord>,
    pub counters: Counters,
}

/// One experiment as seen from outside.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentRecord {
    pub run_id: String,
    pub scenario: String,
    pub fault: String,
    pub service: String,
    pub pid: u32,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub verdict: Option<Verdict>,
    pub outcome: Option<Outcome>,
    pub reason: Option<String>,
    pub rollback_triggered: bool,
    pub report_path: Option<PathBuf>,
}

/// Cumulative counters across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Counters {
    pub started: u64,
    pub passed: u64,
    pub failed: u64,
    pub aborted: u64,
    pub remediation_failed: u64,
    /// Runs that started but never recorded an end.
    pub abandoned: u64,
}

// ──────────────────── monitor ────────────────────

pub struct ExperimentMonitor {
    state_file: PathBuf,
    events: EventContext,
    state: MonitorState,
}

impl ExperimentMonitor {
    /// Open the monitor, carrying counters over from an existing state file.
    /// An unreadable state file starts fresh with a warning.
    pub fn open(state_file: PathBuf, events: EventContext) -> Self {
        let state = if state_file.exists() {
            match Self::read_state(&state_file) {
                Ok(state) => state,
                Err(error) => {
                    eprintln!("[CHV-MONITOR] WARNING: starting fresh state: {error}");
                    MonitorState::default()
                }
            }
        } else {
            MonitorState::default()
        };
        Self {
            state_file,
            events,
            state,
        }
    }

    #[must_use]
    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    #[must_use]
    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    pub fn record_start(
        &mut self,
        run_id: &str,
        scenario: &str,
        fault: &str,
        service: &str,
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(stale) = self.state.current.take() {
            eprintln!(
                "[CHV-MONITOR] WARNING: experiment {} ({}) never recorded an end",
                stale.run_id, stale.scenario
            );
            self.state.counters.abandoned += 1;
        }
        self.state.counters.started += 1;
        self.state.current = Some(ExperimentRecord {
            run_id: run_id.to_string(),
            scenario: scenario.to_string(),
            fault: fault.to_string(),
            service: service.to_string(),
            pid: std::process::id(),
            started_at: started_at.to_rfc3339(),
            ..ExperimentRecord::default()
        });

        let entry = self.events.entry(EventType::ExperimentStart, Severity::Info);
        self.events.emit(&entry);
        self.persist()
    }

    pub fn record_end(&mut self, result: &ExperimentResult, report_path: Option<&Path>) -> Result<()> {
        let mut record = self
            .state
            .current
            .take()
            .filter(|current| current.run_id == result.run_id)
            .unwrap_or_else(|| ExperimentRecord {
                run_id: result.run_id.clone(),
                scenario: result.scenario.clone(),
                fault: result.fault.clone(),
                service: result.service.clone(),
                pid: std::process::id(),
                started_at: result.started_at.to_rfc3339(),
                ..ExperimentRecord::default()
            });
        record.ended_at = Some(result.stopped_at.to_rfc3339());
        record.verdict = Some(result.verdict);
        record.outcome = Some(result.outcome);
        record.reason = Some(result.reason.clone());
        record.rollback_triggered = result.rollback_triggered;
        record.report_path = report_path.map(Path::to_path_buf);
        self.state.last = Some(record);

        let counters = &mut self.state.counters;
        match (result.outcome, result.verdict) {
            (Outcome::Completed, Verdict::Pass) => counters.passed += 1,
            (Outcome::Completed, Verdict::Fail) => counters.failed += 1,
            (Outcome::Aborted, _) => counters.aborted += 1,
            (Outcome::RemediationFailed, _) => counters.remediation_failed += 1,
        }

        let severity = match result.outcome {
            Outcome::RemediationFailed => Severity::Critical,
            Outcome::Aborted => Severity::Warning,
            Outcome::Completed => Severity::Info,
        };
        let mut entry = self
            .events
            .entry(EventType::ExperimentEnd, severity)
            .with_param("verdict", result.verdict.to_string())
            .with_param("outcome", result.outcome.label())
            .with_param("actions", result.actions.clone())
            .with_param("duration_secs", result.duration_secs());
        entry.ok = Some(result.passed());
        entry.reason = Some(result.reason.clone());
        self.events.emit(&entry);
        self.persist()
    }

    /// Read the state file (for `chv status`).
    pub fn read_state(path: &Path) -> Result<MonitorState> {
        let raw = fs::read_to_string(path).map_err(|source| ChaosError::io(path, source))?;
        serde_json::from_str(&raw).map_err(|error| ChaosError::Serialization {
            context: "state file",
            details: error.to_string(),
        })
    }

    fn persist(&mut self) -> Result<()> {
        self.state.version = env!("CARGO_PKG_VERSION").to_string();
        self.state.last_updated = Utc::now().to_rfc3339();
        write_state_atomic(&self.state_file, &self.state)
            .map_err(|source| ChaosError::io(&self.state_file, source))
    }
}

// ──────────────────── atomic state file write ────────────────────

/// Write state.json atomically: write to .tmp, then rename.
fn write_state_atomic(path: &Path, state: &MonitorState) -> std::io::Result<()> {
    let tmp_path = path.with_extension("json.tmp");

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(state).map_err(std::io::Error::other)?;

    let result = (|| {
        {
            use std::io::Write;
            let mut opts = OpenOptions::new();
            opts.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o644);
            }
            let mut file = opts.open(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}
