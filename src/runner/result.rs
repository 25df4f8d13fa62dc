//! Experiment result: the authoritative output of one run.

#![allow(missing_docs)]

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::runner::state::RunnerState;
use crate::slo::measurement::SloMeasurement;

/// Binary experiment verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => f.write_str("PASS"),
            Self::Fail => f.write_str("FAIL"),
        }
    }
}

/// How the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Ran the full fault window and reached a verdict on the final measurement.
    Completed,
    /// Stopped early by a precondition, an injection failure, a safety trip or an error.
    Aborted,
    /// A rollback failed; the target may be left degraded.
    RemediationFailed,
}

impl Outcome {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::RemediationFailed => "remediation_failed",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Process exit status for a verdict/outcome pair.
#[must_use]
pub const fn exit_code(verdict: Verdict, outcome: Outcome) -> i32 {
    match (outcome, verdict) {
        (Outcome::Completed, Verdict::Pass) => 0,
        (Outcome::Completed, Verdict::Fail) => 1,
        (Outcome::Aborted, _) => 2,
        (Outcome::RemediationFailed, _) => 3,
    }
}

/// Action tag recorded after a successful rollback.
pub const ROLLBACK_SUCCESS: &str = "rollback: SUCCESS";
/// Action tag recorded after a failed rollback.
pub const ROLLBACK_FAILED: &str = "rollback: FAILED";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub run_id: String,
    pub scenario: String,
    pub scenario_digest: String,
    pub fault: String,
    pub service: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub injection_started_at: Option<DateTime<Utc>>,
    pub verdict: Verdict,
    pub outcome: Outcome,
    pub reason: String,
    pub slo_before: Option<SloMeasurement>,
    pub slo_after: Option<SloMeasurement>,
    pub actions: Vec<String>,
    pub safety_tripped: bool,
    pub rollback_triggered: bool,
    pub states: Vec<RunnerState>,
}

impl ExperimentResult {
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        exit_code(self.verdict, self.outcome)
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    /// Wall-clock length of the run in seconds.
    #[must_use]
    pub fn duration_secs(&self) -> i64 {
        (self.stopped_at - self.started_at).num_seconds().max(0)
    }
}
