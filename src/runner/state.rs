//! Runner state machine: legal transitions and the recorded trace.

#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::errors::{ChaosError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    Loading,
    SafetyChecking,
    BaselineMeasuring,
    Injecting,
    Verifying,
    Monitoring,
    Stopping,
    Stabilizing,
    FinalMeasuring,
    Verdicting,
    Reporting,
    Done,
    Aborted,
}

impl RunnerState {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::SafetyChecking => "safety_checking",
            Self::BaselineMeasuring => "baseline_measuring",
            Self::Injecting => "injecting",
            Self::Verifying => "verifying",
            Self::Monitoring => "monitoring",
            Self::Stopping => "stopping",
            Self::Stabilizing => "stabilizing",
            Self::FinalMeasuring => "final_measuring",
            Self::Verdicting => "verdicting",
            Self::Reporting => "reporting",
            Self::Done => "done",
            Self::Aborted => "aborted",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }

    /// Forward edges of the happy path plus the early exits.
    ///
    /// Stopping → Aborted covers every abort after a fault may have started;
    /// Aborted → Reporting lets an aborted run still produce its report.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use RunnerState::*;
        matches!(
            (self, next),
            (Loading, SafetyChecking)
                | (SafetyChecking, BaselineMeasuring)
                | (BaselineMeasuring, Injecting)
                | (Injecting, Verifying | Stopping)
                | (Verifying, Monitoring | Stopping)
                | (Monitoring, Stopping)
                | (Stopping, Stabilizing | Aborted)
                | (Stabilizing, FinalMeasuring)
                | (FinalMeasuring, Verdicting)
                | (Verdicting, Reporting)
                | (Aborted, Reporting)
                | (Reporting, Done)
        ) || (matches!(next, Aborted) && !self.is_terminal())
    }
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Current state plus every state visited, in order.
#[derive(Debug, Clone)]
pub struct StateTrace {
    current: RunnerState,
    visited: Vec<RunnerState>,
}

impl Default for StateTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTrace {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: RunnerState::Loading,
            visited: vec![RunnerState::Loading],
        }
    }

    #[must_use]
    pub const fn current(&self) -> RunnerState {
        self.current
    }

    #[must_use]
    pub fn visited(&self) -> &[RunnerState] {
        &self.visited
    }

    #[must_use]
    pub fn has_visited(&self, state: RunnerState) -> bool {
        self.visited.contains(&state)
    }

    /// Move to `next`, rejecting illegal edges.
    pub fn advance(&mut self, next: RunnerState) -> Result<()> {
        if !self.current.can_transition_to(next) {
            return Err(ChaosError::IllegalTransition {
                from: self.current.label().to_string(),
                to: next.label().to_string(),
            });
        }
        self.current = next;
        self.visited.push(next);
        Ok(())
    }

    /// Move to `Aborted` unless already terminal or aborted.
    pub fn abort(&mut self) {
        if self.current != RunnerState::Aborted && !self.current.is_terminal() {
            self.current = RunnerState::Aborted;
            self.visited.push(RunnerState::Aborted);
        }
    }

    /// Force the trace into `next` without checking. Used when converting an
    /// unexpected error into a result.
    pub fn force(&mut self, next: RunnerState) {
        if self.current != next {
            self.current = next;
            self.visited.push(next);
        }
    }
}
