//! Experiment orchestration: state machine, safety preconditions, result and report.

pub mod orchestrator;
pub mod report;
pub mod result;
pub mod safety;
pub mod state;
