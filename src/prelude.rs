//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use chaos_verdict::prelude::*;
//! ```

// Core
pub use crate::core::clock::{Clock, SimClock, SystemClock};
pub use crate::core::config::Config;
pub use crate::core::errors::{ChaosError, Result};
pub use crate::core::scenario::{FaultKind, Scenario, SloThresholds, Target};

// Platform
pub use crate::platform::pal::{Platform, detect_platform};

// Injection
pub use crate::inject::{Fault, Injector};
pub use crate::inject::lifecycle::InjectorState;

// Measurement
pub use crate::slo::measurement::{SloCheck, SloMeasurement, WindowMetrics};
pub use crate::slo::provider::MeasurementProvider;
pub use crate::slo::validator::SloValidator;

// Remediation
pub use crate::heal::auto_heal::AutoHealManager;
pub use crate::heal::rollback::RollbackCapability;

// Runner
pub use crate::runner::orchestrator::{ExperimentRunner, RunOptions, RunSummary, RunnerDeps};
pub use crate::runner::result::{ExperimentResult, Outcome, Verdict};
pub use crate::runner::state::RunnerState;

// Logging
pub use crate::logger::context::{EventContext, EventLog};
