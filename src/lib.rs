#![forbid(unsafe_code)]

//! Chaos Verdict (chv) — runs one chaos experiment against a service and
//! judges it against the service's SLOs.
//!
//! An experiment moves through a fixed pipeline:
//! 1. **Safety preconditions** — blast radius and remaining error budget
//! 2. **Fault window** — inject one fault, supervise it with a safety guard
//!    and SLO-driven auto-heal (rollback)
//! 3. **Verdict** — stop the fault, let the service settle, measure again,
//!    and record PASS or FAIL in a Markdown report
//!
//! # Library usage
//!
//! ```rust,no_run
//! use chaos_verdict::prelude::*;
//!
//! let config = Config::load(None)?;
//! let scenario = Scenario::load(std::path::Path::new("checkout-latency.toml"))?;
//! let runner = ExperimentRunner::from_config(config)?;
//! let summary = runner.run(&scenario, &RunOptions::default());
//! println!("{} ({})", summary.result.verdict, summary.result.reason);
//! # Ok::<(), chaos_verdict::core::errors::ChaosError>(())
//! ```

pub mod prelude;

pub mod core;
pub mod heal;
pub mod inject;
pub mod logger;
pub mod monitor;
pub mod platform;
pub mod runner;
pub mod slo;
