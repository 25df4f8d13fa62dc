//! Experiment runner: drives one scenario through the state machine and
//! always comes back with exactly one result.
//!
//! Every exit path after an injector exists goes through `Stopping`, and any
//! error escaping the state machine is turned into a FAIL result carrying the
//! error message, with the injector stopped first.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::core::clock::{Clock, SystemClock};
use crate::core::config::Config;
use crate::core::errors::Result;
use crate::core::scenario::Scenario;
use crate::heal::auto_heal::AutoHealManager;
use crate::heal::rollback::{self, RollbackCapability};
use crate::inject::Injector;
use crate::logger::context::{EventContext, EventLog};
use crate::logger::jsonl::{EventType, JsonlConfig, Severity};
use crate::monitor::experiment::ExperimentMonitor;
use crate::platform::pal::{Platform, detect_platform};
use crate::runner::report;
use crate::runner::result::{
    ExperimentResult, Outcome, ROLLBACK_FAILED, ROLLBACK_SUCCESS, Verdict,
};
use crate::runner::safety::{
    BlastRadiusPolicy, ErrorBudgetPolicy, SafetyPreconditions, blast_radius_policy,
};
use crate::runner::state::{RunnerState, StateTrace};
use crate::slo::measurement::SloMeasurement;
use crate::slo::provider::{self, MeasurementProvider};
use crate::slo::validator::SloValidator;

/// Reason prefixes callers can match on.
pub mod reasons {
    pub const SAFETY_PRECONDITION: &str = "safety guard failed";
    pub const START_FAILED: &str = "failed to start injection";
    pub const VERIFY_FAILED: &str = "injection verification failed";
    pub const SAFETY_TRIGGERED: &str = "safety guard triggered";
    pub const AUTO_HEAL_FAILED: &str = "auto-heal failed";
    pub const STOP_FAILED: &str = "failed to stop injection";
}

/// Collaborators the runner acts through.
pub struct RunnerDeps {
    pub platform: Arc<dyn Platform>,
    pub provider: Arc<dyn MeasurementProvider>,
    pub rollback: Arc<dyn RollbackCapability>,
    pub clock: Arc<dyn Clock>,
    pub blast_radius: Box<dyn BlastRadiusPolicy>,
    pub events: EventLog,
}

impl RunnerDeps {
    /// Real collaborators as selected by configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let events = EventLog::open(JsonlConfig {
            dir: config.paths.event_log_dir.clone(),
            fallback_dir: config.paths.event_log_fallback_dir.clone(),
            ..JsonlConfig::in_dir(&config.paths.event_log_dir)
        });
        Ok(Self {
            platform: detect_platform()?,
            provider: provider::from_config(&config.measurement),
            rollback: rollback::from_config(&config.rollback),
            clock: Arc::new(SystemClock),
            blast_radius: blast_radius_policy(&config.safety),
            events,
        })
    }
}

/// Per-invocation overrides.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Write the report here instead of `paths.report_dir`.
    pub report_dir: Option<PathBuf>,
    /// Replace the target's `duration_secs`.
    pub duration_secs: Option<u64>,
}

/// What a run hands back: the result plus where (or whether) the report landed.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub result: ExperimentResult,
    pub report_path: Option<PathBuf>,
    pub report_error: Option<String>,
}

impl RunSummary {
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.result.exit_code()
    }
}

pub struct ExperimentRunner {
    config: Config,
    platform: Arc<dyn Platform>,
    provider: Arc<dyn MeasurementProvider>,
    rollback: Arc<dyn RollbackCapability>,
    clock: Arc<dyn Clock>,
    events: EventLog,
    preconditions: SafetyPreconditions,
}

impl ExperimentRunner {
    #[must_use]
    pub fn new(config: Config, deps: RunnerDeps) -> Self {
        let preconditions = SafetyPreconditions::new(
            deps.blast_radius,
            ErrorBudgetPolicy::from_config(&config.safety),
        );
        Self {
            config,
            platform: deps.platform,
            provider: deps.provider,
            rollback: deps.rollback,
            clock: deps.clock,
            events: deps.events,
            preconditions,
        }
    }

    pub fn from_config(config: Config) -> Result<Self> {
        let deps = RunnerDeps::from_config(&config)?;
        Ok(Self::new(config, deps))
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run `scenario` to completion. Never fails: problems become the result.
    pub fn run(&self, scenario: &Scenario, options: &RunOptions) -> RunSummary {
        let mut run = Run::new(self, scenario, options);
        run.monitor_start();

        let conclusion = match run.execute() {
            Ok(conclusion) => conclusion,
            Err(error) => {
                run.emit_error(&error.to_string());
                if run.injector.is_some() {
                    run.stop_injector();
                }
                run.trace.force(RunnerState::Aborted);
                Conclusion::aborted(error.to_string())
            }
        };
        run.finish(conclusion)
    }
}

struct Conclusion {
    verdict: Verdict,
    outcome: Outcome,
    reason: String,
}

impl Conclusion {
    fn aborted(reason: String) -> Self {
        Self {
            verdict: Verdict::Fail,
            outcome: Outcome::Aborted,
            reason,
        }
    }
}

/// Mutable state of one experiment.
struct Run<'a> {
    runner: &'a ExperimentRunner,
    scenario: &'a Scenario,
    options: &'a RunOptions,
    run_id: String,
    service: String,
    fault: String,
    events: EventContext,
    validator: SloValidator,
    auto_heal: AutoHealManager,
    monitor: ExperimentMonitor,
    trace: StateTrace,
    injector: Option<Injector>,
    started_at: chrono::DateTime<chrono::Utc>,
    slo_before: Option<SloMeasurement>,
    slo_after: Option<SloMeasurement>,
    actions: Vec<String>,
    safety_tripped: bool,
}

impl<'a> Run<'a> {
    fn new(runner: &'a ExperimentRunner, scenario: &'a Scenario, options: &'a RunOptions) -> Self {
        let config = &runner.config;
        let run_id = format!("{:08x}", rand::random::<u32>());
        let service = scenario
            .targets
            .first()
            .map(|t| t.service.clone())
            .unwrap_or_default();
        let fault = scenario
            .fault_kind()
            .map_or_else(|_| "unknown".to_string(), |k| k.label().to_string());
        let events = EventContext::new(runner.events.clone())
            .with_clock(Arc::clone(&runner.clock))
            .for_run(
            &run_id,
            &scenario.name,
            &service,
            &fault,
        );
        let validator = SloValidator::new(
            Arc::clone(&runner.provider),
            Arc::clone(&runner.clock),
            events.clone(),
        );
        let auto_heal = AutoHealManager::new(
            config.auto_heal.clone(),
            Arc::clone(&runner.rollback),
            events.clone(),
        );
        let monitor = ExperimentMonitor::open(config.paths.state_file.clone(), events.clone());
        Self {
            runner,
            scenario,
            options,
            run_id,
            service,
            fault,
            events,
            validator,
            auto_heal,
            monitor,
            trace: StateTrace::new(),
            injector: None,
            started_at: runner.clock.now(),
            slo_before: None,
            slo_after: None,
            actions: Vec::new(),
            safety_tripped: false,
        }
    }

    fn config(&self) -> &Config {
        &self.runner.config
    }

    fn clock(&self) -> &dyn Clock {
        self.runner.clock.as_ref()
    }

    // ──────────────────── state machine ────────────────────

    fn execute(&mut self) -> Result<Conclusion> {
        let scenario = self.scenario;
        let runner = self.runner;
        runner.config.validate()?;
        scenario.validate()?;
        let duration_secs = self
            .options
            .duration_secs
            .unwrap_or(scenario.primary_target()?.duration_secs);

        // SafetyChecking
        self.enter(RunnerState::SafetyChecking)?;
        if let Err(detail) =
            runner
                .preconditions
                .evaluate(scenario, &self.service, &self.validator, &self.events)
        {
            return self.abort(format!("{}: {detail}", reasons::SAFETY_PRECONDITION));
        }

        // BaselineMeasuring
        self.enter(RunnerState::BaselineMeasuring)?;
        let baseline_window = self.config().runner.baseline_window_minutes;
        self.slo_before = Some(self.validator.fetch_slo_window(&self.service, baseline_window));

        // Injecting
        self.enter(RunnerState::Injecting)?;
        let injector = Injector::from_scenario(
            scenario,
            &runner.config.safety,
            Arc::clone(&runner.platform),
            Arc::clone(&runner.clock),
            self.events.clone(),
        )?;
        let injector = self.injector.insert(injector);
        if !injector.start() {
            return self.stop_and_abort(reasons::START_FAILED.to_string());
        }

        // Verifying
        self.enter(RunnerState::Verifying)?;
        if !self.injector_mut().is_some_and(Injector::verify_injection) {
            return self.stop_and_abort(reasons::VERIFY_FAILED.to_string());
        }

        // Monitoring
        self.enter(RunnerState::Monitoring)?;
        if let Some(early_exit) = self.monitor_fault_window(duration_secs)? {
            return Ok(early_exit);
        }

        // Stopping
        self.enter(RunnerState::Stopping)?;
        if !self.stop_injector() {
            self.trace.advance(RunnerState::Aborted)?;
            return Ok(Conclusion::aborted(format!(
                "{}: fault may still be active on the host",
                reasons::STOP_FAILED
            )));
        }

        // Stabilizing
        self.enter(RunnerState::Stabilizing)?;
        self.clock()
            .sleep(Duration::from_secs(self.config().runner.stabilization_secs));

        // FinalMeasuring
        self.enter(RunnerState::FinalMeasuring)?;
        let final_window = self.config().runner.final_window_minutes;
        let after = self.validator.fetch_slo_window(&self.service, final_window);

        // Verdicting
        self.enter(RunnerState::Verdicting)?;
        let check = self.validator.evaluate(&after, &scenario.slo);
        let conclusion = if after.degraded {
            Conclusion {
                verdict: Verdict::Fail,
                outcome: Outcome::Completed,
                reason: "final measurement unavailable".to_string(),
            }
        } else if check.passed() {
            Conclusion {
                verdict: Verdict::Pass,
                outcome: Outcome::Completed,
                reason: "all SLOs met after recovery".to_string(),
            }
        } else {
            Conclusion {
                verdict: Verdict::Fail,
                outcome: Outcome::Completed,
                reason: format!("final SLO violated: {}", check.violations().join(", ")),
            }
        };
        self.slo_after = Some(after);
        Ok(conclusion)
    }

    /// Supervise the fault for `duration_secs`. `Some` means the run ended early.
    fn monitor_fault_window(&mut self, duration_secs: u64) -> Result<Option<Conclusion>> {
        let duration = Duration::from_secs(duration_secs);
        let poll = Duration::from_secs(self.config().runner.poll_interval_secs);
        let window = self.config().runner.monitor_window_minutes;
        let thresholds = self.scenario.slo;
        let began = self.clock().now();

        loop {
            let elapsed = (self.clock().now() - began).to_std().unwrap_or(Duration::ZERO);
            if elapsed >= duration {
                return Ok(None);
            }

            let safe = self.injector.as_ref().is_some_and(Injector::safety_guard);
            if !safe {
                self.safety_tripped = true;
                let mut entry = self.events.entry(EventType::SafetyTrip, Severity::Warning);
                entry.state = Some(self.trace.current().label().to_string());
                entry.ok = Some(false);
                entry.details = Some(format!("guard unsafe after {}s", elapsed.as_secs()));
                self.events.emit(&entry);
                return self
                    .stop_and_abort(reasons::SAFETY_TRIGGERED.to_string())
                    .map(Some);
            }

            let measured = self.validator.fetch_slo_window(&self.service, window);
            if self
                .auto_heal
                .check_auto_heal(&self.service, &measured, &thresholds)
            {
                if self.auto_heal.rollbacks_remaining() == 0 {
                    let mut entry = self.events.entry(EventType::AutoHealTrip, Severity::Info);
                    entry.details = Some("rollback budget spent; not rolling back again".to_string());
                    self.events.emit(&entry);
                } else if self.auto_heal.execute_rollback(&self.service) {
                    self.actions.push(ROLLBACK_SUCCESS.to_string());
                } else {
                    self.actions.push(ROLLBACK_FAILED.to_string());
                    let reason = format!(
                        "{}: rollback of {} did not succeed",
                        reasons::AUTO_HEAL_FAILED,
                        self.service
                    );
                    let mut aborted = self.stop_and_abort(reason)?;
                    aborted.outcome = Outcome::RemediationFailed;
                    return Ok(Some(aborted));
                }
            }

            self.clock().sleep(poll.min(duration - elapsed));
        }
    }

    fn enter(&mut self, next: RunnerState) -> Result<()> {
        self.trace.advance(next)?;
        let mut entry = self.events.entry(EventType::StateTransition, Severity::Info);
        entry.state = Some(next.label().to_string());
        self.events.emit(&entry);
        Ok(())
    }

    fn abort(&mut self, reason: String) -> Result<Conclusion> {
        self.trace.advance(RunnerState::Aborted)?;
        Ok(Conclusion::aborted(reason))
    }

    fn stop_and_abort(&mut self, reason: String) -> Result<Conclusion> {
        self.enter(RunnerState::Stopping)?;
        if self.stop_injector() {
            self.abort(reason)
        } else {
            self.abort(format!("{reason}; {}", reasons::STOP_FAILED))
        }
    }

    fn injector_mut(&mut self) -> Option<&mut Injector> {
        self.injector.as_mut()
    }

    fn stop_injector(&mut self) -> bool {
        self.injector.as_mut().is_none_or(Injector::stop)
    }

    // ──────────────────── reporting ────────────────────

    fn finish(mut self, conclusion: Conclusion) -> RunSummary {
        if self.trace.advance(RunnerState::Reporting).is_err() {
            self.trace.force(RunnerState::Reporting);
        }

        let scenario_digest = self.scenario.digest().unwrap_or_default();
        let mut result = ExperimentResult {
            run_id: self.run_id.clone(),
            scenario: self.scenario.name.clone(),
            scenario_digest,
            fault: self.fault.clone(),
            service: self.service.clone(),
            started_at: self.started_at,
            stopped_at: self.clock().now(),
            injection_started_at: self.injector.as_ref().and_then(Injector::started_at),
            verdict: conclusion.verdict,
            outcome: conclusion.outcome,
            reason: if conclusion.reason.is_empty() {
                "no reason recorded".to_string()
            } else {
                conclusion.reason
            },
            slo_before: self.slo_before.take(),
            slo_after: self.slo_after.take(),
            actions: std::mem::take(&mut self.actions),
            safety_tripped: self.safety_tripped,
            rollback_triggered: self.auto_heal.rollback_triggered(),
            states: self.trace.visited().to_vec(),
        };

        let report_dir = self
            .options
            .report_dir
            .clone()
            .unwrap_or_else(|| self.config().paths.report_dir.clone());
        let (report_path, report_error) =
            match report::write_report(&report_dir, &result, &self.scenario.slo) {
                Ok(path) => {
                    let mut entry = self.events.entry(EventType::ReportWritten, Severity::Info);
                    entry.details = Some(path.display().to_string());
                    self.events.emit(&entry);
                    (Some(path), None)
                }
                Err(error) => {
                    eprintln!("[CHV-REPORT] WARNING: could not write report: {error}");
                    self.emit_error(&format!("report not written: {error}"));
                    (None, Some(error.to_string()))
                }
            };

        if let Err(error) = self.monitor.record_end(&result, report_path.as_deref()) {
            eprintln!("[CHV-MONITOR] WARNING: could not record experiment end: {error}");
        }
        if self.trace.advance(RunnerState::Done).is_ok() {
            result.states.push(RunnerState::Done);
        }
        self.events.log().flush();

        RunSummary {
            result,
            report_path,
            report_error,
        }
    }

    fn monitor_start(&mut self) {
        let started_at = self.started_at;
        if let Err(error) = self.monitor.record_start(
            &self.run_id,
            &self.scenario.name,
            &self.fault,
            &self.service,
            started_at,
        ) {
            eprintln!("[CHV-MONITOR] WARNING: could not record experiment start: {error}");
        }
    }

    fn emit_error(&self, details: &str) {
        let mut entry = self.events.entry(EventType::Error, Severity::Critical);
        entry.state = Some(self.trace.current().label().to_string());
        entry.details = Some(details.to_string());
        self.events.emit(&entry);
    }
}
