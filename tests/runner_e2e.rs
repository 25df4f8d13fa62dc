//! End-to-end runs of the experiment runner against fake collaborators.

mod common;

use std::fs;
use std::time::Duration;

use proptest::prelude::*;

use chaos_verdict::core::scenario::Scenario;
use chaos_verdict::heal::rollback::RecordingRollback;
use chaos_verdict::logger::jsonl::{EventType, Severity};
use chaos_verdict::monitor::experiment::ExperimentMonitor;
use chaos_verdict::platform::pal::MockPlatform;
use chaos_verdict::runner::orchestrator::{RunOptions, reasons};
use chaos_verdict::runner::result::{Outcome, Verdict};
use chaos_verdict::runner::state::RunnerState::{self, *};
use chaos_verdict::slo::provider::ScriptedProvider;

use common::{
    CPU_SCENARIO, Harness, KILL_SCENARIO, LATENCY_SCENARIO, healthy, metrics, scenario, slow,
};

const COMPLETED_TRACE: [RunnerState; 12] = [
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
];

#[test]
fn healthy_service_passes_with_no_actions() {
    let harness = Harness::new(ScriptedProvider::constant(healthy()));
    let summary = harness.run(&scenario(LATENCY_SCENARIO));
    let result = &summary.result;

    assert_eq!(result.verdict, Verdict::Pass);
    assert_eq!(result.outcome, Outcome::Completed);
    assert_eq!(summary.exit_code(), 0);
    assert!(result.actions.is_empty());
    assert!(!result.rollback_triggered);
    assert!(!result.safety_tripped);
    assert_eq!(result.reason, "all SLOs met after recovery");
    assert_eq!(result.states, COMPLETED_TRACE);

    // Fault was installed and removed exactly once.
    assert_eq!(harness.platform.count("add_latency"), 1);
    assert_eq!(harness.platform.count("remove_latency"), 1);
    assert!(!harness.platform.latency_installed("eth0"));
    assert!(harness.rollback.calls().is_empty());
}

#[test]
fn measurements_use_configured_windows_and_timing() {
    let harness = Harness::new(ScriptedProvider::constant(healthy()));
    let summary = harness.run(&scenario(LATENCY_SCENARIO));
    let result = &summary.result;

    let windows: Vec<u64> = harness.provider.queries().iter().map(|q| q.1).collect();
    // error budget, baseline, two monitor polls over 60s at 30s, final
    assert_eq!(windows, vec![60, 5, 1, 1, 5]);
    assert!(harness.provider.queries().iter().all(|(s, _)| s == "checkout"));

    assert_eq!(
        harness.clock.sleeps(),
        vec![
            Duration::from_secs(30),
            Duration::from_secs(30),
            Duration::from_secs(30),
        ]
    );

    let before = result.slo_before.as_ref().unwrap();
    let injected = result.injection_started_at.unwrap();
    let after = result.slo_after.as_ref().unwrap();
    assert!(before.timestamp <= injected);
    assert!(after.timestamp >= injected + chrono::Duration::seconds(90));
    assert!(result.started_at <= before.timestamp);
    assert_eq!(result.duration_secs(), 90);
}

#[test]
fn latency_breach_rolls_back_once_and_fails() {
    let provider = ScriptedProvider::sequence([Some(healthy()), Some(healthy())], Some(slow()));
    let harness = Harness::new(provider);
    let summary = harness.run(&scenario(LATENCY_SCENARIO));
    let result = &summary.result;

    assert_eq!(result.verdict, Verdict::Fail);
    assert_eq!(result.outcome, Outcome::Completed);
    assert_eq!(summary.exit_code(), 1);
    assert_eq!(result.actions, vec!["rollback: SUCCESS".to_string()]);
    assert!(result.rollback_triggered);
    assert_eq!(result.reason, "final SLO violated: p95_ms");
    assert_eq!(result.states, COMPLETED_TRACE);

    assert_eq!(harness.rollback.calls(), vec!["checkout".to_string()]);
    // Both polls tripped; only the first rolled back.
    assert_eq!(harness.count_events(EventType::Rollback), 1);
    assert_eq!(harness.count_events(EventType::AutoHealTrip), 3);
    assert_eq!(harness.platform.count("remove_latency"), 1);
}

#[test]
fn cpu_guard_trip_aborts_and_stops_once() {
    let platform = MockPlatform::new();
    platform.set_cpu_load(95.0);
    let harness = Harness::new(ScriptedProvider::constant(healthy())).with_platform(platform);
    let summary = harness.run(&scenario(CPU_SCENARIO));
    let result = &summary.result;

    assert_eq!(result.verdict, Verdict::Fail);
    assert_eq!(result.outcome, Outcome::Aborted);
    assert_eq!(summary.exit_code(), 2);
    assert!(result.reason.contains(reasons::SAFETY_TRIGGERED));
    assert!(result.safety_tripped);
    assert!(result.slo_after.is_none());
    assert_eq!(
        result.states,
        vec![
            Loading,
            SafetyChecking,
            BaselineMeasuring,
            Injecting,
            Verifying,
            Monitoring,
            Stopping,
            Aborted,
            Reporting,
            Done,
        ]
    );

    // Guard tripped on the first poll, before any monitor measurement.
    let windows: Vec<u64> = harness.provider.queries().iter().map(|q| q.1).collect();
    assert_eq!(windows, vec![60, 5]);
    assert!(harness.clock.sleeps().is_empty());
    assert_eq!(harness.count_events(EventType::InjectionStop), 1);
    assert_eq!(harness.count_events(EventType::SafetyTrip), 1);
}

#[test]
fn failed_rollback_is_remediation_failure() {
    let provider = ScriptedProvider::sequence([Some(healthy()), Some(healthy())], Some(slow()));
    let harness = Harness::new(provider).with_rollback(RecordingRollback::failing());
    let summary = harness.run(&scenario(LATENCY_SCENARIO));
    let result = &summary.result;

    assert_eq!(result.verdict, Verdict::Fail);
    assert_eq!(result.outcome, Outcome::RemediationFailed);
    assert_eq!(summary.exit_code(), 3);
    assert!(result.reason.starts_with(reasons::AUTO_HEAL_FAILED));
    assert_eq!(result.actions, vec!["rollback: FAILED".to_string()]);
    assert!(result.states.contains(&Stopping));
    assert!(!result.states.contains(&Stabilizing));
    assert!(!harness.platform.latency_installed("eth0"));

    let critical = harness
        .events()
        .into_iter()
        .filter(|e| e.event == EventType::ExperimentEnd)
        .map(|e| e.severity)
        .collect::<Vec<_>>();
    assert_eq!(critical, vec![Severity::Critical]);
}

#[test]
fn missing_environment_marker_aborts_before_any_fault() {
    let harness = Harness::new(ScriptedProvider::constant(healthy())).without_marker();
    let summary = harness.run(&scenario(LATENCY_SCENARIO));
    let result = &summary.result;

    assert_eq!(result.outcome, Outcome::Aborted);
    assert_eq!(summary.exit_code(), 2);
    assert!(result.reason.starts_with(reasons::SAFETY_PRECONDITION));
    assert!(result.reason.contains("CHV_ENVIRONMENT"));
    assert!(result.injection_started_at.is_none());
    assert!(harness.platform.calls().is_empty());
    assert!(harness.provider.queries().is_empty());
    assert_eq!(
        result.states,
        vec![Loading, SafetyChecking, Aborted, Reporting, Done]
    );
}

#[test]
fn zero_rollback_budget_is_refused_before_any_fault() {
    let provider = ScriptedProvider::sequence([Some(healthy()), Some(healthy())], Some(slow()));
    let mut harness = Harness::new(provider);
    harness.config.auto_heal.max_rollbacks = 0;
    let summary = harness.run(&scenario(LATENCY_SCENARIO));
    let result = &summary.result;

    assert_eq!(result.verdict, Verdict::Fail);
    assert_eq!(result.outcome, Outcome::Aborted);
    assert!(result.reason.contains("max_rollbacks"), "{}", result.reason);
    assert!(harness.platform.calls().is_empty());
    assert!(harness.provider.queries().is_empty());
    assert_eq!(harness.count_events(EventType::AutoHealTrip), 0);
    assert_eq!(result.states, vec![Loading, Aborted, Reporting, Done]);
}

#[test]
fn unavailable_measurements_deny_the_error_budget() {
    let harness = Harness::new(ScriptedProvider::failing());
    let summary = harness.run(&scenario(LATENCY_SCENARIO));
    let result = &summary.result;

    assert_eq!(result.verdict, Verdict::Fail);
    assert_eq!(result.outcome, Outcome::Aborted);
    assert!(result.reason.contains("error budget unknown"));
    assert!(harness.platform.calls().is_empty());
    assert_eq!(harness.count_events(EventType::PreconditionDenied), 1);
}

#[test]
fn lost_final_measurement_fails_the_run() {
    // budget, baseline, two monitor polls fine; final query fails.
    let provider = ScriptedProvider::sequence(
        [
            Some(healthy()),
            Some(healthy()),
            Some(healthy()),
            Some(healthy()),
            None,
        ],
        Some(healthy()),
    );
    let harness = Harness::new(provider);
    let summary = harness.run(&scenario(LATENCY_SCENARIO));

    assert_eq!(summary.result.verdict, Verdict::Fail);
    assert_eq!(summary.result.outcome, Outcome::Completed);
    assert_eq!(summary.result.reason, "final measurement unavailable");
    assert!(summary.result.slo_after.as_ref().unwrap().degraded);
    assert_eq!(harness.count_events(EventType::MeasurementDegraded), 1);
}

#[test]
fn refused_injection_aborts_without_touching_the_host() {
    let platform = MockPlatform::new();
    platform.refuse_faults();
    let harness = Harness::new(ScriptedProvider::constant(healthy())).with_platform(platform);
    let summary = harness.run(&scenario(KILL_SCENARIO));
    let result = &summary.result;

    assert_eq!(result.outcome, Outcome::Aborted);
    assert_eq!(result.reason, reasons::START_FAILED);
    assert!(result.states.contains(&Stopping));
    assert!(!result.states.contains(&Verifying));
    assert!(harness.platform.service_running("payments"));
    assert_eq!(harness.platform.calls(), vec!["stop_service payments".to_string()]);
    assert_eq!(harness.platform.count("start_service"), 0);
}

#[test]
fn refused_latency_leaves_existing_qdisc_alone() {
    let platform = MockPlatform::new();
    platform.refuse_faults();
    let harness = Harness::new(ScriptedProvider::constant(healthy())).with_platform(platform);
    let summary = harness.run(&scenario(LATENCY_SCENARIO));

    assert_eq!(summary.result.outcome, Outcome::Aborted);
    assert_eq!(summary.result.reason, reasons::START_FAILED);
    assert_eq!(harness.platform.count("add_latency"), 1);
    assert_eq!(harness.platform.count("remove_latency"), 0);
}

#[test]
fn unverified_injection_aborts() {
    let platform = MockPlatform::new();
    platform.ignore_faults();
    let harness = Harness::new(ScriptedProvider::constant(healthy())).with_platform(platform);
    let summary = harness.run(&scenario(LATENCY_SCENARIO));

    assert_eq!(summary.result.outcome, Outcome::Aborted);
    assert_eq!(summary.result.reason, reasons::VERIFY_FAILED);
    assert_eq!(harness.count_events(EventType::InjectionVerifyFailed), 1);
}

#[test]
fn service_kill_restarts_the_service() {
    let harness = Harness::new(ScriptedProvider::constant(healthy()));
    let summary = harness.run(&scenario(KILL_SCENARIO));

    assert_eq!(summary.result.verdict, Verdict::Pass);
    assert_eq!(summary.result.fault, "service_kill");
    assert_eq!(harness.platform.count("stop_service"), 1);
    assert_eq!(harness.platform.count("start_service"), 1);
    assert!(harness.platform.service_running("payments"));
}

#[test]
fn report_and_monitor_state_are_written() {
    let harness = Harness::new(ScriptedProvider::constant(healthy()));
    let summary = harness.run(&scenario(LATENCY_SCENARIO));

    let report = summary.report_path.as_ref().unwrap();
    assert_eq!(report.parent().unwrap(), harness.report_dir());
    assert!(
        report
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("checkout-latency-20260402T101500Z")
    );
    let body = fs::read_to_string(report).unwrap();
    assert!(body.contains("**Verdict:** PASS"));
    assert!(body.contains("None."));
    assert!(body.contains("loading → safety_checking"));

    let state = ExperimentMonitor::read_state(&harness.config.paths.state_file).unwrap();
    assert!(state.current.is_none());
    let last = state.last.unwrap();
    assert_eq!(last.run_id, summary.result.run_id);
    assert_eq!(last.verdict, Some(Verdict::Pass));
    assert_eq!(last.report_path.as_ref(), Some(report));
    assert_eq!(state.counters.passed, 1);
}

#[test]
fn run_options_override_duration_and_report_dir() {
    let harness = Harness::new(ScriptedProvider::constant(healthy()));
    let elsewhere = harness.dir.path().join("elsewhere");
    let options = RunOptions {
        report_dir: Some(elsewhere.clone()),
        duration_secs: Some(90),
    };
    let summary = harness.runner().run(&scenario(LATENCY_SCENARIO), &options);

    assert!(summary.report_path.unwrap().starts_with(&elsewhere));
    let monitor_polls = harness
        .provider
        .queries()
        .iter()
        .filter(|(_, window)| *window == 1)
        .count();
    assert_eq!(monitor_polls, 3);
}

#[test]
fn unwritable_report_dir_keeps_the_verdict() {
    let mut harness = Harness::new(ScriptedProvider::constant(healthy()));
    let blocker = harness.dir.path().join("not-a-dir");
    fs::write(&blocker, "file").unwrap();
    harness.config.paths.report_dir = blocker.join("reports");
    let summary = harness.run(&scenario(LATENCY_SCENARIO));

    assert_eq!(summary.result.verdict, Verdict::Pass);
    assert!(summary.report_path.is_none());
    assert!(summary.report_error.is_some());
    assert_eq!(summary.exit_code(), 0);
}

#[test]
fn events_carry_run_identity() {
    let harness = Harness::new(ScriptedProvider::constant(healthy()));
    let summary = harness.run(&scenario(LATENCY_SCENARIO));
    let events = harness.events();

    assert!(!events.is_empty());
    assert!(
        events
            .iter()
            .all(|e| e.run_id.as_deref() == Some(summary.result.run_id.as_str()))
    );
    assert_eq!(events.first().unwrap().event, EventType::ExperimentStart);
    let transitions: Vec<String> = events
        .iter()
        .filter(|e| e.event == EventType::StateTransition)
        .filter_map(|e| e.state.clone())
        .collect();
    assert_eq!(transitions.first().map(String::as_str), Some("safety_checking"));
    assert_eq!(transitions.last().map(String::as_str), Some("verdicting"));
}

#[test]
fn events_are_stamped_from_the_run_clock() {
    let harness = Harness::new(ScriptedProvider::constant(healthy()));
    harness.run(&scenario(LATENCY_SCENARIO));
    let events = harness.events();

    let files: Vec<String> = fs::read_dir(harness.event_dir())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(files, vec!["chaos-events-202604.jsonl".to_string()]);

    assert_eq!(events.first().unwrap().ts, "2026-04-02T10:15:00.000Z");
    assert!(events.iter().all(|e| e.ts.starts_with("2026-04-02T10:1")));
    assert!(events.windows(2).all(|pair| pair[0].ts <= pair[1].ts));
    assert!(events.last().unwrap().ts > events.first().unwrap().ts);
}

fn scenario_with(p95_ms: f64, error_rate: f64, availability: f64) -> Scenario {
    let mut s = scenario(LATENCY_SCENARIO);
    s.slo.p95_ms = p95_ms;
    s.slo.error_rate = error_rate;
    s.slo.availability = availability;
    s
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn verdict_matches_final_thresholds(
        final_p95 in 50.0f64..800.0,
        final_err in 0.0f64..0.02,
        final_avail in 0.97f64..1.0,
    ) {
        let mut harness = Harness::new(ScriptedProvider::sequence(
            [Some(metrics(100.0, 0.0, 1.0)), Some(healthy()), Some(healthy()), Some(healthy())],
            Some(metrics(final_p95, final_err, final_avail)),
        ));
        harness.config.auto_heal.enabled = false;
        let s = scenario_with(400.0, 0.01, 0.99);
        let summary = harness.run(&s);

        let expected = final_p95 <= 400.0 && final_err <= 0.01 && final_avail >= 0.99;
        prop_assert_eq!(summary.result.outcome, Outcome::Completed);
        prop_assert_eq!(summary.result.verdict == Verdict::Pass, expected);
        prop_assert_eq!(summary.exit_code(), if expected { 0 } else { 1 });
        prop_assert!(summary.result.actions.is_empty());
    }
}
