//! Black-box tests of the `chv` binary.

mod common;

use std::fs;
use std::path::{Path, PathBuf};

use common::{LATENCY_SCENARIO, run_cli_case, run_cli_case_with_env};

fn write_scenario(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).expect("write scenario");
    path
}

fn arg(path: &Path) -> &str {
    path.to_str().expect("utf-8 temp path")
}

#[test]
fn help_command_prints_usage() {
    let home = tempfile::tempdir().unwrap();
    let result = run_cli_case("help_command_prints_usage", home.path(), &["--help"]);
    assert_eq!(result.code(), Some(0), "log: {}", result.log_path.display());
    for subcommand in ["run", "validate", "status", "config", "completions"] {
        assert!(result.stdout.contains(subcommand), "missing {subcommand}");
    }
}

#[test]
fn version_command_prints_version() {
    let home = tempfile::tempdir().unwrap();
    let result = run_cli_case("version_command_prints_version", home.path(), &["--version"]);
    assert_eq!(result.code(), Some(0));
    assert!(result.stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn validate_reports_resolved_scenario() {
    let home = tempfile::tempdir().unwrap();
    let scenario = write_scenario(home.path(), "latency.toml", LATENCY_SCENARIO);
    let result = run_cli_case("validate_ok", home.path(), &["validate", arg(&scenario)]);
    assert_eq!(result.code(), Some(0), "log: {}", result.log_path.display());

    let json = result.json();
    assert_eq!(json["command"], "validate");
    assert_eq!(json["valid"], true);
    assert_eq!(json["fault"], "network_latency");
    assert_eq!(json["service"], "checkout");
    assert_eq!(json["digest"].as_str().unwrap().len(), 64);
}

#[test]
fn validate_rejects_bad_scenarios_with_user_error() {
    let home = tempfile::tempdir().unwrap();
    let nameless = write_scenario(
        home.path(),
        "mystery.toml",
        r#"
name = "checkout-chaos"
targets = [{ service = "checkout", duration_secs = 60 }]
safety = { blast_radius = "staging" }
slo = { p95_ms = 400.0, error_rate = 0.01, availability = 0.99 }
"#,
    );
    let result = run_cli_case("validate_no_fault", home.path(), &["validate", arg(&nameless)]);
    assert_eq!(result.code(), Some(64));
    assert!(result.stderr.starts_with("chv: "));
    assert!(result.stderr.contains("fault"));

    let yaml = write_scenario(home.path(), "latency.yaml", "name: x\n");
    let result = run_cli_case("validate_yaml", home.path(), &["validate", arg(&yaml)]);
    assert_eq!(result.code(), Some(64));
}

#[cfg(target_os = "linux")]
#[test]
fn run_without_environment_marker_aborts_and_still_reports() {
    let home = tempfile::tempdir().unwrap();
    let scenario = write_scenario(home.path(), "latency.toml", LATENCY_SCENARIO);
    let reports = home.path().join("reports");
    let result = run_cli_case(
        "run_no_marker",
        home.path(),
        &["run", arg(&scenario), "--report-dir", arg(&reports)],
    );
    assert_eq!(result.code(), Some(2), "log: {}", result.log_path.display());

    let json = result.json();
    assert_eq!(json["exit_code"], 2);
    assert_eq!(json["result"]["verdict"], "FAIL");
    assert_eq!(json["result"]["outcome"], "aborted");
    let reason = json["result"]["reason"].as_str().unwrap();
    assert!(reason.starts_with("safety guard failed"), "{reason}");
    assert!(reason.contains("CHV_ENVIRONMENT"));

    let report = PathBuf::from(json["report_path"].as_str().unwrap());
    assert!(report.starts_with(&reports));
    let body = fs::read_to_string(report).unwrap();
    assert!(body.contains("**Outcome:** aborted"));

    let status = run_cli_case("status_after_run", home.path(), &["status"]);
    assert_eq!(status.code(), Some(0));
    let state = &status.json()["state"];
    assert!(state["current"].is_null());
    assert_eq!(state["last"]["outcome"], "aborted");
    assert_eq!(state["counters"]["aborted"], 1);
}

#[cfg(target_os = "linux")]
#[test]
fn run_without_measurements_is_denied_by_error_budget() {
    let home = tempfile::tempdir().unwrap();
    let scenario = write_scenario(home.path(), "latency.toml", LATENCY_SCENARIO);
    let result = run_cli_case_with_env(
        "run_no_measurements",
        home.path(),
        &["run", arg(&scenario)],
        &[("CHV_SAFETY_ENFORCE_BLAST_RADIUS", "false")],
    );
    assert_eq!(result.code(), Some(2), "log: {}", result.log_path.display());
    let reason = result.json()["result"]["reason"].as_str().unwrap().to_string();
    assert!(reason.contains("error budget unknown"), "{reason}");

    let reports = home.path().join(".local/share/chv/reports");
    assert_eq!(fs::read_dir(reports).unwrap().count(), 1);
}

#[cfg(target_os = "linux")]
#[test]
fn human_output_shows_verdict_line() {
    let home = tempfile::tempdir().unwrap();
    let scenario = write_scenario(home.path(), "latency.toml", LATENCY_SCENARIO);
    let result = run_cli_case_with_env(
        "run_human",
        home.path(),
        &["--no-color", "run", arg(&scenario)],
        &[("CHV_OUTPUT_FORMAT", "human")],
    );
    assert_eq!(result.code(), Some(2));
    assert!(result.stdout.starts_with("FAIL  checkout-latency"));
    assert!(result.stdout.contains("Outcome:  aborted"));
    assert!(result.stdout.contains("Report:"));
}

#[test]
fn run_with_missing_scenario_is_a_user_error() {
    let home = tempfile::tempdir().unwrap();
    let missing = home.path().join("nope.toml");
    let result = run_cli_case("run_missing", home.path(), &["run", arg(&missing)]);
    assert_eq!(result.code(), Some(74));
    assert!(result.stderr.contains("nope.toml"));
}

#[test]
fn status_without_history() {
    let home = tempfile::tempdir().unwrap();
    let result = run_cli_case("status_empty", home.path(), &["status", "--json"]);
    assert_eq!(result.code(), Some(0));
    let json = result.json();
    assert_eq!(json["command"], "status");
    assert!(json["state"].is_null());
}

#[test]
fn config_path_show_and_validate() {
    let home = tempfile::tempdir().unwrap();

    let path = run_cli_case("config_path", home.path(), &["config", "path"]);
    assert_eq!(path.code(), Some(0));
    let json = path.json();
    assert!(json["path"].as_str().unwrap().ends_with(".config/chv/config.toml"));
    assert_eq!(json["exists"], false);

    let show = run_cli_case("config_show", home.path(), &["config", "show"]);
    assert_eq!(show.code(), Some(0));
    assert_eq!(show.json()["config"]["runner"]["poll_interval_secs"], 30);

    let validate = run_cli_case("config_validate", home.path(), &["config", "validate"]);
    assert_eq!(validate.code(), Some(0));
    assert_eq!(validate.json()["hash"].as_str().unwrap().len(), 16);
}

#[test]
fn config_env_overrides_are_visible() {
    let home = tempfile::tempdir().unwrap();
    let show = run_cli_case_with_env(
        "config_show_env",
        home.path(),
        &["config", "show"],
        &[("CHV_RUNNER_POLL_INTERVAL_SECS", "5")],
    );
    assert_eq!(show.code(), Some(0));
    assert_eq!(show.json()["config"]["runner"]["poll_interval_secs"], 5);
}

#[test]
fn invalid_or_missing_config_is_rejected() {
    let home = tempfile::tempdir().unwrap();
    let bad = home.path().join("bad.toml");
    fs::write(&bad, "[runner]\npoll_interval_secs = 0\n").unwrap();
    let result = run_cli_case(
        "config_invalid",
        home.path(),
        &["--config", arg(&bad), "config", "validate"],
    );
    assert_eq!(result.code(), Some(64));
    assert!(result.stderr.contains("poll_interval_secs"));

    let missing = home.path().join("missing.toml");
    let result = run_cli_case(
        "config_missing",
        home.path(),
        &["--config", arg(&missing), "config", "validate"],
    );
    assert_eq!(result.code(), Some(64));
}

#[test]
fn completions_command_generates_shell_script() {
    let home = tempfile::tempdir().unwrap();
    let result = run_cli_case("completions_bash", home.path(), &["completions", "bash"]);
    assert_eq!(result.code(), Some(0));
    assert!(result.stdout.contains("chv"));
}
