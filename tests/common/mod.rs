#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use chaos_verdict::core::clock::SimClock;
use chaos_verdict::core::config::Config;
use chaos_verdict::core::scenario::Scenario;
use chaos_verdict::heal::rollback::RecordingRollback;
use chaos_verdict::logger::context::EventLog;
use chaos_verdict::logger::jsonl::{EventType, JsonlConfig, LogEntry};
use chaos_verdict::platform::pal::MockPlatform;
use chaos_verdict::runner::orchestrator::{ExperimentRunner, RunOptions, RunSummary, RunnerDeps};
use chaos_verdict::runner::safety::EnvironmentMarkerPolicy;
use chaos_verdict::slo::measurement::WindowMetrics;
use chaos_verdict::slo::provider::ScriptedProvider;

// ──────────────────── CLI runner ────────────────────

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

impl CmdResult {
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }

    /// Parse the single JSON line printed in JSON output mode.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(self.stdout.trim()).unwrap_or_else(|e| {
            panic!(
                "stdout is not one JSON document ({e}); see {}",
                self.log_path.display()
            )
        })
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_chv") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "chv.exe" } else { "chv" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve chv binary path for integration test"),
    }
}

/// Run `chv` with `HOME` pointed at `home` and no environment marker or
/// `CHV_*` overrides inherited from the caller.
pub fn run_cli_case(case_name: &str, home: &Path, args: &[&str]) -> CmdResult {
    run_cli_case_with_env(case_name, home, args, &[])
}

pub fn run_cli_case_with_env(
    case_name: &str,
    home: &Path,
    args: &[&str],
    envs: &[(&str, &str)],
) -> CmdResult {
    let root = std::env::temp_dir().join("chv-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let mut command = Command::new(&bin_path);
    command.args(args).env("HOME", home).env("RUST_BACKTRACE", "1");
    for (name, _) in std::env::vars() {
        if name.starts_with("CHV_") {
            command.env_remove(name);
        }
    }
    command.envs(envs.iter().copied());
    let output = command.output().expect("execute chv command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

// ──────────────────── scenarios and metrics ────────────────────

pub const LATENCY_SCENARIO: &str = r#"
name = "checkout-latency"
fault = "network_latency"

[[targets]]
service = "checkout"
duration_secs = 60
latency_ms = 250
jitter_ms = 20
interface = "eth0"

[safety]
blast_radius = "staging"

[slo]
p95_ms = 400.0
error_rate = 0.01
availability = 0.99
"#;

pub const CPU_SCENARIO: &str = r#"
name = "api-cpu-spike"

[[targets]]
service = "api"
duration_secs = 60
cpu_percent = 10
workers = 1

[safety]
blast_radius = "staging"

[slo]
p95_ms = 400.0
error_rate = 0.01
availability = 0.99
"#;

pub const KILL_SCENARIO: &str = r#"
name = "payments-kill"

[[targets]]
service = "payments"
duration_secs = 60

[safety]
blast_radius = "staging"

[slo]
p95_ms = 400.0
error_rate = 0.01
availability = 0.99
"#;

pub fn scenario(toml: &str) -> Scenario {
    Scenario::from_toml_str(toml).expect("fixture scenario parses")
}

pub fn metrics(p95_ms: f64, error_rate: f64, availability: f64) -> WindowMetrics {
    WindowMetrics {
        p95_ms,
        error_rate,
        availability,
        sample_size: 4200,
    }
}

/// Comfortably inside every fixture threshold.
pub fn healthy() -> WindowMetrics {
    metrics(210.0, 0.002, 0.999)
}

/// p95 of 900ms: over the 400ms SLO and over twice it, so auto-heal trips.
pub fn slow() -> WindowMetrics {
    metrics(900.0, 0.002, 0.999)
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 2, 10, 15, 0)
        .single()
        .expect("valid fixture time")
}

// ──────────────────── runner harness ────────────────────

/// Filesystem sandbox plus fake collaborators for one runner test.
pub struct Harness {
    pub dir: TempDir,
    pub config: Config,
    pub platform: Arc<MockPlatform>,
    pub provider: Arc<ScriptedProvider>,
    pub rollback: Arc<RecordingRollback>,
    pub clock: Arc<SimClock>,
    pub marker: Option<String>,
}

impl Harness {
    pub fn new(provider: ScriptedProvider) -> Self {
        let dir = tempfile::tempdir().expect("create tempdir");
        let mut config = Config::default();
        config.paths.config_file = dir.path().join("config.toml");
        config.paths.event_log_dir = dir.path().join("events");
        config.paths.event_log_fallback_dir = None;
        config.paths.report_dir = dir.path().join("reports");
        config.paths.state_file = dir.path().join("state.json");
        Self {
            dir,
            config,
            platform: Arc::new(MockPlatform::new()),
            provider: Arc::new(provider),
            rollback: Arc::new(RecordingRollback::succeeding()),
            clock: Arc::new(SimClock::starting_at(start_time())),
            marker: Some("staging".to_string()),
        }
    }

    pub fn with_rollback(mut self, rollback: RecordingRollback) -> Self {
        self.rollback = Arc::new(rollback);
        self
    }

    pub fn with_platform(mut self, platform: MockPlatform) -> Self {
        self.platform = Arc::new(platform);
        self
    }

    pub fn without_marker(mut self) -> Self {
        self.marker = None;
        self
    }

    pub fn runner(&self) -> ExperimentRunner {
        let marker = self.marker.clone();
        let deps = RunnerDeps {
            platform: self.platform.clone(),
            provider: self.provider.clone(),
            rollback: self.rollback.clone(),
            clock: self.clock.clone(),
            blast_radius: Box::new(EnvironmentMarkerPolicy::with_lookup(
                &self.config.safety,
                move |_| marker.clone(),
            )),
            events: EventLog::open(JsonlConfig::in_dir(self.event_dir())),
        };
        ExperimentRunner::new(self.config.clone(), deps)
    }

    pub fn run(&self, scenario: &Scenario) -> RunSummary {
        self.runner().run(scenario, &RunOptions::default())
    }

    pub fn event_dir(&self) -> PathBuf {
        self.dir.path().join("events")
    }

    pub fn report_dir(&self) -> PathBuf {
        self.dir.path().join("reports")
    }

    /// Every event written so far, across all month partitions.
    pub fn events(&self) -> Vec<LogEntry> {
        let Ok(entries) = fs::read_dir(self.event_dir()) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
            .collect();
        files.sort();
        files
            .iter()
            .flat_map(|path| {
                fs::read_to_string(path)
                    .expect("read event log")
                    .lines()
                    .map(|line| serde_json::from_str::<LogEntry>(line).expect("event parses"))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn count_events(&self, event: EventType) -> usize {
        self.events().iter().filter(|e| e.event == event).count()
    }
}
