//! PAL trait: the host operations fault injectors perform, plus the Linux
//! implementation (`tc netem`, `systemctl`, `/proc/stat`) and an in-memory mock.

#![allow(missing_docs)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{ChaosError, Result};

/// Host operations used by injectors and safety guards.
pub trait Platform: Send + Sync {
    /// Whole-host CPU utilisation in percent (0..=100).
    fn cpu_load_pct(&self) -> Result<f64>;
    /// Install a netem delay on `interface`.
    fn add_latency(&self, interface: &str, latency_ms: u64, jitter_ms: Option<u64>) -> Result<()>;
    /// Remove any netem delay from `interface`. Succeeds when none is installed.
    fn remove_latency(&self, interface: &str) -> Result<()>;
    /// Whether a netem delay is currently installed on `interface`.
    fn latency_active(&self, interface: &str) -> Result<bool>;
    fn stop_service(&self, service: &str) -> Result<()>;
    fn start_service(&self, service: &str) -> Result<()>;
    fn service_active(&self, service: &str) -> Result<bool>;
}

/// Aggregate jiffies from the first `cpu` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuTimes {
    pub busy: u64,
    pub total: u64,
}

impl CpuTimes {
    /// Utilisation between two samples, in percent.
    #[must_use]
    pub fn load_since(&self, earlier: &Self) -> f64 {
        let total = self.total.saturating_sub(earlier.total);
        if total == 0 {
            return 0.0;
        }
        let busy = self.busy.saturating_sub(earlier.busy);
        #[allow(clippy::cast_precision_loss)]
        {
            (busy as f64 * 100.0) / total as f64
        }
    }
}

/// Linux platform implementation.
#[derive(Debug)]
pub struct LinuxPlatform {
    last_cpu_sample: Mutex<Option<CpuTimes>>,
    sample_gap: Duration,
}

impl Default for LinuxPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl LinuxPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_cpu_sample: Mutex::new(None),
            sample_gap: Duration::from_millis(200),
        }
    }

    fn read_cpu_times() -> Result<CpuTimes> {
        let raw = fs::read_to_string("/proc/stat").map_err(|source| ChaosError::Io {
            path: PathBuf::from("/proc/stat"),
            source,
        })?;
        parse_proc_stat(&raw)
    }

    fn tc(args: &[&str]) -> Result<Output> {
        run_command("tc", args)
    }

    fn systemctl(args: &[&str]) -> Result<Output> {
        run_command("systemctl", args)
    }
}

impl Platform for LinuxPlatform {
    fn cpu_load_pct(&self) -> Result<f64> {
        let previous = *self.last_cpu_sample.lock();
        let earlier = match previous {
            Some(sample) => sample,
            None => {
                let first = Self::read_cpu_times()?;
                thread::sleep(self.sample_gap);
                first
            }
        };
        let now = Self::read_cpu_times()?;
        *self.last_cpu_sample.lock() = Some(now);
        Ok(now.load_since(&earlier))
    }

    fn add_latency(&self, interface: &str, latency_ms: u64, jitter_ms: Option<u64>) -> Result<()> {
        let delay = format!("{latency_ms}ms");
        let jitter = jitter_ms.map(|j| format!("{j}ms"));
        let mut args = vec!["qdisc", "add", "dev", interface, "root", "netem", "delay", &delay];
        if let Some(jitter) = jitter.as_deref() {
            args.push(jitter);
        }
        expect_success("tc", &args, Self::tc(&args)?)
    }

    fn remove_latency(&self, interface: &str) -> Result<()> {
        let args = ["qdisc", "del", "dev", interface, "root"];
        let output = Self::tc(&args)?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_missing_qdisc(&stderr) {
            return Ok(());
        }
        expect_success("tc", &args, output)
    }

    fn latency_active(&self, interface: &str) -> Result<bool> {
        let args = ["qdisc", "show", "dev", interface];
        let output = Self::tc(&args)?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        expect_success("tc", &args, output)?;
        Ok(stdout.contains("netem"))
    }

    fn stop_service(&self, service: &str) -> Result<()> {
        let args = ["stop", service];
        expect_success("systemctl", &args, Self::systemctl(&args)?)
    }

    fn start_service(&self, service: &str) -> Result<()> {
        let args = ["start", service];
        expect_success("systemctl", &args, Self::systemctl(&args)?)
    }

    fn service_active(&self, service: &str) -> Result<bool> {
        // `is-active` exits non-zero for inactive units; that is an answer, not a failure.
        let output = Self::systemctl(&["is-active", "--quiet", service])?;
        Ok(output.status.success())
    }
}

/// Detect active platform implementation.
pub fn detect_platform() -> Result<Arc<dyn Platform>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Arc::new(LinuxPlatform::new()))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(ChaosError::Runtime {
            details: "fault injection is only implemented for Linux".to_string(),
        })
    }
}

fn run_command(program: &str, args: &[&str]) -> Result<Output> {
    Command::new(program)
        .args(args)
        .output()
        .map_err(|error| ChaosError::PlatformCommand {
            program: program.to_string(),
            details: error.to_string(),
        })
}

/// Run `argv` to completion, killing it after `timeout`.
pub fn run_with_timeout(argv: &[String], timeout: Duration) -> Result<Output> {
    let (program, args) = argv.split_first().ok_or_else(|| ChaosError::InvalidConfig {
        details: "empty command line".to_string(),
    })?;
    let command_error = |details: String| ChaosError::PlatformCommand {
        program: program.clone(),
        details,
    };

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|error| command_error(error.to_string()))?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(command_error(format!(
                    "timed out after {}s",
                    timeout.as_secs()
                )));
            }
            Ok(None) => thread::sleep(Duration::from_millis(25)),
            Err(error) => return Err(command_error(error.to_string())),
        }
    };

    let collect = |handle: Option<thread::JoinHandle<Vec<u8>>>| {
        handle.and_then(|h| h.join().ok()).unwrap_or_default()
    };
    Ok(Output {
        status,
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

fn drain(mut pipe: impl Read + Send + 'static) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn expect_success(program: &str, args: &[&str], output: Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    Err(ChaosError::PlatformCommand {
        program: program.to_string(),
        details: format!(
            "{} {} failed (exit {}): {}",
            program,
            args.join(" "),
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        ),
    })
}

fn is_missing_qdisc(stderr: &str) -> bool {
    stderr.contains("No such file or directory")
        || stderr.contains("handle of zero")
        || stderr.contains("Invalid handle")
}

fn parse_proc_stat(raw: &str) -> Result<CpuTimes> {
    let line = raw
        .lines()
        .find(|line| line.starts_with("cpu "))
        .ok_or_else(|| ChaosError::Runtime {
            details: "/proc/stat has no aggregate cpu line".to_string(),
        })?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .map_err(|error| ChaosError::Runtime {
            details: format!("/proc/stat cpu line unparsable: {error}"),
        })?;
    if fields.len() < 4 {
        return Err(ChaosError::Runtime {
            details: format!("/proc/stat cpu line has {} fields", fields.len()),
        });
    }
    // user nice system idle iowait irq softirq steal [guest guest_nice]
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    let total: u64 = fields.iter().take(8).sum();
    Ok(CpuTimes {
        busy: total.saturating_sub(idle),
        total,
    })
}

// ──────────────────────── mock ────────────────────────

#[derive(Debug, Default)]
struct MockState {
    cpu_loads: VecDeque<f64>,
    default_cpu_load: f64,
    cpu_probe_fails: bool,
    latency: HashMap<String, (u64, Option<u64>)>,
    stopped: HashSet<String>,
    refuse_faults: bool,
    ignore_faults: bool,
    calls: Vec<String>,
}

/// In-memory mock implementation for deterministic tests.
///
/// Services are active unless stopped through the mock. CPU load readings are
/// served from a script, then fall back to a fixed value.
#[derive(Debug, Default)]
pub struct MockPlatform {
    state: Mutex<MockState>,
}

impl MockPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve these CPU readings first, in order.
    #[must_use]
    pub fn with_cpu_loads(self, loads: impl IntoIterator<Item = f64>) -> Self {
        self.state.lock().cpu_loads.extend(loads);
        self
    }

    /// Reading returned once the script is exhausted.
    pub fn set_cpu_load(&self, pct: f64) {
        self.state.lock().default_cpu_load = pct;
    }

    /// Make every CPU probe fail.
    pub fn fail_cpu_probe(&self) {
        self.state.lock().cpu_probe_fails = true;
    }

    /// Make `add_latency` and `stop_service` return errors.
    pub fn refuse_faults(&self) {
        self.state.lock().refuse_faults = true;
    }

    /// Accept fault commands without applying them, so verification fails.
    pub fn ignore_faults(&self) {
        self.state.lock().ignore_faults = true;
    }

    /// Every mutating call in order, e.g. `"add_latency eth0"`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Number of recorded calls whose name starts with `op`.
    #[must_use]
    pub fn count(&self, op: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.split_whitespace().next() == Some(op))
            .count()
    }

    #[must_use]
    pub fn latency_installed(&self, interface: &str) -> bool {
        self.state.lock().latency.contains_key(interface)
    }

    #[must_use]
    pub fn service_running(&self, service: &str) -> bool {
        !self.state.lock().stopped.contains(service)
    }

    fn refused(op: &str, target: &str) -> ChaosError {
        ChaosError::PlatformCommand {
            program: "mock".to_string(),
            details: format!("{op} {target} refused"),
        }
    }
}

impl Platform for MockPlatform {
    fn cpu_load_pct(&self) -> Result<f64> {
        let mut state = self.state.lock();
        if state.cpu_probe_fails {
            return Err(ChaosError::Runtime {
                details: "mock cpu probe unavailable".to_string(),
            });
        }
        let default = state.default_cpu_load;
        Ok(state.cpu_loads.pop_front().unwrap_or(default))
    }

    fn add_latency(&self, interface: &str, latency_ms: u64, jitter_ms: Option<u64>) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("add_latency {interface}"));
        if state.refuse_faults {
            return Err(Self::refused("add_latency", interface));
        }
        if !state.ignore_faults {
            state
                .latency
                .insert(interface.to_string(), (latency_ms, jitter_ms));
        }
        Ok(())
    }

    fn remove_latency(&self, interface: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("remove_latency {interface}"));
        state.latency.remove(interface);
        Ok(())
    }

    fn latency_active(&self, interface: &str) -> Result<bool> {
        Ok(self.state.lock().latency.contains_key(interface))
    }

    fn stop_service(&self, service: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("stop_service {service}"));
        if state.refuse_faults {
            return Err(Self::refused("stop_service", service));
        }
        if !state.ignore_faults {
            state.stopped.insert(service.to_string());
        }
        Ok(())
    }

    fn start_service(&self, service: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("start_service {service}"));
        state.stopped.remove(service);
        Ok(())
    }

    fn service_active(&self, service: &str) -> Result<bool> {
        Ok(!self.state.lock().stopped.contains(service))
    }
}
