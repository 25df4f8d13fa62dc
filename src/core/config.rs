//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{ChaosError, Result};

/// Full chaos_verdict configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub runner: RunnerConfig,
    pub auto_heal: AutoHealConfig,
    pub safety: SafetyConfig,
    pub measurement: MeasurementConfig,
    pub rollback: RollbackConfig,
    pub paths: PathsConfig,
}

/// Timing of the experiment state machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Interval between safety-guard / auto-heal polls during the fault window.
    pub poll_interval_secs: u64,
    /// Delay between injector stop and the final measurement.
    pub stabilization_secs: u64,
    /// Trailing window for the pre-injection baseline measurement.
    pub baseline_window_minutes: u64,
    /// Trailing window for the live measurements fed to auto-heal.
    pub monitor_window_minutes: u64,
    /// Trailing window for the final verdict measurement.
    pub final_window_minutes: u64,
}

/// Auto-heal trip multipliers and rollback budget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AutoHealConfig {
    pub enabled: bool,
    /// Trip when live p95 exceeds this multiple of the p95 threshold.
    pub latency_multiplier: f64,
    /// Trip when live error rate exceeds this multiple of the error-rate threshold.
    pub error_rate_multiplier: f64,
    /// Maximum rollbacks executed within one experiment.
    pub max_rollbacks: u32,
}

/// Static preconditions and live safety ceilings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SafetyConfig {
    /// When false, the blast-radius check is replaced by a permissive policy.
    pub enforce_blast_radius: bool,
    /// Environment variable carrying the host's environment marker.
    pub environment_var: String,
    /// Environments in which experiments may run at all.
    pub allowed_environments: Vec<String>,
    /// Absolute CPU load ceiling (percent) enforced by CPU-based injectors.
    pub cpu_load_ceiling_pct: f64,
    /// Trailing window used for the error-budget precondition.
    pub error_budget_window_minutes: u64,
    /// Minimum fraction of error budget that must remain before injecting.
    pub min_error_budget_remaining: f64,
}

/// Where SLO measurements come from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementSource {
    /// No backend configured: every query degrades to the worst case.
    #[default]
    Unconfigured,
    /// Run `measurement.command` and parse JSON from stdout.
    Command,
    /// Read `measurement.snapshot_file`, a JSON object keyed by service.
    SnapshotFile,
}

/// Measurement provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MeasurementConfig {
    pub source: MeasurementSource,
    /// Program + args; `{service}` and `{window_minutes}` are substituted.
    pub command: Vec<String>,
    pub snapshot_file: PathBuf,
    pub timeout_secs: u64,
}

/// Rollback capability settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RollbackConfig {
    /// Program + args; `{service}` is substituted. Empty means unavailable.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

/// Filesystem paths used by chv.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub event_log_dir: PathBuf,
    pub event_log_fallback_dir: Option<PathBuf>,
    pub report_dir: PathBuf,
    pub state_file: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            stabilization_secs: 30,
            baseline_window_minutes: 5,
            monitor_window_minutes: 1,
            final_window_minutes: 5,
        }
    }
}

impl Default for AutoHealConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            latency_multiplier: 2.0,
            error_rate_multiplier: 5.0,
            max_rollbacks: 1,
        }
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            enforce_blast_radius: true,
            environment_var: "CHV_ENVIRONMENT".to_string(),
            allowed_environments: vec!["staging".to_string(), "preprod".to_string()],
            cpu_load_ceiling_pct: 90.0,
            error_budget_window_minutes: 60,
            min_error_budget_remaining: 0.1,
        }
    }
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            source: MeasurementSource::Unconfigured,
            command: Vec::new(),
            snapshot_file: data_dir().join("measurements.json"),
            timeout_secs: 30,
        }
    }
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 600,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let cfg = home_dir().join(".config").join("chv").join("config.toml");
        let data = data_dir();
        Self {
            config_file: cfg,
            event_log_dir: data.join("events"),
            event_log_fallback_dir: Some(env::temp_dir().join("chv-events")),
            report_dir: data.join("reports"),
            state_file: data.join("state.json"),
        }
    }
}

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[CHV-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

fn data_dir() -> PathBuf {
    home_dir().join(".local").join("share").join("chv")
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| ChaosError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(ChaosError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Apply `CHV_*` overrides using `lookup` to resolve variable names.
    pub(crate) fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        // runner
        set_u64(&lookup, "CHV_RUNNER_POLL_INTERVAL_SECS", &mut self.runner.poll_interval_secs)?;
        set_u64(&lookup, "CHV_RUNNER_STABILIZATION_SECS", &mut self.runner.stabilization_secs)?;
        set_u64(
            &lookup,
            "CHV_RUNNER_FINAL_WINDOW_MINUTES",
            &mut self.runner.final_window_minutes,
        )?;

        // auto_heal
        set_bool(&lookup, "CHV_AUTO_HEAL_ENABLED", &mut self.auto_heal.enabled)?;
        set_f64(
            &lookup,
            "CHV_AUTO_HEAL_LATENCY_MULTIPLIER",
            &mut self.auto_heal.latency_multiplier,
        )?;
        set_f64(
            &lookup,
            "CHV_AUTO_HEAL_ERROR_RATE_MULTIPLIER",
            &mut self.auto_heal.error_rate_multiplier,
        )?;

        // safety
        set_bool(
            &lookup,
            "CHV_SAFETY_ENFORCE_BLAST_RADIUS",
            &mut self.safety.enforce_blast_radius,
        )?;
        set_f64(
            &lookup,
            "CHV_SAFETY_CPU_LOAD_CEILING_PCT",
            &mut self.safety.cpu_load_ceiling_pct,
        )?;
        set_f64(
            &lookup,
            "CHV_SAFETY_MIN_ERROR_BUDGET_REMAINING",
            &mut self.safety.min_error_budget_remaining,
        )?;

        // paths
        if let Some(raw) = lookup("CHV_EVENT_LOG_DIR") {
            self.paths.event_log_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("CHV_REPORT_DIR") {
            self.paths.report_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("CHV_STATE_FILE") {
            self.paths.state_file = PathBuf::from(raw);
        }
        Ok(())
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.runner.poll_interval_secs == 0 {
            return Err(ChaosError::InvalidConfig {
                details: "runner.poll_interval_secs must be >= 1".to_string(),
            });
        }
        for (name, val) in [
            ("baseline_window_minutes", self.runner.baseline_window_minutes),
            ("monitor_window_minutes", self.runner.monitor_window_minutes),
            ("final_window_minutes", self.runner.final_window_minutes),
        ] {
            if val == 0 {
                return Err(ChaosError::InvalidConfig {
                    details: format!("runner.{name} must be >= 1"),
                });
            }
        }

        for (name, val) in [
            ("latency_multiplier", self.auto_heal.latency_multiplier),
            ("error_rate_multiplier", self.auto_heal.error_rate_multiplier),
        ] {
            if !val.is_finite() || val < 1.0 {
                return Err(ChaosError::InvalidConfig {
                    details: format!("auto_heal.{name} must be a finite value >= 1.0, got {val}"),
                });
            }
        }

        // Switching auto-heal off is `enabled = false`; a zero budget would trip silently.
        if self.auto_heal.max_rollbacks == 0 {
            return Err(ChaosError::InvalidConfig {
                details: "auto_heal.max_rollbacks must be >= 1 (use auto_heal.enabled = false to disable)"
                    .to_string(),
            });
        }

        if !(0.0..=100.0).contains(&self.safety.cpu_load_ceiling_pct) {
            return Err(ChaosError::InvalidConfig {
                details: format!(
                    "safety.cpu_load_ceiling_pct must be in [0, 100], got {}",
                    self.safety.cpu_load_ceiling_pct
                ),
            });
        }
        validate_prob(
            "safety.min_error_budget_remaining",
            self.safety.min_error_budget_remaining,
        )?;
        if self.safety.enforce_blast_radius {
            if self.safety.environment_var.trim().is_empty() {
                return Err(ChaosError::InvalidConfig {
                    details: "safety.environment_var must be set when enforcing blast radius"
                        .to_string(),
                });
            }
            if self.safety.allowed_environments.is_empty() {
                return Err(ChaosError::InvalidConfig {
                    details: "safety.allowed_environments must not be empty".to_string(),
                });
            }
        }

        if self.measurement.source == MeasurementSource::Command
            && self.measurement.command.is_empty()
        {
            return Err(ChaosError::InvalidConfig {
                details: "measurement.command is required when measurement.source = \"command\""
                    .to_string(),
            });
        }
        if self.measurement.timeout_secs == 0 || self.rollback.timeout_secs == 0 {
            return Err(ChaosError::InvalidConfig {
                details: "measurement.timeout_secs and rollback.timeout_secs must be > 0"
                    .to_string(),
            });
        }

        Ok(())
    }
}

fn validate_prob(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ChaosError::InvalidConfig {
            details: format!("{name} must be in [0,1], got {value}"),
        });
    }
    Ok(())
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| ChaosError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

fn set_f64(lookup: &impl Fn(&str) -> Option<String>, name: &str, slot: &mut f64) -> Result<()> {
    if let Some(raw) = lookup(name) {
        *slot = parse_env(name, &raw)?;
    }
    Ok(())
}

fn set_u64(lookup: &impl Fn(&str) -> Option<String>, name: &str, slot: &mut u64) -> Result<()> {
    if let Some(raw) = lookup(name) {
        *slot = parse_env(name, &raw)?;
    }
    Ok(())
}

fn set_bool(lookup: &impl Fn(&str) -> Option<String>, name: &str, slot: &mut bool) -> Result<()> {
    if let Some(raw) = lookup(name) {
        *slot = parse_env(name, &raw)?;
    }
    Ok(())
}
