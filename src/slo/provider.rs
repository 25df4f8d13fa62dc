//! Measurement providers: where windowed SLO metrics come from.

#![allow(missing_docs)]

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::config::{MeasurementConfig, MeasurementSource};
use crate::core::errors::{ChaosError, Result};
use crate::platform::pal::run_with_timeout;
use crate::slo::measurement::WindowMetrics;

/// Supplies p95 latency, error rate and availability for a service over a
/// trailing window of `window_minutes`.
pub trait MeasurementProvider: Send + Sync {
    fn query(&self, service: &str, window_minutes: u64) -> Result<WindowMetrics>;

    /// Short label for logs.
    fn name(&self) -> &'static str;
}

/// Build the provider selected by configuration.
#[must_use]
pub fn from_config(config: &MeasurementConfig) -> Arc<dyn MeasurementProvider> {
    match config.source {
        MeasurementSource::Unconfigured => Arc::new(UnconfiguredProvider),
        MeasurementSource::Command => Arc::new(CommandProvider::new(
            config.command.clone(),
            Duration::from_secs(config.timeout_secs),
        )),
        MeasurementSource::SnapshotFile => {
            Arc::new(SnapshotFileProvider::new(config.snapshot_file.clone()))
        }
    }
}

/// Runs an external query command and parses JSON metrics from its stdout.
///
/// Arguments may contain `{service}` and `{window_minutes}` placeholders.
#[derive(Debug, Clone)]
pub struct CommandProvider {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandProvider {
    #[must_use]
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self { argv, timeout }
    }

    fn render(&self, service: &str, window_minutes: u64) -> Vec<String> {
        let window = window_minutes.to_string();
        self.argv
            .iter()
            .map(|arg| {
                arg.replace("{service}", service)
                    .replace("{window_minutes}", &window)
            })
            .collect()
    }
}

impl MeasurementProvider for CommandProvider {
    fn query(&self, service: &str, window_minutes: u64) -> Result<WindowMetrics> {
        let fail = |details: String| ChaosError::Measurement {
            service: service.to_string(),
            details,
        };
        let argv = self.render(service, window_minutes);
        let output = run_with_timeout(&argv, self.timeout).map_err(|e| fail(e.to_string()))?;
        if !output.status.success() {
            return Err(fail(format!(
                "query command exited with {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let metrics: WindowMetrics = serde_json::from_slice(&output.stdout)
            .map_err(|e| fail(format!("query output is not valid metrics JSON: {e}")))?;
        metrics.check().map_err(fail)?;
        Ok(metrics)
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

/// Reads a JSON object keyed by service name, re-read on every query so an
/// external exporter can keep it fresh.
#[derive(Debug, Clone)]
pub struct SnapshotFileProvider {
    path: PathBuf,
}

impl SnapshotFileProvider {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MeasurementProvider for SnapshotFileProvider {
    fn query(&self, service: &str, _window_minutes: u64) -> Result<WindowMetrics> {
        let raw = fs::read_to_string(&self.path).map_err(|source| ChaosError::io(&self.path, source))?;
        let snapshot: HashMap<String, WindowMetrics> = serde_json::from_str(&raw)?;
        let metrics = snapshot
            .get(service)
            .copied()
            .ok_or_else(|| ChaosError::Measurement {
                service: service.to_string(),
                details: format!("no entry in snapshot {}", self.path.display()),
            })?;
        metrics.check().map_err(|details| ChaosError::Measurement {
            service: service.to_string(),
            details,
        })?;
        Ok(metrics)
    }

    fn name(&self) -> &'static str {
        "snapshot_file"
    }
}

/// No metrics source configured: every query fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredProvider;

impl MeasurementProvider for UnconfiguredProvider {
    fn query(&self, service: &str, _window_minutes: u64) -> Result<WindowMetrics> {
        Err(ChaosError::Measurement {
            service: service.to_string(),
            details: "no measurement source configured".to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "unconfigured"
    }
}

/// Deterministic provider for tests: replays a script of readings, then
/// repeats the fallback. `None` entries are failed queries.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Option<WindowMetrics>>>,
    fallback: Option<WindowMetrics>,
    queries: Mutex<Vec<(String, u64)>>,
}

impl ScriptedProvider {
    /// Every query returns `metrics`.
    #[must_use]
    pub fn constant(metrics: WindowMetrics) -> Self {
        Self {
            fallback: Some(metrics),
            ..Self::default()
        }
    }

    /// Replay `script`, then keep returning `fallback`.
    #[must_use]
    pub fn sequence(
        script: impl IntoIterator<Item = Option<WindowMetrics>>,
        fallback: Option<WindowMetrics>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Every query fails.
    #[must_use]
    pub fn failing() -> Self {
        Self::default()
    }

    /// `(service, window_minutes)` of every query, in order.
    #[must_use]
    pub fn queries(&self) -> Vec<(String, u64)> {
        self.queries.lock().clone()
    }
}

impl MeasurementProvider for ScriptedProvider {
    fn query(&self, service: &str, window_minutes: u64) -> Result<WindowMetrics> {
        self.queries
            .lock()
            .push((service.to_string(), window_minutes));
        let next = self.script.lock().pop_front().unwrap_or(self.fallback);
        next.ok_or_else(|| ChaosError::Measurement {
            service: service.to_string(),
            details: "scripted failure".to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
