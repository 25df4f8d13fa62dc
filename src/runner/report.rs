//! Markdown report: one human-readable artifact per run.

use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::core::errors::{ChaosError, Result};
use crate::core::scenario::SloThresholds;
use crate::runner::result::ExperimentResult;
use crate::slo::measurement::{SloMeasurement, evaluate};

/// `<scenario>-<YYYYMMDDTHHMMSSZ>.md`, keyed by the run's start time.
#[must_use]
pub fn report_file_name(result: &ExperimentResult) -> String {
    let safe: String = result
        .scenario
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("{safe}-{}.md", result.started_at.format("%Y%m%dT%H%M%SZ"))
}

/// Render the report body.
#[must_use]
pub fn render_markdown(result: &ExperimentResult, thresholds: &SloThresholds) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# Chaos experiment: {}\n", result.scenario);
    let _ = writeln!(out, "- **Verdict:** {}", result.verdict);
    let _ = writeln!(out, "- **Outcome:** {}", result.outcome);
    let _ = writeln!(out, "- **Reason:** {}", result.reason);
    let _ = writeln!(out, "- **Fault:** {} on `{}`", result.fault, result.service);
    let _ = writeln!(out, "- **Run id:** `{}`", result.run_id);
    let _ = writeln!(out, "- **Started:** {}", result.started_at.to_rfc3339());
    if let Some(injected) = result.injection_started_at {
        let _ = writeln!(out, "- **Fault injected:** {}", injected.to_rfc3339());
    }
    let _ = writeln!(out, "- **Stopped:** {}", result.stopped_at.to_rfc3339());
    let _ = writeln!(out, "- **Duration:** {}s", result.duration_secs());
    let _ = writeln!(out, "- **Scenario digest:** `{}`", result.scenario_digest);
    let _ = writeln!(out, "- **Safety tripped:** {}", yes_no(result.safety_tripped));
    let _ = writeln!(
        out,
        "- **Rollback triggered:** {}\n",
        yes_no(result.rollback_triggered)
    );

    out.push_str("## SLO measurements\n\n");
    out.push_str("| Metric | Threshold | Before | After |\n");
    out.push_str("|---|---|---|---|\n");
    let before = result.slo_before.as_ref();
    let after = result.slo_after.as_ref();
    let _ = writeln!(
        out,
        "| p95 latency (ms) | <= {:.1} | {} | {} |",
        thresholds.p95_ms,
        cell(before, thresholds, |m| format!("{:.1}", m.p95_ms), |c| c.latency_ok),
        cell(after, thresholds, |m| format!("{:.1}", m.p95_ms), |c| c.latency_ok),
    );
    let _ = writeln!(
        out,
        "| Error rate | <= {} | {} | {} |",
        pct(thresholds.error_rate),
        cell(before, thresholds, |m| pct(m.error_rate), |c| c.error_rate_ok),
        cell(after, thresholds, |m| pct(m.error_rate), |c| c.error_rate_ok),
    );
    let _ = writeln!(
        out,
        "| Availability | >= {} | {} | {} |",
        pct(thresholds.availability),
        cell(before, thresholds, |m| pct(m.availability), |c| c.availability_ok),
        cell(after, thresholds, |m| pct(m.availability), |c| c.availability_ok),
    );
    let _ = writeln!(
        out,
        "| Window / samples | | {} | {} |\n",
        window(before),
        window(after)
    );

    out.push_str("## Remediation actions\n\n");
    if result.actions.is_empty() {
        out.push_str("None.\n\n");
    } else {
        for action in &result.actions {
            let _ = writeln!(out, "- {action}");
        }
        out.push('\n');
    }

    out.push_str("## State trace\n\n");
    let trace: Vec<&str> = result.states.iter().map(|s| s.label()).collect();
    let _ = writeln!(out, "{}", trace.join(" → "));

    out
}

/// Write the report into `dir`. An existing file of the same name is never
/// overwritten; the run id is appended instead.
pub fn write_report(
    dir: &Path,
    result: &ExperimentResult,
    thresholds: &SloThresholds,
) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|source| ChaosError::io(dir, source))?;
    let body = render_markdown(result, thresholds);

    let mut path = dir.join(report_file_name(result));
    if path.exists() {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        path = dir.join(format!("{stem}-{}.md", result.run_id));
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|source| ChaosError::io(&path, source))?;
    file.write_all(body.as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|source| ChaosError::io(&path, source))?;
    Ok(path)
}

fn cell(
    measurement: Option<&SloMeasurement>,
    thresholds: &SloThresholds,
    value: impl Fn(&SloMeasurement) -> String,
    ok: impl Fn(&crate::slo::measurement::SloCheck) -> bool,
) -> String {
    match measurement {
        None => "not measured".to_string(),
        Some(m) if m.degraded => "unavailable ✗".to_string(),
        Some(m) => {
            let mark = if ok(&evaluate(m, thresholds)) { "✓" } else { "✗" };
            format!("{} {mark}", value(m))
        }
    }
}

fn window(measurement: Option<&SloMeasurement>) -> String {
    measurement.map_or_else(
        || "-".to_string(),
        |m| format!("{}m / {}", m.window_minutes, m.sample_size),
    )
}

fn pct(fraction: f64) -> String {
    format!("{:.2}%", fraction * 100.0)
}

const fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}
