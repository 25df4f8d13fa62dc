//! Scenario model: the immutable definition of one chaos experiment.
//!
//! Scenarios are loaded from TOML or JSON (chosen by file extension), validated
//! once, and then only read for the lifetime of an experiment.

#![allow(missing_docs)]

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::errors::{ChaosError, Result};

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._@:-]{0,127}$").expect("identifier regex compiles")
});

/// Fault family selecting the injector variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    NetworkLatency,
    ServiceKill,
    CpuSpike,
}

impl FaultKind {
    /// Infer the fault family from a scenario name such as `checkout-network-latency`.
    #[must_use]
    pub fn infer_from_name(name: &str) -> Option<Self> {
        let normalized = name.to_ascii_lowercase().replace('-', "_");
        if normalized.contains("latency") || normalized.contains("network") {
            Some(Self::NetworkLatency)
        } else if normalized.contains("kill") {
            Some(Self::ServiceKill)
        } else if normalized.contains("cpu") {
            Some(Self::CpuSpike)
        } else {
            None
        }
    }

    /// Stable snake_case label used in logs and reports.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::NetworkLatency => "network_latency",
            Self::ServiceKill => "service_kill",
            Self::CpuSpike => "cpu_spike",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// SLO thresholds a scenario's service must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SloThresholds {
    /// p95 latency ceiling in milliseconds.
    pub p95_ms: f64,
    /// Error-rate ceiling as a fraction.
    pub error_rate: f64,
    /// Availability floor as a fraction.
    pub availability: f64,
}

/// Declared blast radius for the experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyRequirements {
    /// Environment the experiment is confined to, e.g. `"staging"`.
    pub blast_radius: String,
}

/// One service under fault, with variant-specific parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub service: String,
    pub duration_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_on_stop: Option<bool>,
}

impl Target {
    /// Minimal target for `service` lasting `duration_secs`.
    #[must_use]
    pub fn new(service: impl Into<String>, duration_secs: u64) -> Self {
        Self {
            service: service.into(),
            duration_secs,
            latency_ms: None,
            jitter_ms: None,
            interface: None,
            cpu_percent: None,
            workers: None,
            restart_on_stop: None,
        }
    }
}

/// Immutable experiment definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<FaultKind>,
    pub targets: Vec<Target>,
    pub safety: SafetyRequirements,
    pub slo: SloThresholds,
}

impl Scenario {
    /// Load and validate a scenario file (`.toml` or `.json`).
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| ChaosError::io(path, source))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let scenario: Self = match ext.as_deref() {
            Some("toml") => toml::from_str(&raw)?,
            Some("json") => serde_json::from_str(&raw)?,
            _ => {
                return Err(ChaosError::UnsupportedScenarioFormat {
                    path: path.to_path_buf(),
                });
            }
        };
        scenario.validate()?;
        Ok(scenario)
    }

    /// Parse a TOML scenario from memory.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let scenario: Self = toml::from_str(raw)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Resolve the injector variant: explicit `fault`, else inferred from `name`.
    pub fn fault_kind(&self) -> Result<FaultKind> {
        self.fault
            .or_else(|| FaultKind::infer_from_name(&self.name))
            .ok_or_else(|| self.invalid("cannot determine fault kind from name; set `fault`"))
    }

    /// The target the experiment acts on (the first one).
    pub fn primary_target(&self) -> Result<&Target> {
        self.targets
            .first()
            .ok_or_else(|| self.invalid("at least one target is required"))
    }

    /// SHA-256 of the canonical JSON form, recorded in results.
    pub fn digest(&self) -> Result<String> {
        let canonical = serde_json::to_vec(self)?;
        Ok(format!("{:x}", Sha256::digest(&canonical)))
    }

    /// Check structural and per-variant constraints.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(self.invalid("name must not be empty"));
        }
        let kind = self.fault_kind()?;
        let target = self.primary_target()?;
        for t in &self.targets {
            if !IDENTIFIER.is_match(&t.service) {
                return Err(self.invalid(&format!("invalid service identifier {:?}", t.service)));
            }
        }
        if target.duration_secs == 0 {
            return Err(self.invalid("target duration_secs must be > 0"));
        }
        if self.safety.blast_radius.trim().is_empty() {
            return Err(self.invalid("safety.blast_radius must not be empty"));
        }
        self.validate_thresholds()?;

        match kind {
            FaultKind::NetworkLatency => {
                match target.latency_ms {
                    Some(ms) if ms > 0 => {}
                    _ => return Err(self.invalid("network latency requires latency_ms > 0")),
                }
                let iface = target.interface.as_deref().unwrap_or("eth0");
                if !IDENTIFIER.is_match(iface) {
                    return Err(self.invalid(&format!("invalid interface name {iface:?}")));
                }
            }
            FaultKind::CpuSpike => {
                match target.cpu_percent {
                    Some(pct) if (1..=100).contains(&pct) => {}
                    _ => return Err(self.invalid("cpu spike requires cpu_percent in 1..=100")),
                }
                match target.workers {
                    Some(0) => return Err(self.invalid("cpu spike workers must be >= 1")),
                    Some(n) if n > max_cpu_workers() => {
                        return Err(self.invalid(&format!(
                            "cpu spike workers must be <= {} (available cores), got {n}",
                            max_cpu_workers()
                        )));
                    }
                    _ => {}
                }
            }
            FaultKind::ServiceKill => {}
        }
        Ok(())
    }

    fn validate_thresholds(&self) -> Result<()> {
        let slo = &self.slo;
        if !(slo.p95_ms.is_finite() && slo.p95_ms > 0.0) {
            return Err(self.invalid("slo.p95_ms must be a positive number"));
        }
        for (name, val) in [
            ("error_rate", slo.error_rate),
            ("availability", slo.availability),
        ] {
            if !(0.0..=1.0).contains(&val) {
                return Err(self.invalid(&format!("slo.{name} must be in [0,1], got {val}")));
            }
        }
        Ok(())
    }

    fn invalid(&self, details: &str) -> ChaosError {
        ChaosError::InvalidScenario {
            name: self.name.clone(),
            details: details.to_string(),
        }
    }
}

/// Upper bound on cpu spike workers: one per core the host reports.
#[must_use]
pub fn max_cpu_workers() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LATENCY_TOML: &str = r#"
        name = "checkout-network-latency"

        [[targets]]
        service = "checkout"
        duration_secs = 300
        latency_ms = 200
        jitter_ms = 50
        interface = "eth0"

        [safety]
        blast_radius = "staging"

        [slo]
        p95_ms = 400.0
        error_rate = 0.01
        availability = 0.99
    "#;

    #[test]
    fn parses_toml_and_infers_fault() {
        let scenario = Scenario::from_toml_str(LATENCY_TOML).expect("valid scenario");
        assert_eq!(scenario.fault_kind().unwrap(), FaultKind::NetworkLatency);
        assert_eq!(scenario.primary_target().unwrap().latency_ms, Some(200));
        assert!((scenario.slo.availability - 0.99).abs() < f64::EPSILON);
    }

    #[test]
    fn explicit_fault_wins_over_name() {
        let raw = LATENCY_TOML.replace(
            "name = \"checkout-network-latency\"",
            "name = \"friday\"\nfault = \"service_kill\"",
        );
        let scenario = Scenario::from_toml_str(&raw).expect("valid scenario");
        assert_eq!(scenario.fault_kind().unwrap(), FaultKind::ServiceKill);
    }

    #[test]
    fn infer_from_name_variants() {
        assert_eq!(
            FaultKind::infer_from_name("Network_Latency"),
            Some(FaultKind::NetworkLatency)
        );
        assert_eq!(
            FaultKind::infer_from_name("payments-kill"),
            Some(FaultKind::ServiceKill)
        );
        assert_eq!(FaultKind::infer_from_name("cpu-spike"), Some(FaultKind::CpuSpike));
        assert_eq!(FaultKind::infer_from_name("mystery"), None);
    }

    #[test]
    fn unknown_fault_rejected() {
        let raw = LATENCY_TOML.replace("checkout-network-latency", "mystery");
        let err = Scenario::from_toml_str(&raw).expect_err("no fault kind");
        assert!(err.to_string().contains("fault kind"));
    }

    #[test]
    fn missing_latency_rejected() {
        let raw = LATENCY_TOML.replace("latency_ms = 200", "");
        let err = Scenario::from_toml_str(&raw).expect_err("latency required");
        assert!(err.to_string().contains("latency_ms"));
    }

    #[test]
    fn hostile_service_identifier_rejected() {
        let raw = LATENCY_TOML.replace("service = \"checkout\"", "service = \"x; rm -rf /\"");
        let err = Scenario::from_toml_str(&raw).expect_err("bad identifier");
        assert!(err.to_string().contains("service identifier"));
    }

    #[test]
    fn thresholds_out_of_range_rejected() {
        let raw = LATENCY_TOML.replace("availability = 0.99", "availability = 1.5");
        let err = Scenario::from_toml_str(&raw).expect_err("bad availability");
        assert!(err.to_string().contains("availability"));
    }

    #[test]
    fn cpu_spike_requires_percent() {
        let raw = r#"
            name = "cpu-spike"
            targets = [{ service = "api", duration_secs = 60 }]
            safety = { blast_radius = "staging" }
            slo = { p95_ms = 300.0, error_rate = 0.02, availability = 0.995 }
        "#;
        let err = Scenario::from_toml_str(raw).expect_err("cpu_percent required");
        assert!(err.to_string().contains("cpu_percent"));
    }

    #[test]
    fn cpu_spike_workers_capped_at_core_count() {
        let raw = r#"
            name = "cpu-spike"
            targets = [{ service = "api", duration_secs = 60, cpu_percent = 50, workers = 100000 }]
            safety = { blast_radius = "staging" }
            slo = { p95_ms = 300.0, error_rate = 0.02, availability = 0.995 }
        "#;
        let err = Scenario::from_toml_str(raw).expect_err("too many workers");
        assert!(err.to_string().contains("workers must be <="), "{err}");

        let at_cap = raw.replace("100000", &max_cpu_workers().to_string());
        Scenario::from_toml_str(&at_cap).expect("one worker per core is allowed");
    }

    #[test]
    fn load_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("latency.toml");
        fs::write(&toml_path, LATENCY_TOML).unwrap();
        let from_toml = Scenario::load(&toml_path).expect("toml loads");

        let json_path = dir.path().join("latency.json");
        fs::write(&json_path, serde_json::to_string(&from_toml).unwrap()).unwrap();
        let from_json = Scenario::load(&json_path).expect("json loads");
        assert_eq!(from_toml, from_json);

        let yaml_path = dir.path().join("latency.yaml");
        fs::write(&yaml_path, "name: x").unwrap();
        assert!(matches!(
            Scenario::load(&yaml_path),
            Err(ChaosError::UnsupportedScenarioFormat { .. })
        ));
    }

    #[test]
    fn digest_is_stable_and_sensitive() {
        let scenario = Scenario::from_toml_str(LATENCY_TOML).unwrap();
        let d1 = scenario.digest().unwrap();
        assert_eq!(d1.len(), 64);
        assert_eq!(d1, scenario.digest().unwrap());

        let mut changed = scenario;
        changed.slo.p95_ms = 500.0;
        assert_ne!(d1, changed.digest().unwrap());
    }
}
