//! Windowed SLO measurement values and threshold evaluation.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::scenario::SloThresholds;

/// Raw metrics a provider returns for one service over one window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub p95_ms: f64,
    pub error_rate: f64,
    pub availability: f64,
    #[serde(default)]
    pub sample_size: u64,
}

impl WindowMetrics {
    /// Reject values no real measurement can produce.
    pub fn check(&self) -> std::result::Result<(), String> {
        if !(self.p95_ms.is_finite() && self.p95_ms >= 0.0) {
            return Err(format!("p95_ms must be a non-negative number, got {}", self.p95_ms));
        }
        for (name, value) in [("error_rate", self.error_rate), ("availability", self.availability)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{name} must be in [0,1], got {value}"));
            }
        }
        Ok(())
    }
}

/// One immutable measurement of a service over a trailing window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SloMeasurement {
    pub service: String,
    pub window_minutes: u64,
    pub p95_ms: f64,
    pub error_rate: f64,
    pub availability: f64,
    pub timestamp: DateTime<Utc>,
    pub sample_size: u64,
    /// True when this is the worst-case stand-in for a failed query.
    pub degraded: bool,
}

impl SloMeasurement {
    #[must_use]
    pub fn from_metrics(
        service: &str,
        window_minutes: u64,
        metrics: WindowMetrics,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            service: service.to_string(),
            window_minutes,
            p95_ms: metrics.p95_ms,
            error_rate: metrics.error_rate,
            availability: metrics.availability,
            timestamp,
            sample_size: metrics.sample_size,
            degraded: false,
        }
    }

    /// Measurement that fails every threshold.
    #[must_use]
    pub fn worst_case(service: &str, window_minutes: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            service: service.to_string(),
            window_minutes,
            p95_ms: f64::MAX,
            error_rate: 1.0,
            availability: 0.0,
            timestamp,
            sample_size: 0,
            degraded: true,
        }
    }
}

/// Per-threshold outcome of comparing a measurement to its SLO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SloCheck {
    pub latency_ok: bool,
    pub error_rate_ok: bool,
    pub availability_ok: bool,
}

impl SloCheck {
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.latency_ok && self.error_rate_ok && self.availability_ok
    }

    /// Names of the thresholds that were violated.
    #[must_use]
    pub fn violations(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if !self.latency_ok {
            out.push("p95_ms");
        }
        if !self.error_rate_ok {
            out.push("error_rate");
        }
        if !self.availability_ok {
            out.push("availability");
        }
        out
    }
}

/// Compare each metric to its threshold. NaN compares false and so fails.
#[must_use]
pub fn evaluate(measurement: &SloMeasurement, thresholds: &SloThresholds) -> SloCheck {
    SloCheck {
        latency_ok: measurement.p95_ms <= thresholds.p95_ms,
        error_rate_ok: measurement.error_rate <= thresholds.error_rate,
        availability_ok: measurement.availability >= thresholds.availability,
    }
}

/// All three thresholds hold.
#[must_use]
pub fn slo_ok(measurement: &SloMeasurement, thresholds: &SloThresholds) -> bool {
    evaluate(measurement, thresholds).passed()
}
