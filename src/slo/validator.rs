//! SLO validator: fetches windowed measurements and never lets a provider
//! failure read as healthy.

use std::sync::Arc;

use crate::core::clock::Clock;
use crate::core::scenario::SloThresholds;
use crate::logger::context::EventContext;
use crate::logger::jsonl::{EventType, Severity};
use crate::slo::measurement::{self, SloCheck, SloMeasurement};
use crate::slo::provider::MeasurementProvider;

/// Wraps a [`MeasurementProvider`] with worst-case substitution and logging.
pub struct SloValidator {
    provider: Arc<dyn MeasurementProvider>,
    clock: Arc<dyn Clock>,
    events: EventContext,
}

impl SloValidator {
    pub fn new(
        provider: Arc<dyn MeasurementProvider>,
        clock: Arc<dyn Clock>,
        events: EventContext,
    ) -> Self {
        Self {
            provider,
            clock,
            events,
        }
    }

    /// Measure `service` over the trailing `window_minutes`.
    ///
    /// A failed query yields [`SloMeasurement::worst_case`], which fails every
    /// threshold, and a `measurement_degraded` event.
    pub fn fetch_slo_window(&self, service: &str, window_minutes: u64) -> SloMeasurement {
        let now = self.clock.now();
        match self.provider.query(service, window_minutes) {
            Ok(metrics) => {
                let measured = SloMeasurement::from_metrics(service, window_minutes, metrics, now);
                let entry = self
                    .events
                    .entry(EventType::SloMeasured, Severity::Info)
                    .with_param("window_minutes", window_minutes)
                    .with_param("p95_ms", measured.p95_ms)
                    .with_param("error_rate", measured.error_rate)
                    .with_param("availability", measured.availability)
                    .with_param("sample_size", measured.sample_size);
                self.events.emit(&entry);
                measured
            }
            Err(error) => {
                let mut entry = self
                    .events
                    .entry(EventType::MeasurementDegraded, Severity::Warning)
                    .with_param("window_minutes", window_minutes)
                    .with_param("provider", self.provider.name());
                entry.ok = Some(false);
                entry.details = Some(error.to_string());
                self.events.emit(&entry);
                SloMeasurement::worst_case(service, window_minutes, now)
            }
        }
    }

    /// All three thresholds hold for `measured`.
    #[must_use]
    pub fn slo_ok(&self, measured: &SloMeasurement, thresholds: &SloThresholds) -> bool {
        measurement::slo_ok(measured, thresholds)
    }

    /// Per-threshold breakdown of [`Self::slo_ok`].
    #[must_use]
    pub fn evaluate(&self, measured: &SloMeasurement, thresholds: &SloThresholds) -> SloCheck {
        measurement::evaluate(measured, thresholds)
    }
}
