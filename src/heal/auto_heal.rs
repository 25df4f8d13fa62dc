//! Auto-heal manager: decides when degradation is dangerous enough to roll
//! back, and executes the rollback.
//!
//! The danger threshold sits well above the SLO itself: p95 must exceed
//! `latency_multiplier` × the SLO ceiling, or the error rate must exceed
//! `error_rate_multiplier` × its ceiling. Once a rollback has been executed the
//! manager remembers it for the rest of the experiment.

#![allow(missing_docs)]

use std::sync::Arc;

use crate::core::config::AutoHealConfig;
use crate::core::scenario::SloThresholds;
use crate::heal::rollback::RollbackCapability;
use crate::logger::context::EventContext;
use crate::logger::jsonl::{EventType, Severity};
use crate::slo::measurement::SloMeasurement;

/// Which danger threshold a measurement crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trip {
    pub latency: bool,
    pub error_rate: bool,
}

impl Trip {
    #[must_use]
    pub const fn tripped(&self) -> bool {
        self.latency || self.error_rate
    }
}

/// Per-experiment auto-heal state.
pub struct AutoHealManager {
    config: AutoHealConfig,
    rollback: Arc<dyn RollbackCapability>,
    events: EventContext,
    rollback_triggered: bool,
    rollbacks_executed: u32,
}

impl AutoHealManager {
    pub fn new(
        config: AutoHealConfig,
        rollback: Arc<dyn RollbackCapability>,
        events: EventContext,
    ) -> Self {
        Self {
            config,
            rollback,
            events,
            rollback_triggered: false,
            rollbacks_executed: 0,
        }
    }

    /// Compare a measurement to the danger thresholds without side effects.
    #[must_use]
    pub fn assess(&self, measured: &SloMeasurement, thresholds: &SloThresholds) -> Trip {
        Trip {
            latency: measured.p95_ms > self.config.latency_multiplier * thresholds.p95_ms,
            error_rate: measured.error_rate
                > self.config.error_rate_multiplier * thresholds.error_rate,
        }
    }

    /// True when `service` should be rolled back. Trips are logged even when
    /// auto-heal is disabled, in which case this returns false.
    pub fn check_auto_heal(
        &self,
        service: &str,
        measured: &SloMeasurement,
        thresholds: &SloThresholds,
    ) -> bool {
        let trip = self.assess(measured, thresholds);
        if !trip.tripped() {
            return false;
        }

        let mut entry = self
            .events
            .entry(EventType::AutoHealTrip, Severity::Warning)
            .with_param("p95_ms", measured.p95_ms)
            .with_param("error_rate", measured.error_rate)
            .with_param("latency_tripped", trip.latency)
            .with_param("error_rate_tripped", trip.error_rate)
            .with_param("enabled", self.config.enabled);
        entry.service = Some(service.to_string());
        if !self.config.enabled {
            entry.details = Some("auto-heal disabled; not acting".to_string());
        }
        self.events.emit(&entry);

        self.config.enabled
    }

    /// Rollbacks this experiment may still execute.
    #[must_use]
    pub fn rollbacks_remaining(&self) -> u32 {
        self.config.max_rollbacks.saturating_sub(self.rollbacks_executed)
    }

    /// Roll `service` back. Blocks until the capability answers.
    ///
    /// Returns false on failure, which the runner treats as a hard failure.
    pub fn execute_rollback(&mut self, service: &str) -> bool {
        self.rollback_triggered = true;
        self.rollbacks_executed += 1;

        let result = self.rollback.rollback(service);
        let ok = result.is_ok();
        let mut entry = self.events.entry(
            EventType::Rollback,
            if ok { Severity::Warning } else { Severity::Critical },
        );
        entry.service = Some(service.to_string());
        entry.ok = Some(ok);
        entry = entry
            .with_param("capability", self.rollback.name())
            .with_param("attempt", self.rollbacks_executed);
        if let Err(error) = result {
            entry.details = Some(error.to_string());
        }
        self.events.emit(&entry);
        ok
    }

    /// A rollback has been executed during this experiment.
    #[must_use]
    pub const fn rollback_triggered(&self) -> bool {
        self.rollback_triggered
    }
}
