//! Static safety preconditions checked before any fault starts: blast radius
//! and remaining error budget.

#![allow(missing_docs)]

use std::env;
use std::fmt;

use crate::core::config::SafetyConfig;
use crate::core::scenario::Scenario;
use crate::logger::context::EventContext;
use crate::logger::jsonl::{EventType, Severity};
use crate::slo::validator::SloValidator;

/// Outcome of one precondition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub detail: String,
}

impl PolicyDecision {
    #[must_use]
    pub fn allow(detail: impl Into<String>) -> Self {
        Self {
            allowed: true,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn deny(detail: impl Into<String>) -> Self {
        Self {
            allowed: false,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for PolicyDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.allowed { "allowed" } else { "denied" };
        write!(f, "{verb}: {}", self.detail)
    }
}

/// Decides whether a scenario's declared blast radius may run here.
pub trait BlastRadiusPolicy: Send + Sync {
    fn check(&self, scenario: &Scenario) -> PolicyDecision;

    fn name(&self) -> &'static str;

    /// Permissive policies are logged as warnings even when they allow.
    fn is_permissive(&self) -> bool {
        false
    }
}

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// The scenario's blast radius must be an allowed environment, and the host
/// must carry a marker variable naming that same environment.
pub struct EnvironmentMarkerPolicy {
    environment_var: String,
    allowed_environments: Vec<String>,
    lookup: EnvLookup,
}

impl EnvironmentMarkerPolicy {
    /// Read the marker from the process environment.
    #[must_use]
    pub fn from_config(config: &SafetyConfig) -> Self {
        Self::with_lookup(config, |name| env::var(name).ok())
    }

    #[must_use]
    pub fn with_lookup(
        config: &SafetyConfig,
        lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            environment_var: config.environment_var.clone(),
            allowed_environments: config.allowed_environments.clone(),
            lookup: Box::new(lookup),
        }
    }
}

impl BlastRadiusPolicy for EnvironmentMarkerPolicy {
    fn check(&self, scenario: &Scenario) -> PolicyDecision {
        let radius = scenario.safety.blast_radius.as_str();
        if !self.allowed_environments.iter().any(|env| env == radius) {
            return PolicyDecision::deny(format!(
                "blast radius {radius:?} is not an allowed environment ({})",
                self.allowed_environments.join(", ")
            ));
        }
        match (self.lookup)(&self.environment_var) {
            Some(marker) if marker.trim() == radius => PolicyDecision::allow(format!(
                "{}={marker} matches blast radius",
                self.environment_var
            )),
            Some(marker) => PolicyDecision::deny(format!(
                "{}={marker:?} does not match blast radius {radius:?}",
                self.environment_var
            )),
            None => PolicyDecision::deny(format!(
                "environment marker {} is not set",
                self.environment_var
            )),
        }
    }

    fn name(&self) -> &'static str {
        "environment_marker"
    }
}

/// Allows everything. Only selected when enforcement is switched off.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissivePolicy;

impl BlastRadiusPolicy for PermissivePolicy {
    fn check(&self, scenario: &Scenario) -> PolicyDecision {
        PolicyDecision::allow(format!(
            "blast radius {:?} not enforced",
            scenario.safety.blast_radius
        ))
    }

    fn name(&self) -> &'static str {
        "permissive"
    }

    fn is_permissive(&self) -> bool {
        true
    }
}

/// Policy selected by `safety.enforce_blast_radius`.
#[must_use]
pub fn blast_radius_policy(config: &SafetyConfig) -> Box<dyn BlastRadiusPolicy> {
    if config.enforce_blast_radius {
        Box::new(EnvironmentMarkerPolicy::from_config(config))
    } else {
        Box::new(PermissivePolicy)
    }
}

/// The service must have enough error budget left to spend on an experiment.
#[derive(Debug, Clone, Copy)]
pub struct ErrorBudgetPolicy {
    pub window_minutes: u64,
    pub min_remaining: f64,
}

impl ErrorBudgetPolicy {
    #[must_use]
    pub fn from_config(config: &SafetyConfig) -> Self {
        Self {
            window_minutes: config.error_budget_window_minutes,
            min_remaining: config.min_error_budget_remaining,
        }
    }

    /// Fraction of the error budget left: `1 - error_rate / ceiling`, in [0, 1].
    #[must_use]
    pub fn remaining(error_rate: f64, ceiling: f64) -> f64 {
        if ceiling <= 0.0 {
            return if error_rate <= 0.0 { 1.0 } else { 0.0 };
        }
        let left = 1.0 - error_rate / ceiling;
        if left.is_nan() { 0.0 } else { left.clamp(0.0, 1.0) }
    }

    pub fn check(&self, scenario: &Scenario, service: &str, validator: &SloValidator) -> PolicyDecision {
        let measured = validator.fetch_slo_window(service, self.window_minutes);
        if measured.degraded {
            return PolicyDecision::deny(format!(
                "error budget unknown: no measurement for {service} over {}m",
                self.window_minutes
            ));
        }
        let remaining = Self::remaining(measured.error_rate, scenario.slo.error_rate);
        let detail = format!(
            "error budget remaining {:.1}% (minimum {:.1}%)",
            remaining * 100.0,
            self.min_remaining * 100.0
        );
        if remaining >= self.min_remaining {
            PolicyDecision::allow(detail)
        } else {
            PolicyDecision::deny(detail)
        }
    }
}

/// All preconditions, evaluated in order: blast radius, then error budget.
pub struct SafetyPreconditions {
    blast_radius: Box<dyn BlastRadiusPolicy>,
    error_budget: ErrorBudgetPolicy,
}

impl SafetyPreconditions {
    #[must_use]
    pub fn from_config(config: &SafetyConfig) -> Self {
        Self::new(blast_radius_policy(config), ErrorBudgetPolicy::from_config(config))
    }

    #[must_use]
    pub fn new(blast_radius: Box<dyn BlastRadiusPolicy>, error_budget: ErrorBudgetPolicy) -> Self {
        Self {
            blast_radius,
            error_budget,
        }
    }

    /// `Err(detail)` names the first precondition that denied the run.
    pub fn evaluate(
        &self,
        scenario: &Scenario,
        service: &str,
        validator: &SloValidator,
        events: &EventContext,
    ) -> std::result::Result<(), String> {
        let blast = self.blast_radius.check(scenario);
        if !blast.allowed {
            emit(events, EventType::PreconditionDenied, self.blast_radius.name(), &blast);
            return Err(blast.detail);
        }
        if self.blast_radius.is_permissive() {
            emit(events, EventType::PreconditionWarning, self.blast_radius.name(), &blast);
        }

        let budget = self.error_budget.check(scenario, service, validator);
        if !budget.allowed {
            emit(events, EventType::PreconditionDenied, "error_budget", &budget);
            return Err(budget.detail);
        }
        Ok(())
    }
}

fn emit(events: &EventContext, event: EventType, policy: &str, decision: &PolicyDecision) {
    let severity = if decision.allowed {
        Severity::Warning
    } else {
        Severity::Critical
    };
    let mut entry = events.entry(event, severity).with_param("policy", policy);
    entry.ok = Some(decision.allowed);
    entry.reason = Some(decision.detail.clone());
    events.emit(&entry);
}
