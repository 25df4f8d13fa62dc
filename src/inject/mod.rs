//! Fault injectors.
//!
//! An [`Injector`] owns exactly one fault against one target service. The
//! variant is a closed set ([`Fault`]); the lifecycle, event emission and
//! idempotent stop are shared.

#![allow(missing_docs)]

pub mod cpu_spike;
pub mod lifecycle;
pub mod network_latency;
pub mod service_kill;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::core::clock::Clock;
use crate::core::config::SafetyConfig;
use crate::core::errors::Result;
use crate::core::scenario::{FaultKind, Scenario};
use crate::logger::context::EventContext;
use crate::logger::jsonl::{EventType, Severity};
use crate::platform::pal::Platform;

pub use cpu_spike::CpuSpike;
pub use lifecycle::InjectorState;
pub use network_latency::NetworkLatency;
pub use service_kill::ServiceKill;

use lifecycle::Lifecycle;

const DEFAULT_INTERFACE: &str = "eth0";

/// The fault variants.
pub enum Fault {
    NetworkLatency(NetworkLatency),
    ServiceKill(ServiceKill),
    CpuSpike(CpuSpike),
}

impl Fault {
    #[must_use]
    pub const fn kind(&self) -> FaultKind {
        match self {
            Self::NetworkLatency(_) => FaultKind::NetworkLatency,
            Self::ServiceKill(_) => FaultKind::ServiceKill,
            Self::CpuSpike(_) => FaultKind::CpuSpike,
        }
    }

    fn params(&self) -> BTreeMap<String, Value> {
        let mut params = BTreeMap::new();
        match self {
            Self::NetworkLatency(f) => {
                params.insert("interface".to_string(), Value::from(f.interface.as_str()));
                params.insert("latency_ms".to_string(), Value::from(f.latency_ms));
                if let Some(jitter) = f.jitter_ms {
                    params.insert("jitter_ms".to_string(), Value::from(jitter));
                }
            }
            Self::ServiceKill(f) => {
                params.insert("restart_on_stop".to_string(), Value::from(f.restart_on_stop));
            }
            Self::CpuSpike(f) => {
                params.insert("cpu_percent".to_string(), Value::from(f.cpu_percent));
                params.insert("workers".to_string(), Value::from(f.workers));
            }
        }
        params
    }

    fn apply(&mut self) -> Result<()> {
        match self {
            Self::NetworkLatency(f) => f.apply(),
            Self::ServiceKill(f) => f.apply(),
            Self::CpuSpike(f) => f.apply(),
        }
    }

    fn verify(&self) -> bool {
        match self {
            Self::NetworkLatency(f) => f.verify(),
            Self::ServiceKill(f) => f.verify(),
            Self::CpuSpike(f) => f.verify(),
        }
    }

    fn guard(&self) -> bool {
        match self {
            Self::NetworkLatency(_) | Self::ServiceKill(_) => true,
            Self::CpuSpike(f) => f.guard(),
        }
    }

    fn revert(&mut self) -> Result<()> {
        match self {
            Self::NetworkLatency(f) => f.revert(),
            Self::ServiceKill(f) => f.revert(),
            Self::CpuSpike(f) => f.revert(),
        }
    }
}

/// One fault against one service, with its lifecycle.
pub struct Injector {
    service: String,
    fault: Fault,
    life: Lifecycle,
}

impl Injector {
    /// Build the injector a scenario describes for its primary target.
    pub fn from_scenario(
        scenario: &Scenario,
        safety: &SafetyConfig,
        platform: Arc<dyn Platform>,
        clock: Arc<dyn Clock>,
        events: EventContext,
    ) -> Result<Self> {
        let target = scenario.primary_target()?;
        let fault = match scenario.fault_kind()? {
            FaultKind::NetworkLatency => Fault::NetworkLatency(NetworkLatency::new(
                target
                    .interface
                    .clone()
                    .unwrap_or_else(|| DEFAULT_INTERFACE.to_string()),
                target.latency_ms.unwrap_or_default(),
                target.jitter_ms,
                platform,
            )),
            FaultKind::ServiceKill => Fault::ServiceKill(ServiceKill::new(
                target.service.clone(),
                target.restart_on_stop.unwrap_or(true),
                platform,
            )),
            FaultKind::CpuSpike => Fault::CpuSpike(CpuSpike::new(
                target.cpu_percent.unwrap_or(50),
                target.workers.unwrap_or(1),
                safety.cpu_load_ceiling_pct,
                platform,
            )),
        };
        Ok(Self::new(target.service.clone(), fault, clock, events))
    }

    pub fn new(service: String, fault: Fault, clock: Arc<dyn Clock>, events: EventContext) -> Self {
        let params = fault.params();
        Self {
            service,
            fault,
            life: Lifecycle::new(clock, events, params),
        }
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    #[must_use]
    pub const fn kind(&self) -> FaultKind {
        self.fault.kind()
    }

    #[must_use]
    pub const fn state(&self) -> InjectorState {
        self.life.state()
    }

    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.life.started_at()
    }

    #[must_use]
    pub const fn fault(&self) -> &Fault {
        &self.fault
    }

    /// Put the fault in effect. Only an idle injector can start; on failure
    /// the injector is left in `Error` with nothing started.
    pub fn start(&mut self) -> bool {
        if self.life.state() != InjectorState::Idle {
            self.life.emit(
                EventType::InjectionStartFailed,
                Severity::Warning,
                false,
                Some(format!("cannot start from state {}", self.life.state())),
            );
            return false;
        }
        self.life.advance(InjectorState::Starting);
        match self.fault.apply() {
            Ok(()) => {
                self.life.mark_started();
                self.life.advance(InjectorState::Active);
                self.life
                    .emit(EventType::InjectionStart, Severity::Info, true, None);
                true
            }
            Err(error) => {
                self.life.advance(InjectorState::Error);
                self.life.emit(
                    EventType::InjectionStartFailed,
                    Severity::Critical,
                    false,
                    Some(error.to_string()),
                );
                false
            }
        }
    }

    /// Confirm the fault is genuinely in effect.
    pub fn verify_injection(&mut self) -> bool {
        if !matches!(self.life.state(), InjectorState::Active | InjectorState::Verified) {
            return false;
        }
        if self.fault.verify() {
            if self.life.state() == InjectorState::Active {
                self.life.advance(InjectorState::Verified);
            }
            self.life
                .emit(EventType::InjectionVerified, Severity::Info, true, None);
            true
        } else {
            self.life.advance(InjectorState::Error);
            self.life.emit(
                EventType::InjectionVerifyFailed,
                Severity::Warning,
                false,
                Some("fault not observed on host".to_string()),
            );
            false
        }
    }

    /// Whether it is still safe to keep the fault in effect.
    pub fn safety_guard(&self) -> bool {
        self.life.state() != InjectorState::Error && self.fault.guard()
    }

    /// Revert the fault. Safe to call from any state and any number of times;
    /// true when the injector ends in `Stopped`.
    pub fn stop(&mut self) -> bool {
        match self.life.state() {
            InjectorState::Stopped => return true,
            InjectorState::Idle => {
                self.life.advance(InjectorState::Stopped);
                return true;
            }
            // start() failed: nothing on the host belongs to us.
            InjectorState::Error if self.life.started_at().is_none() => {
                self.life.advance(InjectorState::Stopping);
                self.life.advance(InjectorState::Stopped);
                self.life.emit(
                    EventType::InjectionStop,
                    Severity::Info,
                    true,
                    Some("no fault was applied; nothing to revert".to_string()),
                );
                return true;
            }
            _ => {}
        }
        self.life.advance(InjectorState::Stopping);
        match self.fault.revert() {
            Ok(()) => {
                self.life.advance(InjectorState::Stopped);
                self.life
                    .emit(EventType::InjectionStop, Severity::Info, true, None);
                true
            }
            Err(error) => {
                self.life.advance(InjectorState::Error);
                self.life.emit(
                    EventType::InjectionStopFailed,
                    Severity::Critical,
                    false,
                    Some(error.to_string()),
                );
                false
            }
        }
    }
}
