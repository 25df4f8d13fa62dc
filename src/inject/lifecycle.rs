//! Injector lifecycle states and the bookkeeping shared by every fault variant.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::clock::Clock;
use crate::logger::context::EventContext;
use crate::logger::jsonl::{EventType, Severity};

/// Where an injector is in its life.
///
/// Idle → Starting → Active → Verified → Stopping → Stopped, with Error
/// reachable from any transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectorState {
    Idle,
    Starting,
    Active,
    Verified,
    Stopping,
    Stopped,
    Error,
}

impl InjectorState {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Verified => "verified",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }

    /// A fault may be in effect on the host.
    #[must_use]
    pub const fn is_injecting(self) -> bool {
        matches!(self, Self::Starting | Self::Active | Self::Verified)
    }

    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Starting | Self::Stopped)
                | (Self::Starting, Self::Active)
                | (Self::Active, Self::Verified | Self::Stopping)
                | (Self::Verified, Self::Stopping)
                | (Self::Error, Self::Stopping)
                | (Self::Stopping, Self::Stopped)
                | (_, Self::Error)
        )
    }
}

impl fmt::Display for InjectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// State, start time and event plumbing common to all variants.
pub struct Lifecycle {
    state: InjectorState,
    started_at: Option<DateTime<Utc>>,
    clock: Arc<dyn Clock>,
    events: EventContext,
    params: BTreeMap<String, Value>,
}

impl Lifecycle {
    pub fn new(clock: Arc<dyn Clock>, events: EventContext, params: BTreeMap<String, Value>) -> Self {
        Self {
            state: InjectorState::Idle,
            started_at: None,
            clock,
            events,
            params,
        }
    }

    #[must_use]
    pub const fn state(&self) -> InjectorState {
        self.state
    }

    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Move to `next`. Illegal moves land in `Error` instead.
    pub fn advance(&mut self, next: InjectorState) {
        self.state = if self.state.can_transition_to(next) {
            next
        } else {
            InjectorState::Error
        };
    }

    pub fn mark_started(&mut self) {
        self.started_at = Some(self.clock.now());
    }

    /// Emit an injector event carrying the fault parameters and current state.
    pub fn emit(&self, event: EventType, severity: Severity, ok: bool, details: Option<String>) {
        let mut entry = self.events.entry(event, severity);
        entry.state = Some(self.state.label().to_string());
        entry.params.clone_from(&self.params);
        entry.ok = Some(ok);
        entry.details = details;
        self.events.emit(&entry);
    }
}
