//! Explicit logging context handed to every component at construction time.
//!
//! `EventLog` is a cheaply cloneable handle around the shared JSONL writer.
//! `EventContext` stamps every entry with the run id, scenario and service of
//! the experiment it belongs to, so components never reach for global state.
//! With a clock attached, entries are timestamped from it rather than the
//! wall clock.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::clock::Clock;
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

/// Shared handle to the append-only event log.
#[derive(Clone, Default)]
pub struct EventLog {
    writer: Option<Arc<Mutex<JsonlWriter>>>,
}

impl EventLog {
    /// Log to the month-partitioned files described by `config`.
    pub fn open(config: JsonlConfig) -> Self {
        Self {
            writer: Some(Arc::new(Mutex::new(JsonlWriter::open(config)))),
        }
    }

    /// A log that drops every entry.
    pub fn disabled() -> Self {
        Self { writer: None }
    }

    /// Append one entry.
    pub fn record(&self, entry: &LogEntry) {
        if let Some(writer) = &self.writer {
            writer.lock().write_entry(entry);
        }
    }

    /// Flush buffered lines to the OS.
    pub fn flush(&self) {
        if let Some(writer) = &self.writer {
            writer.lock().fsync();
        }
    }

    /// Writer degradation state (`"disabled"` when no writer is attached).
    pub fn state(&self) -> &'static str {
        self.writer
            .as_ref()
            .map_or("disabled", |writer| writer.lock().state())
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("state", &self.state())
            .finish()
    }
}

/// Per-experiment logging context.
#[derive(Clone, Default)]
pub struct EventContext {
    log: EventLog,
    clock: Option<Arc<dyn Clock>>,
    run_id: Option<String>,
    scenario: Option<String>,
    service: Option<String>,
    fault: Option<String>,
}

impl EventContext {
    /// Context with no experiment identity attached.
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Context that discards everything.
    pub fn detached() -> Self {
        Self::new(EventLog::disabled())
    }

    /// Timestamp entries from `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Copy of this context tagged with an experiment identity.
    #[must_use]
    pub fn for_run(&self, run_id: &str, scenario: &str, service: &str, fault: &str) -> Self {
        Self {
            log: self.log.clone(),
            clock: self.clock.clone(),
            run_id: Some(run_id.to_string()),
            scenario: Some(scenario.to_string()),
            service: Some(service.to_string()),
            fault: Some(fault.to_string()),
        }
    }

    /// Fresh entry pre-filled with the experiment identity.
    pub fn entry(&self, event: EventType, severity: Severity) -> LogEntry {
        let mut entry = match &self.clock {
            Some(clock) => LogEntry::at(clock.now(), event, severity),
            None => LogEntry::new(event, severity),
        };
        entry.run_id.clone_from(&self.run_id);
        entry.scenario.clone_from(&self.scenario);
        entry.service.clone_from(&self.service);
        entry.fault.clone_from(&self.fault);
        entry
    }

    /// Append `entry` to the underlying log.
    pub fn emit(&self, entry: &LogEntry) {
        self.log.record(entry);
    }

    /// Underlying log handle.
    pub fn log(&self) -> &EventLog {
        &self.log
    }
}

impl std::fmt::Debug for EventContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventContext")
            .field("log", &self.log)
            .field("clock", &self.clock.is_some())
            .field("run_id", &self.run_id)
            .field("scenario", &self.scenario)
            .field("service", &self.service)
            .field("fault", &self.fault)
            .finish()
    }
}
