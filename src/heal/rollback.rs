//! Rollback capability: the remediation an auto-heal trip executes.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::config::RollbackConfig;
use crate::core::errors::{ChaosError, Result};
use crate::platform::pal::run_with_timeout;

/// Rolls a service back to its last known-good state. Blocking.
pub trait RollbackCapability: Send + Sync {
    fn rollback(&self, service: &str) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Build the capability selected by configuration.
#[must_use]
pub fn from_config(config: &RollbackConfig) -> Arc<dyn RollbackCapability> {
    if config.command.is_empty() {
        Arc::new(UnavailableRollback)
    } else {
        Arc::new(CommandRollback::new(
            config.command.clone(),
            Duration::from_secs(config.timeout_secs),
        ))
    }
}

/// Runs an operator-supplied command; `{service}` in any argument is replaced.
/// Non-zero exit or timeout is a failed rollback.
#[derive(Debug, Clone)]
pub struct CommandRollback {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandRollback {
    #[must_use]
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self { argv, timeout }
    }
}

impl RollbackCapability for CommandRollback {
    fn rollback(&self, service: &str) -> Result<()> {
        let argv: Vec<String> = self
            .argv
            .iter()
            .map(|arg| arg.replace("{service}", service))
            .collect();
        let fail = |details: String| ChaosError::Rollback {
            service: service.to_string(),
            details,
        };
        let output = run_with_timeout(&argv, self.timeout).map_err(|e| fail(e.to_string()))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(fail(format!(
                "rollback command exited with {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

/// No rollback mechanism configured: every attempt fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableRollback;

impl RollbackCapability for UnavailableRollback {
    fn rollback(&self, service: &str) -> Result<()> {
        Err(ChaosError::Rollback {
            service: service.to_string(),
            details: "no rollback command configured".to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}

/// Test double that records calls and succeeds or fails on demand.
#[derive(Debug)]
pub struct RecordingRollback {
    succeed: bool,
    calls: Mutex<Vec<String>>,
}

impl RecordingRollback {
    #[must_use]
    pub fn succeeding() -> Self {
        Self {
            succeed: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            succeed: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Services rolled back, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl RollbackCapability for RecordingRollback {
    fn rollback(&self, service: &str) -> Result<()> {
        self.calls.lock().push(service.to_string());
        if self.succeed {
            Ok(())
        } else {
            Err(ChaosError::Rollback {
                service: service.to_string(),
                details: "deployment controller rejected rollback".to_string(),
            })
        }
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
