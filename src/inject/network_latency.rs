//! Network latency fault: a netem delay on one interface.

#![allow(missing_docs)]

use std::sync::Arc;

use crate::core::errors::Result;
use crate::platform::pal::Platform;

#[derive(Clone)]
pub struct NetworkLatency {
    pub interface: String,
    pub latency_ms: u64,
    pub jitter_ms: Option<u64>,
    platform: Arc<dyn Platform>,
}

impl NetworkLatency {
    pub fn new(
        interface: String,
        latency_ms: u64,
        jitter_ms: Option<u64>,
        platform: Arc<dyn Platform>,
    ) -> Self {
        Self {
            interface,
            latency_ms,
            jitter_ms,
            platform,
        }
    }

    pub(crate) fn apply(&mut self) -> Result<()> {
        self.platform
            .add_latency(&self.interface, self.latency_ms, self.jitter_ms)
    }

    pub(crate) fn verify(&self) -> bool {
        self.platform
            .latency_active(&self.interface)
            .unwrap_or(false)
    }

    pub(crate) fn revert(&mut self) -> Result<()> {
        self.platform.remove_latency(&self.interface)
    }
}
