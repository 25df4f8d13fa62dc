//! Service kill fault: stop the unit, optionally start it again on revert.

#![allow(missing_docs)]

use std::sync::Arc;

use crate::core::errors::Result;
use crate::platform::pal::Platform;

#[derive(Clone)]
pub struct ServiceKill {
    pub service: String,
    pub restart_on_stop: bool,
    platform: Arc<dyn Platform>,
}

impl ServiceKill {
    pub fn new(service: String, restart_on_stop: bool, platform: Arc<dyn Platform>) -> Self {
        Self {
            service,
            restart_on_stop,
            platform,
        }
    }

    pub(crate) fn apply(&mut self) -> Result<()> {
        self.platform.stop_service(&self.service)
    }

    /// The unit must report inactive; a failed probe is not proof.
    pub(crate) fn verify(&self) -> bool {
        matches!(self.platform.service_active(&self.service), Ok(false))
    }

    pub(crate) fn revert(&mut self) -> Result<()> {
        if self.restart_on_stop {
            self.platform.start_service(&self.service)
        } else {
            Ok(())
        }
    }
}
