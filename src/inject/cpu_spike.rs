//! CPU spike fault: background workers that burn a fixed share of each
//! 100 ms cycle.
//!
//! Each worker busy-loops for `cpu_percent`% of the cycle, bumps the shared
//! burst counter, then idles on a crossbeam channel for the rest of it. The
//! active flag is checked at every burst boundary and dropping the sender
//! wakes idle workers immediately, so `revert` returns within one cycle.

#![allow(missing_docs)]

use std::hint;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::core::errors::{ChaosError, Result};
use crate::core::scenario::max_cpu_workers;
use crate::platform::pal::Platform;

/// Length of one busy/idle cycle.
pub const CYCLE: Duration = Duration::from_millis(100);

pub struct CpuSpike {
    pub cpu_percent: u8,
    pub workers: usize,
    pub load_ceiling_pct: f64,
    verify_timeout: Duration,
    platform: Arc<dyn Platform>,
    active: Arc<AtomicBool>,
    bursts: Arc<AtomicU64>,
    wake: Option<Sender<()>>,
    handles: Vec<JoinHandle<()>>,
}

impl CpuSpike {
    pub fn new(
        cpu_percent: u8,
        workers: usize,
        load_ceiling_pct: f64,
        platform: Arc<dyn Platform>,
    ) -> Self {
        Self {
            cpu_percent: cpu_percent.min(100),
            workers: workers.clamp(1, max_cpu_workers()),
            load_ceiling_pct,
            verify_timeout: CYCLE * 20,
            platform,
            active: Arc::new(AtomicBool::new(false)),
            bursts: Arc::new(AtomicU64::new(0)),
            wake: None,
            handles: Vec::new(),
        }
    }

    /// Bursts completed across all workers since the spike started.
    #[must_use]
    pub fn bursts(&self) -> u64 {
        self.bursts.load(Ordering::Relaxed)
    }

    /// Workers currently running.
    #[must_use]
    pub fn running_workers(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }

    pub(crate) fn apply(&mut self) -> Result<()> {
        if !self.handles.is_empty() {
            return Err(ChaosError::Injection {
                target: "cpu".to_string(),
                details: "cpu spike workers already running".to_string(),
            });
        }
        let (tx, rx) = crossbeam_channel::bounded::<()>(0);
        self.active.store(true, Ordering::SeqCst);
        self.bursts.store(0, Ordering::SeqCst);

        let busy = CYCLE * u32::from(self.cpu_percent) / 100;
        for index in 0..self.workers {
            let worker = Worker {
                active: Arc::clone(&self.active),
                bursts: Arc::clone(&self.bursts),
                wake: rx.clone(),
                busy,
                idle: CYCLE.saturating_sub(busy),
            };
            let spawned = thread::Builder::new()
                .name(format!("chv-cpu-{index}"))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => self.handles.push(handle),
                Err(error) => {
                    self.wake = Some(tx);
                    let _ = self.revert();
                    return Err(ChaosError::Injection {
                        target: "cpu".to_string(),
                        details: format!("failed to spawn worker {index}: {error}"),
                    });
                }
            }
        }
        self.wake = Some(tx);
        Ok(())
    }

    /// Wait, bounded, for at least one completed burst.
    pub(crate) fn verify(&self) -> bool {
        let deadline = Instant::now() + self.verify_timeout;
        while Instant::now() < deadline {
            if self.bursts() > 0 {
                return true;
            }
            if self.running_workers() == 0 {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        self.bursts() > 0
    }

    /// Host load must stay at or under the ceiling; an unreadable probe is unsafe.
    pub(crate) fn guard(&self) -> bool {
        self.platform
            .cpu_load_pct()
            .is_ok_and(|load| load <= self.load_ceiling_pct)
    }

    pub(crate) fn revert(&mut self) -> Result<()> {
        self.active.store(false, Ordering::SeqCst);
        // Disconnecting the channel wakes every idle worker.
        self.wake = None;
        let mut panicked = 0usize;
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            return Err(ChaosError::Injection {
                target: "cpu".to_string(),
                details: format!("{panicked} worker(s) panicked"),
            });
        }
        Ok(())
    }
}

impl Drop for CpuSpike {
    fn drop(&mut self) {
        let _ = self.revert();
    }
}

struct Worker {
    active: Arc<AtomicBool>,
    bursts: Arc<AtomicU64>,
    wake: Receiver<()>,
    busy: Duration,
    idle: Duration,
}

impl Worker {
    fn run(self) {
        while self.active.load(Ordering::SeqCst) {
            let burst_end = Instant::now() + self.busy;
            while Instant::now() < burst_end {
                hint::spin_loop();
            }
            self.bursts.fetch_add(1, Ordering::Relaxed);

            if !self.active.load(Ordering::SeqCst) {
                break;
            }
            match self.wake.recv_timeout(self.idle) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }
}
