//! Scheduler-owned tasks for the `Idle` and `Error` states.
//!
//! Both block until cancelled; the scheduler re-creates them on every
//! loop turn while its state is unchanged.

use log::{info, warn};

use super::{CancelToken, Task};

/// Runs while no animal is at the station.
#[derive(Debug, Default)]
pub struct IdleTask {
    token: CancelToken,
}

impl IdleTask {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Task for IdleTask {
    fn start(&self) -> anyhow::Result<bool> {
        info!("TASK: idle, waiting for an animal");
        self.token.wait();
        Ok(false)
    }

    fn quit(&self) {
        self.token.cancel();
    }

    fn on_return(&self) -> anyhow::Result<()> {
        self.token.cancel();
        Ok(())
    }
}

/// Runs while the detector reports a fault.
#[derive(Debug, Default)]
pub struct ErrorTask {
    token: CancelToken,
}

impl ErrorTask {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Task for ErrorTask {
    fn start(&self) -> anyhow::Result<bool> {
        warn!("TASK: detector fault, holding until it clears");
        self.token.wait();
        Ok(false)
    }

    fn quit(&self) {
        self.token.cancel();
    }

    fn on_return(&self) -> anyhow::Result<()> {
        self.token.cancel();
        Ok(())
    }
}
