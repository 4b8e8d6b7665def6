//! Manually-driven detector for bench runs and tests.
//!
//! Holds a "current" detection result that operator triggers replace.
//! Each trigger feeds the new result straight through the state machine;
//! `start` replays whatever result is current (a present `mock_001` by
//! default).

use std::time::Duration;

use log::info;
use parking_lot::Mutex;

use super::{DetectionResult, Detector, DetectorCore};
use crate::error::Result;

pub const MOCK_PRIMARY: &str = "mock_001";
pub const MOCK_SECONDARY: &str = "mock_002";

pub struct MockDetector {
    core: DetectorCore,
    current: Mutex<DetectionResult>,
}

impl MockDetector {
    pub fn new(return_window: Duration) -> Self {
        Self {
            core: DetectorCore::new(return_window),
            current: Mutex::new(DetectionResult::animal(MOCK_PRIMARY)),
        }
    }

    /// Animal `id` is now at the station.
    pub fn enter(&self, id: &str) {
        self.trigger(DetectionResult::animal(id));
    }

    /// Nobody at the station.
    pub fn leave(&self) {
        self.trigger(DetectionResult::none());
    }

    /// Swap between the two mock animals.  From an empty or errored
    /// station this brings in `mock_001`.
    pub fn change(&self) {
        let next = {
            let current = self.current.lock();
            match current.animal_id.as_deref() {
                Some(MOCK_PRIMARY) => MOCK_SECONDARY,
                _ => MOCK_PRIMARY,
            }
        };
        self.enter(next);
    }

    /// Simulate a sensor fault.
    pub fn error(&self) {
        self.trigger(DetectionResult::error());
    }

    pub fn current_result(&self) -> DetectionResult {
        self.current.lock().clone()
    }

    fn trigger(&self, result: DetectionResult) {
        info!("MOCK: trigger {result:?}");
        *self.current.lock() = result.clone();
        self.process_detection(result);
    }
}

impl Detector for MockDetector {
    fn core(&self) -> &DetectorCore {
        &self.core
    }

    fn start_detection(&self) -> Result<()> {
        let result = self.current_result();
        self.core.process_detection(&result);
        Ok(())
    }

    fn stop_detection(&self) {}

    fn manual(&self) -> Option<&MockDetector> {
        Some(self)
    }
}
