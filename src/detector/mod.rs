//! Animal-presence detection.
//!
//! A detector owns one sensing backend and turns its raw samples into
//! de-duplicated lifecycle events:
//!
//! ```text
//!  backend sample ──▶ DetectionResult ──▶ DetectorStateMachine ──▶ DetectorEvent
//!  (RFID frame,        (id or none,        (under DetectorCore       (entered/returned/
//!   manual trigger)     error flag)         state lock)               changed/left/error)
//!                                                                          │
//!                                                   registered callbacks ◀─┘
//! ```
//!
//! Backends implement [`Detector`]; the start/quit/dispatch lifecycle is
//! provided once by the trait's default methods on top of [`DetectorCore`].

pub mod dispatch;
pub mod dorset;
pub mod factory;
pub mod mock;
pub mod state_machine;

pub use self::dispatch::{DetectorCore, EventCallback};
pub use self::state_machine::DetectorStateMachine;

use crate::error::Result;
use log::info;

// ---------------------------------------------------------------------------
// Samples and events
// ---------------------------------------------------------------------------

/// One point-in-time observation from a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionResult {
    pub animal_id: Option<String>,
    pub error: bool,
}

impl DetectionResult {
    pub fn animal(id: impl Into<String>) -> Self {
        Self {
            animal_id: Some(id.into()),
            error: false,
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn error() -> Self {
        Self {
            animal_id: None,
            error: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorState {
    NoAnimal,
    AnimalPresent,
    Error,
}

/// Subscription key for [`Detector::register_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AnimalEntered,
    AnimalReturned,
    AnimalChanged,
    AnimalLeft,
    ErrorDetected,
}

/// A detector lifecycle event.  Carries the animal id it concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorEvent {
    AnimalEntered(String),
    AnimalReturned(String),
    AnimalChanged(String),
    /// Carries the id of the animal that left.
    AnimalLeft(String),
    ErrorDetected,
}

impl DetectorEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::AnimalEntered(_) => EventKind::AnimalEntered,
            Self::AnimalReturned(_) => EventKind::AnimalReturned,
            Self::AnimalChanged(_) => EventKind::AnimalChanged,
            Self::AnimalLeft(_) => EventKind::AnimalLeft,
            Self::ErrorDetected => EventKind::ErrorDetected,
        }
    }

    /// The animal id, or `""` for [`DetectorEvent::ErrorDetected`].
    pub fn animal_id(&self) -> &str {
        match self {
            Self::AnimalEntered(id)
            | Self::AnimalReturned(id)
            | Self::AnimalChanged(id)
            | Self::AnimalLeft(id) => id,
            Self::ErrorDetected => "",
        }
    }
}

// ---------------------------------------------------------------------------
// Backend contract
// ---------------------------------------------------------------------------

/// Uniform contract over every sensing backend.
///
/// Implementors supply [`core`](Self::core) and the two backend hooks;
/// everything else is provided.
pub trait Detector: Send + Sync {
    /// Shared state machine, run flag and subscriber list.
    fn core(&self) -> &DetectorCore;

    /// Begin backend-specific acquisition.  Called with the run flag
    /// already set, so samples produced here are dispatched.
    fn start_detection(&self) -> Result<()>;

    /// Stop acquisition and release backend resources.
    fn stop_detection(&self);

    /// Manual trigger handle, for backends that expose one.
    fn manual(&self) -> Option<&mock::MockDetector> {
        None
    }

    /// Begin acquisition.  No-op if already running.
    fn start(&self) -> Result<()> {
        if self.core().set_running(true) {
            return Ok(());
        }
        info!("DETECTOR: starting");
        if let Err(e) = self.start_detection() {
            self.core().set_running(false);
            return Err(e);
        }
        Ok(())
    }

    /// Stop acquisition.  No-op if not running.  The state machine keeps
    /// its last state.
    fn quit(&self) {
        if !self.core().set_running(false) {
            return;
        }
        info!("DETECTOR: stopping");
        self.stop_detection();
    }

    /// Subscribe to one event kind.  Callbacks for a kind run in
    /// registration order, on whichever thread produced the sample.
    fn register_event(&self, kind: EventKind, callback: EventCallback) {
        self.core().register(kind, callback);
    }

    /// Feed one sample through the state machine.  Ignored while stopped.
    fn process_detection(&self, result: DetectionResult) {
        self.core().process_detection(&result);
    }

    fn current_state(&self) -> DetectorState {
        self.core().current_state()
    }

    fn current_animal(&self) -> Option<String> {
        self.core().current_animal()
    }

    /// Also false once a backend has stopped itself after a transport
    /// failure; `start` then reopens it.
    fn is_running(&self) -> bool {
        self.core().is_running()
    }
}
