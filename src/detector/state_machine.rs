//! Detection-to-event state machine.
//!
//! ```text
//!                 id (new / outside return window) ──▶ AnimalEntered
//!  NO_ANIMAL ─────id (just departed, within window) ──▶ AnimalReturned
//!     ▲   │
//!     │   ▼
//!  none ANIMAL_PRESENT ── different id ──▶ AnimalChanged
//!  (AnimalLeft)
//!
//!  any ──[error]──▶ ERROR (ErrorDetected, edge-triggered)
//!  ERROR ──none──▶ NO_ANIMAL (silent)
//!  ERROR ──id────▶ ANIMAL_PRESENT (AnimalEntered)
//! ```
//!
//! At most one event per sample.  An error sample always wins over the
//! identity it carries.

use std::time::{Duration, Instant};

use log::warn;

use super::{DetectionResult, DetectorEvent, DetectorState};

pub struct DetectorStateMachine {
    state: DetectorState,
    /// Set iff `state == AnimalPresent`.
    current_animal: Option<String>,
    /// Last animal to leave and when; cleared on any other entry or error.
    departed: Option<(String, Instant)>,
    /// How long a departed animal is remembered.  Zero disables
    /// `AnimalReturned`.
    return_window: Duration,
}

impl DetectorStateMachine {
    pub fn new(return_window: Duration) -> Self {
        Self {
            state: DetectorState::NoAnimal,
            current_animal: None,
            departed: None,
            return_window,
        }
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn current_animal(&self) -> Option<&str> {
        self.current_animal.as_deref()
    }

    pub fn transition(&mut self, result: &DetectionResult) -> Option<DetectorEvent> {
        self.transition_at(result, Instant::now())
    }

    /// [`transition`](Self::transition) with an explicit clock reading.
    pub fn transition_at(
        &mut self,
        result: &DetectionResult,
        now: Instant,
    ) -> Option<DetectorEvent> {
        if result.error {
            return self.handle_error();
        }

        match (self.state, result.animal_id.as_deref()) {
            (DetectorState::NoAnimal, None) => None,

            (DetectorState::NoAnimal, Some(id)) => {
                let returned = self.departed.take().is_some_and(|(prev, left_at)| {
                    prev == id && now.saturating_duration_since(left_at) < self.return_window
                });
                self.state = DetectorState::AnimalPresent;
                self.current_animal = Some(id.to_owned());
                Some(if returned {
                    DetectorEvent::AnimalReturned(id.to_owned())
                } else {
                    DetectorEvent::AnimalEntered(id.to_owned())
                })
            }

            (DetectorState::AnimalPresent, None) => {
                self.state = DetectorState::NoAnimal;
                match self.current_animal.take() {
                    Some(prev) => {
                        self.departed = Some((prev.clone(), now));
                        Some(DetectorEvent::AnimalLeft(prev))
                    }
                    None => {
                        warn!("DETECTOR: unexpected transition, present with no animal");
                        None
                    }
                }
            }

            (DetectorState::AnimalPresent, Some(id)) => {
                if self.current_animal.as_deref() == Some(id) {
                    return None;
                }
                self.current_animal = Some(id.to_owned());
                Some(DetectorEvent::AnimalChanged(id.to_owned()))
            }

            (DetectorState::Error, None) => {
                self.state = DetectorState::NoAnimal;
                self.current_animal = None;
                None
            }

            (DetectorState::Error, Some(id)) => {
                self.state = DetectorState::AnimalPresent;
                self.current_animal = Some(id.to_owned());
                Some(DetectorEvent::AnimalEntered(id.to_owned()))
            }
        }
    }

    fn handle_error(&mut self) -> Option<DetectorEvent> {
        if self.state == DetectorState::Error {
            return None;
        }
        self.state = DetectorState::Error;
        self.current_animal = None;
        self.departed = None;
        Some(DetectorEvent::ErrorDetected)
    }
}
