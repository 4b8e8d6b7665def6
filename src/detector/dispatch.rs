//! Shared detector plumbing: run flag, state lock and subscriber table.
//!
//! Samples may arrive from a backend thread and from the manual trigger
//! path at the same time.  Each sample takes the dispatch lock, runs the
//! state machine under the short machine lock, then calls subscribers
//! with only the dispatch lock held.  Subscribers therefore observe
//! events in transition order, and state queries never wait on a
//! subscriber.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, error};
use parking_lot::{Mutex, RwLock};

use super::{DetectionResult, DetectorEvent, DetectorState, DetectorStateMachine, EventKind};

/// Subscriber callback.  Receives the event's animal id (`""` for
/// `ErrorDetected`).  Errors and panics are logged and swallowed.
pub type EventCallback = Box<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>;

pub struct DetectorCore {
    running: AtomicBool,
    /// Serializes transition + dispatch per sample.
    dispatch_order: Mutex<()>,
    machine: Mutex<DetectorStateMachine>,
    subscribers: RwLock<Vec<(EventKind, EventCallback)>>,
}

impl DetectorCore {
    pub fn new(return_window: Duration) -> Self {
        Self {
            running: AtomicBool::new(false),
            dispatch_order: Mutex::new(()),
            machine: Mutex::new(DetectorStateMachine::new(return_window)),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Set the run flag, returning its previous value.
    pub fn set_running(&self, running: bool) -> bool {
        self.running.swap(running, Ordering::AcqRel)
    }

    /// Must not be called from inside a callback.
    pub fn register(&self, kind: EventKind, callback: EventCallback) {
        self.subscribers.write().push((kind, callback));
    }

    pub fn process_detection(&self, result: &DetectionResult) {
        if !self.is_running() {
            return;
        }
        let _order = self.dispatch_order.lock();
        let event = self.machine.lock().transition(result);
        if let Some(event) = event {
            self.dispatch(&event);
        }
    }

    pub fn current_state(&self) -> DetectorState {
        self.machine.lock().state()
    }

    pub fn current_animal(&self) -> Option<String> {
        self.machine.lock().current_animal().map(str::to_owned)
    }

    fn dispatch(&self, event: &DetectorEvent) {
        debug!("DETECTOR: {event:?}");
        let kind = event.kind();
        let subscribers = self.subscribers.read();
        for (_, callback) in subscribers.iter().filter(|(k, _)| *k == kind) {
            match catch_unwind(AssertUnwindSafe(|| callback(event.animal_id()))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("DETECTOR: {kind:?} callback failed: {e:#}"),
                Err(_) => error!("DETECTOR: {kind:?} callback panicked"),
            }
        }
    }
}
