//! Trial scheduler — the rig's control loop.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  run loop (scheduler thread)                                │
//! │  ┌──────────┬──────────────────────────────────────────┐    │
//! │  │ IDLE     │ run IdleTask until cancelled             │    │
//! │  │ SCHEDULE │ build task for animal (task, level),     │    │
//! │  │          │ run one trial, score, adapt difficulty   │    │
//! │  │ ERROR    │ run ErrorTask until cancelled            │    │
//! │  └──────────┴──────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!        ▲ state / selected animal / cancel
//!        │
//!  detector callbacks (detector thread)      operator commands
//!  entered/changed ─▶ SCHEDULE + quit        advance task / level
//!  returned        ─▶ SCHEDULE + on_return   quit
//!  left            ─▶ IDLE + on_idle
//!  error           ─▶ ERROR + quit
//! ```
//!
//! Shared state lives behind one mutex.  The lock is never held across a
//! task call, a detector call or any I/O: handlers decide under the lock,
//! then act (cancel, persist, log) after releasing it.

pub mod difficulty;
pub mod history;
pub mod state;

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::{Mutex, MutexGuard};

use self::difficulty::Adjustment;
use self::history::{HistoryEvent, HistoryRecord};
pub use self::state::{AnimalState, RunningState};
use crate::app::commands::OperatorCommand;
use crate::app::ports::{ConfigPort, HistorySink};
use crate::config::SessionConfig;
use crate::detector::{Detector, EventKind};
use crate::error::Result;
use crate::tasks::{Task, TaskKind, TaskTable};

/// Back-off before retrying a system task that could not be built.
const SYSTEM_TASK_RETRY: Duration = Duration::from_millis(200);

// ---------------------------------------------------------------------------
// Run-loop table
// ---------------------------------------------------------------------------

/// One row per run state: what a loop turn does in that state.
struct StateStep {
    state: RunningState,
    name: &'static str,
    run: fn(&Inner),
}

const STEPS: [StateStep; RunningState::COUNT] = [
    StateStep {
        state: RunningState::Idle,
        name: "idle",
        run: run_idle,
    },
    StateStep {
        state: RunningState::Schedule,
        name: "schedule",
        run: run_schedule,
    },
    StateStep {
        state: RunningState::Error,
        name: "error",
        run: run_error,
    },
];

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Shared {
    running: bool,
    state: RunningState,
    animals: BTreeMap<String, AnimalState>,
    selected: Option<String>,
    current_task: Option<Arc<dyn Task>>,
    /// The scheduler cancelled `current_task`; its feedback is not scored.
    cancelled: bool,
}

impl Shared {
    fn selected_animal(&self) -> Option<&AnimalState> {
        self.selected.as_ref().and_then(|n| self.animals.get(n))
    }

    /// Mark the running task cancelled and hand it back for `quit()`.
    fn cancel_current(&mut self) -> Option<Arc<dyn Task>> {
        let task = self.current_task.clone()?;
        self.cancelled = true;
        Some(task)
    }

    /// Mark `task` cancelled if it is still the running one.  A task that
    /// has already been replaced is left alone.
    fn cancel_if_current(&mut self, task: &Arc<dyn Task>) -> bool {
        let current = self
            .current_task
            .as_ref()
            .is_some_and(|running| Arc::ptr_eq(running, task));
        if current {
            self.cancelled = true;
        }
        current
    }

    /// Idempotent: no record when already in `to`.
    fn transition(&mut self, to: RunningState, reason: &str) -> Option<HistoryRecord> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        info!("SCHED: {from} -> {to} ({reason})");
        Some(HistoryRecord::state_change(
            from,
            to,
            reason,
            self.running,
            self.selected_animal(),
        ))
    }
}

/// Side effects decided under the lock, carried out after it is released.
#[derive(Default)]
struct Effects {
    records: Vec<HistoryRecord>,
    /// `(animal, task, level)` to write back to config.
    progress: Option<(String, TaskKind, u32)>,
}

impl Effects {
    fn record(record: Option<HistoryRecord>) -> Self {
        Self {
            records: record.into_iter().collect(),
            progress: None,
        }
    }
}

struct Inner {
    detector: Arc<dyn Detector>,
    tasks: TaskTable,
    config_port: Arc<dyn ConfigPort>,
    history: Arc<dyn HistorySink>,
    config: Mutex<SessionConfig>,
    shared: Mutex<Shared>,
}

// ---------------------------------------------------------------------------
// Public handle
// ---------------------------------------------------------------------------

/// Cloneable handle to one scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Build per-animal state from `config` and subscribe to `detector`.
    pub fn new(
        config: SessionConfig,
        detector: Arc<dyn Detector>,
        tasks: TaskTable,
        config_port: Arc<dyn ConfigPort>,
        history: Arc<dyn HistorySink>,
    ) -> Self {
        let animals = config
            .animals
            .values()
            .map(|a| (a.name.clone(), AnimalState::from_config(a)))
            .collect();

        let inner = Arc::new(Inner {
            detector,
            tasks,
            config_port,
            history,
            config: Mutex::new(config),
            shared: Mutex::new(Shared {
                running: false,
                state: RunningState::Idle,
                animals,
                selected: None,
                current_task: None,
                cancelled: false,
            }),
        });
        register_handlers(&inner);
        Self { inner }
    }

    /// Start the detector and run the control loop until [`quit`](Self::quit).
    pub fn run(&self) -> Result<()> {
        self.inner.lock().running = true;
        info!("SCHED: starting");
        if let Err(e) = self.inner.detector.start() {
            error!("SCHED: detector failed to start: {e}");
            self.inner.lock().running = false;
            return Err(e);
        }

        loop {
            let state = {
                let shared = self.inner.lock();
                if !shared.running {
                    break;
                }
                shared.state
            };
            let step = &STEPS[state as usize];
            debug_assert_eq!(step.state, state);
            debug!("SCHED: loop turn in {}", step.name);
            (step.run)(&self.inner);
        }

        info!("SCHED: stopped");
        Ok(())
    }

    /// End the session: reset counters, save config, stop the detector
    /// and cancel the running task.  The loop exits after its current turn.
    pub fn quit(&self) {
        let task = {
            let mut shared = self.inner.lock();
            for animal in shared.animals.values_mut() {
                animal.reset();
            }
            shared.running = false;
            shared.cancel_current()
        };
        info!("SCHED: quitting");

        let snapshot = self.inner.config_snapshot();
        if let Err(e) = self.inner.config_port.save(&snapshot) {
            warn!("SCHED: config save failed on quit: {e}");
        }
        self.inner.detector.quit();
        if let Some(task) = task {
            task.quit();
        }
    }

    pub fn handle_command(&self, command: OperatorCommand) {
        info!("SCHED: operator command {command:?}");
        match command {
            OperatorCommand::AdvanceTask => self.inner.manual_adjust(difficulty::advance_task),
            OperatorCommand::AdvanceLevel => {
                self.inner.manual_adjust(difficulty::increase_difficulty);
            }
            OperatorCommand::Quit => self.quit(),
        }
    }

    pub fn state(&self) -> RunningState {
        self.inner.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    pub fn selected_animal(&self) -> Option<String> {
        self.inner.lock().selected.clone()
    }

    pub fn animal(&self, name: &str) -> Option<AnimalState> {
        self.inner.lock().animals.get(name).cloned()
    }

    /// Current in-memory configuration, including persisted progress.
    pub fn config(&self) -> SessionConfig {
        self.inner.config_snapshot()
    }
}

// ---------------------------------------------------------------------------
// Detector event handlers (detector thread)
// ---------------------------------------------------------------------------

fn register_handlers(inner: &Arc<Inner>) {
    let handlers: [(EventKind, fn(&Inner, &str)); 5] = [
        (EventKind::AnimalEntered, |i, id| i.on_selected(id, "animal_entered")),
        (EventKind::AnimalChanged, |i, id| i.on_selected(id, "animal_changed")),
        (EventKind::AnimalReturned, Inner::on_returned),
        (EventKind::AnimalLeft, Inner::on_left),
        (EventKind::ErrorDetected, |i, _| i.on_error()),
    ];
    for (kind, handler) in handlers {
        let weak: Weak<Inner> = Arc::downgrade(inner);
        inner.detector.register_event(
            kind,
            Box::new(move |id: &str| {
                if let Some(inner) = weak.upgrade() {
                    handler(&inner, id);
                }
                Ok(())
            }),
        );
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock()
    }

    fn config_snapshot(&self) -> SessionConfig {
        self.config.lock().clone()
    }

    /// Entered or changed: select the animal and restart scheduling.
    fn on_selected(&self, id: &str, reason: &str) {
        let (effects, task) = {
            let mut shared = self.lock();
            let mut effects = Effects::default();
            if let Some(animal) = shared.animals.get_mut(id) {
                animal.reset();
                shared.selected = Some(id.to_owned());
                effects.records.extend(shared.transition(RunningState::Schedule, reason));
            } else {
                warn!("SCHED: unknown animal {id:?}, deselecting");
                shared.selected = None;
                effects.records.extend(shared.transition(RunningState::Idle, "unknown_animal"));
            }
            (effects, shared.cancel_current())
        };
        self.apply(effects);
        if let Some(task) = task {
            task.quit();
        }
    }

    /// Same animal back: resume the running task in place.
    fn on_returned(&self, id: &str) {
        let (effects, task) = {
            let mut shared = self.lock();
            if !shared.animals.contains_key(id) {
                drop(shared);
                self.on_selected(id, "animal_returned");
                return;
            }
            if let Some(animal) = shared.animals.get_mut(id) {
                animal.reset();
            }
            shared.selected = Some(id.to_owned());
            let record = shared.transition(RunningState::Schedule, "animal_returned");
            (Effects::record(record), shared.current_task.clone())
        };
        self.apply(effects);
        if let Some(task) = task {
            if let Err(e) = task.on_return() {
                self.cancel_after_failed_hook(&task, "on_return", &e);
            }
        }
    }

    fn on_left(&self, _id: &str) {
        let (effects, task) = {
            let mut shared = self.lock();
            let record = shared.transition(RunningState::Idle, "animal_left");
            shared.selected = None;
            (Effects::record(record), shared.current_task.clone())
        };
        self.apply(effects);
        if let Some(task) = task {
            if let Err(e) = task.on_idle() {
                self.cancel_after_failed_hook(&task, "on_idle", &e);
            }
        }
    }

    /// The trial may have finished and been replaced while `hook` ran; only
    /// the task the hook ran on is cancelled.
    fn cancel_after_failed_hook(&self, task: &Arc<dyn Task>, hook: &str, e: &anyhow::Error) {
        if self.lock().cancel_if_current(task) {
            warn!("SCHED: {hook} failed: {e:#}; cancelling task");
            task.quit();
        } else {
            warn!("SCHED: {hook} failed: {e:#}; task already finished");
        }
    }

    fn on_error(&self) {
        let (effects, task) = {
            let mut shared = self.lock();
            let record = shared.transition(RunningState::Error, "detector_error");
            shared.selected = None;
            (Effects::record(record), shared.cancel_current())
        };
        self.apply(effects);
        if let Some(task) = task {
            task.quit();
        }
    }

    // -----------------------------------------------------------------------
    // Difficulty changes
    // -----------------------------------------------------------------------

    fn manual_adjust(&self, adjust: fn(&mut AnimalState) -> Adjustment) {
        let (effects, task) = {
            let mut shared = self.lock();
            if shared.state != RunningState::Schedule {
                warn!("SCHED: manual override ignored outside SCHEDULE");
                return;
            }
            let Some(name) = shared.selected.clone() else {
                warn!("SCHED: manual override ignored, no animal selected");
                return;
            };
            let task = shared.cancel_current();
            let effects = self.adjust_animal(&mut shared, &name, adjust);
            if effects.progress.is_none() {
                info!("SCHED: {name} has nowhere to advance to");
            }
            (effects, task)
        };
        self.apply(effects);
        if let Some(task) = task {
            task.quit();
        }
    }

    /// Score one finished trial for `name`.  Nothing is scored once the
    /// session has quit, so the reset counters stay zero.
    fn score_trial(&self, name: &str, correct: bool) {
        let effects = {
            let mut shared = self.lock();
            if !shared.running {
                return;
            }
            self.adjust_animal(&mut shared, name, |a| difficulty::record_and_adapt(a, correct))
        };
        self.apply(effects);
    }

    fn adjust_animal(
        &self,
        shared: &mut Shared,
        name: &str,
        adjust: impl FnOnce(&mut AnimalState) -> Adjustment,
    ) -> Effects {
        let (state, running) = (shared.state, shared.running);
        let Some(animal) = shared.animals.get_mut(name) else {
            return Effects::default();
        };

        let adjustment = adjust(animal);
        debug!(
            "SCHED: {name} trials={} window={} correct={} rate={:.2}",
            animal.trial_id,
            animal.current_level_trial_id,
            animal.correct_trial,
            animal.correct_rate()
        );

        let record = match adjustment {
            Adjustment::Unchanged => return Effects::default(),
            Adjustment::LevelChanged { previous_level } => {
                info!("SCHED: {name} level {previous_level} -> {}", animal.level);
                HistoryRecord {
                    previous_level: Some(previous_level),
                    ..HistoryRecord::new(HistoryEvent::LevelChange, state, running, Some(&*animal))
                }
            }
            Adjustment::TaskSwitched {
                previous_task,
                previous_level,
            } => {
                info!("SCHED: {name} task {previous_task} -> {}", animal.task);
                HistoryRecord {
                    previous_task: Some(previous_task),
                    previous_level: Some(previous_level),
                    ..HistoryRecord::new(HistoryEvent::TaskSwitch, state, running, Some(&*animal))
                }
            }
        };
        Effects {
            records: vec![record],
            progress: Some((name.to_owned(), animal.task, animal.level)),
        }
    }

    /// Persist and log.  Failures are reported, never propagated.
    fn apply(&self, effects: Effects) {
        if let Some((name, task, level)) = effects.progress {
            let snapshot = {
                let mut config = self.config.lock();
                config.set_progress(&name, task, level);
                config.clone()
            };
            if let Err(e) = self.config_port.save(&snapshot) {
                warn!("SCHED: config save failed: {e}");
            }
        }
        for record in &effects.records {
            if let Err(e) = self.history.append(record) {
                warn!("SCHED: history append failed: {e}");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Task execution (scheduler thread)
    // -----------------------------------------------------------------------

    /// Make `task` current if the scheduler is still running and still in
    /// `expected`.  A trial must also still match its animal's selection,
    /// task and level; an operator override during the build invalidates it.
    fn install(&self, expected: RunningState, trial: Option<&Trial>, task: &Arc<dyn Task>) -> bool {
        let mut shared = self.lock();
        if !shared.running || shared.state != expected {
            return false;
        }
        if let Some(trial) = trial {
            if shared.selected.as_deref() != Some(trial.name.as_str()) {
                return false;
            }
            let Some(animal) = shared.animals.get_mut(&trial.name) else {
                return false;
            };
            if (animal.task, animal.level) != (trial.kind, trial.level) {
                debug!(
                    "SCHED: {} moved to {} level {} during build, discarding {} level {}",
                    trial.name, animal.task, animal.level, trial.kind, trial.level
                );
                return false;
            }
            animal.condition = task.condition();
        }
        shared.current_task = Some(Arc::clone(task));
        shared.cancelled = false;
        true
    }

    /// Clear the current task; returns whether the scheduler cancelled it.
    fn uninstall(&self) -> bool {
        let mut shared = self.lock();
        shared.current_task = None;
        std::mem::take(&mut shared.cancelled)
    }
}

// ---------------------------------------------------------------------------
// Loop steps
// ---------------------------------------------------------------------------

fn run_idle(inner: &Inner) {
    run_system_task(inner, RunningState::Idle, TaskKind::Idle);
}

fn run_error(inner: &Inner) {
    run_system_task(inner, RunningState::Error, TaskKind::Error);
}

fn run_system_task(inner: &Inner, expected: RunningState, kind: TaskKind) {
    let task = match inner.tasks.create(kind, None, 0) {
        Ok(task) => task,
        Err(e) => {
            error!("SCHED: cannot build {kind} task: {e}");
            thread::sleep(SYSTEM_TASK_RETRY);
            return;
        }
    };
    if !inner.install(expected, None, &task) {
        return;
    }
    if let Err(e) = task.start() {
        error!("SCHED: {kind} task failed: {e:#}");
    }
    inner.uninstall();
}

/// What a schedule turn built its trial for.
struct Trial {
    name: String,
    kind: TaskKind,
    level: u32,
}

fn run_schedule(inner: &Inner) {
    let trial = {
        let mut shared = inner.lock();
        if shared.state != RunningState::Schedule {
            return;
        }
        let selected = shared.selected_animal().map(|a| Trial {
            name: a.name.clone(),
            kind: a.task,
            level: a.level,
        });
        match selected {
            Some(trial) => trial,
            None => {
                warn!("SCHED: SCHEDULE with no animal selected");
                let record = shared.transition(RunningState::Idle, "no_animal_selected");
                drop(shared);
                inner.apply(Effects::record(record));
                return;
            }
        }
    };
    let Trial { name, kind, level } = &trial;

    let task = match inner.tasks.create(*kind, Some(name.as_str()), *level) {
        Ok(task) => task,
        Err(e) => {
            error!("SCHED: cannot build {kind} level {level} for {name}: {e}");
            let record = inner.lock().transition(RunningState::Error, "task_unavailable");
            inner.apply(Effects::record(record));
            return;
        }
    };
    // Never started, so dropping it is enough.
    if !inner.install(RunningState::Schedule, Some(&trial), &task) {
        return;
    }

    debug!("SCHED: {name} starting {kind} level {level}");
    let outcome = task.start();
    let cancelled = inner.uninstall();

    match outcome {
        Ok(_) if cancelled => debug!("SCHED: cancelled trial for {name} not scored"),
        Ok(correct) => inner.score_trial(name, correct),
        Err(e) => error!("SCHED: {kind} task for {name} failed: {e:#}"),
    }
}
