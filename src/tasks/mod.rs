//! Task lifecycle contract and the table that builds tasks by kind.
//!
//! The scheduler is the only caller.  It runs `start` on its own thread
//! while `quit`, `on_idle` and `on_return` arrive from the detector's
//! thread, so every task is `Send + Sync` and cancellation is a signal
//! ([`CancelToken`]) that `start` observes, never a teardown.

pub mod simulated;
pub mod system;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::app::ports::RewardPort;
use crate::config::{ScheduleCondition, TaskProfile};
use crate::error::{Error, Result};

pub use self::simulated::SimulatedTrialTask;
pub use self::system::{ErrorTask, IdleTask};

// ---------------------------------------------------------------------------
// Task kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Idle,
    Error,
    SizeReductionStage,
    DetectStage,
    DiscriminateStage,
}

impl TaskKind {
    /// Idle and error tasks are run by the scheduler itself, never
    /// assigned to an animal.
    pub fn is_system(self) -> bool {
        matches!(self, Self::Idle | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Error => "error",
            Self::SizeReductionStage => "size_reduction_stage",
            Self::DetectStage => "detect_stage",
            Self::DiscriminateStage => "discriminate_stage",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Lifecycle contract
// ---------------------------------------------------------------------------

pub trait Task: Send + Sync {
    /// Run one trial (or, for system tasks, wait) until it completes or is
    /// cancelled.  Returns whether the trial was correct.
    fn start(&self) -> anyhow::Result<bool>;

    /// Cancel.  Safe from any thread; `start` returns promptly after.
    fn quit(&self);

    /// The animal left while `start` was running.
    fn on_idle(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// The same animal came back while `start` was running.
    fn on_return(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// This task's adaptation policy; `None` for system tasks.
    fn condition(&self) -> Option<ScheduleCondition> {
        None
    }
}

/// One-shot cancellation signal.
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: Mutex<bool>,
    cv: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        *self.cancelled.lock() = true;
        self.cv.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock()
    }

    /// Block until cancelled.
    pub fn wait(&self) {
        let mut cancelled = self.cancelled.lock();
        while !*cancelled {
            self.cv.wait(&mut cancelled);
        }
    }

    /// Block for at most `timeout`.  Returns `true` if cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut cancelled = self.cancelled.lock();
        let deadline = Instant::now() + timeout;
        while !*cancelled {
            if self.cv.wait_until(&mut cancelled, deadline).timed_out() {
                break;
            }
        }
        *cancelled
    }
}

// ---------------------------------------------------------------------------
// Task table
// ---------------------------------------------------------------------------

/// Everything a constructor gets to build one task instance.
pub struct TaskContext<'a> {
    pub kind: TaskKind,
    /// `None` for system tasks.
    pub animal: Option<&'a str>,
    pub level: u32,
    /// `None` when the config has no profile for `kind`.
    pub profile: Option<&'a TaskProfile>,
    pub rewarder: &'a Arc<dyn RewardPort>,
}

pub type TaskConstructor = Box<dyn Fn(&TaskContext<'_>) -> Result<Arc<dyn Task>> + Send + Sync>;

/// Maps each [`TaskKind`] to a constructor.  A fresh instance is built for
/// every turn and discarded afterwards.
pub struct TaskTable {
    constructors: HashMap<TaskKind, TaskConstructor>,
    profiles: BTreeMap<TaskKind, TaskProfile>,
    rewarder: Arc<dyn RewardPort>,
}

impl TaskTable {
    /// An empty table.
    pub fn new(profiles: BTreeMap<TaskKind, TaskProfile>, rewarder: Arc<dyn RewardPort>) -> Self {
        Self {
            constructors: HashMap::new(),
            profiles,
            rewarder,
        }
    }

    /// System tasks plus a [`SimulatedTrialTask`] for every training stage.
    pub fn with_defaults(
        profiles: BTreeMap<TaskKind, TaskProfile>,
        rewarder: Arc<dyn RewardPort>,
    ) -> Self {
        let mut table = Self::new(profiles, rewarder);
        table.register(TaskKind::Idle, Box::new(idle_task));
        table.register(TaskKind::Error, Box::new(error_task));
        for kind in [
            TaskKind::SizeReductionStage,
            TaskKind::DetectStage,
            TaskKind::DiscriminateStage,
        ] {
            table.register(kind, Box::new(simulated_task));
        }
        table
    }

    /// Install or replace the constructor for `kind`.
    pub fn register(&mut self, kind: TaskKind, constructor: TaskConstructor) {
        self.constructors.insert(kind, constructor);
    }

    pub fn create(&self, kind: TaskKind, animal: Option<&str>, level: u32) -> Result<Arc<dyn Task>> {
        let constructor = self
            .constructors
            .get(&kind)
            .ok_or_else(|| Error::Task(format!("no task registered for {kind}")))?;
        constructor(&TaskContext {
            kind,
            animal,
            level,
            profile: self.profiles.get(&kind),
            rewarder: &self.rewarder,
        })
    }
}

fn idle_task(_: &TaskContext<'_>) -> Result<Arc<dyn Task>> {
    Ok(Arc::new(IdleTask::new()))
}

fn error_task(_: &TaskContext<'_>) -> Result<Arc<dyn Task>> {
    Ok(Arc::new(ErrorTask::new()))
}

fn simulated_task(ctx: &TaskContext<'_>) -> Result<Arc<dyn Task>> {
    Ok(Arc::new(SimulatedTrialTask::from_context(ctx)?))
}
