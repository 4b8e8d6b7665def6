//! Scheduler run state and per-animal training state.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{AnimalConfig, ScheduleCondition};
use crate::tasks::TaskKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum RunningState {
    Idle = 0,
    Schedule = 1,
    Error = 2,
}

impl RunningState {
    pub const COUNT: usize = 3;

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Schedule => "SCHEDULE",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for RunningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Training progress for one animal.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimalState {
    pub name: String,
    pub task: TaskKind,
    pub level: u32,
    /// Trials since the last reset.
    pub trial_id: u32,
    /// Trials in the current evaluation window.
    pub current_level_trial_id: u32,
    pub correct_trial: u32,
    /// Policy of the task currently running for this animal.
    pub condition: Option<ScheduleCondition>,
}

impl AnimalState {
    pub fn new(name: impl Into<String>, task: TaskKind, level: u32) -> Self {
        Self {
            name: name.into(),
            task,
            level,
            trial_id: 0,
            current_level_trial_id: 0,
            correct_trial: 0,
            condition: None,
        }
    }

    pub fn from_config(cfg: &AnimalConfig) -> Self {
        Self::new(cfg.name.clone(), cfg.task, cfg.level)
    }

    /// `correct_trial / current_level_trial_id`, 0 before any trial.
    pub fn correct_rate(&self) -> f64 {
        if self.current_level_trial_id == 0 {
            0.0
        } else {
            f64::from(self.correct_trial) / f64::from(self.current_level_trial_id)
        }
    }

    pub fn record_trial(&mut self, correct: bool) {
        self.trial_id += 1;
        self.current_level_trial_id += 1;
        if correct {
            self.correct_trial += 1;
        }
    }

    /// Zero the trial counters; task, level and condition are kept.
    pub fn reset(&mut self) {
        self.trial_id = 0;
        self.current_level_trial_id = 0;
        self.correct_trial = 0;
    }
}
