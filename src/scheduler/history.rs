//! Scheduler history records.
//!
//! One record per state change, task switch or level change.  Fields that
//! do not apply are written as `null` so every line has the same shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::{AnimalState, RunningState};
use crate::tasks::TaskKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryEvent {
    StateChange,
    TaskSwitch,
    LevelChange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp: DateTime<Utc>,
    pub event: HistoryEvent,
    pub scheduler_state: RunningState,
    pub running: bool,
    pub animal_name: Option<String>,
    pub task: Option<TaskKind>,
    pub level: Option<u32>,
    pub trial_id: Option<u32>,
    pub current_level_trial_id: Option<u32>,
    pub correct_trial: Option<u32>,
    pub correct_rate: Option<f64>,
    pub previous_state: Option<RunningState>,
    pub new_state: Option<RunningState>,
    pub reason: Option<String>,
    pub previous_task: Option<TaskKind>,
    pub previous_level: Option<u32>,
}

impl HistoryRecord {
    pub fn new(
        event: HistoryEvent,
        scheduler_state: RunningState,
        running: bool,
        animal: Option<&AnimalState>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
            scheduler_state,
            running,
            animal_name: animal.map(|a| a.name.clone()),
            task: animal.map(|a| a.task),
            level: animal.map(|a| a.level),
            trial_id: animal.map(|a| a.trial_id),
            current_level_trial_id: animal.map(|a| a.current_level_trial_id),
            correct_trial: animal.map(|a| a.correct_trial),
            correct_rate: animal.map(AnimalState::correct_rate),
            previous_state: None,
            new_state: None,
            reason: None,
            previous_task: None,
            previous_level: None,
        }
    }

    pub fn state_change(
        from: RunningState,
        to: RunningState,
        reason: &str,
        running: bool,
        animal: Option<&AnimalState>,
    ) -> Self {
        Self {
            previous_state: Some(from),
            new_state: Some(to),
            reason: Some(reason.to_owned()),
            ..Self::new(HistoryEvent::StateChange, to, running, animal)
        }
    }
}
