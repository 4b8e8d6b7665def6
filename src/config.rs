//! Session configuration.
//!
//! Everything the rig reads at startup: which detector to run, where to
//! write history, which animals are enrolled and at which task/level, and
//! each task's adaptation policy.  Loaded and persisted through
//! [`ConfigPort`](crate::app::ports::ConfigPort); the scheduler writes back
//! only per-animal `task`/`level`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::detector::mock::{MOCK_PRIMARY, MOCK_SECONDARY};
use crate::error::ConfigError;
use crate::tasks::TaskKind;

/// Default reader line speed.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

// ---------------------------------------------------------------------------
// Detector settings
// ---------------------------------------------------------------------------

/// Backend selector for the detector factory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    #[default]
    Mock,
    DorsetLid665v42,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    pub kind: DetectorKind,
    /// Serial device path, required for the RFID reader.
    pub port: Option<String>,
    pub baud_rate: u32,
    /// Report absence after this long without a tag read.  `None` disables.
    pub presence_timeout_ms: Option<u64>,
    /// How long a departed animal counts as "returning".  0 disables.
    pub return_window_ms: u64,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            kind: DetectorKind::Mock,
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            presence_timeout_ms: Some(2_000),
            return_window_ms: 10_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Animals and tasks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimalConfig {
    pub name: String,
    pub task: TaskKind,
    #[serde(default)]
    pub level: u32,
}

/// Per-task adaptation policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleCondition {
    pub level_count: u32,
    /// Trials per evaluation window.
    pub evaluation_interval: u32,
    /// Correct-rate at or above which difficulty increases.
    pub difficulty_increase_threshold: f64,
    /// Correct-rate at or below which difficulty decreases.
    pub difficulty_decrease_threshold: f64,
    /// Task to advance to after the last level.
    pub next_task: Option<TaskKind>,
}

impl Default for ScheduleCondition {
    fn default() -> Self {
        Self {
            level_count: 1,
            evaluation_interval: 20,
            difficulty_increase_threshold: 0.8,
            difficulty_decrease_threshold: 0.45,
            next_task: None,
        }
    }
}

/// Task-level configuration: policy, task-wide parameters and one
/// parameter object per difficulty level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskProfile {
    pub condition: Option<ScheduleCondition>,
    pub params: serde_json::Value,
    pub levels: Vec<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub rig_id: String,
    pub experimenter: String,
    /// Incremented once per run by the binary.
    pub session_id: u32,
    /// Root of the per-session history tree.
    pub data_dir: PathBuf,
    pub detector: DetectorSettings,
    pub animals: BTreeMap<String, AnimalConfig>,
    pub tasks: BTreeMap<TaskKind, TaskProfile>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let animals = [MOCK_PRIMARY, MOCK_SECONDARY]
            .into_iter()
            .map(|name| {
                (
                    name.to_owned(),
                    AnimalConfig {
                        name: name.to_owned(),
                        task: TaskKind::SizeReductionStage,
                        level: 0,
                    },
                )
            })
            .collect();

        Self {
            rig_id: "rig_001".into(),
            experimenter: String::new(),
            session_id: 0,
            data_dir: PathBuf::from("data"),
            detector: DetectorSettings::default(),
            animals,
            tasks: default_task_profiles(),
        }
    }
}

fn stage(
    levels: &[(f64, u64)],
    next_task: Option<TaskKind>,
) -> TaskProfile {
    TaskProfile {
        condition: Some(ScheduleCondition {
            level_count: levels.len() as u32,
            next_task,
            ..ScheduleCondition::default()
        }),
        params: serde_json::json!({ "reward_ms": 500 }),
        levels: levels
            .iter()
            .map(|&(p, trial_ms)| serde_json::json!({ "success_probability": p, "trial_ms": trial_ms }))
            .collect(),
    }
}

fn default_task_profiles() -> BTreeMap<TaskKind, TaskProfile> {
    BTreeMap::from([
        (
            TaskKind::SizeReductionStage,
            stage(&[(0.9, 800), (0.8, 1000), (0.7, 1200)], Some(TaskKind::DetectStage)),
        ),
        (
            TaskKind::DetectStage,
            stage(&[(0.8, 1000), (0.65, 1500)], Some(TaskKind::DiscriminateStage)),
        ),
        (TaskKind::DiscriminateStage, stage(&[(0.6, 2000)], None)),
    ])
}

impl SessionConfig {
    pub fn condition_for(&self, kind: TaskKind) -> Option<&ScheduleCondition> {
        self.tasks.get(&kind).and_then(|p| p.condition.as_ref())
    }

    /// Record an animal's current task and level.
    pub fn set_progress(&mut self, name: &str, task: TaskKind, level: u32) {
        self.animals
            .entry(name.to_owned())
            .and_modify(|a| {
                a.task = task;
                a.level = level;
            })
            .or_insert_with(|| AnimalConfig {
                name: name.to_owned(),
                task,
                level,
            });
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Range-check a configuration before it is persisted or used.
pub fn validate_config(cfg: &SessionConfig) -> Result<(), ConfigError> {
    for (kind, profile) in &cfg.tasks {
        if kind.is_system() && profile.condition.is_some() {
            return Err(ConfigError::ValidationFailed(
                "system tasks (idle, error) cannot carry a schedule condition",
            ));
        }
        if let Some(c) = &profile.condition {
            validate_condition(c)?;
        }
    }

    for (key, animal) in &cfg.animals {
        if key != &animal.name {
            return Err(ConfigError::ValidationFailed(
                "animals: map key must equal the animal's name",
            ));
        }
        if animal.task.is_system() {
            return Err(ConfigError::ValidationFailed(
                "animals: task must be a training task, not idle/error",
            ));
        }
    }

    if cfg.detector.kind == DetectorKind::DorsetLid665v42
        && cfg.detector.port.as_deref().is_none_or(str::is_empty)
    {
        return Err(ConfigError::ValidationFailed(
            "detector.port is required for dorset_lid665v42",
        ));
    }
    if cfg.detector.baud_rate == 0 {
        return Err(ConfigError::ValidationFailed("detector.baud_rate must be > 0"));
    }
    if cfg.detector.presence_timeout_ms == Some(0) {
        return Err(ConfigError::ValidationFailed(
            "detector.presence_timeout_ms must be > 0 when set",
        ));
    }
    Ok(())
}

fn validate_condition(c: &ScheduleCondition) -> Result<(), ConfigError> {
    if c.level_count < 1 {
        return Err(ConfigError::ValidationFailed("condition.level_count must be >= 1"));
    }
    if c.evaluation_interval < 1 {
        return Err(ConfigError::ValidationFailed(
            "condition.evaluation_interval must be >= 1",
        ));
    }
    if !(0.0..=1.0).contains(&c.difficulty_increase_threshold)
        || !(0.0..=1.0).contains(&c.difficulty_decrease_threshold)
    {
        return Err(ConfigError::ValidationFailed(
            "condition thresholds must be within 0.0-1.0",
        ));
    }
    if c.difficulty_decrease_threshold >= c.difficulty_increase_threshold {
        return Err(ConfigError::ValidationFailed(
            "condition.difficulty_decrease_threshold must be < difficulty_increase_threshold",
        ));
    }
    if c.next_task.is_some_and(TaskKind::is_system) {
        return Err(ConfigError::ValidationFailed(
            "condition.next_task must be a training task",
        ));
    }
    Ok(())
}
