//! Headless stand-in for a stimulus/response trial.
//!
//! Each `start` waits out the level's trial duration, then draws the
//! outcome with the level's success probability.  A correct trial
//! dispenses a reward.  Level parameters come from the task profile:
//!
//! ```json
//! { "params": { "reward_ms": 500 },
//!   "levels": [ { "success_probability": 0.8, "trial_ms": 1000 } ] }
//! ```

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use rand::Rng;
use serde::Deserialize;

use super::{CancelToken, Task, TaskContext};
use crate::app::ports::RewardPort;
use crate::config::ScheduleCondition;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct LevelParams {
    success_probability: f64,
    trial_ms: u64,
}

impl Default for LevelParams {
    fn default() -> Self {
        Self {
            success_probability: 0.5,
            trial_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct TaskParams {
    reward_ms: u32,
}

impl Default for TaskParams {
    fn default() -> Self {
        Self { reward_ms: 500 }
    }
}

pub struct SimulatedTrialTask {
    animal: String,
    level: u32,
    success_probability: f64,
    trial: Duration,
    reward_ms: u32,
    condition: Option<ScheduleCondition>,
    rewarder: Arc<dyn RewardPort>,
    token: CancelToken,
}

impl SimulatedTrialTask {
    pub fn new(
        animal: impl Into<String>,
        level: u32,
        success_probability: f64,
        trial: Duration,
        condition: Option<ScheduleCondition>,
        rewarder: Arc<dyn RewardPort>,
    ) -> Self {
        Self {
            animal: animal.into(),
            level,
            success_probability: success_probability.clamp(0.0, 1.0),
            trial,
            reward_ms: TaskParams::default().reward_ms,
            condition,
            rewarder,
            token: CancelToken::new(),
        }
    }

    /// Build from the task table context.  A level beyond the profile's
    /// table reuses the last entry.
    pub fn from_context(ctx: &TaskContext<'_>) -> Result<Self> {
        let bad = |e: serde_json::Error| Error::Task(format!("{} params: {e}", ctx.kind));

        let (task_params, level_params, condition) = match ctx.profile {
            Some(profile) => {
                let task_params = if profile.params.is_null() {
                    TaskParams::default()
                } else {
                    TaskParams::deserialize(&profile.params).map_err(bad)?
                };
                let level_params = match profile
                    .levels
                    .get(ctx.level as usize)
                    .or_else(|| profile.levels.last())
                {
                    Some(v) => LevelParams::deserialize(v).map_err(bad)?,
                    None => LevelParams::default(),
                };
                (task_params, level_params, profile.condition.clone())
            }
            None => (TaskParams::default(), LevelParams::default(), None),
        };

        let mut task = Self::new(
            ctx.animal.unwrap_or_default(),
            ctx.level,
            level_params.success_probability,
            Duration::from_millis(level_params.trial_ms),
            condition,
            Arc::clone(ctx.rewarder),
        );
        task.reward_ms = task_params.reward_ms;
        Ok(task)
    }
}

impl Task for SimulatedTrialTask {
    fn start(&self) -> anyhow::Result<bool> {
        debug!(
            "TASK: {} level {} trial ({:?}, p={:.2})",
            self.animal, self.level, self.trial, self.success_probability
        );
        if self.token.wait_timeout(self.trial) {
            info!("TASK: trial for {} cancelled", self.animal);
            return Ok(false);
        }
        let correct = rand::thread_rng().gen_bool(self.success_probability);
        if correct {
            self.rewarder.give_reward(self.reward_ms);
        }
        Ok(correct)
    }

    fn quit(&self) {
        self.token.cancel();
    }

    /// Nobody left to respond; end the trial.
    fn on_idle(&self) -> anyhow::Result<()> {
        self.token.cancel();
        Ok(())
    }

    fn condition(&self) -> Option<ScheduleCondition> {
        self.condition.clone()
    }
}
