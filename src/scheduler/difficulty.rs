//! Rolling-window difficulty adaptation.
//!
//! ```text
//!  trial done ──▶ record ──▶ no condition? ──▶ Unchanged
//!                              │
//!                   window < evaluation_interval ──▶ Unchanged
//!                              │
//!        rate >= increase ─────┼───── rate <= decrease
//!              │               │              │
//!   level < count-1: level+1   │    level > 0: level-1
//!   else next_task @ level 0   │    else Unchanged
//!                           Unchanged (keep accumulating)
//! ```
//!
//! Every level or task change zeroes the animal's trial counters.  At the
//! last level of a task with no successor nothing changes and the window
//! keeps growing.

use super::state::AnimalState;
use crate::tasks::TaskKind;

/// What an adaptation step changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Unchanged,
    LevelChanged {
        previous_level: u32,
    },
    TaskSwitched {
        previous_task: TaskKind,
        previous_level: u32,
    },
}

impl Adjustment {
    pub fn is_change(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Count one finished trial and adapt if its window is complete.
pub fn record_and_adapt(animal: &mut AnimalState, correct: bool) -> Adjustment {
    animal.record_trial(correct);
    evaluate(animal)
}

/// Apply the threshold rules to the current window.
pub fn evaluate(animal: &mut AnimalState) -> Adjustment {
    let Some(condition) = animal.condition.as_ref() else {
        return Adjustment::Unchanged;
    };
    if animal.current_level_trial_id < condition.evaluation_interval {
        return Adjustment::Unchanged;
    }

    let rate = animal.correct_rate();
    if rate >= condition.difficulty_increase_threshold {
        increase_difficulty(animal)
    } else if rate <= condition.difficulty_decrease_threshold {
        decrease_difficulty(animal)
    } else {
        Adjustment::Unchanged
    }
}

/// Next level, or the next task once the last level is passed.  At the
/// final level of a task with no successor nothing changes.
pub fn increase_difficulty(animal: &mut AnimalState) -> Adjustment {
    let Some(condition) = animal.condition.as_ref() else {
        return Adjustment::Unchanged;
    };
    let previous_level = animal.level;

    let adjustment = if animal.level.saturating_add(1) < condition.level_count {
        animal.level += 1;
        Adjustment::LevelChanged { previous_level }
    } else if let Some(next) = condition.next_task {
        let previous_task = animal.task;
        animal.task = next;
        animal.level = 0;
        Adjustment::TaskSwitched {
            previous_task,
            previous_level,
        }
    } else {
        return Adjustment::Unchanged;
    };
    animal.reset();
    adjustment
}

pub fn decrease_difficulty(animal: &mut AnimalState) -> Adjustment {
    if animal.level == 0 {
        return Adjustment::Unchanged;
    }
    let previous_level = animal.level;
    animal.level -= 1;
    animal.reset();
    Adjustment::LevelChanged { previous_level }
}

/// Jump to the condition's `next_task` at level 0, if it has one.
pub fn advance_task(animal: &mut AnimalState) -> Adjustment {
    let Some(next) = animal.condition.as_ref().and_then(|c| c.next_task) else {
        return Adjustment::Unchanged;
    };
    let adjustment = Adjustment::TaskSwitched {
        previous_task: animal.task,
        previous_level: animal.level,
    };
    animal.task = next;
    animal.level = 0;
    animal.reset();
    adjustment
}
