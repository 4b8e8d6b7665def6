//! Scheduler integration tests: real scheduler loop, manual-trigger
//! detector, recorder tasks and in-memory ports.

use std::sync::atomic::Ordering;

use trainrig::app::commands::OperatorCommand;
use trainrig::detector::Detector;
use trainrig::detector::mock::{MOCK_PRIMARY, MOCK_SECONDARY};
use trainrig::scheduler::RunningState;
use trainrig::scheduler::history::HistoryEvent;
use trainrig::tasks::TaskKind;

use crate::mock_rig::{Rig, TrialMode, config_with_interval, wait_until};

// ── Adaptation ───────────────────────────────────────────────

#[test]
fn consistent_success_raises_level_and_persists_it() {
    let rig = Rig::with_config(config_with_interval(5), TrialMode::Instant(true));
    let handle = rig.spawn();

    assert!(wait_until(|| !rig.history.of_kind(HistoryEvent::LevelChange).is_empty()));
    rig.detector.leave();
    assert!(wait_until(|| rig.scheduler.state() == RunningState::Idle));

    let first = rig.history.of_kind(HistoryEvent::LevelChange)[0].clone();
    assert_eq!(first.animal_name.as_deref(), Some(MOCK_PRIMARY));
    assert_eq!(first.task, Some(TaskKind::SizeReductionStage));
    assert_eq!(first.previous_level, Some(0));
    assert_eq!(first.level, Some(1));
    assert_eq!(first.current_level_trial_id, Some(0));

    let entered = &rig.history.of_kind(HistoryEvent::StateChange)[0];
    assert_eq!(entered.previous_state, Some(RunningState::Idle));
    assert_eq!(entered.new_state, Some(RunningState::Schedule));
    assert_eq!(entered.reason.as_deref(), Some("animal_entered"));

    let saved = rig.store.saved.lock().unwrap()[0].clone();
    assert_eq!(saved.animals[MOCK_PRIMARY].level, 1);
    assert_eq!(saved.animals[MOCK_SECONDARY].level, 0);

    rig.shutdown(handle);
}

#[test]
fn history_failures_do_not_stop_scheduling() {
    let rig = Rig::with_config(config_with_interval(3), TrialMode::Instant(true));
    rig.history.fail.store(true, Ordering::SeqCst);
    let handle = rig.spawn();

    assert!(wait_until(|| {
        rig.scheduler
            .animal(MOCK_PRIMARY)
            .is_some_and(|a| a.level > 0 || a.task != TaskKind::SizeReductionStage)
    }));
    let before = rig.recorder.starts();
    assert!(wait_until(|| rig.recorder.starts() > before));
    assert!(rig.history.records.lock().unwrap().is_empty());

    rig.shutdown(handle);
}

// ── Departure and return ─────────────────────────────────────

#[test]
fn departure_idles_task_and_scores_its_feedback() {
    let rig = Rig::new(TrialMode::Blocking);
    let handle = rig.spawn();
    assert!(wait_until(|| rig.recorder.starts() == 1));

    rig.detector.leave();
    assert!(wait_until(|| rig.recorder.finishes() == 1));
    assert!(wait_until(|| rig.scheduler.animal(MOCK_PRIMARY).unwrap().trial_id == 1));

    assert_eq!(rig.scheduler.state(), RunningState::Idle);
    assert_eq!(rig.scheduler.selected_animal(), None);
    assert_eq!(rig.recorder.idles(), 1);
    assert_eq!(rig.recorder.quits(), 0);

    let left = rig.history.of_kind(HistoryEvent::StateChange);
    assert_eq!(left.last().unwrap().reason.as_deref(), Some("animal_left"));

    rig.shutdown(handle);
}

#[test]
fn failing_idle_hook_cancels_task_unscored() {
    let rig = Rig::new(TrialMode::Pausable);
    rig.recorder.fail_on_idle.store(true, Ordering::SeqCst);
    let handle = rig.spawn();
    assert!(wait_until(|| rig.recorder.starts() == 1));

    rig.detector.leave();
    assert!(wait_until(|| rig.recorder.finishes() == 1));

    assert_eq!(rig.recorder.quits(), 1);
    assert_eq!(rig.scheduler.animal(MOCK_PRIMARY).unwrap().trial_id, 0);
    assert_eq!(rig.scheduler.state(), RunningState::Idle);

    rig.shutdown(handle);
}

#[test]
fn quick_return_resumes_running_task() {
    let rig = Rig::new(TrialMode::Pausable);
    let handle = rig.spawn();
    assert!(wait_until(|| rig.recorder.starts() == 1));

    rig.detector.leave();
    assert!(wait_until(|| rig.scheduler.state() == RunningState::Idle));
    rig.detector.enter(MOCK_PRIMARY);
    assert!(wait_until(|| rig.recorder.returns() == 1));

    assert_eq!(rig.scheduler.state(), RunningState::Schedule);
    assert_eq!(rig.scheduler.selected_animal().as_deref(), Some(MOCK_PRIMARY));
    assert_eq!(rig.recorder.starts(), 1);
    assert_eq!(rig.recorder.quits(), 0);
    let back = rig.history.of_kind(HistoryEvent::StateChange);
    assert_eq!(back.last().unwrap().reason.as_deref(), Some("animal_returned"));

    rig.shutdown(handle);
}

#[test]
fn failing_return_hook_restarts_trial() {
    let rig = Rig::new(TrialMode::Pausable);
    rig.recorder.fail_on_return.store(true, Ordering::SeqCst);
    let handle = rig.spawn();
    assert!(wait_until(|| rig.recorder.starts() == 1));

    rig.detector.leave();
    assert!(wait_until(|| rig.scheduler.state() == RunningState::Idle));
    rig.detector.enter(MOCK_PRIMARY);

    assert!(wait_until(|| rig.recorder.starts() == 2));
    assert_eq!(rig.recorder.quits(), 1);
    assert_eq!(rig.scheduler.animal(MOCK_PRIMARY).unwrap().trial_id, 0);

    rig.shutdown(handle);
}

#[test]
fn return_hook_failing_after_replacement_spares_new_trial() {
    let rig = Rig::new(TrialMode::Pausable);
    rig.recorder.late_return_failure.store(true, Ordering::SeqCst);
    let handle = rig.spawn();
    assert!(wait_until(|| rig.recorder.starts() == 1));

    rig.detector.leave();
    assert!(wait_until(|| rig.scheduler.state() == RunningState::Idle));
    // The first trial ends and the next one starts before the hook fails.
    rig.detector.enter(MOCK_PRIMARY);
    assert_eq!(rig.recorder.starts(), 2);
    assert_eq!(rig.recorder.quits(), 0);
    assert!(wait_until(|| rig.scheduler.animal(MOCK_PRIMARY).unwrap().trial_id == 1));

    rig.recorder.finish_latest();
    assert!(wait_until(|| rig.scheduler.animal(MOCK_PRIMARY).unwrap().trial_id == 2));
    assert_eq!(rig.recorder.quits(), 0);

    rig.shutdown(handle);
}

// ── Animal changes and faults ────────────────────────────────

#[test]
fn changed_animal_cancels_trial_without_scoring() {
    let rig = Rig::new(TrialMode::Blocking);
    let handle = rig.spawn();
    assert!(wait_until(|| rig.recorder.starts() == 1));

    rig.detector.change();
    assert!(wait_until(|| rig.recorder.starts() == 2));

    assert_eq!(rig.recorder.quits(), 1);
    assert_eq!(rig.scheduler.selected_animal().as_deref(), Some(MOCK_SECONDARY));
    assert_eq!(rig.scheduler.animal(MOCK_PRIMARY).unwrap().trial_id, 0);
    assert_eq!(
        rig.recorder.built.lock().unwrap().last().cloned(),
        Some((MOCK_SECONDARY.to_owned(), 0))
    );
    // SCHEDULE -> SCHEDULE is not a transition.
    assert_eq!(rig.history.of_kind(HistoryEvent::StateChange).len(), 1);

    rig.shutdown(handle);
}

#[test]
fn unknown_animal_deselects_and_idles() {
    let rig = Rig::new(TrialMode::Blocking);
    let handle = rig.spawn();
    assert!(wait_until(|| rig.recorder.starts() == 1));

    rig.detector.enter("stranger");
    assert!(wait_until(|| rig.scheduler.state() == RunningState::Idle));

    assert_eq!(rig.scheduler.selected_animal(), None);
    assert!(wait_until(|| rig.recorder.quits() == 1));
    let idle = rig.history.of_kind(HistoryEvent::StateChange);
    assert_eq!(idle.last().unwrap().reason.as_deref(), Some("unknown_animal"));

    rig.shutdown(handle);
}

#[test]
fn detector_error_enters_error_until_next_animal() {
    let rig = Rig::new(TrialMode::Blocking);
    let handle = rig.spawn();
    assert!(wait_until(|| rig.recorder.starts() == 1));

    rig.detector.error();
    assert!(wait_until(|| rig.scheduler.state() == RunningState::Error));
    assert!(wait_until(|| rig.recorder.quits() == 1));
    assert_eq!(rig.scheduler.selected_animal(), None);

    // Empty station after a fault keeps the error state.
    rig.detector.leave();
    assert_eq!(rig.scheduler.state(), RunningState::Error);

    rig.detector.enter(MOCK_SECONDARY);
    assert!(wait_until(|| rig.recorder.starts() == 2));
    assert_eq!(rig.scheduler.state(), RunningState::Schedule);

    let reasons: Vec<_> = rig
        .history
        .of_kind(HistoryEvent::StateChange)
        .into_iter()
        .filter_map(|r| r.reason)
        .collect();
    assert_eq!(reasons, ["animal_entered", "detector_error", "animal_entered"]);

    rig.shutdown(handle);
}

// ── Operator commands ────────────────────────────────────────

#[test]
fn advance_level_restarts_trial_one_level_up() {
    let rig = Rig::new(TrialMode::Blocking);
    let handle = rig.spawn();
    assert!(wait_until(|| rig.recorder.starts() == 1));

    rig.scheduler.handle_command(OperatorCommand::AdvanceLevel);
    assert!(wait_until(|| rig.recorder.starts() == 2));

    assert_eq!(rig.recorder.quits(), 1);
    assert_eq!(
        rig.recorder.built.lock().unwrap().last().cloned(),
        Some((MOCK_PRIMARY.to_owned(), 1))
    );
    let change = &rig.history.of_kind(HistoryEvent::LevelChange)[0];
    assert_eq!(change.previous_level, Some(0));
    assert_eq!(change.level, Some(1));
    assert_eq!(rig.store.last_saved().unwrap().animals[MOCK_PRIMARY].level, 1);

    rig.shutdown(handle);
}

#[test]
fn advance_level_during_build_discards_stale_trial() {
    let rig = Rig::new(TrialMode::Blocking);
    let handle = rig.spawn();
    assert!(wait_until(|| rig.recorder.starts() == 1));
    rig.recorder.build_delay_ms.store(300, Ordering::SeqCst);

    rig.scheduler.handle_command(OperatorCommand::AdvanceLevel);
    assert!(wait_until(|| rig.recorder.built.lock().unwrap().len() == 2));
    // Second advance lands while the level-1 trial is still being built.
    rig.scheduler.handle_command(OperatorCommand::AdvanceLevel);
    assert!(wait_until(|| rig.recorder.starts() == 2));

    let built = rig.recorder.built.lock().unwrap().clone();
    let primary = |level| (MOCK_PRIMARY.to_owned(), level);
    assert_eq!(built, [primary(0), primary(1), primary(2)]);
    assert_eq!(rig.recorder.quits(), 1);
    assert_eq!(rig.scheduler.animal(MOCK_PRIMARY).unwrap().level, 2);

    let levels: Vec<_> = rig
        .history
        .of_kind(HistoryEvent::LevelChange)
        .into_iter()
        .map(|r| (r.previous_level, r.level))
        .collect();
    assert_eq!(levels, [(Some(0), Some(1)), (Some(1), Some(2))]);

    rig.shutdown(handle);
}

#[test]
fn advance_task_switches_to_next_stage() {
    let rig = Rig::new(TrialMode::Blocking);
    let handle = rig.spawn();
    assert!(wait_until(|| rig.recorder.starts() == 1));

    rig.scheduler.handle_command(OperatorCommand::AdvanceTask);
    assert!(wait_until(|| rig.recorder.starts() == 2));

    let animal = rig.scheduler.animal(MOCK_PRIMARY).unwrap();
    assert_eq!(animal.task, TaskKind::DetectStage);
    assert_eq!(animal.level, 0);
    let switch = &rig.history.of_kind(HistoryEvent::TaskSwitch)[0];
    assert_eq!(switch.previous_task, Some(TaskKind::SizeReductionStage));
    assert_eq!(switch.task, Some(TaskKind::DetectStage));
    assert_eq!(
        rig.store.last_saved().unwrap().animals[MOCK_PRIMARY].task,
        TaskKind::DetectStage
    );

    rig.shutdown(handle);
}

#[test]
fn operator_commands_ignored_while_idle() {
    let rig = Rig::new(TrialMode::Blocking);
    let handle = rig.spawn();
    assert!(wait_until(|| rig.recorder.starts() == 1));
    rig.detector.leave();
    assert!(wait_until(|| rig.scheduler.state() == RunningState::Idle));

    rig.scheduler.handle_command(OperatorCommand::AdvanceLevel);
    rig.scheduler.handle_command(OperatorCommand::AdvanceTask);

    let animal = rig.scheduler.animal(MOCK_PRIMARY).unwrap();
    assert_eq!((animal.task, animal.level), (TaskKind::SizeReductionStage, 0));
    assert!(rig.history.of_kind(HistoryEvent::LevelChange).is_empty());
    assert!(rig.history.of_kind(HistoryEvent::TaskSwitch).is_empty());

    rig.shutdown(handle);
}

#[test]
fn quit_resets_counters_saves_and_stops() {
    let rig = Rig::new(TrialMode::Instant(true));
    let handle = rig.spawn();
    assert!(wait_until(|| rig.scheduler.animal(MOCK_PRIMARY).unwrap().trial_id >= 3));

    rig.scheduler.handle_command(OperatorCommand::Quit);
    handle.join().unwrap().unwrap();

    assert!(!rig.scheduler.is_running());
    assert!(!rig.detector.is_running());
    let animal = rig.scheduler.animal(MOCK_PRIMARY).unwrap();
    assert_eq!(
        (animal.trial_id, animal.current_level_trial_id, animal.correct_trial),
        (0, 0, 0)
    );
    assert!(rig.store.last_saved().is_some());
}
