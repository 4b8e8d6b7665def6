//! Trainrig — rig entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Adapters (outer ring)                    │
//! │                                                              │
//! │  JsonConfigStore   JsonlHistoryLog   LogRewarder   console   │
//! │  (ConfigPort)      (HistorySink)     (RewardPort)  (keys)    │
//! │                                                              │
//! │  ─────────────── Port Trait Boundary ────────────────────    │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │  Scheduler (main thread)  ◀── events ── Detector       │  │
//! │  │  TaskTable                              (reader thread)│  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `trainrig [config.json]`

use std::io::BufRead;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use chrono::Local;
use log::{info, warn};

use trainrig::Error;
use trainrig::adapters::history_log::JsonlHistoryLog;
use trainrig::adapters::json_config::JsonConfigStore;
use trainrig::adapters::rewarder::LogRewarder;
use trainrig::app::commands::OperatorCommand;
use trainrig::app::ports::ConfigPort;
use trainrig::detector::mock::{MOCK_PRIMARY, MOCK_SECONDARY};
use trainrig::detector::{Detector, factory};
use trainrig::scheduler::Scheduler;
use trainrig::tasks::TaskTable;

const DEFAULT_CONFIG: &str = "trainrig.json";

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_owned());
    let store = Arc::new(JsonConfigStore::new(&path));

    let mut config = store
        .load()
        .map_err(Error::Config)
        .with_context(|| format!("loading {path}"))?;
    config.session_id += 1;
    store
        .save(&config)
        .map_err(Error::Config)
        .context("recording session counter")?;
    info!(
        "trainrig v{} | rig {} | session {}",
        env!("CARGO_PKG_VERSION"),
        config.rig_id,
        config.session_id
    );

    let detector = factory::create(&config.detector).context("building detector")?;
    let history = Arc::new(JsonlHistoryLog::for_session(
        &config.data_dir,
        config.session_id,
        Local::now().date_naive(),
    ));
    let tasks = TaskTable::with_defaults(config.tasks.clone(), Arc::new(LogRewarder));
    let scheduler = Scheduler::new(config, Arc::clone(&detector), tasks, store, history);

    spawn_console(scheduler.clone(), detector)?;
    print_keys();

    scheduler.run().context("scheduler")?;
    Ok(())
}

fn print_keys() {
    info!("keys: n = next task, m = next level, q = quit");
    info!("mock: p/o = {MOCK_PRIMARY}/{MOCK_SECONDARY} enters, l = leave, c = change, e = error");
}

// ── Console ──────────────────────────────────────────────────
//
// One key per character, any number per line.  Operator commands go to
// the scheduler; mock-detector triggers go straight to the detector.

fn spawn_console(scheduler: Scheduler, detector: Arc<dyn Detector>) -> Result<()> {
    thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { return };
                for key in line.trim().chars() {
                    if !handle_key(key, &scheduler, detector.as_ref()) {
                        return;
                    }
                }
            }
        })
        .context("spawning console thread")?;
    Ok(())
}

/// Returns `false` once the session should end.
fn handle_key(key: char, scheduler: &Scheduler, detector: &dyn Detector) -> bool {
    if let Some(command) = OperatorCommand::from_key(key) {
        scheduler.handle_command(command);
        return command != OperatorCommand::Quit;
    }

    let Some(mock) = detector.manual() else {
        warn!("console: unknown key {key:?}");
        return true;
    };
    match key {
        'p' => mock.enter(MOCK_PRIMARY),
        'o' => mock.enter(MOCK_SECONDARY),
        'l' => mock.leave(),
        'c' => mock.change(),
        'e' => mock.error(),
        _ => warn!("console: unknown key {key:?}"),
    }
    true
}
