//! Mock rig for integration tests.
//!
//! In-memory config store and history sink, recording tasks that count every
//! lifecycle call, and a [`Rig`] that wires them to a real scheduler and
//! the manual-trigger detector.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use trainrig::adapters::rewarder::LogRewarder;
use trainrig::app::ports::{ConfigPort, HistorySink};
use trainrig::config::{ScheduleCondition, SessionConfig, validate_config};
use trainrig::detector::Detector;
use trainrig::detector::mock::{MOCK_PRIMARY, MockDetector};
use trainrig::error::{ConfigError, HistoryError};
use trainrig::scheduler::Scheduler;
use trainrig::scheduler::history::{HistoryEvent, HistoryRecord};
use trainrig::tasks::{CancelToken, Task, TaskConstructor, TaskContext, TaskKind, TaskTable};

// ── Config store ──────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryConfigStore {
    pub saved: Mutex<Vec<SessionConfig>>,
}

#[allow(dead_code)]
impl MemoryConfigStore {
    pub fn last_saved(&self) -> Option<SessionConfig> {
        self.saved.lock().unwrap().last().cloned()
    }
}

impl ConfigPort for MemoryConfigStore {
    fn load(&self) -> Result<SessionConfig, ConfigError> {
        Ok(self.last_saved().unwrap_or_default())
    }

    fn save(&self, config: &SessionConfig) -> Result<(), ConfigError> {
        validate_config(config)?;
        self.saved.lock().unwrap().push(config.clone());
        Ok(())
    }
}

// ── History sink ──────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryHistory {
    pub records: Mutex<Vec<HistoryRecord>>,
    /// Reject every append.
    pub fail: AtomicBool,
}

#[allow(dead_code)]
impl MemoryHistory {
    pub fn of_kind(&self, event: HistoryEvent) -> Vec<HistoryRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.event == event)
            .cloned()
            .collect()
    }
}

impl HistorySink for MemoryHistory {
    fn append(&self, record: &HistoryRecord) -> Result<(), HistoryError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(HistoryError::Io(std::io::ErrorKind::PermissionDenied));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

// ── Recording tasks ──────────────────────────────────────────────

/// How a recording trial behaves once started.
#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
pub enum TrialMode {
    /// Finish after a millisecond with this feedback.
    Instant(bool),
    /// Run until cancelled; `on_idle` cancels.
    Blocking,
    /// Run until cancelled; `on_idle` leaves it running.
    Pausable,
}

/// Counts lifecycle calls across every recording task instance.
#[derive(Default)]
pub struct TaskRecorder {
    pub starts: AtomicUsize,
    pub finishes: AtomicUsize,
    pub quits: AtomicUsize,
    pub idles: AtomicUsize,
    pub returns: AtomicUsize,
    pub fail_on_idle: AtomicBool,
    pub fail_on_return: AtomicBool,
    /// `on_return` ends its own trial, waits for the next one to start,
    /// then fails.
    pub late_return_failure: AtomicBool,
    /// Milliseconds each construction takes.
    pub build_delay_ms: AtomicU64,
    /// `(animal, level)` of every trial built.
    pub built: Mutex<Vec<(String, u32)>>,
    tokens: Mutex<Vec<Arc<CancelToken>>>,
}

#[allow(dead_code)]
impl TaskRecorder {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
    pub fn finishes(&self) -> usize {
        self.finishes.load(Ordering::SeqCst)
    }
    pub fn quits(&self) -> usize {
        self.quits.load(Ordering::SeqCst)
    }
    pub fn idles(&self) -> usize {
        self.idles.load(Ordering::SeqCst)
    }
    pub fn returns(&self) -> usize {
        self.returns.load(Ordering::SeqCst)
    }

    /// End the most recently built trial as if it had run its course.
    pub fn finish_latest(&self) {
        if let Some(token) = self.tokens.lock().unwrap().last() {
            token.cancel();
        }
    }
}

struct RecordingTask {
    recorder: Arc<TaskRecorder>,
    mode: TrialMode,
    condition: Option<ScheduleCondition>,
    token: Arc<CancelToken>,
}

impl Task for RecordingTask {
    fn start(&self) -> anyhow::Result<bool> {
        self.recorder.starts.fetch_add(1, Ordering::SeqCst);
        let feedback = match self.mode {
            TrialMode::Instant(feedback) => {
                self.token.wait_timeout(Duration::from_millis(1));
                feedback
            }
            TrialMode::Blocking | TrialMode::Pausable => {
                self.token.wait();
                false
            }
        };
        self.recorder.finishes.fetch_add(1, Ordering::SeqCst);
        Ok(feedback)
    }

    fn quit(&self) {
        self.recorder.quits.fetch_add(1, Ordering::SeqCst);
        self.token.cancel();
    }

    fn on_idle(&self) -> anyhow::Result<()> {
        self.recorder.idles.fetch_add(1, Ordering::SeqCst);
        if self.recorder.fail_on_idle.load(Ordering::SeqCst) {
            anyhow::bail!("on_idle failure");
        }
        if !matches!(self.mode, TrialMode::Pausable) {
            self.token.cancel();
        }
        Ok(())
    }

    fn on_return(&self) -> anyhow::Result<()> {
        self.recorder.returns.fetch_add(1, Ordering::SeqCst);
        if self.recorder.late_return_failure.load(Ordering::SeqCst) {
            let next = self.recorder.starts() + 1;
            self.token.cancel();
            wait_until(|| self.recorder.starts() >= next);
            anyhow::bail!("on_return failed after trial was replaced");
        }
        if self.recorder.fail_on_return.load(Ordering::SeqCst) {
            anyhow::bail!("on_return failure");
        }
        Ok(())
    }

    fn condition(&self) -> Option<ScheduleCondition> {
        self.condition.clone()
    }
}

pub fn recording_constructor(recorder: Arc<TaskRecorder>, mode: TrialMode) -> TaskConstructor {
    Box::new(
        move |ctx: &TaskContext<'_>| -> trainrig::Result<Arc<dyn Task>> {
            recorder
                .built
                .lock()
                .unwrap()
                .push((ctx.animal.unwrap_or_default().to_owned(), ctx.level));
            let delay = recorder.build_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                thread::sleep(Duration::from_millis(delay));
            }
            let token = Arc::new(CancelToken::new());
            recorder.tokens.lock().unwrap().push(Arc::clone(&token));
            Ok(Arc::new(RecordingTask {
                recorder: Arc::clone(&recorder),
                mode,
                condition: ctx.profile.and_then(|p| p.condition.clone()),
                token,
            }))
        },
    )
}

// ── Rig ───────────────────────────────────────────────────────

pub struct Rig {
    pub scheduler: Scheduler,
    pub detector: Arc<MockDetector>,
    pub store: Arc<MemoryConfigStore>,
    pub history: Arc<MemoryHistory>,
    pub recorder: Arc<TaskRecorder>,
}

#[allow(dead_code)]
impl Rig {
    /// Default session (animals `mock_001`/`mock_002` on the size
    /// reduction stage) with every training stage backed by recorder tasks.
    pub fn new(mode: TrialMode) -> Self {
        Self::with_config(SessionConfig::default(), mode)
    }

    pub fn with_config(config: SessionConfig, mode: TrialMode) -> Self {
        let recorder = Arc::new(TaskRecorder::default());
        let mut tasks = TaskTable::with_defaults(config.tasks.clone(), Arc::new(LogRewarder));
        for kind in [
            TaskKind::SizeReductionStage,
            TaskKind::DetectStage,
            TaskKind::DiscriminateStage,
        ] {
            tasks.register(kind, recording_constructor(Arc::clone(&recorder), mode));
        }

        let detector = Arc::new(MockDetector::new(Duration::from_millis(
            config.detector.return_window_ms,
        )));
        let store = Arc::new(MemoryConfigStore::default());
        let history = Arc::new(MemoryHistory::default());
        let scheduler = Scheduler::new(
            config,
            detector.clone(),
            tasks,
            store.clone(),
            history.clone(),
        );
        Self {
            scheduler,
            detector,
            store,
            history,
            recorder,
        }
    }

    /// Run the scheduler on its own thread.  Starting the mock replays
    /// `mock_001` entering, so this returns once that animal is scheduled.
    pub fn spawn(&self) -> JoinHandle<trainrig::Result<()>> {
        let scheduler = self.scheduler.clone();
        let handle = thread::spawn(move || scheduler.run());
        assert!(wait_until(|| self.detector.is_running()), "detector never started");
        assert!(
            wait_until(|| self.scheduler.selected_animal().as_deref() == Some(MOCK_PRIMARY)),
            "default animal never selected"
        );
        handle
    }

    pub fn shutdown(&self, handle: JoinHandle<trainrig::Result<()>>) {
        self.scheduler.quit();
        handle.join().expect("scheduler thread panicked").expect("scheduler failed");
    }
}

/// Poll `cond` for up to five seconds.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Default session with every training condition's evaluation window
/// set to `interval` trials.
#[allow(dead_code)]
pub fn config_with_interval(interval: u32) -> SessionConfig {
    let mut config = SessionConfig::default();
    for condition in config.tasks.values_mut().filter_map(|p| p.condition.as_mut()) {
        condition.evaluation_interval = interval;
    }
    config
}
