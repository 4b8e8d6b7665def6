//! RFID reader pipeline tests: framed bytes in, detector events and
//! scheduler decisions out.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use trainrig::adapters::rewarder::LogRewarder;
use trainrig::config::{AnimalConfig, SessionConfig};
use trainrig::detector::dorset::DorsetDetector;
use trainrig::detector::{Detector, DetectorEvent, DetectorState, EventKind};
use trainrig::error::TransportError;
use trainrig::rfid::codec::encode_frame;
use trainrig::rfid::transport::Transport;
use trainrig::scheduler::{RunningState, Scheduler};
use trainrig::tasks::{TaskKind, TaskTable};

use crate::mock_rig::{
    MemoryConfigStore, MemoryHistory, TaskRecorder, TrialMode, recording_constructor, wait_until,
};

// ── Live byte source ─────────────────────────────────────────

/// Bytes pushed by the test as they "arrive" on the line.  Dropping the
/// sender unplugs the reader.
struct ChannelTransport(Receiver<Vec<u8>>);

impl Transport for ChannelTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.0.recv_timeout(Duration::from_millis(10)) {
            Ok(bytes) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Err(RecvTimeoutError::Timeout) => Ok(0),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
        }
    }
}

fn reader(presence_timeout: Option<Duration>) -> (Arc<DorsetDetector>, Sender<Vec<u8>>) {
    let (tx, rx) = mpsc::channel();
    let slot = Mutex::new(Some(ChannelTransport(rx)));
    let detector = DorsetDetector::new(
        Box::new(move || {
            slot.lock()
                .unwrap()
                .take()
                .map(|t| Box::new(t) as Box<dyn Transport>)
                .ok_or(TransportError::OpenFailed)
        }),
        presence_timeout,
        Duration::from_secs(5),
    );
    (Arc::new(detector), tx)
}

/// A LID665 tag report whose id is `hex(tag)`.
fn tag_frame(tag: [u8; 2]) -> Vec<u8> {
    let payload = [0xFE, 0x01, 0x21, 0x00, 0x00, 0x00, tag[0], tag[1]];
    let mut out = [0u8; 32];
    let n = encode_frame(&payload, 0x00, &mut out).unwrap();
    out[..n].to_vec()
}

// ── Detector only ────────────────────────────────────────────

#[test]
fn tag_sequence_produces_lifecycle_events() {
    let (detector, tx) = reader(Some(Duration::from_millis(80)));
    let events = Arc::new(Mutex::new(Vec::new()));
    let animal_events: [(EventKind, fn(String) -> DetectorEvent); 4] = [
        (EventKind::AnimalEntered, DetectorEvent::AnimalEntered),
        (EventKind::AnimalLeft, DetectorEvent::AnimalLeft),
        (EventKind::AnimalReturned, DetectorEvent::AnimalReturned),
        (EventKind::AnimalChanged, DetectorEvent::AnimalChanged),
    ];
    for (kind, make) in animal_events {
        let events = Arc::clone(&events);
        detector.register_event(
            kind,
            Box::new(move |id: &str| {
                events.lock().unwrap().push(make(id.to_owned()));
                Ok(())
            }),
        );
    }
    let errors = Arc::clone(&events);
    detector.register_event(
        EventKind::ErrorDetected,
        Box::new(move |_: &str| {
            errors.lock().unwrap().push(DetectorEvent::ErrorDetected);
            Ok(())
        }),
    );
    let seen = |n: usize| wait_until(|| events.lock().unwrap().len() >= n);

    detector.start().unwrap();
    tx.send(tag_frame([0xAB, 0xCD])).unwrap();
    assert!(seen(1));
    // Repeated reads of the same tag are not new events.
    tx.send(tag_frame([0xAB, 0xCD])).unwrap();
    assert!(seen(2), "presence timeout never fired");
    tx.send(tag_frame([0xAB, 0xCD])).unwrap();
    assert!(seen(3));
    tx.send(tag_frame([0xBE, 0xEF])).unwrap();
    assert!(seen(4));
    drop(tx);
    assert!(wait_until(|| detector.current_state() == DetectorState::Error));

    let events = events.lock().unwrap().clone();
    assert_eq!(
        events[..4],
        [
            DetectorEvent::AnimalEntered("abcd".into()),
            DetectorEvent::AnimalLeft("abcd".into()),
            DetectorEvent::AnimalReturned("abcd".into()),
            DetectorEvent::AnimalChanged("beef".into()),
        ]
    );
    assert_eq!(events.last(), Some(&DetectorEvent::ErrorDetected));

    detector.quit();
    assert!(!detector.is_running());
}

#[test]
fn split_and_noisy_frames_still_decode() {
    let (detector, tx) = reader(None);
    detector.start().unwrap();

    let frame = tag_frame([0x10, 0x42]);
    let (head, tail) = frame.split_at(5);
    tx.send(vec![0x55, 0xAA, 0x03]).unwrap();
    tx.send(head.to_vec()).unwrap();
    tx.send(tail.to_vec()).unwrap();

    assert!(wait_until(|| detector.current_animal().as_deref() == Some("1042")));
    assert_eq!(detector.current_state(), DetectorState::AnimalPresent);
    detector.quit();
}

// ── Reader driving the scheduler ─────────────────────────────

#[test]
fn rfid_reader_drives_scheduler() {
    let mut config = SessionConfig::default();
    config.animals.clear();
    config.animals.insert(
        "abcd".into(),
        AnimalConfig {
            name: "abcd".into(),
            task: TaskKind::DetectStage,
            level: 1,
        },
    );

    let recorder = Arc::new(TaskRecorder::default());
    let mut tasks = TaskTable::with_defaults(config.tasks.clone(), Arc::new(LogRewarder));
    tasks.register(
        TaskKind::DetectStage,
        recording_constructor(Arc::clone(&recorder), TrialMode::Blocking),
    );

    let (detector, tx) = reader(None);
    let scheduler = Scheduler::new(
        config,
        detector.clone(),
        tasks,
        Arc::new(MemoryConfigStore::default()),
        Arc::new(MemoryHistory::default()),
    );
    let runner = scheduler.clone();
    let handle = thread::spawn(move || runner.run());

    assert!(wait_until(|| detector.is_running()));
    assert_eq!(scheduler.state(), RunningState::Idle);

    tx.send(tag_frame([0xAB, 0xCD])).unwrap();
    assert!(wait_until(|| recorder.starts() == 1));
    assert_eq!(scheduler.state(), RunningState::Schedule);
    assert_eq!(scheduler.selected_animal().as_deref(), Some("abcd"));
    assert_eq!(
        recorder.built.lock().unwrap().first().cloned(),
        Some(("abcd".to_owned(), 1))
    );

    // Unplugging the reader is a detector fault.
    drop(tx);
    assert!(wait_until(|| scheduler.state() == RunningState::Error));
    assert!(wait_until(|| recorder.quits() == 1));

    scheduler.quit();
    handle.join().unwrap().unwrap();
    assert!(!detector.is_running());
}
