//! Dorset LID665 v4.2 RFID reader backend.
//!
//! A dedicated reader thread pulls bytes from the transport, runs them
//! through the [`FrameParser`], and feeds each decoded tag into the shared
//! state machine.
//!
//! ```text
//!  reader thread
//!  ─────────────
//!  loop until stop flag:
//!    read(transport) ── Err ──▶ process(error) ; clear run flag ; exit
//!      │ bytes
//!      ▼
//!    FrameParser::feed ── Err ──▶ warn, keep going
//!      │ TagRead
//!      ▼
//!    process(animal id) ; last_tag = now
//!    last_tag older than presence timeout ──▶ process(none) once
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use super::{DetectionResult, Detector, DetectorCore};
use crate::error::{Error, Result, TransportError};
use crate::rfid::codec::FrameParser;
use crate::rfid::transport::Transport;

/// How long `quit` waits for the reader thread before detaching it.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

const READ_CHUNK: usize = 64;

/// Opens a fresh transport each time detection starts.
pub type TransportOpener =
    Box<dyn Fn() -> core::result::Result<Box<dyn Transport>, TransportError> + Send + Sync>;

struct Reader {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct DorsetDetector {
    core: Arc<DetectorCore>,
    open: TransportOpener,
    presence_timeout: Option<Duration>,
    reader: Mutex<Option<Reader>>,
}

impl DorsetDetector {
    /// `presence_timeout`: report the animal as gone once no tag has been
    /// read for this long.  `None` relies on the reader reporting absence.
    pub fn new(
        open: TransportOpener,
        presence_timeout: Option<Duration>,
        return_window: Duration,
    ) -> Self {
        Self {
            core: Arc::new(DetectorCore::new(return_window)),
            open,
            presence_timeout,
            reader: Mutex::new(None),
        }
    }
}

impl Detector for DorsetDetector {
    fn core(&self) -> &DetectorCore {
        &self.core
    }

    fn start_detection(&self) -> Result<()> {
        // A reader that exited on a transport failure is still parked here.
        if let Some(stale) = self.reader.lock().take() {
            join_reader(stale);
        }
        let transport = (self.open)().map_err(Error::Transport)?;
        let stop = Arc::new(AtomicBool::new(false));
        let core = Arc::clone(&self.core);
        let presence_timeout = self.presence_timeout;
        let thread_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("rfid-reader".into())
            .spawn(move || read_loop(&core, transport, &thread_stop, presence_timeout))
            .map_err(|e| {
                error!("RFID: cannot spawn reader thread: {e}");
                Error::Init("cannot spawn RFID reader thread")
            })?;

        *self.reader.lock() = Some(Reader { stop, handle });
        info!("RFID: reader thread started");
        Ok(())
    }

    fn stop_detection(&self) {
        if let Some(reader) = self.reader.lock().take() {
            join_reader(reader);
        }
    }
}

/// Signal the reader to stop and wait up to [`JOIN_TIMEOUT`] for it.
fn join_reader(reader: Reader) {
    reader.stop.store(true, Ordering::Release);

    let deadline = Instant::now() + JOIN_TIMEOUT;
    while !reader.handle.is_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    if !reader.handle.is_finished() {
        warn!("RFID: reader thread did not stop within {JOIN_TIMEOUT:?}, detaching");
        return;
    }
    if reader.handle.join().is_err() {
        error!("RFID: reader thread panicked");
    } else {
        info!("RFID: reader thread stopped");
    }
}

fn read_loop(
    core: &DetectorCore,
    mut transport: Box<dyn Transport>,
    stop: &AtomicBool,
    presence_timeout: Option<Duration>,
) {
    let mut parser = FrameParser::new();
    let mut buf = [0u8; READ_CHUNK];
    let mut last_tag: Option<Instant> = None;

    while !stop.load(Ordering::Acquire) {
        let n = match transport.read(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                error!("RFID: transport failed: {e}; reader exiting");
                core.process_detection(&DetectionResult::error());
                if !stop.load(Ordering::Acquire) {
                    core.set_running(false);
                }
                return;
            }
        };

        for &byte in &buf[..n] {
            match parser.feed(byte) {
                Ok(Some(read)) => {
                    debug!("RFID: tag {} (unit {})", read.animal_id, read.frame.unit);
                    last_tag = Some(Instant::now());
                    core.process_detection(&DetectionResult::animal(read.animal_id));
                }
                Ok(None) => {}
                Err(e) => warn!("RFID: frame discarded: {e}"),
            }
        }

        if let (Some(timeout), Some(at)) = (presence_timeout, last_tag) {
            if at.elapsed() >= timeout {
                debug!("RFID: no tag for {timeout:?}, reporting absence");
                last_tag = None;
                core.process_detection(&DetectionResult::none());
            }
        }
    }
}
