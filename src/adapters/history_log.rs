//! Append-only JSON-lines history adapter.
//!
//! Implements [`HistorySink`].  One session writes to
//! `<data_dir>/<YYYYMMDD>/session_<id>/scheduler/scheduler.jsonl`; the
//! file and its directories are created on the first append.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use log::info;
use parking_lot::Mutex;

use crate::app::ports::HistorySink;
use crate::error::HistoryError;
use crate::scheduler::history::HistoryRecord;

pub struct JsonlHistoryLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl JsonlHistoryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    /// Log for one session of the scheduler, dated `date`.
    pub fn for_session(data_dir: &Path, session_id: u32, date: NaiveDate) -> Self {
        Self::new(session_path(data_dir, session_id, date))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<File, HistoryError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| HistoryError::Io(e.kind()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| HistoryError::Io(e.kind()))?;
        info!("HISTORY: appending to {}", self.path.display());
        Ok(file)
    }
}

/// `<data_dir>/<YYYYMMDD>/session_<id>/scheduler/scheduler.jsonl`
pub fn session_path(data_dir: &Path, session_id: u32, date: NaiveDate) -> PathBuf {
    data_dir
        .join(date.format("%Y%m%d").to_string())
        .join(format!("session_{session_id}"))
        .join("scheduler")
        .join("scheduler.jsonl")
}

impl HistorySink for JsonlHistoryLog {
    fn append(&self, record: &HistoryRecord) -> Result<(), HistoryError> {
        let mut line =
            serde_json::to_string(record).map_err(|e| HistoryError::Encode(e.to_string()))?;
        line.push('\n');

        let mut slot = self.file.lock();
        if slot.is_none() {
            *slot = Some(self.open()?);
        }
        let Some(file) = slot.as_mut() else {
            return Err(HistoryError::Io(std::io::ErrorKind::NotFound));
        };
        file.write_all(line.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|e| HistoryError::Io(e.kind()))
    }
}
