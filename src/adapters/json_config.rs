//! JSON file configuration adapter.
//!
//! Implements [`ConfigPort`] over a single pretty-printed JSON file.
//!
//! - Load: a missing file yields defaults, which are written back so the
//!   operator has a template to edit.  Malformed or out-of-range files are
//!   rejected, never silently replaced.
//! - Save: validated first, then written to a sibling temp file and renamed
//!   over the original, so a crash mid-write leaves the old file intact.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::app::ports::ConfigPort;
use crate::config::{SessionConfig, validate_config};
use crate::error::ConfigError;

pub struct JsonConfigStore {
    path: PathBuf,
}

impl JsonConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ConfigPort for JsonConfigStore {
    fn load(&self) -> Result<SessionConfig, ConfigError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("CONFIG: {} not found, using defaults", self.path.display());
                let cfg = SessionConfig::default();
                if let Err(e) = self.save(&cfg) {
                    warn!("CONFIG: could not write default config: {e}");
                }
                return Ok(cfg);
            }
            Err(e) => return Err(ConfigError::Io(e.kind())),
        };

        let cfg: SessionConfig =
            serde_json::from_str(&text).map_err(|e| ConfigError::Corrupted(e.to_string()))?;
        validate_config(&cfg)?;
        info!("CONFIG: loaded {}", self.path.display());
        Ok(cfg)
    }

    fn save(&self, config: &SessionConfig) -> Result<(), ConfigError> {
        validate_config(config)?;

        let text = serde_json::to_string_pretty(config)
            .map_err(|e| ConfigError::Corrupted(e.to_string()))?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| ConfigError::Io(e.kind()))?;
        }
        let tmp = self.temp_path();
        fs::write(&tmp, text).map_err(|e| ConfigError::Io(e.kind()))?;
        fs::rename(&tmp, &self.path).map_err(|e| ConfigError::Io(e.kind()))?;
        info!("CONFIG: saved {}", self.path.display());
        Ok(())
    }
}
