//! Port traits — the boundary between the scheduler and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Scheduler (domain)
//! ```
//!
//! Adapters (JSON config file, JSONL history log, reward pump) implement
//! these traits.  The [`Scheduler`](crate::scheduler::Scheduler) holds them
//! as trait objects, so the control loop never touches the filesystem or
//! hardware directly and tests can swap in in-memory doubles.
//!
//! Every port is `Send + Sync`: the scheduler calls them from both its own
//! thread and the detector's.

use crate::config::SessionConfig;
use crate::error::{ConfigError, HistoryError};
use crate::scheduler::history::HistoryRecord;

// ───────────────────────────────────────────────────────────────
// Configuration port (domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists the session configuration.
///
/// Implementations MUST validate before persisting and reject invalid
/// values with [`ConfigError::ValidationFailed`] rather than clamping.
pub trait ConfigPort: Send + Sync {
    /// Load configuration.  Returns [`SessionConfig::default()`] if no
    /// stored config exists.
    fn load(&self) -> Result<SessionConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &SessionConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// History sink (domain → append-only log)
// ───────────────────────────────────────────────────────────────

pub trait HistorySink: Send + Sync {
    /// Append one record.  Failures are reported, never retried.
    fn append(&self, record: &HistoryRecord) -> Result<(), HistoryError>;
}

// ───────────────────────────────────────────────────────────────
// Reward port (domain → dispenser)
// ───────────────────────────────────────────────────────────────

pub trait RewardPort: Send + Sync {
    /// Dispense for `duration_ms`.
    fn give_reward(&self, duration_ms: u32);
}
