//! Unified error types for the training rig core.
//!
//! A single `Error` enum for the failures that reach the binary: backend
//! construction, transport, config and task building.  Frame and history
//! errors stay local; the reader thread and the scheduler log them and
//! carry on.  Frame and transport errors are `Copy`; they are produced on
//! the detector's reader thread for every malformed frame and must not
//! allocate.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Errors that cross module boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The byte transport under the reader failed.
    Transport(TransportError),
    /// Configuration could not be loaded, validated or saved.
    Config(ConfigError),
    /// A backend could not be constructed (missing driver, bad settings).
    Init(&'static str),
    /// A task could not be constructed for the requested kind.
    Task(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
            Self::Task(msg) => write!(f, "task: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Frame errors
// ---------------------------------------------------------------------------

/// Reasons a buffered frame was discarded by the parser.
///
/// Every variant is recoverable: the parser resets and resynchronises on
/// the next start marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer than the six bytes a minimal frame occupies.
    TooShort { len: usize },
    /// Buffer does not begin with `DLE START`.
    MissingStart,
    /// The two bytes before the checksum are not `DLE STOP`.
    MissingStop,
    /// Unescaped payload lacks the host/unit/command header.
    PayloadTooShort { len: usize },
    /// Payload ended on an escape byte with nothing after it.
    DanglingEscape,
    /// Data field too short to hold the tag id slice.
    TagTooShort { hex_len: usize },
    /// Frame exceeded the parser's buffer capacity.
    Overflow,
    /// A new start marker arrived before the current frame was complete.
    Restarted,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { len } => {
                write!(f, "frame of {len} bytes is shorter than protocol minimum")
            }
            Self::MissingStart => write!(f, "frame missing start marker"),
            Self::MissingStop => write!(f, "frame missing end marker"),
            Self::PayloadTooShort { len } => {
                write!(f, "payload of {len} bytes missing host/unit/command fields")
            }
            Self::DanglingEscape => write!(f, "dangling DLE escape in payload"),
            Self::TagTooShort { hex_len } => {
                write!(f, "tag data hex of {hex_len} chars too short for id slice")
            }
            Self::Overflow => write!(f, "frame exceeds buffer capacity"),
            Self::Restarted => write!(f, "frame interrupted by new start marker"),
        }
    }
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The device could not be opened.
    OpenFailed,
    /// A read returned an I/O error other than a timeout.
    ReadFailed(std::io::ErrorKind),
    /// The device went away (EOF / unplugged).
    Disconnected,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenFailed => write!(f, "could not open device"),
            Self::ReadFailed(kind) => write!(f, "read failed: {kind}"),
            Self::Disconnected => write!(f, "device disconnected"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from [`ConfigPort`](crate::app::ports::ConfigPort) operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Stored config failed to deserialize.
    Corrupted(String),
    /// A config field failed validation.
    /// The `&'static str` names the field and the rule.
    ValidationFailed(&'static str),
    /// Underlying filesystem error.
    Io(std::io::ErrorKind),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupted(msg) => write!(f, "config corrupted: {msg}"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
            Self::Io(kind) => write!(f, "I/O error: {kind}"),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// History errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    /// Record could not be serialized.
    Encode(String),
    /// Append to the backing file failed.
    Io(std::io::ErrorKind),
}

impl fmt::Display for HistoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode(msg) => write!(f, "record not serializable: {msg}"),
            Self::Io(kind) => write!(f, "append failed: {kind}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
