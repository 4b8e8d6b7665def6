//! DLE-escaped frame codec for the Dorset LID665 v4.2 RFID reader.
//!
//! Wire format:
//! ```text
//! ┌──────────┬──────────────────────────────┬──────────┬──────────┐
//! │ DLE STX  │ payload (DLE-escaped)        │ DLE ETX  │ checksum │
//! │ 10 02    │ host unit cmd data...        │ 10 03    │ 1 byte   │
//! └──────────┴──────────────────────────────┴──────────┴──────────┘
//! ```
//!
//! There is no length field.  The parser is a byte-at-a-time state
//! machine that synchronises on the start marker and treats every `DLE`
//! inside the frame as either the first half of the stop marker or an
//! escape for the following payload byte.  Any decode failure discards
//! the buffered frame and returns the parser to `WaitForStart`; nothing
//! buffered for one attempt is ever visible to the next.

use chrono::{DateTime, Utc};
use core::ops::Range;

use crate::error::FrameError;

pub const START: u8 = 0x02;
pub const STOP: u8 = 0x03;
pub const DLE: u8 = 0x10;

/// Upper bound on a buffered (still escaped) frame.
pub const MAX_FRAME_SIZE: usize = 128;

/// `DLE STX` + `DLE ETX` + checksum + at least one payload byte.
const MIN_FRAME_SIZE: usize = 6;

/// host, unit, command.
const PAYLOAD_HEADER_LEN: usize = 3;

/// Slice of the lowercase hex rendering of the data field that carries
/// the tag id.  Protocol-specific; verified against reader captures.
pub const TAG_HEX_RANGE: Range<usize> = 6..10;

/// Parser position within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Discarding bytes until a start marker.
    WaitForStart,
    /// Accumulating payload bytes.
    InFrame,
    /// Previous byte was `DLE`; the next decides stop marker vs escape.
    AfterEscape,
    /// Stop marker seen; the next byte is the checksum.
    AwaitTrailer,
}

/// Decoded payload fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameData {
    pub host: u8,
    pub unit: u8,
    pub command: u8,
    pub data: Vec<u8>,
}

/// One successfully decoded tag read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRead {
    /// When the frame's start marker arrived.
    pub detected_at: DateTime<Utc>,
    pub animal_id: String,
    pub frame: FrameData,
}

/// Streaming frame parser.
pub struct FrameParser {
    state: ParserState,
    buf: heapless::Vec<u8, MAX_FRAME_SIZE>,
    started_at: DateTime<Utc>,
    last_error: Option<FrameError>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::WaitForStart,
            buf: heapless::Vec::new(),
            started_at: DateTime::<Utc>::UNIX_EPOCH,
            last_error: None,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// The most recent decode failure, cleared by the next good frame.
    pub fn last_error(&self) -> Option<FrameError> {
        self.last_error
    }

    /// Drop any partial frame and wait for the next start marker.
    pub fn reset(&mut self) {
        self.state = ParserState::WaitForStart;
        self.buf.clear();
        self.started_at = DateTime::<Utc>::UNIX_EPOCH;
    }

    /// Consume one byte.
    ///
    /// Returns `Ok(Some(_))` when the byte completes a valid frame,
    /// `Err(_)` when it completes (or interrupts) a frame that fails to
    /// decode, and `Ok(None)` otherwise.  Errors are also recorded in
    /// [`last_error`](Self::last_error); the parser is always ready for
    /// the next frame afterwards.
    pub fn feed(&mut self, byte: u8) -> Result<Option<TagRead>, FrameError> {
        match self.state {
            ParserState::WaitForStart => {
                if byte == START {
                    self.begin_frame();
                } else if byte != DLE {
                    // DLE is the first half of the start marker; anything
                    // else is line noise between frames.
                    log::trace!("RFID: skipping byte 0x{byte:02x} outside frame");
                }
                Ok(None)
            }
            ParserState::InFrame => {
                self.push(byte)?;
                if byte == DLE {
                    self.state = ParserState::AfterEscape;
                }
                Ok(None)
            }
            ParserState::AfterEscape => {
                if byte == START {
                    // `DLE STX` never appears inside an escaped payload.
                    self.last_error = Some(FrameError::Restarted);
                    self.begin_frame();
                    return Err(FrameError::Restarted);
                }
                self.push(byte)?;
                self.state = if byte == STOP {
                    ParserState::AwaitTrailer
                } else {
                    ParserState::InFrame
                };
                Ok(None)
            }
            ParserState::AwaitTrailer => {
                self.push(byte)?;
                let result = decode_frame(&self.buf).and_then(|frame| {
                    let animal_id = tag_id(&frame.data).ok_or(FrameError::TagTooShort {
                        hex_len: frame.data.len() * 2,
                    })?;
                    Ok(TagRead {
                        detected_at: self.started_at,
                        animal_id,
                        frame,
                    })
                });
                self.reset();
                match result {
                    Ok(read) => {
                        self.last_error = None;
                        Ok(Some(read))
                    }
                    Err(e) => {
                        self.last_error = Some(e);
                        Err(e)
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn begin_frame(&mut self) {
        self.buf.clear();
        // Capacity is far above 2; these cannot fail on an empty buffer.
        let _ = self.buf.push(DLE);
        let _ = self.buf.push(START);
        self.started_at = Utc::now();
        self.state = ParserState::InFrame;
    }

    fn push(&mut self, byte: u8) -> Result<(), FrameError> {
        if self.buf.push(byte).is_err() {
            self.reset();
            self.last_error = Some(FrameError::Overflow);
            return Err(FrameError::Overflow);
        }
        Ok(())
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a complete buffered frame and split its payload.
pub fn decode_frame(raw: &[u8]) -> Result<FrameData, FrameError> {
    if raw.len() < MIN_FRAME_SIZE {
        return Err(FrameError::TooShort { len: raw.len() });
    }
    if raw[..2] != [DLE, START] {
        return Err(FrameError::MissingStart);
    }
    let n = raw.len();
    if raw[n - 3..n - 1] != [DLE, STOP] {
        return Err(FrameError::MissingStop);
    }

    let payload = unescape(&raw[2..n - 3])?;
    if payload.len() < PAYLOAD_HEADER_LEN {
        return Err(FrameError::PayloadTooShort { len: payload.len() });
    }

    Ok(FrameData {
        host: payload[0],
        unit: payload[1],
        command: payload[2],
        data: payload[PAYLOAD_HEADER_LEN..].to_vec(),
    })
}

/// Strip DLE escaping: each `DLE` is dropped and the byte after it kept.
pub fn unescape(escaped: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::with_capacity(escaped.len());
    let mut bytes = escaped.iter();
    while let Some(&b) = bytes.next() {
        if b == DLE {
            match bytes.next() {
                Some(&next) => out.push(next),
                None => return Err(FrameError::DanglingEscape),
            }
        } else {
            out.push(b);
        }
    }
    Ok(out)
}

/// Extract the tag id (`hex(data)[6..10]`), or `None` if `data` is too short.
pub fn tag_id(data: &[u8]) -> Option<String> {
    let hex: String = data.iter().map(|b| format!("{b:02x}")).collect();
    hex.get(TAG_HEX_RANGE).map(str::to_owned)
}

/// Encode a payload into a complete frame.
///
/// Writes `DLE STX escape(payload) DLE ETX checksum` into `out_buf`.
/// The checksum is passed through untouched; the parser does not verify it.
/// Returns the total number of bytes written, or `None` if `out_buf` is
/// too small.
pub fn encode_frame(payload: &[u8], checksum: u8, out_buf: &mut [u8]) -> Option<usize> {
    let escapes = payload.iter().filter(|&&b| b == DLE).count();
    let total = 2 + payload.len() + escapes + 3;
    if total > out_buf.len() {
        return None;
    }

    out_buf[0] = DLE;
    out_buf[1] = START;
    let mut i = 2;
    for &b in payload {
        if b == DLE {
            out_buf[i] = DLE;
            i += 1;
        }
        out_buf[i] = b;
        i += 1;
    }
    out_buf[i] = DLE;
    out_buf[i + 1] = STOP;
    out_buf[i + 2] = checksum;

    Some(total)
}
