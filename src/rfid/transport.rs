//! Transport abstraction — any byte-oriented source the reader talks over.
//!
//! Concrete implementations:
//! - [`SerialTransport`]: the reader's RS-232/USB serial line (8N1),
//!   available with the `serial` feature
//! - [`ReplayTransport`]: a scripted in-memory byte stream, used by
//!   tests and for replaying captured reader traffic on the bench
//! - [`NullTransport`]: never yields data
//!
//! The reader thread is generic over `Transport`, so a new link type
//! needs no changes to the framing or detector logic.

use std::collections::VecDeque;

use crate::error::TransportError;

/// Byte-oriented input channel.
pub trait Transport: Send {
    /// Read up to `buf.len()` bytes into `buf`.
    ///
    /// Returns the number of bytes read.  `Ok(0)` means nothing arrived
    /// before the transport's read timeout; the caller should poll again.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

/// A transport that never yields data.
pub struct NullTransport;

impl Transport for NullTransport {
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, TransportError> {
        std::thread::sleep(std::time::Duration::from_millis(10));
        Ok(0)
    }
}

/// Scripted byte stream.
///
/// Each queued chunk is returned by one `read` call (split if larger than
/// the caller's buffer).  An empty chunk models a read timeout.  Once the
/// script is exhausted the transport either idles (`Ok(0)`) or reports
/// [`TransportError::Disconnected`], depending on construction.
pub struct ReplayTransport {
    chunks: VecDeque<Vec<u8>>,
    disconnect_at_end: bool,
}

impl ReplayTransport {
    pub fn new() -> Self {
        Self {
            chunks: VecDeque::new(),
            disconnect_at_end: false,
        }
    }

    /// Report a disconnect once every chunk has been read.
    pub fn disconnect_at_end(mut self) -> Self {
        self.disconnect_at_end = true;
        self
    }

    pub fn push(&mut self, bytes: impl Into<Vec<u8>>) {
        self.chunks.push_back(bytes.into());
    }

    /// Queue one empty read, i.e. a read timeout with no data.
    pub fn push_timeout(&mut self) {
        self.chunks.push_back(Vec::new());
    }

    pub fn is_exhausted(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl Default for ReplayTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for ReplayTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let Some(mut chunk) = self.chunks.pop_front() else {
            if self.disconnect_at_end {
                return Err(TransportError::Disconnected);
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
            return Ok(0);
        };

        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.chunks.push_front(chunk.split_off(n));
        }
        Ok(n)
    }
}

// ---------------------------------------------------------------------------
// Serial line
// ---------------------------------------------------------------------------

/// Read timeout on the serial line; bounds how long the reader thread
/// takes to notice a stop request.
#[cfg(feature = "serial")]
pub const SERIAL_READ_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(100);

/// The reader's serial line, 8 data bits, no parity, one stop bit.
#[cfg(feature = "serial")]
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

#[cfg(feature = "serial")]
impl SerialTransport {
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, TransportError> {
        let port = serialport::new(path, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(SERIAL_READ_TIMEOUT)
            .open()
            .map_err(|e| {
                log::error!("RFID: cannot open {path} at {baud_rate} baud: {e}");
                TransportError::OpenFailed
            })?;
        log::info!("RFID: opened {path} at {baud_rate} baud");
        Ok(Self { port })
    }
}

#[cfg(feature = "serial")]
impl Transport for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match std::io::Read::read(&mut self.port, buf) {
            Ok(0) => Err(TransportError::Disconnected),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(TransportError::ReadFailed(e.kind())),
        }
    }
}
