//! RFID reader protocol stack.
//!
//! ```text
//! ┌───────────┐  bytes  ┌─────────────┐  TagRead  ┌──────────────────┐
//! │ Transport │────────▶│ FrameParser │──────────▶│ DorsetDetector   │
//! │ (trait)   │         │ (codec)     │           │ (reader thread)  │
//! └───────────┘         └─────────────┘           └──────────────────┘
//! ```

pub mod codec;
pub mod transport;
