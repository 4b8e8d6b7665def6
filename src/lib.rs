//! Trainrig core library.
//!
//! Animal-presence detection (RFID frame protocol, detector state
//! machine, reader lifecycle) and the adaptive trial scheduler that sits
//! between the detector and the training tasks.  The `trainrig` binary
//! wires these to a JSON config file, a JSONL history log and the console.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod detector;
pub mod error;
pub mod rfid;
pub mod scheduler;
pub mod tasks;

pub use error::{Error, Result};
