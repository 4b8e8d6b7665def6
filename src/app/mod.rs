//! Application boundary — operator commands in, port traits out.
//!
//! The scheduler talks to persistence and hardware only through the
//! traits in [`ports`]; operator input arrives as [`commands`].

pub mod commands;
pub mod ports;
