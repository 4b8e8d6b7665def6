//! Adapters — concrete implementations of the port traits.
//!
//! | Adapter       | Implements   | Connects to                      |
//! |---------------|--------------|----------------------------------|
//! | `json_config` | ConfigPort   | JSON file on disk                |
//! | `history_log` | HistorySink  | Per-session JSON-lines file      |
//! | `rewarder`    | RewardPort   | Log output (no pump attached)    |

pub mod history_log;
pub mod json_config;
pub mod rewarder;
