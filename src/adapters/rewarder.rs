//! Log-based reward adapter.
//!
//! Implements [`RewardPort`] by logging each dispense request.  Used on
//! bench setups without a pump attached; a GPIO pump driver would
//! implement the same trait.

use log::info;

use crate::app::ports::RewardPort;

/// Adapter that logs every reward instead of dispensing it.
pub struct LogRewarder;

impl RewardPort for LogRewarder {
    fn give_reward(&self, duration_ms: u32) {
        info!("REWARD | dispense {duration_ms} ms");
    }
}
