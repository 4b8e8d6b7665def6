//! Inbound operator commands.
//!
//! Requested from the console (or any other operator surface) and
//! interpreted by [`Scheduler::handle_command`](crate::scheduler::Scheduler::handle_command).

/// Commands an operator can send into the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    /// Cancel the current trial and move the selected animal to its
    /// task's successor at level 0.
    AdvanceTask,

    /// Cancel the current trial and raise the selected animal's level
    /// one step, regardless of how many trials have been run.
    AdvanceLevel,

    /// End the session.
    Quit,
}

impl OperatorCommand {
    /// Console key binding.
    pub fn from_key(key: char) -> Option<Self> {
        match key {
            'n' => Some(Self::AdvanceTask),
            'm' => Some(Self::AdvanceLevel),
            'q' => Some(Self::Quit),
            _ => None,
        }
    }
}
