//! Kernel lifecycle states.

use core::fmt;

/// The lifecycle state of a kernel.
///
/// A kernel starts out `Stopped`, is `Running` while its loop executes, and
/// passes through `Stopping` when a stop was requested from inside the loop
/// but the current iteration has not finished yet. After the loop exits the
/// kernel is `Stopped` again; pending work is retained and a later `run()`
/// resumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KernelState {
    /// The run loop is not executing.
    #[default]
    Stopped,
    /// The run loop is executing.
    Running,
    /// A stop was requested; the loop exits at the next check.
    Stopping,
}

impl KernelState {
    /// Returns true while the loop should keep iterating.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for KernelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.write_str("stopped"),
            Self::Running => f.write_str("running"),
            Self::Stopping => f.write_str("stopping"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_running_is_running() {
        assert!(KernelState::Running.is_running());
        assert!(!KernelState::Stopping.is_running());
        assert!(!KernelState::Stopped.is_running());
        assert_eq!(KernelState::default(), KernelState::Stopped);
    }
}
