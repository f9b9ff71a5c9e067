//! Kernel configuration.

/// What the kernel does when a strand fails with nobody waiting for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop the loop; `run()` returns the failure.
    #[default]
    Abort,
    /// Log the failure and keep running.
    Continue,
}

/// Configuration applied when a kernel is built.
#[derive(Debug, Clone, Default)]
pub struct KernelConfig {
    /// How unhandled strand failures are treated.
    pub failure_policy: FailurePolicy,
}

impl KernelConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the unhandled-failure policy.
    #[must_use]
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_aborts() {
        assert_eq!(KernelConfig::new().failure_policy, FailurePolicy::Abort);
        let config = KernelConfig::new().failure_policy(FailurePolicy::Continue);
        assert_eq!(config.failure_policy, FailurePolicy::Continue);
    }
}
