//! The kernel front-end and its run loop.

use crate::coroutine::Coroutine;
use crate::error::{KernelError, Result};
use crate::kernel::api::{Api, KernelShared};
use crate::kernel::config::KernelConfig;
use crate::kernel::state::KernelState;
use crate::kernel::strand::StrandHandle;
use core::fmt;
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

/// A single-threaded cooperative execution kernel.
///
/// Work is submitted as strands via [`execute`](Self::execute) and driven by
/// [`run`](Self::run), which interleaves the event queue and the IO
/// multiplexer until the kernel is quiescent or stopped. A kernel is
/// re-runnable: `run` returning (through [`stop`](Self::stop) or a stop
/// request from a strand) leaves pending work in place, and a later `run`
/// picks it up.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use weft::{from_fn, Kernel, Resume, Step, Value};
///
/// let kernel = Kernel::new()?;
/// let strand = kernel.execute(from_fn(|input| match input {
///     Resume::Start => Step::sleep(Duration::from_millis(1)),
///     other => Step::Complete(other.into_result().map(|_| Value::payload("done"))),
/// }));
/// kernel.run()?;
///
/// let result = strand.result().expect("strand completed")?;
/// assert_eq!(result.downcast::<&str>().as_deref(), Some(&"done"));
/// # Ok::<(), weft::KernelError>(())
/// ```
pub struct Kernel {
    shared: Rc<KernelShared>,
    in_loop: Cell<bool>,
}

impl Kernel {
    /// Creates a kernel with the default configuration.
    ///
    /// # Errors
    ///
    /// Fails if the IO multiplexer cannot be set up.
    pub fn new() -> Result<Self> {
        Self::with_config(KernelConfig::default())
    }

    /// Creates a kernel with the given configuration.
    ///
    /// # Errors
    ///
    /// Fails if the IO multiplexer cannot be set up.
    pub fn with_config(config: KernelConfig) -> Result<Self> {
        Ok(Self {
            shared: Rc::new(KernelShared::new(&config)?),
            in_loop: Cell::new(false),
        })
    }

    /// Submits a computation as a new strand.
    ///
    /// The strand does not start here: its initial resumption is scheduled
    /// as a zero-delay event and runs inside [`run`](Self::run). Callable
    /// whether or not the loop is executing.
    pub fn execute(&self, computation: impl Coroutine + 'static) -> StrandHandle {
        self.api().spawn(Box::new(computation))
    }

    /// Runs the loop until quiescence or a stop.
    ///
    /// Each iteration fires due events, then polls for IO readiness using
    /// the delay until the next timer as the poll timeout. With timers
    /// pending but no IO registered the loop sleeps instead of polling. The
    /// loop exits when no timer and no IO registration remains, or when a
    /// stop was requested.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Scheduling`] when called re-entrantly, and the
    /// recorded failure when an unhandled strand failure stopped the kernel.
    pub fn run(&self) -> Result<()> {
        if self.in_loop.get() {
            return Err(KernelError::Scheduling(
                "kernel is already running".into(),
            ));
        }
        self.in_loop.set(true);
        self.shared.state.set(KernelState::Running);
        tracing::debug!("kernel started");

        let mut timeout: Option<Duration> = None;
        let mut has_io = false;
        loop {
            if let Some(delay) = timeout {
                if !has_io && !delay.is_zero() {
                    std::thread::sleep(delay);
                }
            }
            timeout = self.shared.events.tick();
            if !self.shared.state.get().is_running() {
                break;
            }
            has_io = self.shared.io.tick(timeout);
            if !self.shared.state.get().is_running() {
                break;
            }
            if timeout.is_none() && !has_io {
                break;
            }
        }

        self.shared.state.set(KernelState::Stopped);
        self.in_loop.set(false);
        tracing::debug!("kernel stopped");
        match self.shared.take_failure() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    /// Requests a stop.
    ///
    /// Pending strands, timers and IO registrations are retained; a later
    /// [`run`](Self::run) resumes them. Stopping a stopped kernel is a
    /// no-op, and a stop issued before `run` does not prevent it from
    /// executing the work already submitted.
    pub fn stop(&self) {
        tracing::debug!("kernel stop requested");
        self.shared.state.set(KernelState::Stopped);
    }

    /// The kernel's current lifecycle state.
    #[must_use]
    pub fn state(&self) -> KernelState {
        self.shared.state.get()
    }

    fn api(&self) -> Api {
        Api::new(Rc::clone(&self.shared))
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("state", &self.shared.state.get())
            .field("pending_events", &self.shared.events.pending())
            .field("io_registrations", &self.shared.io.registrations())
            .field("live_strands", &self.shared.live_strands())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine::{from_fn, Resume, Step};
    use crate::kernel::strand::StrandState;
    use crate::types::Value;

    #[test]
    fn empty_kernel_runs_to_quiescence() {
        let kernel = Kernel::new().expect("kernel");
        kernel.run().expect("quiescent run");
        assert_eq!(kernel.state(), KernelState::Stopped);
    }

    #[test]
    fn executed_strand_completes() {
        let kernel = Kernel::new().expect("kernel");
        let strand = kernel.execute(from_fn(|_| Step::done(Value::payload(7_u32))));
        assert_eq!(strand.state(), StrandState::Created);

        kernel.run().expect("run");
        assert_eq!(strand.state(), StrandState::Succeeded);
        let value = strand.result().expect("result").expect("success");
        assert_eq!(value.downcast::<u32>().as_deref(), Some(&7));
    }

    #[test]
    fn sleep_resumes_with_unit() {
        let kernel = Kernel::new().expect("kernel");
        let strand = kernel.execute(from_fn(|input| match input {
            Resume::Start => Step::sleep(Duration::from_millis(2)),
            other => Step::Complete(other.into_result()),
        }));
        kernel.run().expect("run");
        let value = strand.result().expect("result").expect("success");
        assert!(value.is_unit());
    }

    #[test]
    fn stop_before_run_does_not_discard_work() {
        let kernel = Kernel::new().expect("kernel");
        let strand = kernel.execute(from_fn(|_| Step::done(Value::Unit)));
        kernel.stop();
        kernel.run().expect("run");
        assert_eq!(strand.state(), StrandState::Succeeded);
    }
}
