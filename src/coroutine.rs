//! The resumable-computation seam.
//!
//! The kernel treats a computation as an opaque handle: something it can
//! resume with a value or a failure, and that answers with either its next
//! wait or its completion. Any coroutine-like facility (generators, hand
//! written state machines, callback continuations) can sit behind the
//! [`Coroutine`] trait.
//!
//! Waits are expressed as data: a suspending computation returns
//! [`Step::Wait`] carrying a [`WaitRequest`], and the kernel's api layer
//! turns that request into an event-queue or IO registration. Each wait
//! arranges exactly one resumption.

use crate::error::KernelError;
use crate::io::Source;
use crate::kernel::StrandHandle;
use crate::types::Value;
use core::fmt;
use std::rc::Rc;
use std::time::Duration;

/// Input delivered into a computation when it is resumed.
#[derive(Debug)]
pub enum Resume {
    /// First resumption; no input value exists yet.
    Start,
    /// The pending wait was satisfied with a value.
    Value(Value),
    /// The pending wait failed or was torn down.
    Failure(KernelError),
}

impl Resume {
    /// Returns true for the initial resumption.
    #[must_use]
    pub fn is_start(&self) -> bool {
        matches!(self, Self::Start)
    }

    /// Collapses the input into a result, mapping `Start` to the unit value.
    pub fn into_result(self) -> Result<Value, KernelError> {
        match self {
            Self::Start => Ok(Value::Unit),
            Self::Value(value) => Ok(value),
            Self::Failure(error) => Err(error),
        }
    }
}

/// A wait requested by a suspending computation.
pub enum WaitRequest {
    /// Resume with `Unit` after the given delay; zero delay means "on the
    /// next tick".
    Sleep(Duration),
    /// Resume with the observed readiness when the resource is readable.
    Readable(Rc<dyn Source>),
    /// Resume with the observed readiness when the resource is writable.
    Writable(Rc<dyn Source>),
    /// Resume with the given strand's result when it completes.
    Join(StrandHandle),
    /// Start a new strand and resume immediately with its handle.
    Spawn(Box<dyn Coroutine>),
    /// Request a kernel stop; the calling strand stays suspended.
    Stop,
}

impl fmt::Debug for WaitRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sleep(delay) => f.debug_tuple("Sleep").field(delay).finish(),
            Self::Readable(_) => f.write_str("Readable(..)"),
            Self::Writable(_) => f.write_str("Writable(..)"),
            Self::Join(handle) => f.debug_tuple("Join").field(&handle.id()).finish(),
            Self::Spawn(_) => f.write_str("Spawn(..)"),
            Self::Stop => f.write_str("Stop"),
        }
    }
}

/// One step of a computation: its next wait, or its completion.
#[derive(Debug)]
pub enum Step {
    /// Suspend on the given wait.
    Wait(WaitRequest),
    /// The computation finished; this is its completion signal.
    Complete(Result<Value, KernelError>),
}

impl Step {
    /// Completes successfully with the given value.
    #[must_use]
    pub fn done(value: Value) -> Self {
        Self::Complete(Ok(value))
    }

    /// Completes with a failure.
    #[must_use]
    pub fn failed(error: KernelError) -> Self {
        Self::Complete(Err(error))
    }

    /// Suspends on a timer.
    #[must_use]
    pub fn sleep(delay: Duration) -> Self {
        Self::Wait(WaitRequest::Sleep(delay))
    }

    /// Suspends until the resource is readable.
    #[must_use]
    pub fn readable(source: Rc<dyn Source>) -> Self {
        Self::Wait(WaitRequest::Readable(source))
    }

    /// Suspends until the resource is writable.
    #[must_use]
    pub fn writable(source: Rc<dyn Source>) -> Self {
        Self::Wait(WaitRequest::Writable(source))
    }

    /// Suspends until the given strand completes.
    #[must_use]
    pub fn join(handle: StrandHandle) -> Self {
        Self::Wait(WaitRequest::Join(handle))
    }

    /// Spawns a new strand; the caller is resumed immediately with its
    /// handle.
    #[must_use]
    pub fn spawn(computation: impl Coroutine + 'static) -> Self {
        Self::Wait(WaitRequest::Spawn(Box::new(computation)))
    }

    /// Requests a kernel stop.
    #[must_use]
    pub fn stop() -> Self {
        Self::Wait(WaitRequest::Stop)
    }
}

/// An opaque resumable computation driven by the kernel.
///
/// The kernel resumes a computation at most once per satisfied wait; a
/// computation suspends by returning [`Step::Wait`] and finishes by
/// returning [`Step::Complete`], after which it is never resumed again.
pub trait Coroutine {
    /// Advances the computation with the given input.
    fn resume(&mut self, input: Resume) -> Step;
}

/// Wraps a closure as a [`Coroutine`].
///
/// The closure receives every resumption input in order, starting with
/// [`Resume::Start`], and answers with the computation's next step.
pub fn from_fn<F>(f: F) -> FnCoroutine<F>
where
    F: FnMut(Resume) -> Step,
{
    FnCoroutine { f }
}

/// A [`Coroutine`] backed by a closure. See [`from_fn`].
pub struct FnCoroutine<F> {
    f: F,
}

impl<F> Coroutine for FnCoroutine<F>
where
    F: FnMut(Resume) -> Step,
{
    fn resume(&mut self, input: Resume) -> Step {
        (self.f)(input)
    }
}
