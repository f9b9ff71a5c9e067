//! Strands: suspendable units of work and their lifecycle.
//!
//! A strand owns one [`Coroutine`] and drives it through resumptions. Its
//! lifecycle is `Created` (start scheduled, not yet resumed), `Running`
//! (inside a resumption), `Suspended` (waiting on a registered wait), and
//! the terminal states `Succeeded`, `Failed` and `Cancelled`. Terminal
//! states are absorbing.
//!
//! Every suspended strand holds a terminator: the cancellation handle of the
//! wait it is parked on. Cancelling the strand tears the wait down through
//! that handle and delivers the cancellation into the computation as its
//! resumption input, so it can release resources before going terminal. A
//! computation that answers the cancellation with yet another wait is forced
//! terminal instead; a computation may also swallow the cancellation and
//! complete with a value of its own.

use crate::coroutine::{Coroutine, Resume, Step};
use crate::error::KernelError;
use crate::kernel::api::{Api, Dispatch, KernelShared};
use crate::types::{CancelReason, Cancellation, StrandId, Value};
use core::fmt;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// The lifecycle state of a strand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrandState {
    /// Created; the initial resumption is scheduled but has not run.
    Created,
    /// Inside a resumption right now.
    Running,
    /// Parked on a registered wait.
    Suspended,
    /// Completed with a value.
    Succeeded,
    /// Completed with a non-cancellation failure.
    Failed,
    /// Torn down by cancellation.
    Cancelled,
}

impl StrandState {
    /// Returns true for the absorbing states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

pub(crate) type WaiterCallback = Box<dyn FnOnce(Result<Value, KernelError>)>;

struct StrandInner {
    id: StrandId,
    state: StrandState,
    computation: Option<Box<dyn Coroutine>>,
    terminator: Option<Box<dyn Cancellation>>,
    waiters: Vec<(u64, WaiterCallback)>,
    next_waiter: u64,
    result: Option<Result<Value, KernelError>>,
    // Cancellation requested while Running; delivered at the next suspend
    // point instead of the wait the computation asked for.
    pending_cancel: Option<CancelReason>,
    // Set once the cancellation failure has been delivered; a further Wait
    // forces the strand terminal.
    cancelling: Option<CancelReason>,
    shared: Weak<KernelShared>,
}

/// A shared handle to a strand.
///
/// Handles are cheap to clone; all clones observe the same strand. The
/// handle outlives the strand's work and keeps its result readable.
#[derive(Clone)]
pub struct StrandHandle {
    inner: Rc<RefCell<StrandInner>>,
}

impl StrandHandle {
    pub(crate) fn new(
        id: StrandId,
        computation: Box<dyn Coroutine>,
        shared: Weak<KernelShared>,
    ) -> Self {
        Self {
            inner: Rc::new(RefCell::new(StrandInner {
                id,
                state: StrandState::Created,
                computation: Some(computation),
                terminator: None,
                waiters: Vec::new(),
                next_waiter: 0,
                result: None,
                pending_cancel: None,
                cancelling: None,
                shared,
            })),
        }
    }

    /// The strand's kernel-assigned id.
    #[must_use]
    pub fn id(&self) -> StrandId {
        self.inner.borrow().id
    }

    /// The strand's current lifecycle state.
    #[must_use]
    pub fn state(&self) -> StrandState {
        self.inner.borrow().state
    }

    /// The strand's completion result, once it is terminal.
    #[must_use]
    pub fn result(&self) -> Option<Result<Value, KernelError>> {
        self.inner.borrow().result.clone()
    }

    /// Requests cancellation of this strand.
    ///
    /// A strand that has not started yet goes terminal without ever running.
    /// A suspended strand has its wait torn down and is resumed with
    /// [`KernelError::Cancelled`] so it can clean up. Cancelling a running
    /// strand defers delivery to its next suspend point. Cancelling a
    /// terminal strand, or one already being cancelled, is a no-op.
    pub fn cancel(&self, reason: CancelReason) {
        enum Action {
            Ignore,
            Finish(Option<Box<dyn Cancellation>>),
            Deliver(Option<Box<dyn Cancellation>>),
        }
        let action = {
            let mut inner = self.inner.borrow_mut();
            match inner.state {
                StrandState::Succeeded | StrandState::Failed | StrandState::Cancelled => {
                    Action::Ignore
                }
                StrandState::Running => {
                    if inner.pending_cancel.is_none() && inner.cancelling.is_none() {
                        inner.pending_cancel = Some(reason.clone());
                    }
                    Action::Ignore
                }
                StrandState::Created => Action::Finish(inner.terminator.take()),
                StrandState::Suspended => {
                    if inner.cancelling.is_some() {
                        Action::Ignore
                    } else {
                        inner.cancelling = Some(reason.clone());
                        Action::Deliver(inner.terminator.take())
                    }
                }
            }
        };
        match action {
            Action::Ignore => {}
            Action::Finish(terminator) => {
                if let Some(wait) = terminator {
                    wait.cancel();
                }
                tracing::debug!(strand = %self.id(), %reason, "strand cancelled before start");
                self.finish(Err(KernelError::Cancelled(reason)));
            }
            Action::Deliver(terminator) => {
                if let Some(wait) = terminator {
                    wait.cancel();
                }
                tracing::debug!(strand = %self.id(), %reason, "delivering cancellation");
                let shared = self.inner.borrow().shared.upgrade();
                match shared {
                    Some(shared) => self.step(
                        &Api::new(shared),
                        Resume::Failure(KernelError::Cancelled(reason)),
                    ),
                    None => self.finish(Err(KernelError::Cancelled(reason))),
                }
            }
        }
    }

    /// Drives the computation with `input` until it suspends or completes.
    ///
    /// Waits that resolve synchronously (spawn, join on a terminal strand)
    /// keep the loop going without parking the strand.
    pub(crate) fn step(&self, api: &Api, input: Resume) {
        let mut input = input;
        loop {
            let mut computation = {
                let mut inner = self.inner.borrow_mut();
                if inner.state.is_terminal() {
                    return;
                }
                let Some(computation) = inner.computation.take() else {
                    return;
                };
                inner.state = StrandState::Running;
                inner.terminator = None;
                computation
            };
            tracing::trace!(strand = %self.id(), input = ?input, "strand resumed");
            let step = computation.resume(input);
            self.inner.borrow_mut().computation = Some(computation);
            match step {
                Step::Complete(result) => {
                    self.finish(result);
                    return;
                }
                Step::Wait(request) => {
                    enum AtSuspend {
                        Dispatch,
                        Deliver(CancelReason),
                        Force(CancelReason),
                    }
                    let at_suspend = {
                        let mut inner = self.inner.borrow_mut();
                        if let Some(reason) = inner.pending_cancel.take() {
                            inner.cancelling = Some(reason.clone());
                            AtSuspend::Deliver(reason)
                        } else if let Some(reason) = inner.cancelling.clone() {
                            AtSuspend::Force(reason)
                        } else {
                            AtSuspend::Dispatch
                        }
                    };
                    match at_suspend {
                        AtSuspend::Deliver(reason) => {
                            // The requested wait is discarded; the deferred
                            // cancellation takes its place.
                            input = Resume::Failure(KernelError::Cancelled(reason));
                        }
                        AtSuspend::Force(reason) => {
                            tracing::debug!(
                                strand = %self.id(),
                                "wait requested during cancellation, forcing terminal"
                            );
                            self.finish(Err(KernelError::Cancelled(reason)));
                            return;
                        }
                        AtSuspend::Dispatch => {
                            self.inner.borrow_mut().state = StrandState::Suspended;
                            match api.dispatch(request, self) {
                                Dispatch::Suspended => return,
                                Dispatch::Ready(result) => {
                                    input = match result {
                                        Ok(value) => Resume::Value(value),
                                        Err(error) => Resume::Failure(error),
                                    };
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// Moves the strand to a terminal state and notifies its waiters.
    pub(crate) fn finish(&self, result: Result<Value, KernelError>) {
        let (id, state, waiters, terminator, unhandled) = {
            let mut inner = self.inner.borrow_mut();
            if inner.state.is_terminal() {
                return;
            }
            let state = match &result {
                Ok(_) => StrandState::Succeeded,
                Err(error) if error.is_cancelled() => StrandState::Cancelled,
                Err(_) => StrandState::Failed,
            };
            inner.state = state;
            inner.computation = None;
            inner.pending_cancel = None;
            inner.result = Some(result.clone());
            let waiters = std::mem::take(&mut inner.waiters);
            let terminator = inner.terminator.take();
            let unhandled = if state == StrandState::Failed && waiters.is_empty() {
                result.as_ref().err().cloned()
            } else {
                None
            };
            (inner.id, state, waiters, terminator, unhandled)
        };
        if let Some(wait) = terminator {
            wait.cancel();
        }
        tracing::debug!(strand = %id, ?state, "strand finished");
        let delivered = waiter_view(id, &result);
        for (_, callback) in waiters {
            callback(delivered.clone());
        }
        if let Some(shared) = self.inner.borrow().shared.upgrade() {
            if let Some(source) = unhandled {
                shared.record_unhandled(KernelError::strand_failure(id, source));
            }
            shared.prune_terminal();
        }
    }

    /// The result a joiner observes, or `None` while the strand is live.
    pub(crate) fn joined_result(&self) -> Option<Result<Value, KernelError>> {
        let inner = self.inner.borrow();
        if inner.state.is_terminal() {
            inner
                .result
                .as_ref()
                .map(|result| waiter_view(inner.id, result))
        } else {
            None
        }
    }

    /// Registers a completion callback; the returned handle detaches it.
    pub(crate) fn add_waiter(&self, callback: WaiterCallback) -> WaiterHandle {
        let mut inner = self.inner.borrow_mut();
        let key = inner.next_waiter;
        inner.next_waiter += 1;
        inner.waiters.push((key, callback));
        WaiterHandle {
            strand: Rc::downgrade(&self.inner),
            key,
        }
    }

    /// Installs the cancellation handle of the wait the strand parks on.
    pub(crate) fn set_terminator(&self, terminator: Box<dyn Cancellation>) {
        let mut inner = self.inner.borrow_mut();
        if inner.state.is_terminal() {
            drop(inner);
            terminator.cancel();
        } else {
            inner.terminator = Some(terminator);
        }
    }

    pub(crate) fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for StrandHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("StrandHandle")
            .field("id", &inner.id)
            .field("state", &inner.state)
            .finish_non_exhaustive()
    }
}

/// The result a strand's completion delivers to its joiners: failures are
/// wrapped with the failing strand's id, cancellations pass through.
fn waiter_view(id: StrandId, result: &Result<Value, KernelError>) -> Result<Value, KernelError> {
    match result {
        Ok(value) => Ok(value.clone()),
        Err(error) if error.is_cancelled() => Err(error.clone()),
        Err(error) => Err(KernelError::strand_failure(id, error.clone())),
    }
}

/// Cancellation handle for a join waiter registration.
#[derive(Clone)]
pub(crate) struct WaiterHandle {
    strand: Weak<RefCell<StrandInner>>,
    key: u64,
}

impl WaiterHandle {
    fn cancel(&self) {
        if let Some(strand) = self.strand.upgrade() {
            strand.borrow_mut().waiters.retain(|(key, _)| *key != self.key);
        }
    }
}

impl Cancellation for WaiterHandle {
    fn cancel(&self) {
        Self::cancel(self);
    }
}

impl fmt::Debug for WaiterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WaiterHandle({})", self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine::from_fn;
    use crate::kernel::api::test_api;
    use std::time::Duration;

    fn sleeper() -> Box<dyn Coroutine> {
        Box::new(from_fn(|input| match input {
            Resume::Start => Step::sleep(Duration::from_millis(5)),
            other => Step::Complete(other.into_result()),
        }))
    }

    #[test]
    fn step_parks_on_a_sleep() {
        let api = test_api();
        let strand = StrandHandle::new(StrandId::new(0), sleeper(), api.downgrade());
        assert_eq!(strand.state(), StrandState::Created);

        strand.step(&api, Resume::Start);
        assert_eq!(strand.state(), StrandState::Suspended);
        assert!(strand.result().is_none());
    }

    #[test]
    fn cancel_before_start_never_runs() {
        let api = test_api();
        let strand = StrandHandle::new(
            StrandId::new(0),
            Box::new(from_fn(|_| unreachable!("computation must not run"))),
            api.downgrade(),
        );
        strand.cancel(CancelReason::user("not needed"));
        assert_eq!(strand.state(), StrandState::Cancelled);
        let result = strand.result().expect("terminal result");
        assert!(result.expect_err("cancelled").is_cancelled());
    }

    #[test]
    fn cancel_suspended_delivers_failure() {
        let api = test_api();
        let strand = StrandHandle::new(StrandId::new(0), sleeper(), api.downgrade());
        strand.step(&api, Resume::Start);

        strand.cancel(CancelReason::user("shutting down"));
        assert_eq!(strand.state(), StrandState::Cancelled);
        let result = strand.result().expect("terminal result");
        assert!(result.expect_err("cancelled").is_cancelled());
    }

    #[test]
    fn cancel_is_idempotent_on_terminal() {
        let api = test_api();
        let strand = StrandHandle::new(StrandId::new(0), sleeper(), api.downgrade());
        strand.step(&api, Resume::Start);
        strand.cancel(CancelReason::user("first"));
        strand.cancel(CancelReason::user("second"));
        assert_eq!(strand.state(), StrandState::Cancelled);
    }

    #[test]
    fn computation_may_swallow_cancellation() {
        let api = test_api();
        let strand = StrandHandle::new(
            StrandId::new(0),
            Box::new(from_fn(|input| match input {
                Resume::Start => Step::sleep(Duration::from_millis(5)),
                Resume::Failure(error) => {
                    assert!(error.is_cancelled());
                    Step::done(Value::payload("cleaned up"))
                }
                Resume::Value(_) => unreachable!("sleep was torn down"),
            })),
            api.downgrade(),
        );
        strand.step(&api, Resume::Start);
        strand.cancel(CancelReason::timeout());

        assert_eq!(strand.state(), StrandState::Succeeded);
    }

    #[test]
    fn waiting_during_cancellation_forces_terminal() {
        let api = test_api();
        let strand = StrandHandle::new(
            StrandId::new(0),
            Box::new(from_fn(|input| match input {
                Resume::Failure(_) => Step::sleep(Duration::from_secs(60)),
                _ => Step::sleep(Duration::from_millis(5)),
            })),
            api.downgrade(),
        );
        strand.step(&api, Resume::Start);
        strand.cancel(CancelReason::shutdown());

        assert_eq!(strand.state(), StrandState::Cancelled);
    }

    #[test]
    fn waiters_observe_wrapped_failure() {
        let api = test_api();
        let strand = StrandHandle::new(StrandId::new(7), sleeper(), api.downgrade());
        strand.step(&api, Resume::Start);

        let seen = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&seen);
        strand.add_waiter(Box::new(move |result| {
            *sink.borrow_mut() = Some(result);
        }));

        strand.step(&api, Resume::Failure(KernelError::user("boom")));
        let observed = seen.borrow_mut().take().expect("waiter notified");
        match observed.expect_err("failure") {
            KernelError::StrandFailure { id, .. } => assert_eq!(id, StrandId::new(7)),
            other => unreachable!("expected StrandFailure, got {other:?}"),
        }
    }

    #[test]
    fn detached_waiter_is_not_notified() {
        let api = test_api();
        let strand = StrandHandle::new(StrandId::new(0), sleeper(), api.downgrade());
        strand.step(&api, Resume::Start);

        let seen = Rc::new(RefCell::new(false));
        let sink = Rc::clone(&seen);
        let waiter = strand.add_waiter(Box::new(move |_| {
            *sink.borrow_mut() = true;
        }));
        waiter.cancel();
        waiter.cancel();

        strand.step(&api, Resume::Value(Value::Unit));
        assert_eq!(strand.state(), StrandState::Succeeded);
        assert!(!*seen.borrow());
    }
}
