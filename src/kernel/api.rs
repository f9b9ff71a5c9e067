//! The wait dispatcher: turns a strand's wait requests into registrations.
//!
//! Every closure handed to the event queue or the multiplexer captures only
//! a weak reference to the kernel internals plus the strand it resumes, so
//! abandoned kernels do not keep themselves alive through their own pending
//! callbacks.

use crate::coroutine::{Coroutine, Resume, WaitRequest};
use crate::error::{KernelError, Result};
use crate::events::EventQueue;
use crate::io::{Interest, IoHandle, IoMultiplexer, Source};
use crate::kernel::config::{FailurePolicy, KernelConfig};
use crate::kernel::state::KernelState;
use crate::kernel::strand::StrandHandle;
use crate::types::{StrandId, Value};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

/// State shared between the kernel front-end, the api layer and strands.
pub(crate) struct KernelShared {
    pub(crate) state: Cell<KernelState>,
    pub(crate) events: EventQueue,
    pub(crate) io: IoMultiplexer,
    failure_policy: FailurePolicy,
    next_id: Cell<u64>,
    failure: RefCell<Option<KernelError>>,
    strands: RefCell<Vec<StrandHandle>>,
}

impl KernelShared {
    pub(crate) fn new(config: &KernelConfig) -> Result<Self> {
        Ok(Self {
            state: Cell::new(KernelState::Stopped),
            events: EventQueue::new(),
            io: IoMultiplexer::new()?,
            failure_policy: config.failure_policy,
            next_id: Cell::new(0),
            failure: RefCell::new(None),
            strands: RefCell::new(Vec::new()),
        })
    }

    fn allocate_id(&self) -> StrandId {
        let raw = self.next_id.get();
        self.next_id.set(raw + 1);
        StrandId::new(raw)
    }

    /// Records a failure nobody was waiting for and applies the configured
    /// policy. The first recorded failure wins.
    pub(crate) fn record_unhandled(&self, error: KernelError) {
        match self.failure_policy {
            FailurePolicy::Abort => {
                tracing::error!(%error, "unhandled strand failure, stopping kernel");
                let mut failure = self.failure.borrow_mut();
                if failure.is_none() {
                    *failure = Some(error);
                }
                if self.state.get().is_running() {
                    self.state.set(KernelState::Stopping);
                }
            }
            FailurePolicy::Continue => {
                tracing::error!(%error, "unhandled strand failure ignored");
            }
        }
    }

    pub(crate) fn take_failure(&self) -> Option<KernelError> {
        self.failure.borrow_mut().take()
    }

    /// Drops registry entries for strands that went terminal.
    pub(crate) fn prune_terminal(&self) {
        self.strands
            .borrow_mut()
            .retain(|strand| !strand.state().is_terminal());
    }

    /// Number of non-terminal strands the kernel tracks.
    pub(crate) fn live_strands(&self) -> usize {
        self.strands.borrow().len()
    }
}

/// The outcome of dispatching a wait request.
pub(crate) enum Dispatch {
    /// A registration was made; the strand stays parked.
    Suspended,
    /// The wait resolved synchronously; resume with this result.
    Ready(Result<Value>),
}

/// Strand-facing operations, bound to one kernel's shared state.
#[derive(Clone)]
pub(crate) struct Api {
    shared: Rc<KernelShared>,
}

impl Api {
    pub(crate) fn new(shared: Rc<KernelShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn downgrade(&self) -> Weak<KernelShared> {
        Rc::downgrade(&self.shared)
    }

    /// Creates a strand and schedules its initial resumption as a zero-delay
    /// event. The start event doubles as the new strand's terminator, so a
    /// strand cancelled before its first resumption never runs.
    pub(crate) fn spawn(&self, computation: Box<dyn Coroutine>) -> StrandHandle {
        let id = self.shared.allocate_id();
        let strand = StrandHandle::new(id, computation, self.downgrade());
        let waker = strand.clone();
        let weak = self.downgrade();
        let start = self.shared.events.schedule(Duration::ZERO, move || {
            if let Some(shared) = weak.upgrade() {
                waker.step(&Api::new(shared), Resume::Start);
            }
        });
        strand.set_terminator(Box::new(start));
        self.shared.strands.borrow_mut().push(strand.clone());
        tracing::debug!(strand = %id, "strand created");
        strand
    }

    /// Turns a wait request into a registration, or resolves it on the spot.
    pub(crate) fn dispatch(&self, request: WaitRequest, strand: &StrandHandle) -> Dispatch {
        match request {
            WaitRequest::Sleep(delay) => self.wait_sleep(delay, strand),
            WaitRequest::Readable(source) => self.wait_io(source, Interest::READABLE, strand),
            WaitRequest::Writable(source) => self.wait_io(source, Interest::WRITABLE, strand),
            WaitRequest::Join(target) => self.wait_join(&target, strand),
            WaitRequest::Spawn(computation) => {
                Dispatch::Ready(Ok(Value::Strand(self.spawn(computation))))
            }
            WaitRequest::Stop => {
                tracing::debug!(strand = %strand.id(), "stop requested");
                if self.shared.state.get().is_running() {
                    self.shared.state.set(KernelState::Stopping);
                }
                Dispatch::Suspended
            }
        }
    }

    fn wait_sleep(&self, delay: Duration, strand: &StrandHandle) -> Dispatch {
        let waker = strand.clone();
        let weak = self.downgrade();
        let timer = self.shared.events.schedule(delay, move || {
            if let Some(shared) = weak.upgrade() {
                waker.step(&Api::new(shared), Resume::Value(Value::Unit));
            }
        });
        strand.set_terminator(Box::new(timer));
        Dispatch::Suspended
    }

    /// Registers a readiness wait that resumes the strand exactly once: the
    /// callback detaches its own registration before stepping, since the
    /// multiplexer would otherwise keep it live and fire it again.
    fn wait_io(&self, source: Rc<dyn Source>, interest: Interest, strand: &StrandHandle) -> Dispatch {
        let slot: Rc<RefCell<Option<IoHandle>>> = Rc::new(RefCell::new(None));
        let registration = Rc::clone(&slot);
        let waker = strand.clone();
        let weak = self.downgrade();
        let watched = self.shared.io.watch(source, interest, move |result| {
            if let Some(handle) = registration.borrow_mut().take() {
                handle.cancel();
            }
            if let Some(shared) = weak.upgrade() {
                let input = match result {
                    Ok(ready) => Resume::Value(Value::Readiness(ready)),
                    Err(error) => Resume::Failure(KernelError::from(error)),
                };
                waker.step(&Api::new(shared), input);
            }
        });
        match watched {
            Ok(handle) => {
                *slot.borrow_mut() = Some(handle.clone());
                strand.set_terminator(Box::new(handle));
                Dispatch::Suspended
            }
            Err(error) => Dispatch::Ready(Err(error.into())),
        }
    }

    fn wait_join(&self, target: &StrandHandle, strand: &StrandHandle) -> Dispatch {
        if target.same(strand) {
            return Dispatch::Ready(Err(KernelError::Scheduling(
                "a strand cannot wait for itself".into(),
            )));
        }
        if let Some(result) = target.joined_result() {
            return Dispatch::Ready(result);
        }
        let waker = strand.clone();
        let weak = self.downgrade();
        let waiter = target.add_waiter(Box::new(move |result| {
            if let Some(shared) = weak.upgrade() {
                let input = match result {
                    Ok(value) => Resume::Value(value),
                    Err(error) => Resume::Failure(error),
                };
                waker.step(&Api::new(shared), input);
            }
        }));
        strand.set_terminator(Box::new(waiter));
        Dispatch::Suspended
    }
}

#[cfg(test)]
pub(crate) fn test_api() -> Api {
    let shared = KernelShared::new(&KernelConfig::default()).expect("kernel shared state");
    Api::new(Rc::new(shared))
}
