//! IO-readiness multiplexing.
//!
//! The multiplexer tracks interest registrations against raw file
//! descriptors and dispatches readiness through per-registration callbacks.
//! It wraps a [`polling::Poller`]; the poller's oneshot delivery is hidden by
//! re-arming a descriptor after each dispatch, so a registration stays live
//! until its handle is cancelled.
//!
//! Several registrations may watch the same descriptor with different
//! interests. The poller sees one entry per descriptor carrying the union of
//! interests; dispatch fans the observed readiness out to every registration
//! whose interest overlaps it.
//!
//! Poll failures never escape a tick. A failed wait is delivered to every
//! registered callback as an `Err`, a failed re-arm to the callbacks of the
//! affected descriptor, and the registrations involved are dropped.

use core::fmt;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::ops::BitOr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::{Rc, Weak};
use std::time::Duration;

use polling::{Event, Poller};

use crate::types::Cancellation;

/// The readiness conditions a registration watches for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(u8);

impl Interest {
    /// Watch for the resource becoming readable.
    pub const READABLE: Self = Self(0b01);
    /// Watch for the resource becoming writable.
    pub const WRITABLE: Self = Self(0b10);

    /// Returns true if this interest includes readability.
    #[must_use]
    pub const fn is_readable(self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    /// Returns true if this interest includes writability.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }

    /// Returns true if no condition is watched.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    const fn none() -> Self {
        Self(0)
    }
}

impl BitOr for Interest {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The readiness observed for a watched resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    /// The resource is readable.
    pub readable: bool,
    /// The resource is writable.
    pub writable: bool,
}

impl Readiness {
    /// Restricts the observed readiness to what a registration asked for.
    #[must_use]
    const fn masked_by(self, interest: Interest) -> Self {
        Self {
            readable: self.readable && interest.is_readable(),
            writable: self.writable && interest.is_writable(),
        }
    }

    /// Returns true if neither condition holds.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        !self.readable && !self.writable
    }
}

/// A resource watchable by the multiplexer.
///
/// Blanket-implemented for everything exposing a raw file descriptor, so
/// standard types like `UnixStream` and `TcpStream` work directly.
pub trait Source {
    /// The descriptor the poller registers.
    fn raw_fd(&self) -> RawFd;
}

impl<T: AsRawFd> Source for T {
    fn raw_fd(&self) -> RawFd {
        self.as_raw_fd()
    }
}

type IoCallback = Box<dyn FnMut(io::Result<Readiness>)>;

struct Registration {
    // The source is held so the descriptor cannot be closed and reused while
    // the poller still watches it.
    #[allow(dead_code)]
    source: Rc<dyn Source>,
    fd: RawFd,
    interest: Interest,
    // Taken out while the callback runs so dispatch never holds the inner
    // borrow across user code.
    callback: Option<IoCallback>,
}

struct MuxInner {
    poller: Poller,
    registrations: HashMap<u64, Registration>,
    fd_tokens: HashMap<RawFd, Vec<u64>>,
    next_token: u64,
    events: Vec<Event>,
}

impl MuxInner {
    /// Union of the interests of every live registration for `fd`.
    fn combined_interest(&self, fd: RawFd) -> Interest {
        let mut combined = Interest::none();
        if let Some(tokens) = self.fd_tokens.get(&fd) {
            for token in tokens {
                if let Some(reg) = self.registrations.get(token) {
                    combined = combined | reg.interest;
                }
            }
        }
        combined
    }

    fn poller_event(fd: RawFd, interest: Interest) -> Event {
        #[allow(clippy::cast_sign_loss)]
        let key = fd as usize;
        Event {
            key,
            readable: interest.is_readable(),
            writable: interest.is_writable(),
        }
    }

    /// Removes a registration and updates or deletes the poller entry for
    /// its descriptor. Poller errors during teardown are ignored.
    fn remove(&mut self, token: u64) {
        let Some(reg) = self.registrations.remove(&token) else {
            return;
        };
        let fd = reg.fd;
        if let Some(tokens) = self.fd_tokens.get_mut(&fd) {
            tokens.retain(|t| *t != token);
            if tokens.is_empty() {
                self.fd_tokens.remove(&fd);
                let _ = self.poller.delete(fd);
                return;
            }
        }
        let combined = self.combined_interest(fd);
        let _ = self.poller.modify(fd, Self::poller_event(fd, combined));
    }
}

/// Readiness multiplexer owned by a kernel.
///
/// Cloning produces another handle to the same multiplexer.
#[derive(Clone)]
pub struct IoMultiplexer {
    inner: Rc<RefCell<MuxInner>>,
}

impl IoMultiplexer {
    /// Creates a multiplexer backed by a fresh poller.
    ///
    /// # Errors
    ///
    /// Fails if the underlying poller cannot be created.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            inner: Rc::new(RefCell::new(MuxInner {
                poller: Poller::new()?,
                registrations: HashMap::new(),
                fd_tokens: HashMap::new(),
                next_token: 0,
                events: Vec::new(),
            })),
        })
    }

    /// Registers `callback` to run whenever `source` satisfies `interest`.
    ///
    /// The registration stays live until the returned handle is cancelled;
    /// the callback may fire more than once. The callback receives an `Err`
    /// when a poll or re-arm failure tears the registration down.
    ///
    /// # Errors
    ///
    /// Rejects an empty interest, and surfaces poller registration failures.
    pub fn watch(
        &self,
        source: Rc<dyn Source>,
        interest: Interest,
        callback: impl FnMut(io::Result<Readiness>) + 'static,
    ) -> io::Result<IoHandle> {
        if interest.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty io interest",
            ));
        }
        let fd = source.raw_fd();
        let mut inner = self.inner.borrow_mut();
        let token = inner.next_token;
        inner.next_token += 1;

        let already_watched = inner.fd_tokens.contains_key(&fd);
        let combined = inner.combined_interest(fd) | interest;
        let event = MuxInner::poller_event(fd, combined);
        if already_watched {
            inner.poller.modify(fd, event)?;
        } else {
            inner.poller.add(fd, event)?;
        }

        inner.registrations.insert(
            token,
            Registration {
                source,
                fd,
                interest,
                callback: Some(Box::new(callback)),
            },
        );
        inner.fd_tokens.entry(fd).or_default().push(token);
        tracing::trace!(token, fd, "io registration added");
        Ok(IoHandle {
            inner: Rc::downgrade(&self.inner),
            token,
        })
    }

    /// Waits up to `timeout` for readiness and dispatches it.
    ///
    /// Returns whether a poll happened, that is whether any registration
    /// existed at entry. With no registrations the call returns `false`
    /// immediately without blocking; `timeout` of `None` blocks until
    /// readiness arrives.
    pub fn tick(&self, timeout: Option<Duration>) -> bool {
        let wait = {
            let mut inner = self.inner.borrow_mut();
            if inner.registrations.is_empty() {
                return false;
            }
            inner.events.clear();
            let MuxInner { poller, events, .. } = &mut *inner;
            let result = poller.wait(events, timeout);
            match result {
                Ok(_) => Ok(inner
                    .events
                    .iter()
                    .map(|ev| {
                        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                        let fd = ev.key as RawFd;
                        (
                            fd,
                            Readiness {
                                readable: ev.readable,
                                writable: ev.writable,
                            },
                        )
                    })
                    .collect::<Vec<_>>()),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(Vec::new()),
                Err(err) => Err(err),
            }
        };

        match wait {
            Ok(ready) => {
                for (fd, readiness) in ready {
                    self.dispatch_fd(fd, readiness);
                }
            }
            Err(err) => self.fail_all(&err),
        }
        true
    }

    /// Number of live registrations.
    #[must_use]
    pub fn registrations(&self) -> usize {
        self.inner.borrow().registrations.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().registrations.is_empty()
    }

    /// Fans `readiness` out to the registrations watching `fd`, then re-arms
    /// the descriptor for the interests that remain.
    fn dispatch_fd(&self, fd: RawFd, readiness: Readiness) {
        let tokens = match self.inner.borrow().fd_tokens.get(&fd) {
            Some(tokens) => tokens.clone(),
            None => return,
        };
        for token in tokens {
            let taken = {
                let mut inner = self.inner.borrow_mut();
                match inner.registrations.get_mut(&token) {
                    Some(reg) => {
                        let delivered = readiness.masked_by(reg.interest);
                        if delivered.is_empty() {
                            None
                        } else {
                            reg.callback.take().map(|cb| (cb, delivered))
                        }
                    }
                    None => None,
                }
            };
            if let Some((mut cb, delivered)) = taken {
                tracing::trace!(token, fd, ?delivered, "io readiness dispatched");
                cb(Ok(delivered));
                // The callback may have cancelled its own registration.
                let mut inner = self.inner.borrow_mut();
                if let Some(reg) = inner.registrations.get_mut(&token) {
                    reg.callback = Some(cb);
                }
            }
        }

        // Oneshot delivery: the descriptor must be re-armed for whatever
        // interests survived the callbacks.
        let rearm = {
            let inner = self.inner.borrow();
            if inner.fd_tokens.contains_key(&fd) {
                Some(inner.combined_interest(fd))
            } else {
                None
            }
        };
        if let Some(combined) = rearm {
            let result = {
                let inner = self.inner.borrow();
                inner
                    .poller
                    .modify(fd, MuxInner::poller_event(fd, combined))
            };
            if let Err(err) = result {
                self.fail_fd(fd, &err);
            }
        }
    }

    /// Tears down every registration, delivering `err` to each callback.
    fn fail_all(&self, err: &io::Error) {
        tracing::warn!(error = %err, "io poll failed, dropping all registrations");
        let regs: Vec<Registration> = {
            let mut inner = self.inner.borrow_mut();
            inner.fd_tokens.clear();
            let regs: Vec<_> = inner.registrations.drain().map(|(_, reg)| reg).collect();
            for reg in &regs {
                let _ = inner.poller.delete(reg.fd);
            }
            regs
        };
        for mut reg in regs {
            if let Some(mut cb) = reg.callback.take() {
                cb(Err(io::Error::new(err.kind(), err.to_string())));
            }
        }
    }

    /// Tears down the registrations for one descriptor after a re-arm
    /// failure.
    fn fail_fd(&self, fd: RawFd, err: &io::Error) {
        tracing::warn!(fd, error = %err, "io re-arm failed, dropping registrations");
        let regs: Vec<Registration> = {
            let mut inner = self.inner.borrow_mut();
            let tokens = inner.fd_tokens.remove(&fd).unwrap_or_default();
            let _ = inner.poller.delete(fd);
            tokens
                .into_iter()
                .filter_map(|token| inner.registrations.remove(&token))
                .collect()
        };
        for mut reg in regs {
            if let Some(mut cb) = reg.callback.take() {
                cb(Err(io::Error::new(err.kind(), err.to_string())));
            }
        }
    }
}

impl fmt::Debug for IoMultiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoMultiplexer")
            .field("registrations", &self.registrations())
            .finish_non_exhaustive()
    }
}

/// Cancellation handle returned by [`IoMultiplexer::watch`].
#[derive(Clone)]
pub struct IoHandle {
    inner: Weak<RefCell<MuxInner>>,
    token: u64,
}

impl IoHandle {
    /// Removes the registration; idempotent.
    pub fn cancel(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.borrow_mut().remove(self.token);
        }
    }
}

impl Cancellation for IoHandle {
    fn cancel(&self) {
        Self::cancel(self);
    }
}

impl fmt::Debug for IoHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IoHandle({})", self.token)
    }
}
