//! The timer-ordered event queue.
//!
//! An ordered collection of scheduled callbacks, each tagged with an absolute
//! fire time and a monotonically increasing sequence number for stable
//! ordering among equal fire times.
//!
//! # Invariants
//!
//! - Callbacks fire in non-decreasing fire-time order; among equal fire
//!   times, insertion order is preserved (FIFO tie-break).
//! - Entries scheduled while a tick is in progress are eligible only on the
//!   next tick, so a callback rescheduling itself at zero delay cannot spin
//!   the queue forever within one tick.
//! - Cancelling an entry before it fires removes it with no side effect;
//!   cancellation is idempotent.
//!
//! Cancellation is lazy: the heap entry stays behind and only the callback
//! map entry is removed, mirroring the generation trick a timer heap uses to
//! avoid mid-heap removal. Stale heap entries are purged when they reach the
//! top.

use crate::types::Cancellation;
use core::fmt;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

type EventCallback = Box<dyn FnOnce()>;

/// A heap entry: fire time plus sequence number for the FIFO tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScheduledEvent {
    fire_at: Instant,
    seq: u64,
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap: earliest fire time first, FIFO among
        // equal fire times.
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct QueueInner {
    heap: BinaryHeap<ScheduledEvent>,
    callbacks: HashMap<u64, EventCallback>,
    next_seq: u64,
}

/// The timer-ordered callback queue owned by a kernel.
///
/// Cloning produces another handle to the same queue.
#[derive(Clone)]
pub struct EventQueue {
    inner: Rc<RefCell<QueueInner>>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(QueueInner {
                heap: BinaryHeap::new(),
                callbacks: HashMap::new(),
                next_seq: 0,
            })),
        }
    }

    /// Schedules `callback` to fire after `delay`.
    ///
    /// A zero delay fires on the next tick regardless of current time. The
    /// returned handle cancels the entry before it fires; cancelling twice,
    /// or after firing, is a no-op.
    pub fn schedule(&self, delay: Duration, callback: impl FnOnce() + 'static) -> EventHandle {
        let mut inner = self.inner.borrow_mut();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let now = Instant::now();
        let fire_at = now
            .checked_add(delay)
            .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 100));
        inner.heap.push(ScheduledEvent { fire_at, seq });
        inner.callbacks.insert(seq, Box::new(callback));
        tracing::trace!(seq, ?delay, "event scheduled");
        EventHandle {
            inner: Rc::downgrade(&self.inner),
            seq,
        }
    }

    /// Fires every due entry and returns the delay until the next pending
    /// one.
    ///
    /// Returns `Some(Duration::ZERO)` when overdue entries remain (scheduled
    /// while this tick was in progress), `None` when the queue is empty. A
    /// firing callback may schedule or cancel entries freely; what it
    /// schedules becomes eligible on the next tick.
    pub fn tick(&self) -> Option<Duration> {
        let now = Instant::now();
        let horizon = self.inner.borrow().next_seq;
        loop {
            let callback = {
                let mut inner = self.inner.borrow_mut();
                let mut fired = None;
                loop {
                    let Some(entry) = inner.heap.peek().copied() else {
                        break;
                    };
                    if entry.fire_at > now || entry.seq >= horizon {
                        break;
                    }
                    inner.heap.pop();
                    if let Some(cb) = inner.callbacks.remove(&entry.seq) {
                        tracing::trace!(seq = entry.seq, "event firing");
                        fired = Some(cb);
                        break;
                    }
                    // cancelled entry, keep scanning
                }
                fired
            };
            match callback {
                Some(cb) => cb(),
                None => break,
            }
        }
        // Fresh timestamp: entries scheduled by the callbacks above are
        // already overdue and must report a zero delay, not the few
        // microseconds between tick entry and their schedule call.
        self.next_delay(Instant::now())
    }

    /// Number of pending (scheduled, not yet fired or cancelled) entries.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.borrow().callbacks.len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().callbacks.is_empty()
    }

    /// Delay until the earliest live entry: zero if overdue, `None` if the
    /// queue is empty. Purges stale (cancelled) entries from the top so they
    /// never extend the reported delay.
    fn next_delay(&self, now: Instant) -> Option<Duration> {
        let mut inner = self.inner.borrow_mut();
        loop {
            let top = inner.heap.peek().copied();
            match top {
                Some(entry) if !inner.callbacks.contains_key(&entry.seq) => {
                    inner.heap.pop();
                }
                Some(entry) => return Some(entry.fire_at.saturating_duration_since(now)),
                None => return None,
            }
        }
    }
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

/// Cancellation handle returned by [`EventQueue::schedule`].
#[derive(Clone)]
pub struct EventHandle {
    inner: Weak<RefCell<QueueInner>>,
    seq: u64,
}

impl EventHandle {
    /// Removes the entry if it has not fired yet; idempotent.
    pub fn cancel(&self) {
        if let Some(inner) = self.inner.upgrade() {
            if inner.borrow_mut().callbacks.remove(&self.seq).is_some() {
                tracing::trace!(seq = self.seq, "event cancelled");
            }
        }
    }
}

impl Cancellation for EventHandle {
    fn cancel(&self) {
        Self::cancel(self);
    }
}

impl fmt::Debug for EventHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventHandle({})", self.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> Box<dyn FnOnce()>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let make = {
            let log = Rc::clone(&log);
            move |label: &'static str| -> Box<dyn FnOnce()> {
                let log = Rc::clone(&log);
                Box::new(move || log.borrow_mut().push(label))
            }
        };
        (log, make)
    }

    #[test]
    fn fires_in_delay_order() {
        let queue = EventQueue::new();
        let (log, make) = recorder();
        queue.schedule(Duration::from_millis(30), make("30ms"));
        queue.schedule(Duration::from_millis(10), make("10ms"));
        queue.schedule(Duration::from_millis(20), make("20ms"));

        while !queue.is_empty() {
            if let Some(delay) = queue.tick() {
                std::thread::sleep(delay);
            }
        }
        assert_eq!(*log.borrow(), vec!["10ms", "20ms", "30ms"]);
    }

    #[test]
    fn fifo_among_equal_fire_times() {
        let queue = EventQueue::new();
        let (log, make) = recorder();
        queue.schedule(Duration::ZERO, make("first"));
        queue.schedule(Duration::ZERO, make("second"));
        queue.schedule(Duration::ZERO, make("third"));

        queue.tick();
        assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn cancelled_entry_never_fires() {
        let queue = EventQueue::new();
        let (log, make) = recorder();
        let handle = queue.schedule(Duration::ZERO, make("cancelled"));
        queue.schedule(Duration::ZERO, make("kept"));

        handle.cancel();
        handle.cancel(); // idempotent
        queue.tick();
        assert_eq!(*log.borrow(), vec!["kept"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn entries_scheduled_during_tick_wait_for_next_tick() {
        let queue = EventQueue::new();
        let (log, make) = recorder();
        let requeue = queue.clone();
        let nested = {
            let log = Rc::clone(&log);
            move || {
                log.borrow_mut().push("outer");
                requeue.schedule(Duration::ZERO, make("inner"));
            }
        };
        queue.schedule(Duration::ZERO, nested);

        let next = queue.tick();
        assert_eq!(*log.borrow(), vec!["outer"]);
        // the nested entry is overdue, so the reported delay is zero
        assert_eq!(next, Some(Duration::ZERO));

        queue.tick();
        assert_eq!(*log.borrow(), vec!["outer", "inner"]);
    }

    #[test]
    fn next_delay_skips_cancelled_entries() {
        let queue = EventQueue::new();
        let (_, make) = recorder();
        let near = queue.schedule(Duration::from_millis(5), make("near"));
        queue.schedule(Duration::from_secs(60), make("far"));

        near.cancel();
        let delay = queue.tick().expect("far entry still pending");
        assert!(delay > Duration::from_secs(30), "got {delay:?}");
    }

    #[test]
    fn empty_queue_ticks_to_none() {
        let queue = EventQueue::new();
        assert_eq!(queue.tick(), None);
        assert!(queue.is_empty());
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn cancel_after_fire_is_noop() {
        let queue = EventQueue::new();
        let (log, make) = recorder();
        let handle = queue.schedule(Duration::ZERO, make("fired"));
        queue.tick();
        handle.cancel();
        assert_eq!(*log.borrow(), vec!["fired"]);
    }

    #[test]
    fn callback_may_cancel_other_entries() {
        let queue = EventQueue::new();
        let (log, make) = recorder();
        let victim = queue.schedule(Duration::from_millis(1), make("victim"));
        let killer = {
            let log = Rc::clone(&log);
            move || {
                log.borrow_mut().push("killer");
                victim.cancel();
            }
        };
        queue.schedule(Duration::ZERO, killer);

        std::thread::sleep(Duration::from_millis(2));
        queue.tick();
        assert_eq!(*log.borrow(), vec!["killer"]);
        assert!(queue.is_empty());
    }
}
