//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use weft::{from_fn, Coroutine, Resume, Step};

pub use weft::test_utils::init_test_logging;

/// A shared ordered log of test observations.
pub type EventLog = Rc<RefCell<Vec<&'static str>>>;

pub fn event_log() -> EventLog {
    Rc::new(RefCell::new(Vec::new()))
}

/// A strand that sleeps once and records a label when it wakes.
pub fn sleep_then_record(
    delay: Duration,
    log: EventLog,
    label: &'static str,
) -> impl Coroutine {
    from_fn(move |input| match input {
        Resume::Start => Step::sleep(delay),
        other => {
            log.borrow_mut().push(label);
            Step::Complete(other.into_result())
        }
    })
}
