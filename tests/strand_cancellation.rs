//! Strand cancellation: before start, while suspended, and as observed by
//! joiners.

mod common;

use common::init_test_logging;
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;
use weft::{
    assert_cancelled, from_fn, test_complete, test_phase, CancelReason, Kernel, Resume, Step,
    StrandState, Value,
};

#[test]
fn cancel_before_run_never_starts_the_computation() {
    init_test_logging();
    test_phase!("cancel_before_run_never_starts_the_computation");

    let kernel = Kernel::new().expect("kernel");
    let strand = kernel.execute(from_fn(|_| -> Step {
        unreachable!("a strand cancelled before start must never run")
    }));

    strand.cancel(CancelReason::user("not needed"));
    strand.cancel(CancelReason::user("again"));
    assert_eq!(strand.state(), StrandState::Cancelled);

    kernel.run().expect("run");
    assert_eq!(strand.state(), StrandState::Cancelled);
    assert_cancelled!(strand.result().expect("terminal result"));
    test_complete!("cancel_before_run_never_starts_the_computation");
}

#[test]
fn cancelled_strand_runs_its_cleanup() {
    init_test_logging();
    test_phase!("cancelled_strand_runs_its_cleanup");

    let kernel = Kernel::new().expect("kernel");
    let cleaned = Rc::new(Cell::new(false));
    let flag = Rc::clone(&cleaned);
    let sleeper = kernel.execute(from_fn(move |input| match input {
        Resume::Start => Step::sleep(Duration::from_millis(100)),
        Resume::Failure(error) => {
            flag.set(true);
            Step::failed(error)
        }
        Resume::Value(_) => unreachable!("the sleep was torn down"),
    }));

    let victim = sleeper.clone();
    kernel.execute(from_fn(move |input| match input {
        Resume::Start => Step::sleep(Duration::from_millis(5)),
        other => {
            victim.cancel(CancelReason::user("cleanup test"));
            Step::Complete(other.into_result())
        }
    }));

    kernel.run().expect("run");
    assert!(cleaned.get());
    assert_eq!(sleeper.state(), StrandState::Cancelled);
    assert_cancelled!(sleeper.result().expect("terminal result"));
    test_complete!("cancelled_strand_runs_its_cleanup");
}

#[test]
fn joiner_observes_the_cancellation() {
    init_test_logging();
    test_phase!("joiner_observes_the_cancellation");

    let kernel = Kernel::new().expect("kernel");
    let child = kernel.execute(from_fn(|input| match input {
        Resume::Start => Step::sleep(Duration::from_millis(100)),
        other => Step::Complete(other.into_result()),
    }));

    let target = child.clone();
    let parent = kernel.execute(from_fn(move |input| match input {
        Resume::Start => Step::join(target.clone()),
        Resume::Failure(error) => {
            assert!(error.is_cancelled());
            Step::done(Value::payload("observed"))
        }
        Resume::Value(_) => unreachable!("the child cannot succeed"),
    }));

    let victim = child.clone();
    kernel.execute(from_fn(move |input| match input {
        Resume::Start => Step::sleep(Duration::from_millis(5)),
        other => {
            victim.cancel(CancelReason::user("parent no longer interested"));
            Step::Complete(other.into_result())
        }
    }));

    kernel.run().expect("run");
    assert_eq!(child.state(), StrandState::Cancelled);
    assert_eq!(parent.state(), StrandState::Succeeded);
    let value = parent.result().expect("result").expect("success");
    assert_eq!(value.downcast::<&str>().as_deref(), Some(&"observed"));
    test_complete!("joiner_observes_the_cancellation");
}

#[test]
fn cancelling_a_finished_strand_is_a_noop() {
    init_test_logging();

    let kernel = Kernel::new().expect("kernel");
    let strand = kernel.execute(from_fn(|_| Step::done(Value::payload(3_u8))));
    kernel.run().expect("run");
    assert_eq!(strand.state(), StrandState::Succeeded);

    strand.cancel(CancelReason::shutdown());
    assert_eq!(strand.state(), StrandState::Succeeded);
    let value = strand.result().expect("result").expect("success");
    assert_eq!(value.downcast::<u8>().as_deref(), Some(&3));
}
