//! Weft: a single-threaded cooperative execution kernel.
//!
//! # Overview
//!
//! Weft runs strands: suspendable units of work driven by a kernel that
//! interleaves a timer-ordered event queue with an IO-readiness multiplexer
//! on one thread. A strand suspends by asking for a wait (a sleep, IO
//! readiness on a resource, another strand's completion) and is resumed with
//! the wait's result; nothing in the kernel blocks except the poll that
//! waits for the next timer or readiness.
//!
//! # Core Guarantees
//!
//! - **Timer order**: scheduled events fire in non-decreasing delay order,
//!   FIFO among equal fire times
//! - **One resumption per wait**: every satisfied wait resumes its strand
//!   exactly once
//! - **Cooperative cancellation**: cancelling a strand tears its wait down
//!   and delivers the cancellation into the computation, which may clean up
//!   before going terminal
//! - **Quiescence**: the run loop returns once no timer, IO registration or
//!   runnable strand remains
//! - **Contained failures**: a poll failure or strand failure is routed to
//!   the waiters it concerns, never thrown out of the loop mid-iteration
//!
//! # Module Structure
//!
//! - [`types`]: Core types (identifiers, values, cancellation)
//! - [`coroutine`]: The resumable-computation seam and wait requests
//! - [`events`]: The timer-ordered event queue
//! - [`io`]: The IO-readiness multiplexer
//! - [`kernel`]: The kernel, its run loop, and strands
//! - [`error`]: Error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod coroutine;
pub mod error;
pub mod events;
pub mod io;
pub mod kernel;
#[doc(hidden)]
pub mod test_utils;
pub mod types;

// Re-exports for convenient access to core types
pub use coroutine::{from_fn, Coroutine, FnCoroutine, Resume, Step, WaitRequest};
pub use error::{KernelError, Result};
pub use events::{EventHandle, EventQueue};
pub use io::{Interest, IoHandle, IoMultiplexer, Readiness, Source};
pub use kernel::{
    FailurePolicy, Kernel, KernelConfig, KernelState, StrandHandle, StrandState,
};
pub use types::{CancelKind, CancelReason, Cancellation, StrandId, Value};
