//! Test utilities for Weft.
//!
//! This module provides shared helpers for unit and integration tests:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - A one-shot kernel runner for single-strand tests
//! - Result assertion macros
//!
//! # Example
//! ```
//! use weft::test_utils::{init_test_logging, run_strand};
//! use weft::{from_fn, Step, Value};
//!
//! init_test_logging();
//! let result = run_strand(from_fn(|_| Step::done(Value::Unit)));
//! assert!(result.expect("strand succeeded").is_unit());
//! ```

use crate::coroutine::Coroutine;
use crate::error::Result;
use crate::kernel::Kernel;
use crate::types::Value;
use std::sync::Once;
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Run one computation on a fresh kernel and return its completion result.
///
/// Panics when the kernel cannot be built, the run loop fails, or the strand
/// is still live after the loop drains.
pub fn run_strand(computation: impl Coroutine + 'static) -> Result<Value> {
    init_test_logging();
    let kernel = Kernel::new().expect("failed to build test kernel");
    let strand = kernel.execute(computation);
    kernel.run().expect("test kernel run failed");
    strand
        .result()
        .expect("strand did not complete before quiescence")
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

/// Assert that a strand result is a cancellation.
#[macro_export]
macro_rules! assert_cancelled {
    ($result:expr) => {
        match $result {
            Err(error) if error.is_cancelled() => {}
            other => unreachable!("expected a cancellation, got {:?}", other),
        }
    };
}

/// Assert that a strand result is a wrapped strand failure.
#[macro_export]
macro_rules! assert_strand_failure {
    ($result:expr) => {
        match $result {
            Err($crate::KernelError::StrandFailure { .. }) => {}
            other => unreachable!("expected a strand failure, got {:?}", other),
        }
    };
}
