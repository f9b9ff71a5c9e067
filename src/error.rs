//! Error types and error-handling strategy for the kernel.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - The run loop itself never surfaces an error mid-loop: every failure is
//!   routed to the strand or registration that caused it
//! - Invalid scheduling requests are rejected synchronously, never silently
//!   ignored
//! - Queue corruption is a programming-error invariant, not a user-facing
//!   error

use crate::types::{CancelReason, StrandId};
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = KernelError> = std::result::Result<T, E>;

/// The error taxonomy of the kernel.
#[derive(Debug, Clone, Error)]
pub enum KernelError {
    /// An invalid scheduling request (re-entrant `run()`, a strand waiting
    /// for itself). Rejected synchronously.
    #[error("invalid scheduling request: {0}")]
    Scheduling(String),

    /// An uncaught error surfaced from a strand's computation.
    ///
    /// Delivered to joiners of that strand; with no joiner it becomes the
    /// kernel's unhandled failure and the configured
    /// [`FailurePolicy`](crate::kernel::FailurePolicy) applies.
    #[error("strand {id} failed: {source}")]
    StrandFailure {
        /// The strand whose computation failed.
        id: StrandId,
        /// The underlying failure.
        #[source]
        source: Box<KernelError>,
    },

    /// The strand's pending wait was torn down; delivered into the
    /// computation as its resumption input. Terminal, not retryable.
    #[error("cancelled: {0}")]
    Cancelled(CancelReason),

    /// A readiness-poll failure on a watched resource. Delivered to the
    /// registered callback, never thrown out of a tick.
    #[error("io failure: {message}")]
    Io {
        /// The kind reported by the failing poll operation.
        kind: std::io::ErrorKind,
        /// Human-readable description of the failure.
        message: String,
    },

    /// A computation-level failure payload.
    #[error("{0}")]
    User(String),
}

impl KernelError {
    /// Creates a computation-level failure.
    pub fn user(message: impl Into<String>) -> Self {
        Self::User(message.into())
    }

    /// Wraps a failure with the id of the strand it escaped from.
    #[must_use]
    pub fn strand_failure(id: StrandId, source: KernelError) -> Self {
        Self::StrandFailure {
            id,
            source: Box::new(source),
        }
    }

    /// Returns true if this error is a cancellation signal.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

impl From<std::io::Error> for KernelError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_strand_id() {
        let err = KernelError::strand_failure(StrandId::new(7), KernelError::user("boom"));
        assert_eq!(err.to_string(), "strand S7 failed: boom");
        assert!(!err.is_cancelled());
    }

    #[test]
    fn cancelled_is_cancelled() {
        let err = KernelError::Cancelled(CancelReason::timeout());
        assert!(err.is_cancelled());
    }

    #[test]
    fn io_conversion_keeps_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let err = KernelError::from(io);
        match err {
            KernelError::Io { kind, .. } => assert_eq!(kind, std::io::ErrorKind::BrokenPipe),
            other => unreachable!("expected Io, got {other:?}"),
        }
    }
}
