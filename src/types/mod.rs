//! Core types: identifiers, values, cancellation.
//!
//! - [`id`]: strand identifiers
//! - [`value`]: the dynamic payload delivered into and out of computations
//! - [`cancel`]: cancellation reasons and the [`Cancellation`] handle seam

pub mod cancel;
pub mod id;
pub mod value;

pub use cancel::{CancelKind, CancelReason, Cancellation};
pub use id::StrandId;
pub use value::Value;
