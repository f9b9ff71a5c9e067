//! The cooperative kernel: lifecycle, strands, and wait dispatch.
//!
//! - [`kernel`]: the front-end and its run loop
//! - [`strand`]: suspendable units of work
//! - [`state`], [`config`]: lifecycle states and construction options
//!
//! The crate-private api submodule turns wait requests into event-queue and
//! IO registrations.

pub(crate) mod api;
pub mod config;
pub mod kernel;
pub mod state;
pub mod strand;

pub use config::{FailurePolicy, KernelConfig};
pub use kernel::Kernel;
pub use state::KernelState;
pub use strand::{StrandHandle, StrandState};
