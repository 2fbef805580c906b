//! The reconciliation controller: a singleton loop that converges the
//! container runtime to the desired state declared in the job store.
//!
//! The loop is level-triggered. Every pass looks at the current snapshot of
//! jobs and containers and closes the gap; missed ticks and crashes never
//! produce incorrect state because every action is idempotent and crash
//! recovery is the same algorithm as steady state.

mod controller;
mod error;
pub mod workspace;

pub use controller::{Controller, ControllerConfig};
pub use error::{ControllerError, Result};
