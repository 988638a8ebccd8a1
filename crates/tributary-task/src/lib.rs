//! Task substrate for Tributary sync orchestration.
//!
//! This crate provides the small set of scheduling primitives the sync core
//! is written against:
//!
//! - **ConcurrencyGate**: bounded, FIFO admission of concurrent work
//! - **TaskSupervisor**: keyed spawning with idempotent re-submission and
//!   hierarchical teardown
//! - **SignalHub**: at-most-once-per-call delivery of change notifications
//!   to running loops
//! - **StepTimeouts**: per-step-kind execution limits
//! - **Heartbeat**: liveness reporting for long-running steps
//!
//! The core never manages raw threads; everything here rides on tokio tasks.

pub mod gate;
pub mod heartbeat;
pub mod signal;
pub mod supervisor;
pub mod timeouts;

pub use gate::{await_all, ConcurrencyGate, GateHandle};
pub use heartbeat::Heartbeat;
pub use signal::{SignalHub, SignalPayload};
pub use supervisor::TaskSupervisor;
pub use timeouts::{with_timeout, StepTimeouts};

use thiserror::Error;

/// Errors surfaced by the task substrate.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task body panicked or was aborted before settling.
    #[error("task did not settle: {0}")]
    Unsettled(String),

    /// The step exceeded its configured execution limit.
    #[error("step timed out after {0:?}")]
    TimedOut(std::time::Duration),
}
