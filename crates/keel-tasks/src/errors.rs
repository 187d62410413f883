//! Task orchestration errors.
//!
//! Failures of individual tasks are not errors here — they are reported
//! per-task in the batch result so one misbehaving task cannot abort its
//! siblings. Only boundary violations reject the whole call.

use thiserror::Error;

/// An error rejecting a batch at the orchestrator boundary.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The caller is itself executing inside a delegated task.
    #[error("delegated tasks cannot spawn tasks of their own (delegation depth is capped at 1)")]
    NestedDelegation,
}
