//! # keel-tasks
//!
//! Bounded-concurrency orchestrator for delegated sub-tasks.
//!
//! A batch of [`TaskRequest`]s runs with at most `cap` tasks in flight.
//! Batches are deliberately coarse: a queued request only starts when a
//! slot in its *own* batch frees, and a concurrent `run_batch` call waits
//! for the whole previous batch to converge rather than backfilling its
//! free slots. Predictability over throughput.
//!
//! Each task executes against a caller-assembled [`IsolatedContext`] — a
//! disjoint copy, never shared mutable state. Delegation depth is capped
//! at one structurally: every context handed to a task is tagged
//! inside-task, and `run_batch` refuses callers carrying that tag.

#![deny(unsafe_code)]

pub mod errors;
pub mod orchestrator;
pub mod types;

pub use errors::TaskError;
pub use orchestrator::{ExecutionError, TaskExecutor, TaskOrchestrator};
pub use types::{IsolatedContext, TaskRequest, TaskResult, TaskStatus};
