//! Batch orchestration with a bounded worker pool.
//!
//! Concurrency model: a batch-level async mutex serializes whole batches
//! (no cross-batch backfill), and a per-batch semaphore caps how many
//! tasks run at once. Per-task timeouts are hard deadlines; a timed-out
//! task's partial output is discarded and never retried.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::timeout;
use tracing::{debug, warn};

use keel_core::ids::TaskId;

use crate::errors::TaskError;
use crate::types::{IsolatedContext, TaskRequest, TaskResult, TaskStatus};

/// Deadline applied when a request does not carry its own.
pub const DEFAULT_TASK_TIMEOUT_MS: u64 = 300_000;

/// Opaque failure from a task executor.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ExecutionError(pub String);

impl From<String> for ExecutionError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for ExecutionError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Host-provided execution of one delegated task.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run one task's prompt against its isolated context.
    async fn execute(
        &self,
        prompt: &str,
        context: &IsolatedContext,
    ) -> Result<String, ExecutionError>;
}

/// Runs batches of delegated tasks under a fixed concurrency cap.
pub struct TaskOrchestrator {
    executor: Arc<dyn TaskExecutor>,
    cap: usize,
    default_timeout_ms: u64,
    /// Serializes whole batches: a later call waits for the current batch
    /// to converge instead of backfilling its free slots.
    batch_gate: Mutex<()>,
}

impl TaskOrchestrator {
    /// Create an orchestrator with the given concurrency cap.
    ///
    /// A zero cap is treated as one.
    #[must_use]
    pub fn new(executor: Arc<dyn TaskExecutor>, cap: usize) -> Self {
        Self {
            executor,
            cap: cap.max(1),
            default_timeout_ms: DEFAULT_TASK_TIMEOUT_MS,
            batch_gate: Mutex::new(()),
        }
    }

    /// Override the default per-task deadline.
    #[must_use]
    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    /// The concurrency cap.
    #[must_use]
    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Run one batch of delegated tasks to completion.
    ///
    /// Results come back in request order. Per-task failures and timeouts
    /// are reported in their result entry and never abort siblings. The
    /// call is rejected outright when the caller's context is itself
    /// inside a delegated task.
    pub async fn run_batch(
        &self,
        caller: &IsolatedContext,
        requests: Vec<TaskRequest>,
    ) -> Result<Vec<TaskResult>, TaskError> {
        if caller.is_inside_task() {
            warn!("Rejected batch: caller is executing inside a delegated task");
            return Err(TaskError::NestedDelegation);
        }

        let _batch = self.batch_gate.lock().await;
        debug!(tasks = requests.len(), cap = self.cap, "Starting task batch");

        let semaphore = Arc::new(Semaphore::new(self.cap));
        let mut handles = Vec::with_capacity(requests.len());

        for request in requests {
            let id = TaskId::new();
            let executor = Arc::clone(&self.executor);
            let semaphore = Arc::clone(&semaphore);
            let timeout_ms = request.timeout_ms.unwrap_or(self.default_timeout_ms);
            let task_id = id.clone();

            let handle = tokio::spawn(async move {
                let permit = semaphore.acquire_owned().await;
                if permit.is_err() {
                    // The semaphore lives for the whole batch; closure is
                    // unreachable, but fail the task rather than panic.
                    return TaskResult {
                        id: task_id,
                        status: TaskStatus::Failed,
                        output: None,
                        error: Some("task slot unavailable".to_string()),
                        duration_ms: 0,
                    };
                }

                let context = request.isolated_context.delegated();
                let started = Instant::now();
                let outcome = timeout(
                    Duration::from_millis(timeout_ms),
                    executor.execute(&request.prompt, &context),
                )
                .await;
                let duration_ms =
                    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

                match outcome {
                    Ok(Ok(output)) => TaskResult {
                        id: task_id,
                        status: TaskStatus::Done,
                        output: Some(output),
                        error: None,
                        duration_ms,
                    },
                    Ok(Err(err)) => TaskResult {
                        id: task_id,
                        status: TaskStatus::Failed,
                        output: None,
                        error: Some(err.to_string()),
                        duration_ms,
                    },
                    // Partial output is discarded with the future.
                    Err(_elapsed) => TaskResult {
                        id: task_id,
                        status: TaskStatus::TimedOut,
                        output: None,
                        error: Some(format!("task timed out after {timeout_ms}ms")),
                        duration_ms,
                    },
                }
            });
            handles.push((id, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            match handle.await {
                Ok(result) => {
                    if result.status != TaskStatus::Done {
                        warn!(task = %result.id, status = %result.status, "Task did not complete");
                    }
                    results.push(result);
                }
                Err(join_err) => results.push(TaskResult {
                    id,
                    status: TaskStatus::Failed,
                    output: None,
                    error: Some(format!("task panicked: {join_err}")),
                    duration_ms: 0,
                }),
            }
        }

        debug!(results = results.len(), "Task batch converged");
        Ok(results)
    }
}
