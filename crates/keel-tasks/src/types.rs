//! Task request, context, and result types.

use serde::{Deserialize, Serialize};

use keel_core::ids::TaskId;

/// The context a delegated task executes against.
///
/// A disjoint copy assembled by the caller: nothing from the parent
/// session's history is inherited implicitly, and tasks never share
/// mutable state with their parent or siblings. The inside-task tag is
/// set by the orchestrator when it hands the context to a task and is
/// what makes the depth-1 rule structural rather than conventional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsolatedContext {
    /// Set once this context has been handed to a delegated task.
    inside_task: bool,
    /// Material the caller explicitly copied in for the task.
    #[serde(default)]
    pub seed: serde_json::Value,
}

impl IsolatedContext {
    /// A root-level context carrying the given seed material.
    #[must_use]
    pub fn new(seed: serde_json::Value) -> Self {
        Self {
            inside_task: false,
            seed,
        }
    }

    /// Whether this context belongs to an executing delegated task.
    #[must_use]
    pub fn is_inside_task(&self) -> bool {
        self.inside_task
    }

    /// Tag this context as belonging to a delegated task.
    #[must_use]
    pub(crate) fn delegated(mut self) -> Self {
        self.inside_task = true;
        self
    }
}

/// One delegated-task request within a batch.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    /// The instruction the task executes.
    pub prompt: String,
    /// Caller-assembled disjoint context.
    pub isolated_context: IsolatedContext,
    /// Per-task deadline; falls back to the orchestrator default.
    pub timeout_ms: Option<u64>,
}

impl TaskRequest {
    /// A request with an empty context and the default deadline.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            isolated_context: IsolatedContext::default(),
            timeout_ms: None,
        }
    }

    /// Attach the caller-assembled context.
    #[must_use]
    pub fn with_context(mut self, context: IsolatedContext) -> Self {
        self.isolated_context = context;
        self
    }

    /// Set a per-task deadline.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Lifecycle status of one delegated task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    /// Accepted, waiting for a slot in its batch.
    Queued,
    /// Executing.
    Running,
    /// Finished successfully.
    Done,
    /// The executor reported a failure.
    Failed,
    /// The deadline passed; partial output was discarded.
    TimedOut,
}

impl TaskStatus {
    /// Whether this status is terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::TimedOut)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timedOut"),
        }
    }
}

/// The per-task entry in a batch result, in request order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    /// Task id assigned at submission.
    pub id: TaskId,
    /// Terminal status.
    pub status: TaskStatus,
    /// Executor output; present only for `Done`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Failure or timeout diagnostic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock execution time.
    pub duration_ms: u64,
}
