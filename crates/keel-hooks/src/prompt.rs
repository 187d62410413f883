//! Prompt hook delegation.
//!
//! A prompt hook poses a bounded decision question to a secondary model
//! call instead of spawning a subprocess. The model integration lives in
//! the host; this crate only defines the seam. Prompt invocations run
//! under the same deadline as command hooks, and a missing evaluator
//! downgrades the registration to a warning.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{EventPayload, Verdict};

/// Opaque failure from a prompt evaluator.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct EvaluatorError(pub String);

impl From<String> for EvaluatorError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for EvaluatorError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Host-provided secondary-model call answering prompt hooks.
#[async_trait]
pub trait PromptEvaluator: Send + Sync {
    /// Answer a bounded decision question about one event payload.
    async fn evaluate(
        &self,
        question: &str,
        payload: &EventPayload,
    ) -> Result<Verdict, EvaluatorError>;
}
