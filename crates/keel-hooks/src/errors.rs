//! Hook invocation errors.
//!
//! None of these abort a firing on their own: the dispatcher downgrades
//! every invocation error to a warning in the firing record. They exist so
//! the invocation paths can report precisely what went wrong.

use thiserror::Error;

/// An error invoking one hook registration.
#[derive(Debug, Error)]
pub enum HookError {
    /// The invocation exceeded its deadline and was killed.
    #[error("hook '{name}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Registration name.
        name: String,
        /// Deadline that was exceeded.
        timeout_ms: u64,
    },

    /// The subprocess could not be spawned or its pipes failed.
    #[error("hook '{name}' failed to run: {source}")]
    Process {
        /// Registration name.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The event payload could not be serialized for delivery.
    #[error("hook '{name}' payload could not be serialized: {source}")]
    Payload {
        /// Registration name.
        name: String,
        /// Underlying serialization error.
        #[source]
        source: serde_json::Error,
    },

    /// The hook's stdout was not valid verdict JSON.
    #[error("hook '{name}' produced an unreadable verdict: {source}")]
    Verdict {
        /// Registration name.
        name: String,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A prompt registration fired but no evaluator is configured.
    #[error("hook '{name}' is a prompt hook but no prompt evaluator is configured")]
    NoEvaluator {
        /// Registration name.
        name: String,
    },

    /// The prompt evaluator itself failed.
    #[error("prompt evaluation for hook '{name}' failed: {message}")]
    Evaluator {
        /// Registration name.
        name: String,
        /// Evaluator-reported failure.
        message: String,
    },
}
