//! Runtime errors surfaced to the host.
//!
//! A Deny or a hook block always carries the specific rule or hook
//! message that caused it — silent denial is disallowed, since silent
//! policy failures are the primary source of confusing host behavior.

use thiserror::Error;

use keel_capabilities::CapabilityError;
use keel_settings::ConfigError;
use keel_settings::types::SourceTier;
use keel_tasks::TaskError;

/// An error from one session operation.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Policy resolution failed at session start.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A blocking hook vetoed the operation.
    #[error("blocked by hook '{registration}': {message}")]
    HookBlocked {
        /// The vetoing registration.
        registration: String,
        /// Its diagnostic.
        message: String,
    },

    /// A permission rule refused the action before execution.
    #[error("denied by {tier} rule '{pattern}'")]
    PermissionDenied {
        /// Source text of the denying pattern.
        pattern: String,
        /// Tier the rule came from.
        tier: SourceTier,
    },

    /// The host executor reported a runtime failure of the action itself.
    #[error("action failed: {0}")]
    ActionFailed(String),

    /// Capability promotion failed on an explicit request.
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    /// A task batch was rejected at the orchestrator boundary.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// Task delegation was attempted on a session with no task executor.
    #[error("no task executor is configured for this session")]
    NoTaskExecutor,
}
