//! # keel-hooks
//!
//! Lifecycle hook dispatcher for the Keel runtime.
//!
//! Hook registrations come from the resolved policy
//! ([`keel_settings::EffectivePolicy`]) and fire at defined lifecycle
//! points ([`keel_core::event::EventKind`]). For one event firing,
//! matching registrations run sequentially in registration order; a
//! rewritten payload from registration *i* is visible to registration
//! *i + 1* and to the eventual action.
//!
//! ## Callables
//!
//! Two kinds of registered action exist, dispatched through one uniform
//! invoke path:
//! - **Command**: an isolated subprocess; payload JSON on stdin, verdict
//!   JSON on stdout, exit-code contract (`0` proceed, `2` block, anything
//!   else a non-blocking warning).
//! - **Prompt**: a bounded decision question delegated to a host-provided
//!   [`PromptEvaluator`](prompt::PromptEvaluator).
//!
//! ## Deadlines
//!
//! Every invocation runs under a hard deadline. A timeout is treated as a
//! warning, never a block — an unresponsive hook must not become a
//! denial-of-service on the session.
//!
//! Hooks cannot reach the task orchestrator: the dispatcher exposes no
//! delegation surface, which closes off recursive fan-out through hook
//! callbacks structurally.

#![deny(unsafe_code)]

pub mod command;
pub mod dispatcher;
pub mod errors;
pub mod prompt;
pub mod types;

pub use dispatcher::HookDispatcher;
pub use errors::HookError;
pub use prompt::PromptEvaluator;
pub use types::{EventPayload, FiringOutcome, FiringStatus, RegistrationRecord, Verdict};
