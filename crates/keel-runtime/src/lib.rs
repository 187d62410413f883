//! # keel-runtime
//!
//! Session wiring for the Keel runtime core.
//!
//! A [`Session`] owns one resolved policy and threads every attempted
//! action through the full control flow:
//!
//! 1. Pre-action hooks fire (may veto, or rewrite the request).
//! 2. The permission rule engine classifies the (possibly rewritten)
//!    action: deny, ask, or allow.
//! 3. Allowed actions execute through the host's [`ActionExecutor`].
//! 4. Post-action hooks observe the result.
//!
//! Capabilities load lazily as prompts trigger them; delegated task
//! batches run through the bounded orchestrator; and the context tracker
//! observes all of it to decide when to request compaction. Hooks have no
//! path to the orchestrator — delegation happens only through the session
//! surface — so recursive fan-out through hook callbacks cannot happen.

#![deny(unsafe_code)]

pub mod errors;
pub mod session;

pub use errors::RuntimeError;
pub use session::{ActionError, ActionExecutor, ActionOutcome, Session};
