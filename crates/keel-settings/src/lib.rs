//! # keel-settings
//!
//! Layered configuration resolution for the Keel runtime.
//!
//! Policy comes from up to five tiers, highest precedence first: enterprise,
//! runtime override, local, project, user. The resolver merges them into one
//! [`EffectivePolicy`](types::EffectivePolicy):
//!
//! - scalar tunables: the highest tier that sets a field wins (deep merge)
//! - permission rules and hook registrations: concatenated across tiers with
//!   tier provenance preserved on each entry, so downstream engines can
//!   enforce tier precedence rather than list order alone
//!
//! A malformed enterprise source is fatal — the session must not start with
//! an unresolvable mandatory policy. Malformed lower-tier sources are
//! dropped with a warning.

#![deny(unsafe_code)]

pub mod errors;
pub mod resolver;
pub mod types;

pub use errors::ConfigError;
pub use resolver::{PolicySource, resolve};
pub use types::{
    EffectivePolicy, HookCallable, HookRegistration, PermissionRule, RuleScope, RuntimeTunables,
    SourceTier,
};
