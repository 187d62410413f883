//! Settings error types.

use thiserror::Error;

use crate::types::SourceTier;

/// Errors that can occur while resolving policy sources.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A policy source document failed to parse.
    #[error("Malformed {tier} policy source: {message}")]
    MalformedSource {
        /// Tier the source came from.
        tier: SourceTier,
        /// Parse failure detail.
        message: String,
    },

    /// A permission rule entry was invalid.
    #[error("Invalid rule in {tier} policy: {message}")]
    InvalidRule {
        /// Tier the rule came from.
        tier: SourceTier,
        /// Validation failure detail.
        message: String,
    },

    /// A hook registration entry was invalid.
    #[error("Invalid hook registration in {tier} policy: {message}")]
    InvalidHook {
        /// Tier the registration came from.
        tier: SourceTier,
        /// Validation failure detail.
        message: String,
    },

    /// Tunables failed to deserialize after merging.
    #[error("Tunables error: {0}")]
    Tunables(#[from] serde_json::Error),
}
