//! Capability loader errors.

use keel_core::ids::ManifestId;
use thiserror::Error;

/// An error from capability promotion.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// No manifest with this id was discovered.
    #[error("unknown capability manifest '{id}'")]
    UnknownManifest {
        /// Requested id.
        id: ManifestId,
    },

    /// The manifest declares no reference file with this name.
    #[error("capability '{id}' has no reference named '{name}'")]
    UnknownReference {
        /// Manifest id.
        id: ManifestId,
        /// Requested reference name.
        name: String,
    },

    /// Promoting would overflow the resident-content budget.
    ///
    /// The promotion was declined in full; nothing was loaded. The caller
    /// may retry after freeing budget (e.g. via compaction).
    #[error(
        "loading capability '{id}' needs {needed_tokens} tokens but only \
         {available_tokens} of the {budget_tokens}-token budget remain"
    )]
    BudgetExceeded {
        /// Manifest id whose promotion was declined.
        id: ManifestId,
        /// Tokens the promotion would have added.
        needed_tokens: u64,
        /// Tokens still unspent under the budget.
        available_tokens: u64,
        /// Total budget.
        budget_tokens: u64,
    },

    /// A capsule or reference file could not be read at promotion time.
    #[error("failed to read capability content at {path}: {source}")]
    Io {
        /// File that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
