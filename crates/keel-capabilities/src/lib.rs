//! # keel-capabilities
//!
//! Progressive-disclosure capability loader.
//!
//! A capability is a directory containing a `CAPSULE.md` file: a short
//! `---`-delimited header (`id`, `trigger`, optional `references:` list
//! naming sibling files) followed by a markdown instruction body.
//!
//! Disclosure happens in three monotonic states per session:
//!
//! 1. **Unloaded** — only the trigger description is resident (cheap
//!    enumeration of everything available).
//! 2. **Loaded** — the instruction body has been pulled into the working
//!    context, exactly once.
//! 3. **Expanded** — one or more named reference files are also resident.
//!
//! Promotion never silently exceeds the caller's token budget: if a
//! promotion would overflow it, the loader fails closed with
//! `BudgetExceeded` and loads nothing.

#![deny(unsafe_code)]

pub mod discovery;
pub mod errors;
pub mod loader;
pub mod matching;
pub mod parser;

pub use discovery::{ScanError, ScanReport, scan_capsules};
pub use errors::CapabilityError;
pub use loader::{
    CapabilityLoader, CapabilityManifest, LoadLevel, LoadState, LoadedContent, ManifestSummary,
    ReferenceFile,
};
