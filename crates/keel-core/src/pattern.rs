//! Rule patterns.
//!
//! Two pattern families exist, matched to the descriptor family:
//!
//! - **Prefix**: literal prefix match against a whitespace-normalized command
//!   line. Deliberately not regex — prefix rules stay auditable and cheap.
//! - **Path glob**: standard glob semantics (`*`, `**`, directory anchors)
//!   compiled via `globset`.

use globset::{GlobBuilder, GlobMatcher};

use crate::descriptor::{ActionDescriptor, normalize_whitespace};

/// A compiled rule pattern.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Literal prefix over a normalized command line.
    Prefix(String),
    /// Path glob with `**` support.
    PathGlob {
        /// The glob source text, kept for display and equality.
        source: String,
        /// Compiled matcher.
        matcher: GlobMatcher,
    },
}

impl Pattern {
    /// Compile a prefix pattern. The prefix itself is normalized so rule
    /// authors get the same whitespace treatment descriptors do.
    #[must_use]
    pub fn prefix(prefix: &str) -> Self {
        Self::Prefix(normalize_whitespace(prefix))
    }

    /// Compile a path glob pattern.
    ///
    /// `literal_separator` is enabled so `*` does not cross `/` boundaries;
    /// `**` is required to span directories, matching ignore-file semantics.
    pub fn path_glob(glob: &str) -> Result<Self, globset::Error> {
        let matcher = GlobBuilder::new(glob)
            .literal_separator(true)
            .build()?
            .compile_matcher();
        Ok(Self::PathGlob {
            source: glob.to_string(),
            matcher,
        })
    }

    /// Whether this pattern matches the given descriptor.
    ///
    /// A pattern only matches descriptors of its own family: prefix patterns
    /// never match path descriptors and vice versa.
    #[must_use]
    pub fn matches(&self, descriptor: &ActionDescriptor) -> bool {
        match (self, descriptor) {
            (Self::Prefix(prefix), ActionDescriptor::Command { .. }) => {
                descriptor.match_target().starts_with(prefix.as_str())
            }
            (Self::PathGlob { matcher, .. }, ActionDescriptor::Path { path }) => {
                matcher.is_match(path)
            }
            _ => false,
        }
    }

    /// The pattern's source text.
    #[must_use]
    pub fn source(&self) -> &str {
        match self {
            Self::Prefix(prefix) => prefix,
            Self::PathGlob { source, .. } => source,
        }
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Prefix(a), Self::Prefix(b)) => a == b,
            (Self::PathGlob { source: a, .. }, Self::PathGlob { source: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Eq for Pattern {}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prefix(prefix) => write!(f, "prefix:{prefix}"),
            Self::PathGlob { source, .. } => write!(f, "glob:{source}"),
        }
    }
}
