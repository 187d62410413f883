//! Action descriptors.
//!
//! An [`ActionDescriptor`] is the normalized representation of a requested
//! action, used as the matching target for permission rules and hook
//! matchers. Command-like actions match against their normalized command
//! line; filesystem actions match against their path.

use serde::{Deserialize, Serialize};

/// A requested action, in the form rules match against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ActionDescriptor {
    /// A command-like action (e.g. a shell invocation).
    #[serde(rename_all = "camelCase")]
    Command {
        /// The full command line as requested.
        line: String,
    },
    /// A filesystem action targeting a path.
    #[serde(rename_all = "camelCase")]
    Path {
        /// The target path as requested.
        path: String,
    },
}

impl ActionDescriptor {
    /// Create a command descriptor.
    #[must_use]
    pub fn command(line: impl Into<String>) -> Self {
        Self::Command { line: line.into() }
    }

    /// Create a path descriptor.
    #[must_use]
    pub fn path(path: impl Into<String>) -> Self {
        Self::Path { path: path.into() }
    }

    /// The matching target string for this descriptor.
    ///
    /// Command lines are whitespace-normalized so that rule prefixes match
    /// regardless of incidental spacing. Paths are returned as-is.
    #[must_use]
    pub fn match_target(&self) -> String {
        match self {
            Self::Command { line } => normalize_whitespace(line),
            Self::Path { path } => path.clone(),
        }
    }

    /// Returns `true` for command-like descriptors.
    #[must_use]
    pub fn is_command(&self) -> bool {
        matches!(self, Self::Command { .. })
    }
}

impl std::fmt::Display for ActionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Command { line } => write!(f, "command:{line}"),
            Self::Path { path } => write!(f, "path:{path}"),
        }
    }
}

/// Collapse runs of whitespace into single spaces and trim the ends.
#[must_use]
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_match_target_normalizes_whitespace() {
        let d = ActionDescriptor::command("  git   commit  -m 'x'  ");
        assert_eq!(d.match_target(), "git commit -m 'x'");
    }

    #[test]
    fn test_command_match_target_collapses_tabs_and_newlines() {
        let d = ActionDescriptor::command("rm\t-rf\n/tmp/x");
        assert_eq!(d.match_target(), "rm -rf /tmp/x");
    }

    #[test]
    fn test_path_match_target_unchanged() {
        let d = ActionDescriptor::path("/etc/passwd");
        assert_eq!(d.match_target(), "/etc/passwd");
    }

    #[test]
    fn test_is_command() {
        assert!(ActionDescriptor::command("ls").is_command());
        assert!(!ActionDescriptor::path("/tmp").is_command());
    }

    #[test]
    fn test_display() {
        assert_eq!(ActionDescriptor::command("ls").to_string(), "command:ls");
        assert_eq!(ActionDescriptor::path("/x").to_string(), "path:/x");
    }

    #[test]
    fn test_serde_tag() {
        let d = ActionDescriptor::command("ls");
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.contains("\"kind\":\"command\""));
        let back: ActionDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn test_normalize_whitespace_empty() {
        assert_eq!(normalize_whitespace("   "), "");
        assert_eq!(normalize_whitespace(""), "");
    }
}
