//! Lifecycle event kinds.
//!
//! Hooks register against an [`EventKind`] and fire when the runtime reaches
//! that point in the session lifecycle.

use serde::{Deserialize, Serialize};

/// A point in the session lifecycle that hooks can attach to.
///
/// Some kinds are forced-blocking — their hooks can veto or rewrite the
/// operation, so the runtime always waits for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Before a requested action executes. Forced-blocking.
    PreAction,
    /// After a requested action has executed.
    PostAction,
    /// When a session starts.
    SessionStart,
    /// When a session ends.
    SessionEnd,
    /// When the user submits a prompt. Forced-blocking.
    UserPromptSubmit,
    /// Before context compaction. Forced-blocking.
    PreCompact,
    /// Informational notification.
    Notification,
}

impl EventKind {
    /// Returns `true` if hooks for this event always run in blocking mode.
    ///
    /// Forced-blocking events can affect session flow (veto an action,
    /// rewrite a payload, prevent compaction), so the dispatcher must wait
    /// for their verdicts.
    #[must_use]
    pub fn is_forced_blocking(self) -> bool {
        matches!(
            self,
            Self::PreAction | Self::UserPromptSubmit | Self::PreCompact
        )
    }

    /// Returns all event kind variants.
    #[must_use]
    pub fn all() -> &'static [EventKind] {
        &[
            Self::PreAction,
            Self::PostAction,
            Self::SessionStart,
            Self::SessionEnd,
            Self::UserPromptSubmit,
            Self::PreCompact,
            Self::Notification,
        ]
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PreAction => write!(f, "PreAction"),
            Self::PostAction => write!(f, "PostAction"),
            Self::SessionStart => write!(f, "SessionStart"),
            Self::SessionEnd => write!(f, "SessionEnd"),
            Self::UserPromptSubmit => write!(f, "UserPromptSubmit"),
            Self::PreCompact => write!(f, "PreCompact"),
            Self::Notification => write!(f, "Notification"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forced_blocking_kinds() {
        assert!(EventKind::PreAction.is_forced_blocking());
        assert!(EventKind::UserPromptSubmit.is_forced_blocking());
        assert!(EventKind::PreCompact.is_forced_blocking());
    }

    #[test]
    fn test_observational_kinds_not_forced_blocking() {
        assert!(!EventKind::PostAction.is_forced_blocking());
        assert!(!EventKind::SessionStart.is_forced_blocking());
        assert!(!EventKind::SessionEnd.is_forced_blocking());
        assert!(!EventKind::Notification.is_forced_blocking());
    }

    #[test]
    fn test_all_returns_seven_variants() {
        assert_eq!(EventKind::all().len(), 7);
    }

    #[test]
    fn test_display() {
        assert_eq!(EventKind::PreAction.to_string(), "PreAction");
        assert_eq!(EventKind::PreCompact.to_string(), "PreCompact");
    }

    #[test]
    fn test_serde_roundtrip() {
        for kind in EventKind::all() {
            let json = serde_json::to_string(kind).unwrap();
            let back: EventKind = serde_json::from_str(&json).unwrap();
            assert_eq!(&back, kind);
        }
    }
}
