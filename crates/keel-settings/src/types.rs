//! Policy source and effective policy types.
//!
//! [`PolicyDocument`] is the on-the-wire shape of one configuration tier
//! (unknown fields ignored for forward compatibility). [`EffectivePolicy`]
//! is the resolved, flattened result the rest of the runtime consumes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use keel_core::event::EventKind;
use keel_core::pattern::Pattern;

/// Configuration source tier, highest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceTier {
    /// Enterprise-managed mandatory policy.
    Enterprise,
    /// Explicit override appended at runtime (e.g. a one-off user grant).
    RuntimeOverride,
    /// Local untracked configuration.
    Local,
    /// Shared project configuration.
    Project,
    /// User-global configuration.
    User,
}

impl SourceTier {
    /// Precedence rank; lower is higher precedence.
    #[must_use]
    pub fn precedence(self) -> u8 {
        match self {
            Self::Enterprise => 0,
            Self::RuntimeOverride => 1,
            Self::Local => 2,
            Self::Project => 3,
            Self::User => 4,
        }
    }

    /// All tiers in precedence order, highest first.
    #[must_use]
    pub fn all() -> &'static [SourceTier] {
        &[
            Self::Enterprise,
            Self::RuntimeOverride,
            Self::Local,
            Self::Project,
            Self::User,
        ]
    }
}

impl std::fmt::Display for SourceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Enterprise => write!(f, "enterprise"),
            Self::RuntimeOverride => write!(f, "runtime-override"),
            Self::Local => write!(f, "local"),
            Self::Project => write!(f, "project"),
            Self::User => write!(f, "user"),
        }
    }
}

/// What a matching permission rule decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleScope {
    /// Action proceeds without approval.
    Allow,
    /// Action requires manual approval.
    Ask,
    /// Action is refused.
    Deny,
}

impl std::fmt::Display for RuleScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Ask => write!(f, "ask"),
            Self::Deny => write!(f, "deny"),
        }
    }
}

/// One permission rule entry as written in a policy document.
///
/// Exactly one of `prefix` or `glob` must be set; which one decides the
/// pattern family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSpec {
    /// Decision this rule produces on match.
    pub scope: RuleScope,
    /// Literal command-line prefix (prefix family).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Path glob (glob family).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glob: Option<String>,
}

/// One hook registration entry as written in a policy document.
///
/// Exactly one of `command` or `prompt` must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookSpec {
    /// Optional registration name (defaulted from tier/event/index).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Optional descriptor matcher, prefix family.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Optional descriptor matcher, glob family.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glob: Option<String>,
    /// Command callable: program followed by arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// Prompt callable: a bounded decision question for a secondary model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Hard deadline in milliseconds (falls back to the tunable default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Whether the dispatcher waits for this hook's verdict.
    #[serde(default = "default_true")]
    pub blocking: bool,
}

fn default_true() -> bool {
    true
}

/// One configuration tier's document.
///
/// Unknown top-level fields are ignored for forward compatibility.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyDocument {
    /// Permission rules, in registration order.
    pub rules: Vec<RuleSpec>,
    /// Hook registrations keyed by event kind, in registration order.
    pub hooks: HashMap<EventKind, Vec<HookSpec>>,
    /// Scalar tunables; merged first-set-wins across tiers.
    pub tunables: serde_json::Value,
}

/// Scalar runtime tunables after tier merging and env overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeTunables {
    /// Maximum concurrently running delegated tasks per batch.
    pub task_cap: usize,
    /// Default hook deadline in milliseconds.
    pub hook_timeout_ms: u64,
    /// Fraction of the context budget that triggers compaction.
    pub compaction_threshold: f64,
    /// Token budget for resident capability content.
    pub capability_budget_tokens: u64,
    /// Total session context budget in tokens.
    pub context_budget_tokens: u64,
}

impl Default for RuntimeTunables {
    fn default() -> Self {
        Self {
            task_cap: 10,
            hook_timeout_ms: 60_000,
            compaction_threshold: 0.85,
            capability_budget_tokens: 24_000,
            context_budget_tokens: 200_000,
        }
    }
}

/// A resolved permission rule with tier provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionRule {
    /// Decision on match.
    pub scope: RuleScope,
    /// Compiled pattern.
    pub pattern: Pattern,
    /// Tier this rule came from.
    pub tier: SourceTier,
}

/// The action a registered hook runs.
///
/// A closed set — hooks are either subprocess commands or prompt delegations
/// to a secondary model, dispatched through one uniform invoke path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookCallable {
    /// Spawn a subprocess; payload on stdin, verdict on stdout.
    Command {
        /// Program to execute.
        program: String,
        /// Arguments.
        args: Vec<String>,
    },
    /// Delegate a bounded decision question to a secondary model call.
    Prompt {
        /// The decision question text.
        text: String,
    },
}

/// A resolved hook registration with tier provenance.
#[derive(Debug, Clone)]
pub struct HookRegistration {
    /// Registration name, unique within its tier.
    pub name: String,
    /// Event this hook fires on.
    pub event: EventKind,
    /// Optional descriptor matcher; `None` matches every firing.
    pub matcher: Option<Pattern>,
    /// What to invoke.
    pub callable: HookCallable,
    /// Hard deadline in milliseconds.
    pub timeout_ms: u64,
    /// Whether the dispatcher waits for the verdict.
    pub blocking: bool,
    /// Tier this registration came from.
    pub tier: SourceTier,
}

/// The resolved, flattened policy for one session.
///
/// Immutable for the session lifetime except for explicit overrides appended
/// via [`EffectivePolicy::grant_once`]. Never a process-wide singleton:
/// every component receives the policy it should operate under, so multiple
/// sessions with independent policies can coexist in-process.
#[derive(Debug, Clone, Default)]
pub struct EffectivePolicy {
    /// Rules sorted by tier precedence (stable within a tier).
    rules: Vec<PermissionRule>,
    /// Registrations per event, tier precedence order, stable within a tier.
    hooks: HashMap<EventKind, Vec<HookRegistration>>,
    /// Merged scalar tunables.
    tunables: RuntimeTunables,
}

impl EffectivePolicy {
    /// Build a policy from already-ordered parts. Used by the resolver.
    #[must_use]
    pub(crate) fn from_parts(
        rules: Vec<PermissionRule>,
        hooks: HashMap<EventKind, Vec<HookRegistration>>,
        tunables: RuntimeTunables,
    ) -> Self {
        Self {
            rules,
            hooks,
            tunables,
        }
    }

    /// All permission rules, tier precedence order.
    #[must_use]
    pub fn rules(&self) -> &[PermissionRule] {
        &self.rules
    }

    /// Hook registrations for an event, tier precedence order.
    #[must_use]
    pub fn hooks_for(&self, event: EventKind) -> &[HookRegistration] {
        self.hooks.get(&event).map_or(&[], Vec::as_slice)
    }

    /// Total number of hook registrations across all events.
    #[must_use]
    pub fn hook_count(&self) -> usize {
        self.hooks.values().map(Vec::len).sum()
    }

    /// Scalar tunables.
    #[must_use]
    pub fn tunables(&self) -> &RuntimeTunables {
        &self.tunables
    }

    /// Append a one-off Allow rule at the runtime-override tier.
    ///
    /// This is the only sanctioned mutation after resolution: a user
    /// granting one-off permission. An enterprise Deny still dominates the
    /// appended rule.
    pub fn grant_once(&mut self, pattern: Pattern) {
        tracing::debug!(pattern = %pattern, "Appending one-off allow grant");
        self.rules.push(PermissionRule {
            scope: RuleScope::Allow,
            pattern,
            tier: SourceTier::RuntimeOverride,
        });
        self.rules
            .sort_by_key(|r| r.tier.precedence());
    }
}
