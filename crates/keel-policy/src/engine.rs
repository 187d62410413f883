//! Rule evaluation engine.
//!
//! Evaluation order per descriptor: scan Deny rules across all tiers from
//! highest to lowest; first match wins and short-circuits. If no Deny
//! matches, scan Ask the same way, then Allow. Within one tier and scope,
//! first-registered wins (a documented assumption, not a confirmed
//! contract — see DESIGN.md).

use serde::{Deserialize, Serialize};
use tracing::debug;

use keel_core::descriptor::ActionDescriptor;
use keel_settings::types::{EffectivePolicy, RuleScope, SourceTier};

/// The rule that decided a classification, for surfacing to the user.
///
/// Silent denial is disallowed by design: a Deny always carries the pattern
/// and tier that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedRule {
    /// Source text of the matching pattern.
    pub pattern: String,
    /// Tier the rule came from.
    pub tier: SourceTier,
}

/// The outcome of classifying one descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    /// The decision.
    pub scope: RuleScope,
    /// The deciding rule, or `None` for the unmatched-default Ask.
    pub matched: Option<MatchedRule>,
}

impl Classification {
    /// The unmatched default: ask.
    #[must_use]
    pub fn default_ask() -> Self {
        Self {
            scope: RuleScope::Ask,
            matched: None,
        }
    }

    /// Whether the action was refused.
    #[must_use]
    pub fn is_denied(&self) -> bool {
        self.scope == RuleScope::Deny
    }

    /// Whether the action may proceed without approval.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.scope == RuleScope::Allow
    }
}

/// Stateless rule engine over a resolved policy.
pub struct RuleEngine;

impl RuleEngine {
    /// Classify a descriptor against the policy's rules.
    ///
    /// The policy's rule list is already sorted by tier precedence with
    /// registration order preserved within a tier, so a single pass per
    /// scope gives the required ordering.
    #[must_use]
    pub fn classify(policy: &EffectivePolicy, descriptor: &ActionDescriptor) -> Classification {
        for scope in [RuleScope::Deny, RuleScope::Ask, RuleScope::Allow] {
            for rule in policy.rules() {
                if rule.scope == scope && rule.pattern.matches(descriptor) {
                    debug!(
                        descriptor = %descriptor,
                        scope = %scope,
                        tier = %rule.tier,
                        pattern = %rule.pattern,
                        "Rule matched"
                    );
                    return Classification {
                        scope,
                        matched: Some(MatchedRule {
                            pattern: rule.pattern.source().to_string(),
                            tier: rule.tier,
                        }),
                    };
                }
            }
        }

        debug!(descriptor = %descriptor, "No rule matched, defaulting to ask");
        Classification::default_ask()
    }
}
